//! Incremental log scanning.
//!
//! A [`Watcher`] polls the container runtime on a fixed interval. For every
//! running container it fetches the log output written since the last poll,
//! keeps the lines matching the configured error patterns and hands each one
//! to the consumer of [`Watcher::events`] as a [`MatchedLog`].
//!
//! A container seen for the first time only gets its cursor set to the
//! current time, so pre-existing log output is never reported.

pub mod handoff;
#[cfg(test)]
pub(crate) mod mock;
mod offsets;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use regex::bytes::Regex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::container::{Container, ContainerClient, ContainerClientError};
use crate::logging::Logger;
use crate::logline::{self, MalformedLineError, MatchedLine};
use handoff::{HandoffReceiver, HandoffSender, SendError};
use offsets::OffsetStore;

/// Listing failures in a row after which the watcher gives up.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;
pub const DEFAULT_ERROR_PATTERN: &str = "ERROR";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedLog {
    pub container: Container,
    pub line: MatchedLine,
}

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub interval: Duration,
    pub error_patterns: Vec<String>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            error_patterns: vec![DEFAULT_ERROR_PATTERN.to_string()],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("Invalid error pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("Poll interval must be greater than zero")]
    ZeroInterval,
    #[error("Failed to list containers: {0}")]
    ListContainers(#[source] ContainerClientError),
    #[error("Failed to get logs for container {id}: {source}")]
    FetchLogs {
        id: String,
        source: ContainerClientError,
    },
    #[error("Failed to decode logs for container {id}: {source}")]
    Decode {
        id: String,
        source: MalformedLineError,
    },
    #[error("Failed to parse timestamp {value:?}: {reason}")]
    Timestamp { value: String, reason: String },
    #[error("Watcher cancelled")]
    Cancelled,
    #[error("Event receiver closed")]
    ChannelClosed,
}

impl From<SendError> for WatcherError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Cancelled => WatcherError::Cancelled,
            SendError::Closed => WatcherError::ChannelClosed,
        }
    }
}

fn now_since() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &[u8]) -> Result<DateTime<FixedOffset>, WatcherError> {
    let text = std::str::from_utf8(raw).map_err(|e| WatcherError::Timestamp {
        value: String::from_utf8_lossy(raw).into_owned(),
        reason: e.to_string(),
    })?;
    DateTime::parse_from_rfc3339(text).map_err(|e| WatcherError::Timestamp {
        value: text.to_string(),
        reason: e.to_string(),
    })
}

struct WatcherInner {
    client: Arc<dyn ContainerClient>,
    interval: Duration,
    patterns: Vec<Regex>,
    offsets: OffsetStore,
    log: Logger,
}

pub struct Watcher {
    inner: Arc<WatcherInner>,
    events_tx: HandoffSender<MatchedLog>,
    events_rx: Option<HandoffReceiver<MatchedLog>>,
}

impl Watcher {
    pub fn new(
        client: Arc<dyn ContainerClient>,
        opts: WatcherOptions,
        log: Logger,
    ) -> Result<Self, WatcherError> {
        if opts.interval.is_zero() {
            return Err(WatcherError::ZeroInterval);
        }
        let patterns = logline::compile_patterns(&opts.error_patterns)
            .map_err(|(pattern, source)| WatcherError::InvalidPattern { pattern, source })?;

        let (events_tx, events_rx) = handoff::channel();

        Ok(Self {
            inner: Arc::new(WatcherInner {
                client,
                interval: opts.interval,
                patterns,
                offsets: OffsetStore::default(),
                log,
            }),
            events_tx,
            events_rx: Some(events_rx),
        })
    }

    /// The receiving end of the event channel. Only the first call returns
    /// it.
    pub fn events(&mut self) -> Option<HandoffReceiver<MatchedLog>> {
        self.events_rx.take()
    }

    /// Spawns the poll loop and returns immediately.
    ///
    /// The loop runs until `cancel` fires or the runtime could not be listed
    /// [`MAX_CONSECUTIVE_FAILURES`] times in a row. The returned handle
    /// completes once the loop has stopped.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move { inner.run(&events_tx, &cancel).await })
    }

    /// Closes the event channel.
    ///
    /// Call only after cancelling the loop and waiting for its handle. The
    /// receiver sees the end of the channel once no loop holds a sender.
    pub fn cleanup(self) {
        self.inner.log.debug(format_args!("Closing event channel"));
        drop(self.events_tx);
    }
}

impl WatcherInner {
    async fn run(&self, events: &HandoffSender<MatchedLog>, cancel: &CancellationToken) {
        // Like a plain ticker: first check one interval after start.
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.log.debug(format_args!("Watcher cancelled, stopping poll loop"));
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.check_containers(events, cancel).await {
                Ok(()) => consecutive_failures = 0,
                Err(WatcherError::Cancelled) => {
                    self.log.debug(format_args!("Watcher cancelled, stopping poll loop"));
                    return;
                }
                Err(WatcherError::ChannelClosed) => {
                    self.log
                        .error(format_args!("Event receiver closed, stopping poll loop"));
                    return;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.log.error(format_args!(
                        "{e} (attempt {consecutive_failures}/{MAX_CONSECUTIVE_FAILURES})"
                    ));
                }
            }

            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                self.log.error(format_args!(
                    "Too many consecutive failures, stopping poll loop"
                ));
                return;
            }
        }
    }

    /// One poll cycle. Only a failed listing (or cancellation) is an error;
    /// problems with a single container are logged and skipped.
    async fn check_containers(
        &self,
        events: &HandoffSender<MatchedLog>,
        cancel: &CancellationToken,
    ) -> Result<(), WatcherError> {
        let containers = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WatcherError::Cancelled),
            res = self.client.running_containers() => res.map_err(WatcherError::ListContainers)?,
        };

        for container in containers {
            match self.process_container_logs(&container, events, cancel).await {
                Ok(()) => {}
                Err(e @ (WatcherError::Cancelled | WatcherError::ChannelClosed)) => return Err(e),
                Err(e) => self
                    .log
                    .error(format_args!("Failed to process container logs: {e}")),
            }
        }

        Ok(())
    }

    async fn process_container_logs(
        &self,
        container: &Container,
        events: &HandoffSender<MatchedLog>,
        cancel: &CancellationToken,
    ) -> Result<(), WatcherError> {
        let Some(since) = self.offsets.get(&container.id) else {
            self.offsets.set(&container.id, now_since());
            self.log.debug(format_args!(
                "First time seeing container {} ({})",
                container.name, container.id
            ));
            return Ok(());
        };

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WatcherError::Cancelled),
            res = self.client.container_logs(&container.id, &since, 0) => {
                res.map_err(|source| WatcherError::FetchLogs {
                    id: container.id.clone(),
                    source,
                })?
            }
        };

        let matched = logline::find_matched_lines(&self.patterns, &raw).map_err(|source| {
            WatcherError::Decode {
                id: container.id.clone(),
                source,
            }
        })?;
        if matched.is_empty() {
            return Ok(());
        }

        let since_time = parse_timestamp(since.as_bytes())?;

        // Docker's `since` is not trusted to be exclusive, lines at or before
        // the cursor were already reported.
        let mut fresh = Vec::with_capacity(matched.len());
        for line in matched {
            if parse_timestamp(&line.timestamp)? > since_time {
                fresh.push(line);
            }
        }
        // Every fresh line is after `since`, so the cursor only moves forward.
        let next_since = fresh
            .last()
            .map(|line| String::from_utf8_lossy(&line.timestamp).into_owned());

        for line in fresh {
            self.log.debug(format_args!(
                "Matched line in container {}: {}",
                container.name,
                String::from_utf8_lossy(&line.content)
            ));
            let matched_log = MatchedLog {
                container: container.clone(),
                line,
            };
            events.send(matched_log, cancel).await?;
        }

        if let Some(next_since) = next_since {
            self.offsets.set(&container.id, next_since);
        }

        Ok(())
    }
}
