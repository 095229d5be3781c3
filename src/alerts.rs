//! Turns matched log lines into notifier messages.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::logging::Logger;
use crate::notify::Notifier;
use crate::watcher::MatchedLog;
use crate::watcher::handoff::HandoffReceiver;

/// Time allowed for delivering a single alert.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(2);
/// Longest excerpt of the log line put into a message, in bytes.
const MAX_LINE_LEN: usize = 100;

fn truncate(line: &str, max: usize) -> &str {
    if line.len() <= max {
        return line;
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

pub fn prepare_message(matched: &MatchedLog) -> String {
    let line = String::from_utf8_lossy(&matched.line.content);
    [
        "🚨 Error detected!".to_string(),
        format!(
            "Container ID = {}; Container name = {}",
            matched.container.id, matched.container.name
        ),
        format!("Line: \"{}\"", truncate(&line, MAX_LINE_LEN)),
    ]
    .join("\n")
}

/// Delivers every matched line until the channel closes or `cancel` fires.
///
/// Failed deliveries are logged and dropped.
pub async fn run_dispatcher(
    cancel: CancellationToken,
    mut events: HandoffReceiver<MatchedLog>,
    notifier: Arc<dyn Notifier>,
    log: Logger,
) {
    loop {
        let matched = tokio::select! {
            _ = cancel.cancelled() => {
                log.info(format_args!("Dispatcher cancelled, stopping"));
                return;
            }
            matched = events.recv() => match matched {
                Some(matched) => matched,
                None => {
                    log.debug(format_args!("Event channel closed, stopping dispatcher"));
                    return;
                }
            },
        };

        let message = prepare_message(&matched);
        match tokio::time::timeout(SEND_TIMEOUT, notifier.send_message(&message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log.error(format_args!(
                "Failed to send alert for container {}: {e}",
                matched.container.name
            )),
            Err(_) => log.error(format_args!(
                "Timed out after {SEND_TIMEOUT:?} sending alert for container {}",
                matched.container.name
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::logging::CaptureLog;
    use crate::logline::MatchedLine;
    use crate::notify::NotifyError;
    use crate::watcher::handoff;
    use async_trait::async_trait;
    use log::Level;
    use parking_lot::Mutex;

    fn matched(content: &str) -> MatchedLog {
        MatchedLog {
            container: Container {
                id: "4f9c2b".to_string(),
                name: "api".to_string(),
            },
            line: MatchedLine {
                timestamp: b"2024-05-01T10:00:00Z".to_vec(),
                content: content.as_bytes().to_vec(),
            },
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
        fail: bool,
        stall: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
            if self.stall {
                tokio::time::sleep(SEND_TIMEOUT * 10).await;
            }
            self.sent.lock().push(text.to_string());
            if self.fail {
                return Err(NotifyError::Status(reqwest::StatusCode::BAD_GATEWAY));
            }
            Ok(())
        }
    }

    #[test]
    fn test_prepare_message() {
        assert_eq!(
            prepare_message(&matched("ERROR db down")),
            "🚨 Error detected!\nContainer ID = 4f9c2b; Container name = api\nLine: \"ERROR db down\""
        );
    }

    #[test]
    fn test_prepare_message_truncates_long_lines() {
        let message = prepare_message(&matched(&"x".repeat(250)));
        let expected = format!("Line: \"{}\"", "x".repeat(100));
        assert!(message.ends_with(&expected), "{message}");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        // 'é' is two bytes, the cut at 3 would split the second one
        assert_eq!(truncate("ééé", 3), "é");
        assert_eq!(truncate("abc", 3), "abc");
        assert_eq!(truncate("abcd", 3), "abc");
    }

    #[tokio::test]
    async fn test_dispatcher_sends_every_event() {
        let (tx, rx) = handoff::channel();
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = tokio::spawn(run_dispatcher(
            CancellationToken::new(),
            rx,
            notifier.clone(),
            Logger::global("alerts"),
        ));

        let cancel = CancellationToken::new();
        tx.send(matched("ERROR one"), &cancel).await.unwrap();
        tx.send(matched("ERROR two"), &cancel).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        let sent = notifier.sent.lock().clone();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("ERROR one"));
        assert!(sent[1].contains("ERROR two"));
    }

    #[tokio::test]
    async fn test_dispatcher_logs_failures_and_continues() {
        let (tx, rx) = handoff::channel();
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let capture = Arc::new(CaptureLog::default());
        let dispatcher = tokio::spawn(run_dispatcher(
            CancellationToken::new(),
            rx,
            notifier.clone(),
            Logger::new(capture.clone(), "alerts"),
        ));

        let cancel = CancellationToken::new();
        tx.send(matched("ERROR one"), &cancel).await.unwrap();
        tx.send(matched("ERROR two"), &cancel).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        assert_eq!(notifier.sent.lock().len(), 2);
        assert!(capture.contains(Level::Error, "Failed to send alert for container api"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_times_out_slow_sends() {
        let (tx, rx) = handoff::channel();
        let notifier = Arc::new(RecordingNotifier {
            stall: true,
            ..Default::default()
        });
        let capture = Arc::new(CaptureLog::default());
        let dispatcher = tokio::spawn(run_dispatcher(
            CancellationToken::new(),
            rx,
            notifier.clone(),
            Logger::new(capture.clone(), "alerts"),
        ));

        tx.send(matched("ERROR slow"), &CancellationToken::new())
            .await
            .unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        assert!(notifier.sent.lock().is_empty());
        assert!(capture.contains(Level::Error, "Timed out"));
    }

    #[tokio::test]
    async fn test_dispatcher_stops_on_cancel() {
        let (_tx, rx) = handoff::channel::<MatchedLog>();
        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(run_dispatcher(
            cancel.clone(),
            rx,
            Arc::new(RecordingNotifier::default()),
            Logger::global("alerts"),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), dispatcher)
            .await
            .expect("Dispatcher ignored cancellation")
            .unwrap();
    }
}
