//! Logging handle passed into long lived components.
//!
//! The process installs `env_logger` as the global `log` backend, but the
//! watcher and dispatcher never reach for it on their own: they are given a
//! [`Logger`] when they are built. Tests hand in a [`CaptureLog`] instead.

use std::fmt;
use std::sync::Arc;

use log::{Level, Log, Metadata, Record};

/// Forwards to whatever backend was installed with `log::set_logger`.
struct GlobalLog;

impl Log for GlobalLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            log::logger().log(record);
        }
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

#[derive(Clone)]
pub struct Logger {
    backend: Arc<dyn Log>,
    target: Arc<str>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Logger {
    pub fn new(backend: Arc<dyn Log>, target: &str) -> Self {
        Self {
            backend,
            target: target.into(),
        }
    }

    /// A logger writing to the process wide backend under `target`.
    pub fn global(target: &str) -> Self {
        Self::new(Arc::new(GlobalLog), target)
    }

    /// Same backend, different target.
    pub fn scoped(&self, target: &str) -> Self {
        Self::new(Arc::clone(&self.backend), target)
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = Record::builder()
            .level(level)
            .target(&self.target)
            .args(args)
            .build();
        self.backend.log(&record);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }
}

/// Keeps every record in memory.
#[cfg(test)]
#[derive(Default)]
pub struct CaptureLog {
    records: parking_lot::Mutex<Vec<(Level, String)>>,
}

#[cfg(test)]
impl CaptureLog {
    pub fn records(&self) -> Vec<(Level, String)> {
        self.records.lock().clone()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

#[cfg(test)]
impl Log for CaptureLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}
