//! A `log` implementation that keeps every record in memory so tests can assert on them.
//!
//! The logger is process-global; tests should log unique messages and only look for those.
use std::sync::{Mutex, Once, PoisonError};

use log::{Level, LevelFilter, Log, Metadata, Record};

static RECORDS: Mutex<Vec<(Level, String, String)>> = Mutex::new(Vec::new());

struct CapturingLogger;

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        RECORDS.lock().unwrap_or_else(PoisonError::into_inner).push((
            record.level(),
            record.target().to_owned(),
            record.args().to_string(),
        ));
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger;

pub(crate) fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Trace);
    });
}

/// Whether `message` has been logged with `level` under the crate's log target.
pub(crate) fn logged(level: Level, message: &str) -> bool {
    RECORDS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .any(|(l, target, m)| *l == level && target == "abtest" && m == message)
}

/// Whether `message` has been logged at any level.
pub(crate) fn logged_at_any_level(message: &str) -> bool {
    RECORDS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .any(|(_, _, m)| m == message)
}
