//! Process-wide VM log channel
//!
//! Every VM in the process reports through one handler, filtered by one
//! severity threshold. The default handler routes messages to `tracing`
//! under the `topi` target.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::TopiError;

/// Log message severity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    /// Diagnostic detail
    Debug = 0,
    /// Informational
    Info = 1,
    /// Recoverable misuse
    Warn = 2,
    /// Failed operation
    #[default]
    Error = 3,
}

impl Severity {
    fn from_u8(byte: u8) -> Self {
        match byte {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warn,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

type LogHandler = dyn Fn(Severity, &str) + Send + Sync + 'static;

static LOG_HANDLER: OnceLock<Mutex<Arc<LogHandler>>> = OnceLock::new();
static LOG_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Error as u8);

fn handler_slot() -> &'static Mutex<Arc<LogHandler>> {
    LOG_HANDLER.get_or_init(|| Mutex::new(Arc::new(default_log_handler)))
}

/// Install the process-wide log handler
pub fn set_log_handler(handler: impl Fn(Severity, &str) + Send + Sync + 'static) {
    *handler_slot().lock() = Arc::new(handler);
}

/// Restore the default `tracing` handler
pub fn reset_log_handler() {
    *handler_slot().lock() = Arc::new(default_log_handler);
}

/// Set the minimum severity delivered to the handler
pub fn set_log_severity(severity: Severity) {
    LOG_SEVERITY.store(severity as u8, Ordering::Relaxed);
}

/// Current minimum severity
pub fn log_severity() -> Severity {
    Severity::from_u8(LOG_SEVERITY.load(Ordering::Relaxed))
}

fn default_log_handler(severity: Severity, message: &str) {
    match severity {
        Severity::Debug => debug!(target: "topi", "{}", message),
        Severity::Info => info!(target: "topi", "{}", message),
        Severity::Warn => warn!(target: "topi", "{}", message),
        Severity::Error => error!(target: "topi", "{}", message),
    }
}

/// Deliver a message if it meets the threshold
pub fn report(severity: Severity, message: &str) {
    if severity < log_severity() {
        return;
    }
    // Clone out so a handler may replace itself without deadlocking
    let handler = handler_slot().lock().clone();
    handler(severity, message);
}

/// Report an error at its own severity
pub fn report_error(error: &TopiError) {
    report(error.severity(), &error.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_threshold_filters_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        set_log_handler(move |severity, message| sink.lock().push((severity, message.to_string())));

        set_log_severity(Severity::Warn);
        report(Severity::Info, "dropped");
        report(Severity::Warn, "kept");
        report(Severity::Error, "kept too");

        set_log_severity(Severity::default());
        reset_log_handler();

        let seen = seen.lock();
        assert!(seen.iter().all(|(_, m)| m != "dropped"));
        assert!(seen.contains(&(Severity::Warn, "kept".to_string())));
        assert!(seen.contains(&(Severity::Error, "kept too".to_string())));
    }

    #[test]
    #[serial]
    fn test_default_threshold_is_error() {
        assert_eq!(log_severity(), Severity::Error);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Warn < Severity::Error);
        assert_eq!(serde_json::to_string(&Severity::Warn).unwrap(), "\"warn\"");
    }
}
