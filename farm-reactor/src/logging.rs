//! Logging setup for processes embedding the reactor.
//!
//! The reactor itself only emits `tracing` events; installing a subscriber is
//! left to the embedding daemon, which calls [`init_logging`] once at startup.

use tracing_subscriber::EnvFilter;

/// Log levels for runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Initializes a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `level` when it is set. Calling this
/// twice is harmless: the second installation is ignored.
pub fn init_logging(level: LogLevel) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// Installs a subscriber that writes through the test harness capture.
pub fn init_test_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filters() {
        assert_eq!(LogLevel::Error.as_filter(), "error");
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_test_logging();
        init_test_logging();
        init_logging(LogLevel::Warn);
    }
}
