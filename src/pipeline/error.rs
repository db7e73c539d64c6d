//! Error types and reporting for the pipeline tasks.

use std::fmt;

/// Errors surfaced by a pipeline task while processing one unit of work.
///
/// Neither kind stops the pipeline: `Fatal` abandons the current clip or
/// utterance, `Recoverable` does not even do that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationError {
    /// Logged; processing continues with the same unit.
    Recoverable(String),
    /// The current unit of work is abandoned.
    Fatal(String),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

/// Trait for reporting task errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a task (`"playback"`, `"capture"`, ...).
    fn report(&self, station: &str, error: &StationError);
}

/// Reporter that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => tracing::warn!(station, "{}", msg),
            StationError::Fatal(msg) => tracing::error!(station, "{}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_error_display() {
        let recoverable = StationError::Recoverable("temporary failure".to_string());
        assert_eq!(
            recoverable.to_string(),
            "Recoverable error: temporary failure"
        );

        let fatal = StationError::Fatal("critical failure".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: critical failure");
    }

    #[test]
    fn test_log_reporter() {
        let reporter = LogReporter;
        // Just ensure it doesn't panic without a subscriber
        reporter.report("playback", &StationError::Recoverable("test".to_string()));
        reporter.report("capture", &StationError::Fatal("test".to_string()));
    }
}
