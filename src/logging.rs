/// Structured logging for the flash-flood pipeline
///
/// Thin layer over `tracing`. Every record carries the pipeline stage and,
/// where it applies, the area code, so a single run can be followed through
/// forcing, aggregation, triggering and the ledger. Output goes to the
/// console or to a log file, as plain text or JSON.
///
/// `RUST_LOG` overrides the level passed to `init_logger`.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::model::SourceError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Forcing,
    Gauge,
    WaterLevel,
    Aggregation,
    Classification,
    Trigger,
    Ledger,
    Dispatch,
    System,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Forcing => write!(f, "FORCING"),
            Stage::Gauge => write!(f, "GAUGE"),
            Stage::WaterLevel => write!(f, "WLEV"),
            Stage::Aggregation => write!(f, "AGG"),
            Stage::Classification => write!(f, "CLASSIFY"),
            Stage::Trigger => write!(f, "TRIGGER"),
            Stage::Ledger => write!(f, "LEDGER"),
            Stage::Dispatch => write!(f, "DISPATCH"),
            Stage::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - a model run simply has not been published yet
    Expected,
    /// Unexpected failure - the source is down or answered with something unusable
    Unexpected,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Initialisation
// ---------------------------------------------------------------------------

/// Installs the global subscriber. Calling it again is a no-op.
pub fn init_logger(min_level: LogLevel, log_file: Option<&Path>, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(min_level.directive()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);

    let file = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    let result = match (file, json) {
        (Some(file), true) => builder.json().with_writer(Mutex::new(file)).try_init(),
        (Some(file), false) => builder.with_ansi(false).with_writer(Mutex::new(file)).try_init(),
        (None, true) => builder.json().try_init(),
        (None, false) => builder.try_init(),
    };
    if result.is_err() {
        debug(Stage::System, None, "logger already initialised");
    }
}

/// Test-friendly logger that writes through the test harness capture.
pub fn init_test_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(stage: Stage, area: Option<&str>, message: &str) {
    tracing::info!(stage = %stage, area = area.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(stage: Stage, area: Option<&str>, message: &str) {
    tracing::warn!(stage = %stage, area = area.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(stage: Stage, area: Option<&str>, message: &str) {
    tracing::error!(stage = %stage, area = area.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(stage: Stage, area: Option<&str>, message: &str) {
    tracing::debug!(stage = %stage, area = area.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

pub fn classify_source_failure(err: &SourceError) -> FailureType {
    match err {
        SourceError::Unavailable(msg) if msg.contains("timeout") || msg.contains("HTTP") => {
            FailureType::Unexpected
        }
        SourceError::Unavailable(_) => FailureType::Expected,
        SourceError::Malformed(_) => FailureType::Unexpected,
    }
}

/// Log a source failure with automatic classification
pub fn log_source_failure(stage: Stage, area: Option<&str>, operation: &str, err: &SourceError) {
    let failure_type = classify_source_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => info(stage, area, &message),
        FailureType::Unexpected => error(stage, area, &message),
    }
}

// ---------------------------------------------------------------------------
// Stage Summary Logging
// ---------------------------------------------------------------------------

/// Log how many areas made it through a stage cleanly
pub fn log_stage_summary(stage: Stage, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "{} areas processed: {}/{} complete, {} incomplete",
        stage, successful, total, failed
    );

    if failed == 0 {
        info(stage, None, &message);
    } else if successful == 0 {
        error(stage, None, &message);
    } else {
        warn(stage, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parses_common_spellings() {
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_failure_classification() {
        let unpublished = SourceError::Unavailable("no primary run for 2024-01-10".into());
        assert_eq!(classify_source_failure(&unpublished), FailureType::Expected);

        let offline = SourceError::Unavailable("HTTP error: 503".into());
        assert_eq!(classify_source_failure(&offline), FailureType::Unexpected);

        let garbled = SourceError::Malformed("negative timestamp".into());
        assert_eq!(classify_source_failure(&garbled), FailureType::Unexpected);
    }

    #[test]
    fn test_logging_helpers_do_not_panic_with_subscriber() {
        init_test_logger();
        info(Stage::Forcing, Some("MW10106"), "archive loaded");
        log_stage_summary(Stage::Aggregation, 3, 2, 1);
        log_source_failure(Stage::Forcing, None, "fallback forecast", &SourceError::Malformed("x".into()));
    }
}
