//! Error types for sweeplet

use thiserror::Error;

/// Main error type for sweeplet
#[derive(Error, Debug)]
pub enum SweepError {
    /// Configuration error (missing scheduling keys, malformed sweep file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lock marker could not be created or removed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Runtime error (job process could not be spawned or awaited)
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for sweeplet operations
pub type SweepResult<T> = Result<T, SweepError>;

impl From<serde_json::Error> for SweepError {
    fn from(err: serde_json::Error) -> Self {
        SweepError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SweepError {
    fn from(err: toml::de::Error) -> Self {
        SweepError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SweepError::Config("missing required scheduling key: resources".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: missing required scheduling key: resources"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SweepError = io_err.into();
        assert!(matches!(err, SweepError::Io(_)));
    }

    #[test]
    fn test_error_from_toml() {
        let err: SweepError = toml::from_str::<toml::Table>("not = [valid").unwrap_err().into();
        assert!(matches!(err, SweepError::Config(_)));
    }
}
