//! Error types for tether.
//!
//! Transport failures never surface here: the agent absorbs them and reports
//! them through its handlers. What remains are programming errors that
//! should fail fast, chiefly bad configuration.

use thiserror::Error;

/// Convenience alias for results carrying a [`TetherError`].
pub type TetherResult<T> = Result<T, TetherError>;

/// Errors that can occur while building or reconfiguring an agent.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Configuration is invalid or could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = TetherError::Config("unknown eviction policy 'lifo'".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: unknown eviction policy 'lifo'"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TetherError = io_err.into();
        assert!(err.to_string().contains("io error"));
    }

    #[test]
    fn test_error_debug_format() {
        let err = TetherError::Config("test".to_string());
        let debug = format!("{err:?}");
        assert!(debug.contains("Config"));
    }
}
