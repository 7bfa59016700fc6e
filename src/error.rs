//! Unified error hierarchy for HealthPulse
//!
//! Every failure the monitoring loops can meet is recovered inside the component
//! that hits it. These types exist for the paths that do return errors to a
//! caller: the local store, the remote balance store and configuration loading.

use thiserror::Error;

/// Top-level error type for all HealthPulse operations
#[derive(Debug, Error)]
pub enum HealthPulseError {
    /// Local key/value store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Remote balance store errors
    #[error("Remote balance error: {0}")]
    Remote(#[from] RemoteError),

    /// Metric source errors
    #[error("Metric source error: {0}")]
    Source(#[from] SourceError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Local key/value store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value could not be decoded as the requested type
    #[error("Invalid value for key {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Remote balance store errors
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Remote store could not be reached
    #[error("Remote store unavailable: {reason}")]
    Unavailable { reason: String },

    /// No balance record exists for the user
    #[error("No balance record for user {user_id}")]
    UnknownUser { user_id: String },

    /// The write was rejected by the remote store
    #[error("Balance write rejected for user {user_id}: {reason}")]
    WriteRejected { user_id: String, reason: String },
}

/// Metric source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// The provider returned an error
    #[error("Fetch failed for {metric}: {reason}")]
    FetchFailed { metric: String, reason: String },

    /// The provider had no samples for the requested range
    #[error("No data for {metric}")]
    NoData { metric: String },

    /// The fetch did not complete within the configured timeout
    #[error("Fetch for {metric} timed out after {timeout_ms}ms")]
    Timeout { metric: String, timeout_ms: u64 },
}

/// Result type alias for HealthPulse operations
pub type Result<T> = std::result::Result<T, HealthPulseError>;

impl HealthPulseError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HealthPulseError::Remote(RemoteError::Unavailable { .. })
                | HealthPulseError::Source(_)
                | HealthPulseError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            HealthPulseError::Source(_) => ErrorSeverity::Warning,
            HealthPulseError::Remote(RemoteError::Unavailable { .. }) => ErrorSeverity::Warning,
            HealthPulseError::Remote(_) => ErrorSeverity::Error,
            HealthPulseError::Store(_) => ErrorSeverity::Critical,
            HealthPulseError::Configuration(_) => ErrorSeverity::Error,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            HealthPulseError::Remote(RemoteError::Unavailable { .. }) => {
                "Could not reach the points server. Your points are safe; try converting later."
                    .to_string()
            }
            HealthPulseError::Remote(RemoteError::UnknownUser { user_id }) => {
                format!("No points account found for {}", user_id)
            }
            HealthPulseError::Store(_) => {
                "Unable to read local progress data. Please check the data directory.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = HealthPulseError::Source(SourceError::NoData {
            metric: "steps".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = HealthPulseError::Store(StoreError::InvalidValue {
            key: "score.steps".to_string(),
            value: "many".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_error_retryable() {
        let err = HealthPulseError::Remote(RemoteError::Unavailable {
            reason: "timeout".to_string(),
        });
        assert!(err.is_retryable());

        let err = HealthPulseError::Remote(RemoteError::UnknownUser {
            user_id: "u1".to_string(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let err = HealthPulseError::Remote(RemoteError::UnknownUser {
            user_id: "alice".to_string(),
        });
        assert!(err.user_message().contains("alice"));
    }
}
