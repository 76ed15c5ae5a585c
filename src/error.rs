//! Error types for the Rune control plane

use thiserror::Error;

/// Exit code used for every failure that does not carry its own.
pub const GENERIC_EXIT_CODE: i32 = 1;

/// Result type for Rune operations
pub type Result<T> = std::result::Result<T, RuneError>;

/// A failure that asks for a specific process exit code.
///
/// Handlers and the remote client return this when the caller should be able
/// to script against the outcome (for example a missing container on the
/// daemon side). The status line may be empty.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status} (exit code {code})")]
pub struct StatusError {
    /// Human readable status line, printed before exiting when non-empty
    pub status: String,
    /// Suggested process exit code
    pub code: i32,
}

impl StatusError {
    /// Create a status error with the given line and exit code
    pub fn new(status: impl Into<String>, code: i32) -> Self {
        Self {
            status: status.into(),
            code,
        }
    }

    /// Create a status error that keeps the generic exit code
    pub fn generic(status: impl Into<String>) -> Self {
        Self::new(status, GENERIC_EXIT_CODE)
    }
}

/// Rune error types
#[derive(Error, Debug)]
pub enum RuneError {
    #[error("{0}")]
    Usage(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid job parameter {key}: {message}")]
    InvalidParameter { key: String, message: String },

    #[error("No such job: {0}")]
    UnknownOperation(String),

    #[error("Job state error: {0}")]
    JobState(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("API error: {0}")]
    Api(String),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rustls::Error> for RuneError {
    fn from(err: rustls::Error) -> Self {
        RuneError::Tls(err.to_string())
    }
}

impl RuneError {
    /// Build a parameter decoding error
    pub fn invalid_parameter(key: &str, message: impl Into<String>) -> Self {
        RuneError::InvalidParameter {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Exit code and final message the process should end with.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            RuneError::Status(status) => ExitStatus {
                code: status.code,
                message: (!status.status.is_empty()).then(|| status.status.clone()),
            },
            other => ExitStatus {
                code: GENERIC_EXIT_CODE,
                message: Some(other.to_string()),
            },
        }
    }
}

/// How the process ends: an exit code plus an optional line for stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitStatus {
    /// Successful termination
    pub fn success() -> Self {
        Self {
            code: 0,
            message: None,
        }
    }

    /// Map the outcome of the top-level operation to an exit status
    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(err) => err.exit_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_keeps_code() {
        let err = RuneError::from(StatusError::new("No such container: web", 3));
        let status = err.exit_status();
        assert_eq!(status.code, 3);
        assert_eq!(status.message.as_deref(), Some("No such container: web"));
    }

    #[test]
    fn test_empty_status_line_prints_nothing() {
        let status = RuneError::from(StatusError::new("", 7)).exit_status();
        assert_eq!(status.code, 7);
        assert!(status.message.is_none());
    }

    #[test]
    fn test_plain_error_is_generic() {
        let status = RuneError::Daemon("bind failed".into()).exit_status();
        assert_eq!(status.code, GENERIC_EXIT_CODE);
        assert_eq!(status.message.as_deref(), Some("Daemon error: bind failed"));
    }

    #[test]
    fn test_from_result() {
        assert_eq!(ExitStatus::from_result(&Ok(())), ExitStatus::success());
        let failed: Result<()> = Err(RuneError::Usage("Please specify only one -H".into()));
        assert_eq!(ExitStatus::from_result(&failed).code, 1);
    }
}
