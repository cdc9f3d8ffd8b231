//! Error types for UpYun operations

use std::io;
use thiserror::Error;

/// Result type alias for UpYun operations
pub type UpyunResult<T> = Result<T, UpyunError>;

/// Errors that can occur while talking to UpYun
#[derive(Error, Debug, Clone)]
pub enum UpyunError {
    /// Bad part size, limit or other configuration, caught before any request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure; safe to retry
    #[error("Network error: {0}")]
    Network(String),

    /// The service answered with a non-success status
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Breakpoint does not match the local source any more
    #[error("Resume state error: {0}")]
    ResumeState(String),

    /// A bounded retry loop gave up
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<UpyunError>,
    },

    /// Breakpoint store could not read or write state
    #[error("Breakpoint store error: {0}")]
    Breakpoint(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<UpyunError>,
    },
}

impl UpyunError {
    /// Add context to an error
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        UpyunError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a remote error from a response status and body
    pub fn remote(status: u16, body: &[u8]) -> Self {
        UpyunError::Remote {
            status,
            message: String::from_utf8_lossy(body).trim().to_string(),
        }
    }

    /// Check if error is transient (safe to retry)
    pub fn is_transient(&self) -> bool {
        match self {
            UpyunError::Network(_) => true,
            UpyunError::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Check if the failed request may be sent again
    pub fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    /// Check if the error should abort the current operation immediately
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Strip `WithContext` layers
    pub fn root_cause(&self) -> &UpyunError {
        match self {
            UpyunError::WithContext { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<io::Error> for UpyunError {
    fn from(err: io::Error) -> Self {
        UpyunError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for UpyunError {
    fn from(err: serde_json::Error) -> Self {
        UpyunError::Decode(err.to_string())
    }
}
