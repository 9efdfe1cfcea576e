//! Error types for Horizon Dispatch.
//!
//! Most failure modes of the message loop are deliberately silent: posting
//! after quit, posting to a torn-down queue and delivering to a recipient that
//! has gone away all drop the envelope without reporting anything. The errors
//! here cover the few places where a caller explicitly asks *why* something
//! did not happen.

/// Errors reported by Horizon Dispatch operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// A quit has been requested; no further envelopes are accepted.
    #[error("message loop is quitting, envelope discarded")]
    QuitRequested,

    /// The underlying queue refused the envelope (full or torn down).
    #[error("message queue rejected the envelope")]
    QueueRejected,

    /// The process-wide message loop has already been released.
    #[error("the process-wide message loop has been torn down")]
    TornDown,

    /// The supplied configuration cannot be used.
    #[error("invalid dispatch configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    /// Create an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// A specialized Result type for Horizon Dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            DispatchError::QuitRequested.to_string(),
            "message loop is quitting, envelope discarded"
        );
        assert_eq!(
            DispatchError::invalid_config("poll interval is zero").to_string(),
            "invalid dispatch configuration: poll interval is zero"
        );
    }
}
