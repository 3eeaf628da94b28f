//! Error types for the streaming runtime

use crossbeam_channel::{RecvError, SendError};

/// Error type for work function operations
///
/// `Shutdown` is the normal way out: a source reached the end of its
/// capture, or an input's producer closed the channel. Everything else is
/// logged as a failure by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Failed to receive from input channel: {0}")]
    RecvError(#[from] RecvError),

    #[error("Failed to send to output channel: {0}")]
    SendError(String),

    #[error("Node-specific error: {0}")]
    NodeError(String),

    #[error("End of stream")]
    Shutdown,
}

impl<T> From<SendError<T>> for WorkError {
    fn from(e: SendError<T>) -> Self {
        WorkError::SendError(format!("{}", e))
    }
}

/// Result type for work functions
pub type WorkResult<T = ()> = Result<T, WorkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_keeps_message() {
        let err: WorkError = SendError(crate::runtime::Edge::new(5, true)).into();
        assert!(matches!(err, WorkError::SendError(_)));
        assert!(err.to_string().starts_with("Failed to send"));
    }
}
