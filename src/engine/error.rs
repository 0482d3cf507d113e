//! Session outcome errors.

use cacheprog_protocol::{Command, ProtocolError};
use cacheprog_store::StoreError;
use thiserror::Error;

/// Why a session ended abnormally.
///
/// Every variant aborts the whole session; the caller is expected to start a
/// fresh one.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{command} #{id} failed: {source}")]
    Operation {
        id: i64,
        command: Command,
        #[source]
        source: StoreError,
    },

    #[error("failed to close provider: {0}")]
    Close(#[source] StoreError),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl EngineError {
    /// Request ID the failure can be attributed to, if any.
    pub fn request_id(&self) -> Option<i64> {
        match self {
            EngineError::Operation { id, .. } => Some(*id),
            EngineError::Protocol(ProtocolError::InvalidActionId { id })
            | EngineError::Protocol(ProtocolError::InvalidOutputId { id })
            | EngineError::Protocol(ProtocolError::BodySizeMismatch { id, .. })
            | EngineError::Protocol(ProtocolError::MissingBody { id, .. })
            | EngineError::Protocol(ProtocolError::InvalidBody { id, .. }) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_operation_error_message() {
        let err = EngineError::Operation {
            id: 7,
            command: Command::Put,
            source: StoreError::Io(io::Error::new(io::ErrorKind::Other, "disk full")),
        };
        assert_eq!(err.to_string(), "put #7 failed: I/O error: disk full");
        assert_eq!(err.request_id(), Some(7));
    }

    #[test]
    fn test_request_id_for_protocol_errors() {
        let err = EngineError::from(ProtocolError::InvalidActionId { id: 3 });
        assert_eq!(err.request_id(), Some(3));

        let err = EngineError::from(ProtocolError::UnknownCommand("frobnicate".into()));
        assert_eq!(err.request_id(), None);
    }
}
