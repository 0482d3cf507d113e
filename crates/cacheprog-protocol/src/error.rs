//! Error types for the cache protocol.
//!
//! Every variant is fatal to the session: once framing or validation fails,
//! the stream position can no longer be trusted.

use std::io;
use thiserror::Error;

/// Errors raised while decoding requests or encoding responses.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to decode: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("unexpected EOF before complete record")]
    UnexpectedEof,

    #[error("unsupported command {0:?}")]
    UnknownCommand(String),

    #[error("error processing request #{id}: body missing, expected {declared} bytes")]
    MissingBody { id: i64, declared: i64 },

    #[error("error processing request #{id}: body is not valid base64: {source}")]
    InvalidBody {
        id: i64,
        #[source]
        source: base64::DecodeError,
    },

    #[error("error processing request #{id}, size mismatch: request={declared} and body={actual}")]
    BodySizeMismatch { id: i64, declared: i64, actual: usize },

    #[error("request #{id}: invalid ActionID")]
    InvalidActionId { id: i64 },

    #[error("request #{id}: invalid OutputID")]
    InvalidOutputId { id: i64 },
}
