//! Cacheprog Protocol Types
//!
//! Defines the JSON records exchanged between a build tool and an external
//! cache program, and the stream framing used to read and write them.
//!
//! The channel is a single ordered stream of self-delimiting JSON values.
//! A `put` request that declares a non-zero `BodySize` is followed by exactly
//! one dependent record: a JSON string holding the base64-encoded body.

pub mod bytes;
pub mod codec;
pub mod error;
pub mod request;
pub mod response;

pub use codec::{RecordReader, ResponseWriter};
pub use error::ProtocolError;
pub use request::{Command, Operation, Request};
pub use response::Response;

/// ID used for the unsolicited handshake response.
pub const HANDSHAKE_ID: i64 = 0;
