//! Request records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Request record as it appears on the wire.
///
/// Field names follow the Go `ProgRequest` encoding. Lower-camel aliases are
/// accepted on input as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-chosen ID used to correlate the response.
    #[serde(rename = "ID", alias = "id", default)]
    pub id: i64,
    /// Command name (`get`, `put` or `close`).
    #[serde(rename = "Command", alias = "command", default)]
    pub command: String,
    /// Action key bytes; required for `get` and `put`.
    #[serde(
        rename = "ActionID",
        alias = "actionKey",
        default,
        with = "crate::bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub action_id: Vec<u8>,
    /// Object key bytes; required for `put`.
    #[serde(
        rename = "OutputID",
        alias = "ObjectID",
        alias = "objectKey",
        default,
        with = "crate::bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub output_id: Vec<u8>,
    /// Length of the dependent body record for `put`.
    #[serde(
        rename = "BodySize",
        alias = "bodySize",
        default,
        skip_serializing_if = "is_zero"
    )]
    pub body_size: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Request {
    /// Parse the command name.
    pub fn command(&self) -> Result<Command, ProtocolError> {
        self.command.parse()
    }

    /// Whether a dependent body record follows this request on the stream.
    pub fn has_body(&self) -> bool {
        self.body_size > 0 && self.command == Command::Put.as_str()
    }
}

/// Commands understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Get,
    Put,
    Close,
}

impl Command {
    /// Every command, in advertisement order.
    pub const ALL: [Command; 3] = [Command::Get, Command::Put, Command::Close];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get" => Ok(Self::Get),
            "put" => Ok(Self::Put),
            "close" => Ok(Self::Close),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

/// A fully decoded operation, including the dependent body of a `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Get {
        id: i64,
        action_id: Vec<u8>,
    },
    Put {
        id: i64,
        action_id: Vec<u8>,
        output_id: Vec<u8>,
        body: Vec<u8>,
    },
    Close {
        id: i64,
    },
}

impl Operation {
    pub fn id(&self) -> i64 {
        match self {
            Self::Get { id, .. } | Self::Put { id, .. } | Self::Close { id } => *id,
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Self::Get { .. } => Command::Get,
            Self::Put { .. } => Command::Put,
            Self::Close { .. } => Command::Close,
        }
    }
}
