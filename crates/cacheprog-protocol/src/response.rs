//! Response records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::HANDSHAKE_ID;

/// Response record as it appears on the wire.
///
/// Exactly one of `err`, `known_commands`, `miss` or the hit fields is set.
/// Zero-valued fields are omitted when encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// ID echoed from the request (0 for the handshake).
    #[serde(rename = "ID", default)]
    pub id: i64,
    #[serde(rename = "Err", default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(rename = "KnownCommands", default, skip_serializing_if = "Vec::is_empty")]
    pub known_commands: Vec<String>,
    #[serde(rename = "Miss", default, skip_serializing_if = "is_false")]
    pub miss: bool,
    #[serde(
        rename = "OutputID",
        default,
        with = "crate::bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub output_id: Vec<u8>,
    #[serde(rename = "Size", default, skip_serializing_if = "is_zero")]
    pub size: i64,
    #[serde(rename = "Time", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(rename = "DiskPath", default, skip_serializing_if = "String::is_empty")]
    pub disk_path: String,
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Response {
    /// The unsolicited first response advertising supported commands.
    pub fn handshake<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: HANDSHAKE_ID,
            known_commands: commands.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn miss(id: i64) -> Self {
        Self {
            id,
            miss: true,
            ..Default::default()
        }
    }

    /// A `get` hit for a materialized object.
    pub fn hit(
        id: i64,
        output_id: Vec<u8>,
        size: i64,
        time: DateTime<Utc>,
        disk_path: impl Into<String>,
    ) -> Self {
        Self {
            id,
            output_id,
            size,
            time: Some(time),
            disk_path: disk_path.into(),
            ..Default::default()
        }
    }

    /// A completed `put`: only the ID and the local path are reported.
    pub fn stored(id: i64, disk_path: impl Into<String>) -> Self {
        Self {
            id,
            disk_path: disk_path.into(),
            ..Default::default()
        }
    }

    pub fn error(id: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            err: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_hit(&self) -> bool {
        self.err.is_none() && !self.miss && !self.output_id.is_empty()
    }
}
