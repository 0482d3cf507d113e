//! Serde adapter for binary fields.
//!
//! Keys and bodies travel as standard base64 strings, matching how the Go
//! encoder writes `[]byte`. A `null` or missing value decodes as empty.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    match encoded {
        Some(s) => STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom),
        None => Ok(Vec::new()),
    }
}

/// Decode a standalone base64 payload record.
pub fn decode_payload(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded.as_bytes())
}

/// Encode a payload the way a client writes the dependent body record.
pub fn encode_payload(body: &[u8]) -> String {
    STANDARD.encode(body)
}
