//! Cache keys.
//!
//! Keys arrive as raw bytes and are never interpreted. On disk and in the
//! remote tier they are named by their lower-case hex encoding, which also
//! keeps them free of path separators.

use std::fmt;

macro_rules! hex_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(Vec<u8>);

        impl $name {
            pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
                Self(bytes.into())
            }

            /// Parse a hex identifier. Empty or non-hex input yields `None`.
            pub fn from_hex(s: &str) -> Option<Self> {
                if s.is_empty() {
                    return None;
                }
                hex::decode(s).ok().map(Self)
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn into_bytes(self) -> Vec<u8> {
                self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// File-system and remote-object name for this key.
            pub fn to_hex(&self) -> String {
                hex::encode(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }
    };
}

hex_key!(
    /// Identifies a build action.
    ActionKey
);

hex_key!(
    /// Identifies the content of a build output.
    ObjectKey
);
