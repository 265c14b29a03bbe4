//! MD5 hashing for content and encoding keys

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;

fn digest_bytes(digest: &[u8]) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(digest);
    bytes
}

macro_rules! md5_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub struct $name([u8; 16]);

        impl $name {
            /// Create from raw bytes
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Compute the MD5 hash of `data`
            pub fn from_data(data: &[u8]) -> Self {
                Self(digest_bytes(Md5::digest(data).as_slice()))
            }

            /// Parse from a 32 character hex string
            pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(hex, &mut bytes)?;
                Ok(Self(bytes))
            }

            /// Raw bytes
            pub const fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Lowercase hex string
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl From<[u8; 16]> for $name {
            fn from(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }
    };
}

md5_key!(
    /// Content key: MD5 of a file's original bytes
    ContentKey
);

md5_key!(
    /// Encoding key: MD5 identifying an encoded BLTE stream
    EncodingKey
);

/// Incremental MD5 producing a [`ContentKey`]
#[derive(Clone, Default)]
pub struct ContentHasher(Md5);

impl ContentHasher {
    /// Start a new hash
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more content
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finish hashing
    pub fn finish(self) -> ContentKey {
        ContentKey(digest_bytes(self.0.finalize().as_slice()))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hash() {
        assert_eq!(
            ContentKey::from_data(b"").to_hex(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let key = EncodingKey::from_hex("0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(key.as_bytes()[0], 0x01);
        assert_eq!(key.to_string(), "0123456789abcdef0123456789abcdef");
        assert!(EncodingKey::from_hex("0123").is_err());
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        assert_eq!(hasher.finish(), ContentKey::from_data(b"Hello, World!"));
    }
}
