//! TACT encryption key lookup
//!
//! Keys are identified by their 64-bit key name, which is what encrypted
//! blocks carry in their encryption header.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use parking_lot::RwLock;

use crate::error::CryptoError;

/// A TACT encryption key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TactKey {
    /// Key name as stored in encrypted block headers
    pub id: u64,
    /// 16-byte encryption key
    pub key: [u8; 16],
}

impl TactKey {
    /// Create a new TACT key
    pub fn new(id: u64, key: [u8; 16]) -> Self {
        Self { id, key }
    }

    /// Parse key from hex string
    pub fn from_hex(id: u64, hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex.trim())
            .map_err(|e| CryptoError::InvalidKeyFormat(format!("invalid hex: {e}")))?;

        let key: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeySize {
                expected: 16,
                actual: bytes.len(),
            })?;

        Ok(Self::new(id, key))
    }
}

impl fmt::Display for TactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}: {}", self.id, hex::encode_upper(self.key))
    }
}

/// Key lookup capability handed to the block decoder
///
/// Implementations must be shareable across threads since one store usually
/// serves every reader opened by a container.
pub trait KeyStore: Send + Sync {
    /// Look up a key by its 64-bit name
    fn get_key(&self, key_name: u64) -> Option<[u8; 16]>;
}

/// A store that knows no keys
///
/// Readers built without a key store use this, which makes every encrypted
/// block decode as zeros.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeys;

impl KeyStore for NoKeys {
    fn get_key(&self, _key_name: u64) -> Option<[u8; 16]> {
        None
    }
}

/// In-memory key store
///
/// Interior locking lets keys be registered through a shared handle after
/// readers holding the same store have been created.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<u64, [u8; 16]>>,
}

impl MemoryKeyStore {
    /// Create an empty key store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key, replacing any previous key with the same name
    pub fn insert(&self, key: TactKey) {
        self.keys.write().insert(key.id, key.key);
    }

    /// Remove a key from the store
    pub fn remove(&self, id: u64) -> Option<[u8; 16]> {
        self.keys.write().remove(&id)
    }

    /// Number of keys in the store
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Load keys from text content (`key_name key_hex` per line)
    ///
    /// Lines starting with `#` or `//` are comments. Lines that do not parse
    /// are skipped. Returns the number of keys loaded.
    ///
    /// ```
    /// use tactkit_crypto::MemoryKeyStore;
    ///
    /// let store = MemoryKeyStore::new();
    /// let count = store.load_from_str(
    ///     "# comment\nFA505078126ACB3E BDC51862ABED79B2DE48C8E7E66C6200\nbogus\n",
    /// );
    /// assert_eq!(count, 1);
    /// ```
    pub fn load_from_str(&self, content: &str) -> usize {
        let mut count = 0;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(id), Some(hex)) = (parts.next(), parts.next()) else {
                continue;
            };

            if let Ok(key) = parse_key_name(id).and_then(|id| TactKey::from_hex(id, hex)) {
                self.insert(key);
                count += 1;
            }
        }

        count
    }

    /// Load a key list file
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<usize, CryptoError> {
        let content = std::fs::read_to_string(path)?;
        Ok(self.load_from_str(&content))
    }
}

impl KeyStore for MemoryKeyStore {
    fn get_key(&self, key_name: u64) -> Option<[u8; 16]> {
        self.keys.read().get(&key_name).copied()
    }
}

impl KeyStore for HashMap<u64, [u8; 16]> {
    fn get_key(&self, key_name: u64) -> Option<[u8; 16]> {
        self.get(&key_name).copied()
    }
}

/// Parse a key name (hex, with or without `0x`)
fn parse_key_name(s: &str) -> Result<u64, CryptoError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    u64::from_str_radix(digits, 16)
        .map_err(|e| CryptoError::InvalidKeyFormat(format!("invalid key name {s:?}: {e}")))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_tact_key_from_hex() {
        let key = TactKey::from_hex(0x1234_5678_90AB_CDEF, "0123456789ABCDEF0123456789ABCDEF")
            .expect("Valid TACT key hex should parse");
        assert_eq!(key.id, 0x1234_5678_90AB_CDEF);
        assert_eq!(key.key[0], 0x01);
        assert_eq!(key.key[15], 0xEF);
    }

    #[test]
    fn test_tact_key_invalid_size() {
        let result = TactKey::from_hex(0x1234, "0123456789ABCDEF");
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeySize {
                expected: 16,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_memory_store_operations() {
        let store = MemoryKeyStore::new();
        assert!(store.is_empty());

        store.insert(TactKey::new(0x1234, [0x42; 16]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_key(0x1234), Some([0x42; 16]));

        assert_eq!(store.remove(0x1234), Some([0x42; 16]));
        assert_eq!(store.get_key(0x1234), None);
    }

    #[test]
    fn test_parse_key_name() {
        assert_eq!(parse_key_name("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_key_name("DEADBEEF12345678").unwrap(), 0xDEAD_BEEF_1234_5678);
        assert!(parse_key_name("not-hex").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "// keys").unwrap();
        writeln!(file, "0xFF813F7D062AC0BC AA0B5C77F088CCC2D39049BD267F066D").unwrap();
        writeln!(file, "D1E9B5EDF9283668 8E4A2579894E38B4AB9058BA5C7328EE").unwrap();

        let store = MemoryKeyStore::new();
        assert_eq!(store.load_from_file(file.path()).unwrap(), 2);
        assert!(store.get_key(0xD1E9_B5ED_F928_3668).is_some());
    }

    #[test]
    fn test_store_as_trait_object() {
        let store: std::sync::Arc<dyn KeyStore> = std::sync::Arc::new(MemoryKeyStore::new());
        assert_eq!(store.get_key(1), None);
        assert_eq!(NoKeys.get_key(1), None);
    }
}
