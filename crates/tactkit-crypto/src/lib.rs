//! Key store and stream ciphers for TACT encrypted blocks
//!
//! Encrypted BLTE blocks name the key they were encrypted with by a 64-bit
//! key name. The block decoder does not own any keys itself; it is handed a
//! [`KeyStore`] at construction and asks it for keys by name.
//!
//! # Components
//!
//! - **Key lookup**: the [`KeyStore`] capability and the in-memory [`MemoryKeyStore`]
//! - **Ciphers**: Salsa20 with 16-byte keys, ARC4 for legacy blocks
//! - **Hashing**: MD5 newtypes for content and encoding keys
//!
//! # Examples
//!
//! ```
//! use tactkit_crypto::{KeyStore, MemoryKeyStore, TactKey};
//!
//! let store = MemoryKeyStore::new();
//! store.insert(TactKey::new(0xFA50_5078_126A_CB3E, [0x42; 16]));
//! assert_eq!(store.get_key(0xFA50_5078_126A_CB3E), Some([0x42; 16]));
//! assert_eq!(store.get_key(0x1234), None);
//! ```
//!
//! ```
//! use tactkit_crypto::ContentKey;
//!
//! let ckey = ContentKey::from_data(b"");
//! assert_eq!(ckey.to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
//! ```

#![warn(missing_docs)]

pub mod arc4;
pub mod cipher;
pub mod error;
pub mod keys;
pub mod md5;
pub mod salsa20;

pub use arc4::Arc4Cipher;
pub use cipher::{EncryptionType, apply_cipher};
pub use error::CryptoError;
pub use keys::{KeyStore, MemoryKeyStore, NoKeys, TactKey};
pub use md5::{ContentHasher, ContentKey, EncodingKey};
pub use salsa20::Salsa20Cipher;
