//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key size
    #[error("invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected key size in bytes
        expected: usize,
        /// Actual key size in bytes
        actual: usize,
    },

    /// Invalid IV size
    #[error("invalid IV size: expected at most {expected}, got {actual}")]
    InvalidIvSize {
        /// Largest accepted IV size in bytes
        expected: usize,
        /// Actual IV size in bytes
        actual: usize,
    },

    /// Invalid key format
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Unknown cipher type byte
    #[error("unknown encryption type: 0x{0:02X}")]
    UnknownEncryptionType(u8),

    /// Key list could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
