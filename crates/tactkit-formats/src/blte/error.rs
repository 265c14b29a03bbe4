//! BLTE error types

use thiserror::Error;

/// BLTE-specific error type
#[derive(Debug, Error)]
pub enum BlteError {
    /// Invalid BLTE magic bytes
    #[error("invalid BLTE magic: expected [42 4C 54 45], got {0:02X?}")]
    InvalidMagic([u8; 4]),

    /// Chunk table flag byte is not 0x0F
    #[error("invalid chunk table flags: 0x{0:02X}")]
    InvalidFlags(u8),

    /// Header size does not match the chunk count
    #[error("header size {header_size} does not match {chunk_count} chunks (expected {expected})")]
    HeaderSizeMismatch {
        /// Header size read from the stream
        header_size: u32,
        /// Chunk count read from the stream
        chunk_count: u32,
        /// Header size implied by the chunk count
        expected: u32,
    },

    /// Invalid chunk count
    #[error("invalid chunk count: {0}")]
    InvalidChunkCount(usize),

    /// Block has no encoding type byte
    #[error("block {0} is empty")]
    EmptyBlock(usize),

    /// Stream ended before the declared data
    #[error("truncated stream: {0}")]
    Truncated(String),

    /// Malformed block contents
    #[error("invalid block {index}: {reason}")]
    InvalidBlock {
        /// Block index
        index: usize,
        /// Description of the problem
        reason: String,
    },

    /// Encrypted block carries an IV of the wrong size
    #[error("block {index} has IV size {size}, expected 4")]
    InvalidIvSize {
        /// Block index
        index: usize,
        /// IV size read from the block
        size: u8,
    },

    /// Block is wrapped in more transform layers than allowed
    #[error("block {0} exceeds the transform layer limit")]
    TooManyLayers(usize),

    /// Block checksum does not match the chunk table
    #[error("checksum mismatch in block {index}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Block index
        index: usize,
        /// Expected checksum
        expected: String,
        /// Actual checksum
        actual: String,
    },

    /// Unknown block encoding type byte
    #[error("unsupported block encoding: 0x{0:02X}")]
    UnsupportedEncoding(u8),

    /// Unknown cipher type in an encrypted block
    #[error("unsupported encryption type: 0x{0:02X}")]
    UnsupportedEncryption(u8),

    /// Writer was used after finalize
    #[error("writer is finalized and immutable")]
    Immutable,

    /// Block index passed to the writer is out of range
    #[error("block index {index} out of range for {count} blocks")]
    BlockIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of blocks
        count: usize,
    },

    /// Compression/decompression error
    #[error("compression error: {0}")]
    CompressionError(String),

    /// Encoding spec string could not be parsed
    #[error("invalid encoding spec {spec:?}: {reason}")]
    InvalidSpec {
        /// Input string
        spec: String,
        /// Description of the problem
        reason: String,
    },

    /// Cipher error
    #[error("crypto error: {0}")]
    Crypto(#[from] tactkit_crypto::CryptoError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl BlteError {
    /// True for errors that mean the stream itself is malformed
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic(_)
                | Self::InvalidFlags(_)
                | Self::HeaderSizeMismatch { .. }
                | Self::InvalidChunkCount(_)
                | Self::EmptyBlock(_)
                | Self::Truncated(_)
                | Self::InvalidBlock { .. }
                | Self::InvalidIvSize { .. }
                | Self::TooManyLayers(_)
                | Self::ChecksumMismatch { .. }
                | Self::CompressionError(_)
                | Self::BinRw(_)
        )
    }

    /// True for encodings or ciphers this codec does not implement
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedEncoding(_) | Self::UnsupportedEncryption(_)
        )
    }

    /// Wrap into an `io::Error` for the `Read`/`Write`/`Seek` impls
    pub(crate) fn into_io(self) -> std::io::Error {
        match self {
            Self::Io(e) => e,
            other => {
                let kind = match other {
                    Self::Truncated(_) => std::io::ErrorKind::UnexpectedEof,
                    Self::Immutable => std::io::ErrorKind::PermissionDenied,
                    Self::UnsupportedEncoding(_) | Self::UnsupportedEncryption(_) => {
                        std::io::ErrorKind::Unsupported
                    }
                    _ => std::io::ErrorKind::InvalidData,
                };
                std::io::Error::new(kind, other)
            }
        }
    }
}

/// Result type for BLTE operations
pub type BlteResult<T> = Result<T, BlteError>;
