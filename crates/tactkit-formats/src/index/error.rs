//! Index file error types

use thiserror::Error;

/// Index file error type
#[derive(Debug, Error)]
pub enum IndexError {
    /// File is shorter than the fixed footer
    #[error("index file is {0} bytes, shorter than the footer")]
    FooterTooShort(usize),

    /// Unsupported footer version
    #[error("unsupported index version: {0}")]
    UnsupportedVersion(u8),

    /// Footer field holds a value the format does not allow
    #[error("invalid footer field {field}: {value}")]
    InvalidFooter {
        /// Field name
        field: &'static str,
        /// Value read
        value: u32,
    },

    /// Footer checksum does not match its fields
    #[error("footer checksum mismatch: expected {expected}, got {actual}")]
    FooterChecksum {
        /// Checksum computed from the footer fields
        expected: String,
        /// Checksum stored in the file
        actual: String,
    },

    /// Contents hash does not match the lookup and page hash tables
    #[error("contents hash mismatch")]
    ContentsChecksum,

    /// A page does not match its stored hash
    #[error("page {0} hash mismatch")]
    PageChecksum(usize),

    /// File length disagrees with the footer
    #[error("index file is {actual} bytes, footer implies {expected}")]
    LengthMismatch {
        /// Length implied by the footer
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Entries are not in ascending key order or repeat a key
    #[error("entries out of order at position {0}")]
    UnsortedEntries(usize),

    /// Lookup table entry differs from the last key of its page
    #[error("lookup table entry {0} does not match its page")]
    LookupMismatch(usize),

    /// Key is shorter than the index key size
    #[error("key of {actual} bytes is shorter than the index key size {expected}")]
    KeyTooShort {
        /// Index key size
        expected: usize,
        /// Supplied key length
        actual: usize,
    },

    /// Appending the entry would overflow the 32-bit blob offset
    #[error("blob offset overflow adding {0} bytes")]
    OffsetOverflow(u32),

    /// Variant the writer does not implement
    #[error("unsupported index operation: {0}")]
    Unsupported(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl IndexError {
    /// True for errors that mean the file itself is corrupt
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::FooterTooShort(_)
                | Self::UnsupportedVersion(_)
                | Self::InvalidFooter { .. }
                | Self::FooterChecksum { .. }
                | Self::ContentsChecksum
                | Self::PageChecksum(_)
                | Self::LengthMismatch { .. }
                | Self::UnsortedEntries(_)
                | Self::LookupMismatch(_)
                | Self::BinRw(_)
        )
    }
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;
