//! Identity of an encoded file

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tactkit_crypto::{ContentKey, EncodingKey};

/// Keys, sizes and encoding spec of one encoded file
///
/// Produced by [`BlteWriter::finalize`](super::BlteWriter::finalize) and
/// staged into a storage container until it is flushed into an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// MD5 of the original content
    pub content_key: ContentKey,
    /// Key of the encoded stream
    pub encoding_key: EncodingKey,
    /// Length of the encoded stream
    pub encoded_size: u64,
    /// Length of the original content
    pub decompressed_size: u64,
    /// Encoding spec string
    pub encoding_spec: String,
    /// File holding the encoded stream, when it has been written out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blte_path: Option<PathBuf>,
}

impl ContentRecord {
    /// Attach the path the encoded stream was written to
    pub fn with_blte_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.blte_path = Some(path.into());
        self
    }
}

/// A finalized record together with its encoded bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Record describing `data`
    pub record: ContentRecord,
    /// The complete BLTE stream
    pub data: Vec<u8>,
}
