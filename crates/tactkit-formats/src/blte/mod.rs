//! BLTE (Block Table Encoded) container
//!
//! Every file in TACT storage is wrapped in a BLTE stream. The stream is a
//! sequence of blocks, each encoded on its own:
//!
//! - `N`: stored without compression
//! - `Z`: deflate, with or without the zlib header
//! - `E`: encrypted wrapper around another block
//!
//! The content key (CKey) of a file is the MD5 of its decoded bytes. The
//! encoding key (EKey) is the MD5 of the chunk table for chunked streams and
//! of the whole stream otherwise.
//!
//! # Header layout
//!
//! ```text
//! "BLTE" | header_size: u32 BE |
//!   (header_size == 0)  one block follows
//!   (header_size > 0)   0x0F | chunk_count: u24 BE | chunk_count * {
//!                           compressed_size: u32 BE,
//!                           decompressed_size: u32 BE,
//!                           md5: [u8; 16],
//!                       }
//! ```

mod emap;
mod error;
mod espec;
mod header;
mod reader;
mod record;
mod writer;

pub use emap::{
    BlockEncryption, BlockMode, DEFAULT_ZLIB_LEVEL, ENCRYPTION_HEADER_SIZE, EncodingMap,
    MAX_DECOMPRESSION_SIZE, block_iv, deflate_bound, detect_zlib_map, inflate,
};
pub use error::{BlteError, BlteResult};
pub use espec::{EncodingSpec, LARGE_BLOCK_SIZE, SpecBlock, SpecEncryption, size_label};
pub use header::{
    BLTE_MAGIC, BlteHeader, CHUNK_INFO_SIZE, CHUNK_TABLE_FLAGS, ChunkInfo, MAX_CHUNK_COUNT,
    PREAMBLE_SIZE, expected_header_size,
};
pub use reader::{BlockInfo, BlteReader, MAX_TRANSFORM_LAYERS, decode};
pub use record::{ContentRecord, EncodedRecord};
pub use writer::BlteWriter;
