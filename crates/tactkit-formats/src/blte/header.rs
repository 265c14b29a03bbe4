//! BLTE header and chunk table
//!
//! ```text
//! magic "BLTE" | header_size u32 BE
//! header_size > 0: flags u8 = 0x0F | chunk_count u24 BE | chunk_count x ChunkInfo
//! ```
//!
//! `header_size` counts the 8-byte preamble, so a chunked header is always
//! `12 + 24 * chunk_count` bytes long.

use std::io::Read;

use binrw::{BinRead, BinWrite};

use super::error::{BlteError, BlteResult};

/// BLTE magic bytes
pub const BLTE_MAGIC: [u8; 4] = *b"BLTE";

/// Flag byte announcing a standard chunk table
pub const CHUNK_TABLE_FLAGS: u8 = 0x0F;

/// Size of one chunk table entry
pub const CHUNK_INFO_SIZE: usize = 24;

/// Size of magic plus header size
pub const PREAMBLE_SIZE: usize = 8;

/// Largest chunk count a 24-bit field can hold
pub const MAX_CHUNK_COUNT: usize = 0xFF_FFFF;

/// One entry of the chunk table
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct ChunkInfo {
    /// Size of the chunk on disk, encoding type byte included
    pub compressed_size: u32,
    /// Size of the chunk once decoded
    pub decompressed_size: u32,
    /// MD5 of the on-disk chunk bytes
    pub checksum: [u8; 16],
}

impl ChunkInfo {
    /// Describe an encoded chunk
    pub fn for_chunk(encoded: &[u8], decompressed_size: u32) -> Self {
        Self {
            compressed_size: encoded.len() as u32,
            decompressed_size,
            checksum: md5::compute(encoded).0,
        }
    }
}

/// Chunk table following the preamble of a chunked stream
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
struct ChunkTable {
    #[br(assert(flags == CHUNK_TABLE_FLAGS))]
    flags: u8,
    #[br(map = |b: [u8; 3]| u32::from_be_bytes([0, b[0], b[1], b[2]]))]
    #[bw(map = |c: &u32| { let b = c.to_be_bytes(); [b[1], b[2], b[3]] })]
    chunk_count: u32,
    #[br(count = chunk_count)]
    chunks: Vec<ChunkInfo>,
}

/// Parsed BLTE header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlteHeader {
    /// Header size as stored (0 for an unchunked stream)
    pub header_size: u32,
    /// Chunk table, empty for an unchunked stream
    pub chunks: Vec<ChunkInfo>,
}

impl BlteHeader {
    /// Header for a stream whose single block follows the preamble
    pub fn unchunked() -> Self {
        Self {
            header_size: 0,
            chunks: Vec::new(),
        }
    }

    /// Header with a chunk table
    pub fn chunked(chunks: Vec<ChunkInfo>) -> BlteResult<Self> {
        if chunks.is_empty() || chunks.len() > MAX_CHUNK_COUNT {
            return Err(BlteError::InvalidChunkCount(chunks.len()));
        }

        Ok(Self {
            header_size: expected_header_size(chunks.len()),
            chunks,
        })
    }

    /// True when no chunk table is present
    pub fn is_unchunked(&self) -> bool {
        self.header_size == 0
    }

    /// Offset of the first block within the stream
    pub fn data_offset(&self) -> u64 {
        if self.is_unchunked() {
            PREAMBLE_SIZE as u64
        } else {
            u64::from(self.header_size)
        }
    }

    /// Parse a header from the start of a stream
    ///
    /// Leaves `reader` positioned at the first block.
    pub fn read_from<R: Read>(reader: &mut R) -> BlteResult<Self> {
        let mut preamble = [0u8; PREAMBLE_SIZE];
        reader
            .read_exact(&mut preamble)
            .map_err(|e| truncated(&e, "preamble"))?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&preamble[..4]);
        if magic != BLTE_MAGIC {
            return Err(BlteError::InvalidMagic(magic));
        }

        let header_size = u32::from_be_bytes([preamble[4], preamble[5], preamble[6], preamble[7]]);
        if header_size == 0 {
            return Ok(Self::unchunked());
        }

        let mut prefix = [0u8; 4];
        reader
            .read_exact(&mut prefix)
            .map_err(|e| truncated(&e, "chunk table"))?;

        if prefix[0] != CHUNK_TABLE_FLAGS {
            return Err(BlteError::InvalidFlags(prefix[0]));
        }

        let chunk_count = u32::from_be_bytes([0, prefix[1], prefix[2], prefix[3]]);
        let expected = expected_header_size(chunk_count as usize);
        if header_size != expected {
            return Err(BlteError::HeaderSizeMismatch {
                header_size,
                chunk_count,
                expected,
            });
        }
        if chunk_count == 0 {
            return Err(BlteError::InvalidChunkCount(0));
        }

        let mut table = Vec::with_capacity(4 + chunk_count as usize * CHUNK_INFO_SIZE);
        table.extend_from_slice(&prefix);
        table.resize(4 + chunk_count as usize * CHUNK_INFO_SIZE, 0);
        reader
            .read_exact(&mut table[4..])
            .map_err(|e| truncated(&e, "chunk table"))?;

        let parsed = ChunkTable::read(&mut std::io::Cursor::new(&table))?;

        Ok(Self {
            header_size,
            chunks: parsed.chunks,
        })
    }

    /// Serialize the header
    pub fn to_bytes(&self) -> BlteResult<Vec<u8>> {
        let mut out = std::io::Cursor::new(Vec::with_capacity(self.data_offset() as usize));
        out.get_mut().extend_from_slice(&BLTE_MAGIC);
        out.get_mut().extend_from_slice(&self.header_size.to_be_bytes());
        out.set_position(PREAMBLE_SIZE as u64);

        if !self.is_unchunked() {
            ChunkTable {
                flags: CHUNK_TABLE_FLAGS,
                chunk_count: self.chunks.len() as u32,
                chunks: self.chunks.clone(),
            }
            .write(&mut out)?;
        }

        Ok(out.into_inner())
    }
}

/// `header_size` implied by a chunk count
pub fn expected_header_size(chunk_count: usize) -> u32 {
    (PREAMBLE_SIZE + 4 + CHUNK_INFO_SIZE * chunk_count) as u32
}

fn truncated(err: &std::io::Error, what: &str) -> BlteError {
    BlteError::Truncated(format!("{what}: {err}"))
}
