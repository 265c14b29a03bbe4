//! BLTE encoder
//!
//! Content is appended to the active block. Every block owns a
//! `(start, len)` range of one shared arena, so inserting blocks never moves
//! bytes that were already written. Nothing is compressed until
//! [`BlteWriter::finalize`], after which the writer is immutable.

use std::io::Write;
use std::ops::Range;
use std::path::Path;

use tactkit_crypto::{ContentHasher, EncodingKey};
use tracing::debug;

use super::emap::{BlockEncryption, EncodingMap};
use super::error::{BlteError, BlteResult};
use super::espec::{EncodingSpec, SpecBlock, SpecEncryption, size_label};
use super::header::{BlteHeader, ChunkInfo, MAX_CHUNK_COUNT};
use super::record::{ContentRecord, EncodedRecord};

#[derive(Debug, Clone)]
struct PendingBlock {
    map: EncodingMap,
    encryption: Option<BlockEncryption>,
    range: Range<usize>,
}

impl PendingBlock {
    fn starting_at(map: EncodingMap, start: usize) -> Self {
        Self {
            map,
            encryption: None,
            range: start..start,
        }
    }
}

/// Encoder producing a BLTE stream and its [`ContentRecord`]
#[derive(Debug, Clone)]
pub struct BlteWriter {
    arena: Vec<u8>,
    blocks: Vec<PendingBlock>,
    active: usize,
    finalized: Option<EncodedRecord>,
}

impl BlteWriter {
    /// Create a writer whose first block uses `map`
    pub fn new(map: EncodingMap) -> Self {
        Self {
            arena: Vec::new(),
            blocks: vec![PendingBlock::starting_at(map, 0)],
            active: 0,
            finalized: None,
        }
    }

    /// Encode `data` as a single block
    pub fn encode(data: &[u8], map: EncodingMap) -> BlteResult<EncodedRecord> {
        let mut writer = Self::new(map);
        writer.append(data)?;
        writer.finalize().cloned()
    }

    /// Encode `data` split into blocks of `block_size` bytes
    ///
    /// A `block_size` of zero is treated as one block.
    pub fn encode_chunked(
        data: &[u8],
        map: EncodingMap,
        block_size: usize,
    ) -> BlteResult<EncodedRecord> {
        if block_size == 0 || data.len() <= block_size {
            return Self::encode(data, map);
        }

        let mut writer = Self::new(map);
        for (i, chunk) in data.chunks(block_size).enumerate() {
            if i > 0 {
                writer.add_block(map)?;
            }
            writer.append(chunk)?;
        }
        writer.finalize().cloned()
    }

    /// Number of blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Index of the block receiving writes
    pub fn active_block(&self) -> usize {
        self.active
    }

    /// Bytes written so far across all blocks
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// True when nothing has been written
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// True once [`finalize`](Self::finalize) has run
    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    /// Append a new block and make it active
    pub fn add_block(&mut self, map: EncodingMap) -> BlteResult<usize> {
        self.insert_block(self.blocks.len(), map)
    }

    /// Insert a new block at `index` and make it active
    ///
    /// Blocks at and after `index` move one position back in the stream.
    pub fn insert_block(&mut self, index: usize, map: EncodingMap) -> BlteResult<usize> {
        self.ensure_mutable()?;

        if index > self.blocks.len() {
            return Err(BlteError::BlockIndexOutOfRange {
                index,
                count: self.blocks.len(),
            });
        }
        if self.blocks.len() >= MAX_CHUNK_COUNT {
            return Err(BlteError::InvalidChunkCount(self.blocks.len() + 1));
        }

        self.blocks
            .insert(index, PendingBlock::starting_at(map, self.arena.len()));
        self.active = index;
        Ok(index)
    }

    /// Encrypt block `index` on top of its compression
    pub fn encrypt_block(&mut self, index: usize, encryption: BlockEncryption) -> BlteResult<()> {
        self.ensure_mutable()?;

        let count = self.blocks.len();
        let block = self
            .blocks
            .get_mut(index)
            .ok_or(BlteError::BlockIndexOutOfRange { index, count })?;
        block.encryption = Some(encryption);
        Ok(())
    }

    /// Append content to the active block
    pub fn append(&mut self, data: &[u8]) -> BlteResult<()> {
        self.ensure_mutable()?;

        // The active block is always the most recently created one, so its
        // range ends at the arena end.
        self.arena.extend_from_slice(data);
        self.blocks[self.active].range.end = self.arena.len();
        Ok(())
    }

    /// Encode all blocks and build the record
    ///
    /// Calling this again returns the cached result.
    pub fn finalize(&mut self) -> BlteResult<&EncodedRecord> {
        self.finalized_mut().map(|encoded| &*encoded)
    }

    /// Finalize and write the encoded stream to `path`
    ///
    /// The returned record points at `path`.
    pub fn finalize_to(&mut self, path: impl AsRef<Path>) -> BlteResult<ContentRecord> {
        let path = path.as_ref();
        let encoded = self.finalized_mut()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &encoded.data)?;

        encoded.record.blte_path = Some(path.to_path_buf());
        Ok(encoded.record.clone())
    }

    fn finalized_mut(&mut self) -> BlteResult<&mut EncodedRecord> {
        let encoded = match self.finalized.take() {
            Some(encoded) => encoded,
            None => {
                let encoded = self.build()?;
                debug!(
                    ekey = %encoded.record.encoding_key,
                    blocks = self.blocks.len(),
                    encoded_size = encoded.record.encoded_size,
                    "finalized BLTE stream"
                );
                encoded
            }
        };
        Ok(self.finalized.insert(encoded))
    }

    fn ensure_mutable(&self) -> BlteResult<()> {
        if self.finalized.is_some() {
            Err(BlteError::Immutable)
        } else {
            Ok(())
        }
    }

    fn build(&self) -> BlteResult<EncodedRecord> {
        let mut content_hasher = ContentHasher::new();
        let mut payloads = Vec::with_capacity(self.blocks.len());
        let mut infos = Vec::with_capacity(self.blocks.len());
        let mut spec_blocks = Vec::with_capacity(self.blocks.len());

        for (index, block) in self.blocks.iter().enumerate() {
            let raw = &self.arena[block.range.clone()];
            content_hasher.update(raw);

            // Empty blocks are always a bare 'N' type byte.
            let map = if raw.is_empty() {
                EncodingMap::None
            } else {
                block.map
            };

            let mut payload = map.encode(raw)?;
            if let Some(encryption) = &block.encryption {
                payload = encryption.wrap(index, &payload)?;
            }

            let decompressed_size = u32::try_from(raw.len()).map_err(|_| BlteError::InvalidBlock {
                index,
                reason: format!("{} bytes do not fit a chunk table entry", raw.len()),
            })?;

            infos.push(ChunkInfo::for_chunk(&payload, decompressed_size));
            spec_blocks.push(SpecBlock {
                size: Some(size_label(raw.len())),
                map,
                encryption: block.encryption.map(|e| SpecEncryption {
                    key_name: e.key_name,
                    iv: e.iv,
                }),
            });
            payloads.push(payload);
        }

        let header = if self.blocks.len() == 1 {
            spec_blocks[0].size = None;
            BlteHeader::unchunked()
        } else {
            BlteHeader::chunked(infos)?
        };

        let header_bytes = header.to_bytes()?;
        let body_len: usize = payloads.iter().map(Vec::len).sum();
        let mut data = Vec::with_capacity(header_bytes.len() + body_len);
        data.extend_from_slice(&header_bytes);
        for payload in &payloads {
            data.extend_from_slice(payload);
        }

        let encoding_key = if header.is_unchunked() {
            EncodingKey::from_data(&data)
        } else {
            EncodingKey::from_data(&header_bytes)
        };

        let record = ContentRecord {
            content_key: content_hasher.finish(),
            encoding_key,
            encoded_size: data.len() as u64,
            decompressed_size: self.arena.len() as u64,
            encoding_spec: EncodingSpec {
                blocks: spec_blocks,
            }
            .to_string(),
            blte_path: None,
        };

        Ok(EncodedRecord { record, data })
    }
}

impl Write for BlteWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.append(buf).map_err(BlteError::into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
