//! Lazy BLTE decoder
//!
//! The reader keeps one growing buffer of decoded bytes. Reading or seeking
//! past the end of that buffer decodes the next blocks in stream order and
//! appends them. Decoded bytes are never released, so any position that has
//! been reached once can be sought back to without decoding again.

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

use tactkit_crypto::{EncryptionType, KeyStore, NoKeys};
use tracing::{debug, trace, warn};

use super::emap::{BlockMode, EncodingMap, block_iv, detect_zlib_map, inflate};
use super::error::{BlteError, BlteResult};
use super::header::{BlteHeader, PREAMBLE_SIZE};

/// Most transform layers a block may be wrapped in
pub const MAX_TRANSFORM_LAYERS: usize = 4;

/// Description of one block of the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Size of the block on disk, encoding type byte included
    pub compressed_size: u64,
    /// Size of the block once decoded
    pub decompressed_size: u64,
    /// MD5 from the chunk table (unchunked streams have none)
    pub checksum: Option<[u8; 16]>,
    /// Compression found when the block was decoded
    pub encoding: Option<EncodingMap>,
    /// Key name of an encrypted block whose key was not available
    pub missing_key: Option<u64>,
}

/// Seekable decoded view of a BLTE stream
pub struct BlteReader<R> {
    source: R,
    keys: Arc<dyn KeyStore>,
    verify: bool,
    blocks: Vec<BlockInfo>,
    next_block: usize,
    buffer: Vec<u8>,
    position: u64,
}

impl BlteReader<Cursor<Vec<u8>>> {
    /// Reader over an in-memory stream
    pub fn from_bytes(data: Vec<u8>) -> BlteResult<Self> {
        Self::from_bytes_with_keys(data, Arc::new(NoKeys))
    }

    /// Reader over an in-memory stream with a key store
    pub fn from_bytes_with_keys(data: Vec<u8>, keys: Arc<dyn KeyStore>) -> BlteResult<Self> {
        let len = data.len() as u64;
        Self::with_keys(Cursor::new(data), len, keys)
    }
}

impl<R: Read> BlteReader<R> {
    /// Reader over `stream_len` bytes of `source` without decryption keys
    pub fn new(source: R, stream_len: u64) -> BlteResult<Self> {
        Self::with_keys(source, stream_len, Arc::new(NoKeys))
    }

    /// Reader over `stream_len` bytes of `source`
    ///
    /// The header is parsed immediately. An unchunked stream is a single
    /// block, so it is decoded right away and its length is exact.
    pub fn with_keys(mut source: R, stream_len: u64, keys: Arc<dyn KeyStore>) -> BlteResult<Self> {
        if stream_len < PREAMBLE_SIZE as u64 {
            return Err(BlteError::Truncated(format!(
                "{stream_len} bytes is shorter than the BLTE preamble"
            )));
        }

        let header = BlteHeader::read_from(&mut source)?;

        let blocks = if header.is_unchunked() {
            let compressed_size = stream_len - PREAMBLE_SIZE as u64;
            if compressed_size == 0 {
                return Err(BlteError::EmptyBlock(0));
            }
            vec![BlockInfo {
                compressed_size,
                decompressed_size: compressed_size - 1,
                checksum: None,
                encoding: None,
                missing_key: None,
            }]
        } else {
            let body: u64 = header
                .chunks
                .iter()
                .map(|c| u64::from(c.compressed_size))
                .sum();
            if header.data_offset() + body > stream_len {
                return Err(BlteError::Truncated(format!(
                    "chunk table declares {} bytes, stream has {stream_len}",
                    header.data_offset() + body
                )));
            }

            header
                .chunks
                .iter()
                .map(|c| BlockInfo {
                    compressed_size: u64::from(c.compressed_size),
                    decompressed_size: u64::from(c.decompressed_size),
                    checksum: Some(c.checksum),
                    encoding: None,
                    missing_key: None,
                })
                .collect()
        };

        let mut reader = Self {
            source,
            keys,
            verify: false,
            blocks,
            next_block: 0,
            buffer: Vec::new(),
            position: 0,
        };

        if header.is_unchunked() {
            reader.decode_next()?;
        }

        Ok(reader)
    }

    /// Check each chunk against its chunk table MD5 before decoding it
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Logical length of the decoded stream
    pub fn len(&self) -> u64 {
        self.blocks.iter().map(|b| b.decompressed_size).sum()
    }

    /// True when the decoded stream is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of blocks in the stream
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of blocks decoded so far
    pub fn decoded_blocks(&self) -> usize {
        self.next_block
    }

    /// Per-block information
    pub fn blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }

    /// Decode every block and return a copy of the full content
    ///
    /// The read position is left where it was.
    pub fn read_to_vec(&mut self) -> BlteResult<Vec<u8>> {
        self.fill_to(u64::MAX)?;
        Ok(self.buffer.clone())
    }

    /// Decode everything and return the full content
    pub fn decode_all(mut self) -> BlteResult<Vec<u8>> {
        while self.next_block < self.blocks.len() {
            self.decode_next()?;
        }
        Ok(self.buffer)
    }

    fn fill_to(&mut self, target: u64) -> BlteResult<()> {
        while (self.buffer.len() as u64) < target && self.next_block < self.blocks.len() {
            self.decode_next()?;
        }
        Ok(())
    }

    fn decode_next(&mut self) -> BlteResult<()> {
        let index = self.next_block;
        let info = &self.blocks[index];
        let declared = info.decompressed_size;
        let unchunked = info.checksum.is_none();

        let size = info.compressed_size as usize;
        let mut raw = vec![0u8; size];
        self.source
            .read_exact(&mut raw)
            .map_err(|e| BlteError::Truncated(format!("block {index} ({size} bytes): {e}")))?;

        trace!(block = index, bytes = size, "decoding block");

        // An all-zero chunk checksum is not checked
        if self.verify
            && let Some(expected) = info.checksum
            && expected != [0u8; 16]
        {
            let actual = md5::compute(&raw).0;
            if actual != expected {
                return Err(BlteError::ChecksumMismatch {
                    index,
                    expected: hex::encode(expected),
                    actual: hex::encode(actual),
                });
            }
        }

        let decoded = self.decode_block(index, raw, declared)?;

        if unchunked {
            self.blocks[index].decompressed_size = decoded.len() as u64;
        } else if decoded.len() as u64 != declared {
            return Err(BlteError::InvalidBlock {
                index,
                reason: format!("decoded {} bytes, chunk table says {declared}", decoded.len()),
            });
        }

        self.buffer.extend_from_slice(&decoded);
        self.next_block += 1;
        Ok(())
    }

    /// Peel transform layers off a block until a terminal encoding is reached
    fn decode_block(&mut self, index: usize, raw: Vec<u8>, declared: u64) -> BlteResult<Vec<u8>> {
        let mut payload = raw;

        for _ in 0..MAX_TRANSFORM_LAYERS {
            let Some((&mode, body)) = payload.split_first() else {
                return Err(BlteError::EmptyBlock(index));
            };

            match BlockMode::from_byte(mode)? {
                BlockMode::None => {
                    self.blocks[index].encoding = Some(EncodingMap::None);
                    return Ok(body.to_vec());
                }
                BlockMode::ZLib => {
                    self.blocks[index].encoding = Some(detect_zlib_map(body));
                    return inflate(body);
                }
                BlockMode::Encrypted => match self.decrypt(index, body)? {
                    Some(inner) => payload = inner,
                    None => return Ok(vec![0u8; declared as usize]),
                },
            }
        }

        Err(BlteError::TooManyLayers(index))
    }

    /// Decrypt an `'E'` block body, `None` when the key is unknown
    fn decrypt(&mut self, index: usize, body: &[u8]) -> BlteResult<Option<Vec<u8>>> {
        let invalid = |reason: &str| BlteError::InvalidBlock {
            index,
            reason: reason.to_string(),
        };

        let (&key_name_size, rest) = body
            .split_first()
            .ok_or_else(|| invalid("missing key name size"))?;
        if key_name_size != 8 {
            return Err(invalid(&format!("key name size {key_name_size}, expected 8")));
        }
        if rest.len() < 9 {
            return Err(invalid("encryption header truncated"));
        }

        let mut name = [0u8; 8];
        name.copy_from_slice(&rest[..8]);
        let key_name = u64::from_le_bytes(name);

        let iv_size = rest[8];
        if iv_size != 4 {
            return Err(BlteError::InvalidIvSize {
                index,
                size: iv_size,
            });
        }

        let rest = &rest[9..];
        if rest.len() < 5 {
            return Err(invalid("encryption header truncated"));
        }

        let mut iv = [0u8; 4];
        iv.copy_from_slice(&rest[..4]);
        let type_byte = rest[4];
        let kind = EncryptionType::from_byte(type_byte)
            .map_err(|_| BlteError::UnsupportedEncryption(type_byte))?;

        let Some(key) = self.keys.get_key(key_name) else {
            warn!(
                block = index,
                key_name = format_args!("{key_name:016X}"),
                "decryption key not available, block decodes as zeros"
            );
            self.blocks[index].missing_key = Some(key_name);
            return Ok(None);
        };

        debug!(block = index, key_name = format_args!("{key_name:016X}"), "decrypting block");
        let mut data = rest[5..].to_vec();
        tactkit_crypto::apply_cipher(kind, &key, &block_iv(iv, index), &mut data)?;
        Ok(Some(data))
    }
}

impl<R: Read> Read for BlteReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill_to(self.position.saturating_add(1))
            .map_err(BlteError::into_io)?;

        let len = self.buffer.len() as u64;
        if self.position >= len {
            return Ok(0);
        }

        let start = self.position as usize;
        let count = buf.len().min(self.buffer.len() - start);
        buf[..count].copy_from_slice(&self.buffer[start..start + count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl<R: Read> Seek for BlteReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;

        self.fill_to(target).map_err(BlteError::into_io)?;
        self.position = target;
        Ok(target)
    }
}

/// Decode a complete in-memory stream
pub fn decode(data: &[u8], keys: Arc<dyn KeyStore>) -> BlteResult<Vec<u8>> {
    BlteReader::with_keys(data, data.len() as u64, keys)?.decode_all()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::blte::{BlockEncryption, BlteWriter};
    use crate::test_utils::{random_bytes, text_bytes};
    use tactkit_crypto::{MemoryKeyStore, TactKey};

    fn four_blocks() -> (Vec<u8>, Vec<u8>) {
        let content = text_bytes(40_000);
        let encoded = BlteWriter::encode_chunked(&content, EncodingMap::zlib(6), 10_000).unwrap();
        (content, encoded.data)
    }

    #[test]
    fn test_lazy_decode_on_read() {
        let (content, data) = four_blocks();
        let mut reader = BlteReader::from_bytes(data).unwrap();
        assert_eq!(reader.block_count(), 4);
        assert_eq!(reader.decoded_blocks(), 0);
        assert_eq!(reader.len(), 40_000);

        let mut head = [0u8; 100];
        reader.read_exact(&mut head).unwrap();
        assert_eq!(&head[..], &content[..100]);
        assert_eq!(reader.decoded_blocks(), 1);
    }

    #[test]
    fn test_seek_forward_materializes_intervening_blocks() {
        let (content, data) = four_blocks();
        let mut reader = BlteReader::from_bytes(data).unwrap();

        reader.seek(SeekFrom::Start(35_000)).unwrap();
        assert_eq!(reader.decoded_blocks(), 4);

        let mut buf = [0u8; 10];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &content[35_000..35_010]);

        // Backward seeks reuse the decoded buffer
        reader.seek(SeekFrom::Start(5)).unwrap();
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &content[5..15]);
    }

    #[test]
    fn test_seek_from_end_and_past_end() {
        let (content, data) = four_blocks();
        let mut reader = BlteReader::from_bytes(data).unwrap();

        assert_eq!(reader.seek(SeekFrom::End(-4)).unwrap(), 39_996);
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &content[39_996..]);

        assert_eq!(reader.seek(SeekFrom::Start(50_000)).unwrap(), 50_000);
        assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
        assert!(reader.seek(SeekFrom::Current(-60_000)).is_err());
    }

    #[test]
    fn test_unchunked_stream_length() {
        let content = text_bytes(5000);
        let encoded = BlteWriter::encode(&content, EncodingMap::zlib(9)).unwrap();
        let reader = BlteReader::from_bytes(encoded.data).unwrap();
        assert_eq!(reader.len(), 5000);
        assert_eq!(reader.blocks()[0].encoding, Some(EncodingMap::zlib(9)));
        assert_eq!(reader.decode_all().unwrap(), content);
    }

    #[test]
    fn test_unknown_block_mode_is_unsupported() {
        let err = BlteReader::from_bytes(b"BLTE\0\0\0\04data".to_vec())
            .err()
            .expect("mode '4' is not implemented");
        assert!(matches!(err, BlteError::UnsupportedEncoding(b'4')));
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_truncated_stream() {
        let (_, mut data) = four_blocks();
        data.truncate(data.len() - 10);
        let len = data.len() as u64;

        let err = BlteReader::new(Cursor::new(data), len).err().unwrap();
        assert!(matches!(err, BlteError::Truncated(_)));

        let err = BlteReader::from_bytes(b"BLTE".to_vec()).err().unwrap();
        assert!(matches!(err, BlteError::Truncated(_)));
    }

    #[test]
    fn test_short_source_is_truncated_on_read() {
        let (_, data) = four_blocks();
        let declared = data.len() as u64;
        let short = data[..data.len() - 10].to_vec();

        let mut reader = BlteReader::new(Cursor::new(short), declared).unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_encrypted_round_trip_with_key() {
        let content = random_bytes(3000, 11);
        let mut writer = BlteWriter::new(EncodingMap::zlib(9));
        writer.append(&content[..1000]).unwrap();
        writer.add_block(EncodingMap::None).unwrap();
        writer.append(&content[1000..]).unwrap();
        let encryption = BlockEncryption::salsa20(0xDEAD_BEEF, [0x33; 16], [9, 8, 7, 6]);
        writer.encrypt_block(0, encryption).unwrap();
        writer.encrypt_block(1, encryption).unwrap();
        let data = writer.finalize().unwrap().data.clone();

        let keys = MemoryKeyStore::new();
        keys.insert(TactKey::new(0xDEAD_BEEF, [0x33; 16]));
        let reader = BlteReader::from_bytes_with_keys(data, Arc::new(keys)).unwrap();
        assert_eq!(reader.decode_all().unwrap(), content);
    }

    #[test]
    fn test_missing_key_yields_zeros() {
        let content = text_bytes(2000);
        let mut writer = BlteWriter::new(EncodingMap::None);
        writer.append(&content[..1000]).unwrap();
        writer.add_block(EncodingMap::zlib(9)).unwrap();
        writer.append(&content[1000..]).unwrap();
        writer
            .encrypt_block(1, BlockEncryption::salsa20(0x42, [1; 16], [0; 4]))
            .unwrap();
        let data = writer.finalize().unwrap().data.clone();

        let mut reader = BlteReader::from_bytes(data).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(&out[..1000], &content[..1000]);
        assert_eq!(&out[1000..], &[0u8; 1000][..]);
        assert_eq!(reader.blocks()[1].missing_key, Some(0x42));
        assert_eq!(reader.blocks()[0].missing_key, None);
    }

    #[test]
    fn test_missing_key_unchunked_zeros_fill_inferred_length() {
        let encryption = BlockEncryption::salsa20(0x77, [2; 16], [0; 4]);
        let payload = EncodingMap::zlib(9).encode(&text_bytes(3000)).unwrap();
        let mut data = b"BLTE\0\0\0\0".to_vec();
        data.extend_from_slice(&encryption.wrap(0, &payload).unwrap());
        let inferred = data.len() - 9;

        let reader = BlteReader::from_bytes(data).unwrap();
        assert_eq!(reader.len(), inferred as u64);
        assert_eq!(reader.blocks()[0].missing_key, Some(0x77));
        assert_eq!(reader.decode_all().unwrap(), vec![0u8; inferred]);
    }

    #[test]
    fn test_transform_layer_limit() {
        let key = [5u8; 16];
        let encryption = BlockEncryption::salsa20(1, key, [0; 4]);
        let mut payload = EncodingMap::None.encode(b"deep").unwrap();
        for _ in 0..MAX_TRANSFORM_LAYERS {
            payload = encryption.wrap(0, &payload).unwrap();
        }
        let mut data = b"BLTE\0\0\0\0".to_vec();
        data.extend_from_slice(&payload);

        let keys: Arc<dyn KeyStore> = Arc::new(std::collections::HashMap::from([(1u64, key)]));
        let err = BlteReader::from_bytes_with_keys(data, keys).err().unwrap();
        assert!(matches!(err, BlteError::TooManyLayers(0)));

        let mut nested = EncodingMap::None.encode(b"deep").unwrap();
        for _ in 0..MAX_TRANSFORM_LAYERS - 1 {
            nested = encryption.wrap(0, &nested).unwrap();
        }
        let mut data = b"BLTE\0\0\0\0".to_vec();
        data.extend_from_slice(&nested);
        let keys: Arc<dyn KeyStore> = Arc::new(std::collections::HashMap::from([(1u64, key)]));
        assert_eq!(decode(&data, keys).unwrap(), b"deep");
    }

    #[test]
    fn test_iv_size_must_be_four() {
        let mut data = b"BLTE\0\0\0\0E".to_vec();
        data.push(8);
        data.extend_from_slice(&7u64.to_le_bytes());
        data.push(8);
        data.extend_from_slice(&[0u8; 8]);
        data.push(b'S');
        data.extend_from_slice(b"ciphertext");

        let err = BlteReader::from_bytes(data).err().unwrap();
        assert!(matches!(err, BlteError::InvalidIvSize { index: 0, size: 8 }));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_checksum_verification() {
        let (_, mut data) = four_blocks();
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let mut reader = BlteReader::from_bytes(data).unwrap().verify_checksums(true);
        let err = reader.seek(SeekFrom::End(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_zero_checksum_is_not_verified() {
        let (content, mut data) = four_blocks();
        // First chunk info follows the preamble, flags and count; its MD5 sits after the sizes
        data[20..36].fill(0);

        let reader = BlteReader::from_bytes(data).unwrap().verify_checksums(true);
        assert_eq!(reader.blocks()[0].checksum, Some([0u8; 16]));
        assert_eq!(reader.decode_all().unwrap(), content);
    }
}
