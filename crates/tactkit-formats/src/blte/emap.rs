//! Per-block encoding policies and the codec they select

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::{DeflateEncoder, ZlibEncoder};
use tactkit_crypto::EncryptionType;

use super::error::{BlteError, BlteResult};

/// Maximum allowed decompression size for one block (1 GB)
///
/// Bounds memory use when a block is a compression bomb.
pub const MAX_DECOMPRESSION_SIZE: usize = 1024 * 1024 * 1024;

/// Level used when a caller does not pick one
pub const DEFAULT_ZLIB_LEVEL: u8 = 9;

/// Encoding type byte stored at the start of every block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockMode {
    /// Stored verbatim (`'N'`)
    None = b'N',
    /// Deflate compressed (`'Z'`)
    ZLib = b'Z',
    /// Encrypted wrapper around another block (`'E'`)
    Encrypted = b'E',
}

impl BlockMode {
    /// Parse an encoding type byte
    pub fn from_byte(byte: u8) -> BlteResult<Self> {
        match byte {
            b'N' => Ok(Self::None),
            b'Z' => Ok(Self::ZLib),
            b'E' => Ok(Self::Encrypted),
            other => Err(BlteError::UnsupportedEncoding(other)),
        }
    }

    /// The on-disk byte
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Compression policy for one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingMap {
    /// Store the bytes as they are
    None,
    /// Deflate with a 2-byte zlib header (levels 1 to 9)
    ZLib {
        /// Compression level
        level: u8,
    },
    /// Raw deflate without the zlib header, as MPQ archives stored it
    Mpq {
        /// Compression level
        level: u8,
    },
}

impl Default for EncodingMap {
    fn default() -> Self {
        Self::ZLib {
            level: DEFAULT_ZLIB_LEVEL,
        }
    }
}

impl EncodingMap {
    /// Zlib at `level`, clamped to 1..=9
    pub fn zlib(level: u8) -> Self {
        Self::ZLib {
            level: level.clamp(1, 9),
        }
    }

    /// Raw deflate at `level`, clamped to 1..=9
    pub fn mpq(level: u8) -> Self {
        Self::Mpq {
            level: level.clamp(1, 9),
        }
    }

    /// Encoding type byte this policy produces
    pub fn mode(self) -> BlockMode {
        match self {
            Self::None => BlockMode::None,
            Self::ZLib { .. } | Self::Mpq { .. } => BlockMode::ZLib,
        }
    }

    /// Encode `data` into a block payload, encoding type byte first
    pub fn encode(self, data: &[u8]) -> BlteResult<Vec<u8>> {
        match self {
            Self::None => {
                let mut out = Vec::with_capacity(1 + data.len());
                out.push(BlockMode::None.as_byte());
                out.extend_from_slice(data);
                Ok(out)
            }
            Self::ZLib { level } => {
                let out = reserve_for_deflate(data.len());
                let mut encoder = ZlibEncoder::new(out, Compression::new(level.into()));
                encoder.write_all(data).map_err(compression_error)?;
                encoder.finish().map_err(compression_error)
            }
            Self::Mpq { level } => {
                let out = reserve_for_deflate(data.len());
                let mut encoder = DeflateEncoder::new(out, Compression::new(level.into()));
                encoder.write_all(data).map_err(compression_error)?;
                encoder.finish().map_err(compression_error)
            }
        }
    }

    /// Token used for this policy in an encoding spec
    pub fn spec_token(self) -> String {
        match self {
            Self::None => "n".to_string(),
            Self::ZLib { level } if level == DEFAULT_ZLIB_LEVEL => "z".to_string(),
            Self::ZLib { level } => format!("z:{{{level}}}"),
            Self::Mpq { level } => format!("z:{{{level},mpq}}"),
        }
    }
}

/// Encryption applied on top of a block's compression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEncryption {
    /// Key name written into the block
    pub key_name: u64,
    /// Key used to encrypt
    pub key: [u8; 16],
    /// IV before the block index is mixed in
    pub iv: [u8; 4],
    /// Cipher to use
    pub kind: EncryptionType,
}

impl BlockEncryption {
    /// Salsa20 encryption with the given key
    pub fn salsa20(key_name: u64, key: [u8; 16], iv: [u8; 4]) -> Self {
        Self {
            key_name,
            key,
            iv,
            kind: EncryptionType::Salsa20,
        }
    }

    /// Wrap an encoded block payload in an encrypted block
    ///
    /// Layout: `'E' | 8 | key_name LE | 4 | iv | type | ciphertext`.
    pub fn wrap(&self, block_index: usize, payload: &[u8]) -> BlteResult<Vec<u8>> {
        let iv = block_iv(self.iv, block_index);
        let mut ciphertext = payload.to_vec();
        tactkit_crypto::apply_cipher(self.kind, &self.key, &iv, &mut ciphertext)?;

        let mut out = Vec::with_capacity(ENCRYPTION_HEADER_SIZE + ciphertext.len());
        out.push(BlockMode::Encrypted.as_byte());
        out.push(8);
        out.extend_from_slice(&self.key_name.to_le_bytes());
        out.push(4);
        out.extend_from_slice(&self.iv);
        out.push(self.kind.as_byte());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// Mode byte plus the fixed encrypted block fields before the ciphertext
pub const ENCRYPTION_HEADER_SIZE: usize = 1 + 1 + 8 + 1 + 4 + 1;

/// IV for a block: the low 4 bytes of the block index XORed into the stored IV
pub fn block_iv(mut iv: [u8; 4], block_index: usize) -> [u8; 4] {
    for (i, byte) in iv.iter_mut().enumerate() {
        *byte ^= ((block_index >> (i * 8)) & 0xFF) as u8;
    }
    iv
}

/// Upper bound on deflate output for `len` input bytes (zlib `compressBound`)
pub fn deflate_bound(len: usize) -> usize {
    len + (len >> 12) + (len >> 14) + (len >> 25) + 13
}

fn reserve_for_deflate(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + deflate_bound(len));
    out.push(BlockMode::ZLib.as_byte());
    out
}

/// Decompress a `'Z'` block body (the bytes after the type byte)
///
/// The body normally starts with a 2-byte zlib header which is skipped; the
/// MPQ flavour has none. Either way the remainder is inflated as raw deflate.
pub fn inflate(body: &[u8]) -> BlteResult<Vec<u8>> {
    let stream = if has_zlib_header(body) {
        &body[2..]
    } else {
        body
    };

    let mut decoder = DeflateDecoder::new(stream);
    let mut decompressed = Vec::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = decoder.read(&mut buffer).map_err(compression_error)?;
        if bytes_read == 0 {
            break;
        }

        if decompressed.len() + bytes_read > MAX_DECOMPRESSION_SIZE {
            return Err(BlteError::CompressionError(format!(
                "decompressed size exceeds limit of {MAX_DECOMPRESSION_SIZE} bytes"
            )));
        }

        decompressed.extend_from_slice(&buffer[..bytes_read]);
    }

    Ok(decompressed)
}

/// Policy a `'Z'` block was most likely written with
///
/// The level comes from the FLEVEL bits of the zlib header and is only
/// descriptive; it has no effect on decoding.
pub fn detect_zlib_map(body: &[u8]) -> EncodingMap {
    if !has_zlib_header(body) {
        return EncodingMap::Mpq {
            level: DEFAULT_ZLIB_LEVEL,
        };
    }

    let level = match body[1] >> 6 {
        0 => 1,
        1 => 5,
        2 => 6,
        _ => 9,
    };
    EncodingMap::ZLib { level }
}

/// A raw deflate stream never starts with a valid zlib header: a CM of 8 in
/// the low nibble would be a stored block with non-zero padding bits.
fn has_zlib_header(body: &[u8]) -> bool {
    match body {
        [cmf, flg, ..] => {
            let check = (u16::from(*cmf) << 8) | u16::from(*flg);
            cmf & 0x0F == 8 && cmf >> 4 <= 7 && flg & 0x20 == 0 && check % 31 == 0
        }
        _ => false,
    }
}

fn compression_error(err: std::io::Error) -> BlteError {
    BlteError::CompressionError(err.to_string())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{random_bytes, text_bytes};

    #[test]
    fn test_none_is_verbatim() {
        let encoded = EncodingMap::None.encode(b"abc").unwrap();
        assert_eq!(encoded, b"Nabc");
    }

    #[test]
    fn test_zlib_header_and_level() {
        let data = text_bytes(4000);
        for level in [1u8, 6, 9] {
            let encoded = EncodingMap::zlib(level).encode(&data).unwrap();
            assert_eq!(encoded[0], b'Z');
            assert_eq!(encoded[1], 0x78);
            assert!(encoded.len() < data.len());
            assert_eq!(detect_zlib_map(&encoded[1..]), EncodingMap::zlib(level));
            assert_eq!(inflate(&encoded[1..]).unwrap(), data);
        }
    }

    #[test]
    fn test_mpq_is_raw_deflate() {
        for data in [text_bytes(3000), random_bytes(3000, 1), Vec::new()] {
            let encoded = EncodingMap::mpq(6).encode(&data).unwrap();
            assert!(!has_zlib_header(&encoded[1..]));
            assert!(matches!(detect_zlib_map(&encoded[1..]), EncodingMap::Mpq { .. }));
            assert_eq!(inflate(&encoded[1..]).unwrap(), data);
        }
    }

    #[test]
    fn test_output_fits_deflate_bound() {
        let data = random_bytes(100_000, 2);
        let encoded = EncodingMap::zlib(9).encode(&data).unwrap();
        assert!(encoded.len() <= 1 + deflate_bound(data.len()));
    }

    #[test]
    fn test_spec_tokens() {
        assert_eq!(EncodingMap::None.spec_token(), "n");
        assert_eq!(EncodingMap::zlib(9).spec_token(), "z");
        assert_eq!(EncodingMap::zlib(1).spec_token(), "z:{1}");
        assert_eq!(EncodingMap::mpq(9).spec_token(), "z:{9,mpq}");
    }

    #[test]
    fn test_block_iv_mixes_index() {
        assert_eq!(block_iv([1, 2, 3, 4], 0), [1, 2, 3, 4]);
        assert_eq!(block_iv([1, 2, 3, 4], 0x0102), [3, 3, 3, 4]);
    }

    #[test]
    fn test_unknown_mode() {
        assert!(matches!(
            BlockMode::from_byte(b'4'),
            Err(BlteError::UnsupportedEncoding(b'4'))
        ));
    }
}
