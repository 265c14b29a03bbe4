//! Index entries and their on-disk encoding

use std::ops::BitOr;

use super::error::{IndexError, IndexResult};
use super::footer::IndexFooter;

/// Role of an index file
///
/// Roles combine: a group index is `DATA | GROUP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndexType(u8);

impl IndexType {
    /// Entries locate ranges inside one archive blob
    pub const DATA: Self = Self(1);
    /// Entries locate patch data
    pub const PATCH: Self = Self(2);
    /// Entries name loose files, there is no offset field
    pub const LOOSE: Self = Self(4);
    /// Entries carry an archive ordinal and span several archives
    pub const GROUP: Self = Self(8);

    /// True when every flag in `other` is set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Offset field width this role is written with
    pub fn offset_bytes(self) -> u8 {
        if self.contains(Self::LOOSE) {
            0
        } else if self.contains(Self::GROUP) {
            6
        } else {
            4
        }
    }

    /// This role plus the flags implied by an offset field width
    pub fn with_offset_bytes(self, offset_bytes: u8) -> Self {
        match offset_bytes {
            0 => self | Self::LOOSE,
            6 => self | Self::GROUP,
            _ => self,
        }
    }
}

impl BitOr for IndexType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Where the bytes for one key live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexLocation {
    /// Length of the encoded range
    pub compressed_size: u32,
    /// Position inside the archive blob
    pub offset: u32,
    /// Archive the range lives in, group indices only
    pub archive_ordinal: Option<u16>,
}

impl IndexLocation {
    /// Location inside a plain archive
    pub fn new(compressed_size: u32, offset: u32) -> Self {
        Self {
            compressed_size,
            offset,
            archive_ordinal: None,
        }
    }

    /// One past the last byte of the range
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.compressed_size)
    }
}

/// Key together with its location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Key truncated to the index key size
    pub key: Vec<u8>,
    /// Location of the encoded bytes
    pub location: IndexLocation,
}

/// Decode one entry slot
///
/// `data` must hold at least [`IndexFooter::entry_size`] bytes.
pub fn decode_entry(data: &[u8], footer: &IndexFooter) -> IndexEntry {
    let key_size = usize::from(footer.key_size);
    let size_bytes = usize::from(footer.size_bytes);
    let key = data[..key_size].to_vec();

    let mut pos = key_size;
    let compressed_size = read_be(&data[pos..pos + size_bytes]);
    pos += size_bytes;

    let archive_ordinal = if footer.offset_bytes == 6 {
        let ordinal = u16::from_be_bytes([data[pos], data[pos + 1]]);
        pos += 2;
        Some(ordinal)
    } else {
        None
    };

    let offset = if footer.offset_bytes >= 4 {
        read_be(&data[pos..pos + 4])
    } else {
        0
    };

    IndexEntry {
        key,
        location: IndexLocation {
            compressed_size,
            offset,
            archive_ordinal,
        },
    }
}

/// Append the encoding of one entry to `out`
pub fn encode_entry(
    out: &mut Vec<u8>,
    key: &[u8],
    location: &IndexLocation,
    footer: &IndexFooter,
) -> IndexResult<()> {
    let size_bytes = usize::from(footer.size_bytes);
    if size_bytes < 4 && location.compressed_size >> (size_bytes * 8) != 0 {
        return Err(IndexError::InvalidFooter {
            field: "size_bytes",
            value: footer.size_bytes.into(),
        });
    }

    out.extend_from_slice(key);
    out.extend_from_slice(&location.compressed_size.to_be_bytes()[4 - size_bytes..]);
    if footer.offset_bytes == 6 {
        out.extend_from_slice(&location.archive_ordinal.unwrap_or(0).to_be_bytes());
    }
    if footer.offset_bytes >= 4 {
        out.extend_from_slice(&location.offset.to_be_bytes());
    }
    Ok(())
}

fn read_be(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_entry_layout() {
        let footer = IndexFooter::new(4, 16, 1);
        let location = IndexLocation::new(0x0102_0304, 0x1122_3344);
        let mut out = Vec::new();
        encode_entry(&mut out, &[0xAB; 16], &location, &footer).unwrap();

        assert_eq!(out.len(), footer.entry_size());
        assert_eq!(&out[16..20], &[1, 2, 3, 4]);
        assert_eq!(&out[20..24], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(decode_entry(&out, &footer).location, location);
    }

    #[test]
    fn test_group_entry_layout() {
        let footer = IndexFooter::new(6, 16, 1);
        let location = IndexLocation {
            compressed_size: 10,
            offset: 20,
            archive_ordinal: Some(0x0203),
        };
        let mut out = Vec::new();
        encode_entry(&mut out, &[1; 16], &location, &footer).unwrap();

        assert_eq!(out.len(), 26);
        assert_eq!(&out[20..22], &[2, 3]);
        assert_eq!(&out[22..26], &[0, 0, 0, 20]);
        assert_eq!(decode_entry(&out, &footer).location, location);
    }

    #[test]
    fn test_loose_entry_has_no_offset() {
        let footer = IndexFooter::new(0, 9, 1);
        let mut out = Vec::new();
        encode_entry(&mut out, &[7; 9], &IndexLocation::new(99, 1234), &footer).unwrap();

        assert_eq!(out.len(), 13);
        let entry = decode_entry(&out, &footer);
        assert_eq!(entry.key, vec![7; 9]);
        assert_eq!(entry.location, IndexLocation::new(99, 0));
    }

    #[test]
    fn test_index_type_flags() {
        let group = IndexType::DATA | IndexType::GROUP;
        assert!(group.contains(IndexType::GROUP));
        assert!(!group.contains(IndexType::LOOSE));
        assert_eq!(group.offset_bytes(), 6);
        assert_eq!(
            IndexType::PATCH.with_offset_bytes(0),
            IndexType::PATCH | IndexType::LOOSE
        );
        assert_eq!(IndexType::DATA.with_offset_bytes(6), group);
        assert_eq!(IndexType::DATA.with_offset_bytes(4), IndexType::DATA);
    }
}
