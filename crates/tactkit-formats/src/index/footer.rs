//! Fixed-size trailer of an index file

use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use super::error::{IndexError, IndexResult};

/// Width of every checksum in the file
pub const CHECKSUM_SIZE: usize = 8;

/// Size of the footer on disk
pub const FOOTER_SIZE: usize = CHECKSUM_SIZE * 3 + 12;

/// Bytes from `contents_hash` to the end of the file, hashed to name it
pub const NAMED_REGION_SIZE: usize = FOOTER_SIZE - CHECKSUM_SIZE;

/// Index format version
pub const INDEX_VERSION: u8 = 1;

/// Default page size in kilobytes
pub const DEFAULT_PAGE_SIZE_KB: u8 = 4;

/// Full MD5 key width
pub const FULL_KEY_SIZE: u8 = 16;

/// Shortest truncated key width
pub const MIN_KEY_SIZE: u8 = 9;

/// Trailer describing the entry layout and holding the file checksums
///
/// Multi-byte fields are little-endian; only `entry_count` has more than one byte.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct IndexFooter {
    /// Truncated MD5 of the final page
    pub last_page_hash: [u8; CHECKSUM_SIZE],
    /// Truncated MD5 over the lookup table, page hashes and last page hash
    pub contents_hash: [u8; CHECKSUM_SIZE],
    /// Format version
    pub version: u8,
    /// Reserved, round-tripped unchanged
    pub unk1: u8,
    /// Reserved, round-tripped unchanged
    pub unk2: u8,
    /// Page size in KiB
    pub page_size_kb: u8,
    /// Offset field width: 0 (loose), 4 (offset) or 6 (ordinal + offset)
    pub offset_bytes: u8,
    /// Compressed size field width
    pub size_bytes: u8,
    /// Key width
    pub key_size: u8,
    /// Checksum width
    pub checksum_size: u8,
    /// Number of entries in the file
    pub entry_count: u32,
    /// Truncated MD5 over the fields from `version` to `entry_count`
    pub footer_checksum: [u8; CHECKSUM_SIZE],
}

impl IndexFooter {
    /// Footer for a new file with checksums zeroed
    pub fn new(offset_bytes: u8, key_size: u8, entry_count: u32) -> Self {
        Self {
            last_page_hash: [0; CHECKSUM_SIZE],
            contents_hash: [0; CHECKSUM_SIZE],
            version: INDEX_VERSION,
            unk1: 0,
            unk2: 0,
            page_size_kb: DEFAULT_PAGE_SIZE_KB,
            offset_bytes,
            size_bytes: 4,
            key_size,
            checksum_size: CHECKSUM_SIZE as u8,
            entry_count,
            footer_checksum: [0; CHECKSUM_SIZE],
        }
    }

    /// Page size in bytes
    pub fn page_size(&self) -> usize {
        usize::from(self.page_size_kb) * 1024
    }

    /// Size of one entry on disk
    pub fn entry_size(&self) -> usize {
        usize::from(self.key_size) + usize::from(self.size_bytes) + usize::from(self.offset_bytes)
    }

    /// Entries that fit in one page
    pub fn entries_per_page(&self) -> usize {
        self.page_size() / self.entry_size()
    }

    /// Number of pages `entry_count` entries occupy
    pub fn page_count(&self) -> usize {
        (self.entry_count as usize).div_ceil(self.entries_per_page())
    }

    /// File length implied by the footer
    pub fn file_size(&self) -> usize {
        let pages = self.page_count();
        pages * self.page_size()
            + pages * usize::from(self.key_size)
            + pages.saturating_sub(1) * CHECKSUM_SIZE
            + FOOTER_SIZE
    }

    /// Checksum over the 12 descriptor bytes, zero-padded to 20
    pub fn compute_checksum(&self) -> [u8; CHECKSUM_SIZE] {
        let mut fields = Vec::with_capacity(12 + CHECKSUM_SIZE);
        fields.extend_from_slice(&[
            self.version,
            self.unk1,
            self.unk2,
            self.page_size_kb,
            self.offset_bytes,
            self.size_bytes,
            self.key_size,
            self.checksum_size,
        ]);
        fields.extend_from_slice(&self.entry_count.to_le_bytes());
        fields.resize(12 + CHECKSUM_SIZE, 0);
        truncated_md5(&fields)
    }

    /// Serialize the footer
    pub fn to_bytes(&self) -> IndexResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(FOOTER_SIZE));
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Check every field that decides how the rest of the file is parsed
    pub fn validate(&self) -> IndexResult<()> {
        if usize::from(self.checksum_size) != CHECKSUM_SIZE {
            return Err(invalid("checksum_size", self.checksum_size));
        }
        if self.version != INDEX_VERSION {
            return Err(IndexError::UnsupportedVersion(self.version));
        }
        if self.page_size_kb == 0 {
            return Err(invalid("page_size_kb", self.page_size_kb));
        }
        if ![0, 4, 6].contains(&self.offset_bytes) {
            return Err(invalid("offset_bytes", self.offset_bytes));
        }
        if !(1..=4).contains(&self.size_bytes) {
            return Err(invalid("size_bytes", self.size_bytes));
        }
        if !(MIN_KEY_SIZE..=FULL_KEY_SIZE).contains(&self.key_size) {
            return Err(invalid("key_size", self.key_size));
        }

        let expected = self.compute_checksum();
        if expected != self.footer_checksum {
            return Err(IndexError::FooterChecksum {
                expected: hex::encode(expected),
                actual: hex::encode(self.footer_checksum),
            });
        }

        Ok(())
    }
}

fn invalid(field: &'static str, value: u8) -> IndexError {
    IndexError::InvalidFooter {
        field,
        value: value.into(),
    }
}

/// First [`CHECKSUM_SIZE`] bytes of the MD5 of `data`
pub fn truncated_md5(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = md5::compute(data);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest.0[..CHECKSUM_SIZE]);
    out
}
