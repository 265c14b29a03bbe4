//! In-memory index file

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use super::entry::{IndexEntry, IndexLocation, IndexType, encode_entry};
use super::error::{IndexError, IndexResult};
use super::footer::{FULL_KEY_SIZE, IndexFooter, MIN_KEY_SIZE, truncated_md5};
use super::view::{PagedIndexView, index_name};

/// Sorted key to location table backing one archive blob
///
/// Keys are ordered byte-wise, unsigned, which is the order entries are laid
/// out on disk and the order the lookup table is searched in.
#[derive(Debug, Clone)]
pub struct IndexFile {
    kind: IndexType,
    key_size: u8,
    reserved: [u8; 2],
    entries: BTreeMap<Vec<u8>, IndexLocation>,
    next_offset: u64,
    checksum: Option<[u8; 16]>,
    dirty: bool,
}

impl IndexFile {
    /// Empty index with full 16-byte keys
    pub fn new(kind: IndexType) -> Self {
        Self {
            kind,
            key_size: FULL_KEY_SIZE,
            reserved: [0; 2],
            entries: BTreeMap::new(),
            next_offset: 0,
            checksum: None,
            dirty: false,
        }
    }

    /// Empty index with keys truncated to `key_size` bytes
    pub fn with_key_size(kind: IndexType, key_size: u8) -> IndexResult<Self> {
        if !(MIN_KEY_SIZE..=FULL_KEY_SIZE).contains(&key_size) {
            return Err(IndexError::InvalidFooter {
                field: "key_size",
                value: key_size.into(),
            });
        }
        Ok(Self {
            key_size,
            ..Self::new(kind)
        })
    }

    /// Parse a data index
    pub fn read<R: Read>(reader: R) -> IndexResult<Self> {
        Self::read_with_type(reader, IndexType::DATA)
    }

    /// Parse an index whose role is `role`
    ///
    /// The loose and group flags are added from the footer.
    pub fn read_with_type<R: Read>(mut reader: R, role: IndexType) -> IndexResult<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data, role)
    }

    /// Parse the index file at `path`
    pub fn open(path: impl AsRef<Path>, role: IndexType) -> IndexResult<Self> {
        let data = fs::read(path.as_ref())?;
        Self::from_bytes(&data, role)
    }

    /// Parse index bytes
    pub fn from_bytes(data: &[u8], role: IndexType) -> IndexResult<Self> {
        let view = PagedIndexView::new(data)?;
        let footer = view.footer().clone();

        let mut entries: BTreeMap<Vec<u8>, IndexLocation> = BTreeMap::new();
        let mut next_offset = 0u64;
        let mut position = 0usize;

        for page in 0..view.page_count() {
            let mut last = None;
            for IndexEntry { key, location } in view.page_entries(page) {
                if entries.last_key_value().is_some_and(|(prev, _)| *prev >= key) {
                    return Err(IndexError::UnsortedEntries(position));
                }
                next_offset = next_offset.max(location.end());
                last = Some(key.clone());
                entries.insert(key, location);
                position += 1;
            }
            if last.as_deref() != Some(view.last_key(page)) {
                return Err(IndexError::LookupMismatch(page));
            }
        }

        let checksum = index_name(data)?;
        debug!(
            name = %hex::encode(checksum),
            entries = entries.len(),
            pages = view.page_count(),
            "parsed index file"
        );

        Ok(Self {
            kind: role.with_offset_bytes(footer.offset_bytes),
            key_size: footer.key_size,
            reserved: [footer.unk1, footer.unk2],
            entries,
            next_offset,
            checksum: Some(checksum),
            dirty: false,
        })
    }

    /// Role flags
    pub fn kind(&self) -> IndexType {
        self.kind
    }

    /// Key width in bytes
    pub fn key_size(&self) -> usize {
        usize::from(self.key_size)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when entries changed since the file was read or written
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// MD5 naming the file as last read or written
    pub fn checksum(&self) -> Option<[u8; 16]> {
        self.checksum
    }

    /// Hex form of [`checksum`](Self::checksum), the file and blob name
    pub fn name(&self) -> Option<String> {
        self.checksum.map(hex::encode)
    }

    /// Offset the next added entry receives
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Entries in ascending key order
    pub fn entries(&self) -> impl Iterator<Item = (&[u8], &IndexLocation)> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v))
    }

    fn truncate<'k>(&self, key: &'k [u8]) -> IndexResult<&'k [u8]> {
        let size = self.key_size();
        if key.len() < size {
            return Err(IndexError::KeyTooShort {
                expected: size,
                actual: key.len(),
            });
        }
        Ok(&key[..size])
    }

    /// Append an entry at the end of the blob
    ///
    /// The entry's offset is the running total of all previously added
    /// sizes. Returns `false` and changes nothing when the key is present.
    pub fn add(&mut self, key: &[u8], compressed_size: u32) -> IndexResult<bool> {
        let key = self.truncate(key)?;
        if self.entries.contains_key(key) {
            return Ok(false);
        }

        let offset = u32::try_from(self.next_offset)
            .map_err(|_| IndexError::OffsetOverflow(compressed_size))?;
        let end = self.next_offset + u64::from(compressed_size);

        self.entries
            .insert(key.to_vec(), IndexLocation::new(compressed_size, offset));
        self.next_offset = end;
        self.dirty = true;
        Ok(true)
    }

    /// Insert an entry with an explicit location
    ///
    /// Used for group indices, whose offsets point into other archives.
    /// Returns `false` and changes nothing when the key is present.
    pub fn insert(&mut self, key: &[u8], location: IndexLocation) -> IndexResult<bool> {
        let key = self.truncate(key)?;
        if self.entries.contains_key(key) {
            return Ok(false);
        }

        self.entries.insert(key.to_vec(), location);
        self.next_offset = self.next_offset.max(location.end());
        self.dirty = true;
        Ok(true)
    }

    /// Remove `key`
    pub fn remove(&mut self, key: &[u8]) -> IndexResult<Option<IndexLocation>> {
        let key = self.truncate(key)?;
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        Ok(removed)
    }

    /// Location of `key`
    pub fn try_get(&self, key: &[u8]) -> IndexResult<Option<IndexLocation>> {
        let key = self.truncate(key)?;
        Ok(self.entries.get(key).copied())
    }

    /// True when `key` is present
    pub fn contains(&self, key: &[u8]) -> IndexResult<bool> {
        Ok(self.try_get(key)?.is_some())
    }

    /// Serialize to the on-disk layout, returning the bytes and the file name
    pub fn to_bytes(&self) -> IndexResult<(Vec<u8>, [u8; 16])> {
        if self.kind.contains(IndexType::PATCH) {
            return Err(IndexError::Unsupported("writing patch indices"));
        }
        if self.kind.contains(IndexType::GROUP) && self.kind.contains(IndexType::LOOSE) {
            return Err(IndexError::Unsupported("writing loose group indices"));
        }

        let entry_count = u32::try_from(self.entries.len())
            .map_err(|_| IndexError::Unsupported("more than u32::MAX entries"))?;
        let mut footer = IndexFooter::new(self.kind.offset_bytes(), self.key_size, entry_count);
        [footer.unk1, footer.unk2] = self.reserved;

        let page_size = footer.page_size();
        let pages = footer.page_count();
        let mut out = Vec::with_capacity(footer.file_size());
        let mut lookup = Vec::with_capacity(pages * self.key_size());
        let mut page_hashes = Vec::with_capacity(pages.saturating_sub(1) * 8);
        let mut last_page_hash = truncated_md5(&[]);

        let sorted: Vec<_> = self.entries.iter().collect();
        for (page, chunk) in sorted.chunks(footer.entries_per_page()).enumerate() {
            let start = out.len();
            for (key, location) in chunk {
                encode_entry(&mut out, key, location, &footer)?;
            }
            out.resize(start + page_size, 0);

            if let Some((key, _)) = chunk.last() {
                lookup.extend_from_slice(key);
            }

            let hash = truncated_md5(&out[start..]);
            if page + 1 < pages {
                page_hashes.extend_from_slice(&hash);
            } else {
                last_page_hash = hash;
            }
        }

        let mut contents = Vec::with_capacity(lookup.len() + page_hashes.len() + 8);
        contents.extend_from_slice(&lookup);
        contents.extend_from_slice(&page_hashes);
        contents.extend_from_slice(&last_page_hash);

        footer.last_page_hash = last_page_hash;
        footer.contents_hash = truncated_md5(&contents);
        footer.footer_checksum = footer.compute_checksum();

        out.extend_from_slice(&lookup);
        out.extend_from_slice(&page_hashes);
        out.extend_from_slice(&footer.to_bytes()?);

        let name = index_name(&out)?;
        Ok((out, name))
    }

    /// Write the file and return its hex name
    ///
    /// Clears the dirty flag and updates [`checksum`](Self::checksum).
    pub fn write<W: Write>(&mut self, writer: &mut W) -> IndexResult<String> {
        let (bytes, checksum) = self.to_bytes()?;
        writer.write_all(&bytes)?;

        self.checksum = Some(checksum);
        self.dirty = false;

        let name = hex::encode(checksum);
        debug!(%name, entries = self.entries.len(), bytes = bytes.len(), "wrote index file");
        Ok(name)
    }
}
