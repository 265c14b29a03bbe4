//! Zero-copy view over the bytes of an index file

use std::io::Cursor;

use binrw::BinRead;

use super::entry::{IndexEntry, IndexLocation, decode_entry};
use super::error::{IndexError, IndexResult};
use super::footer::{CHECKSUM_SIZE, FOOTER_SIZE, IndexFooter, NAMED_REGION_SIZE, truncated_md5};

/// Name of an index file: the MD5 of its bytes from `contents_hash` to EOF
pub fn index_name(data: &[u8]) -> IndexResult<[u8; 16]> {
    if data.len() < FOOTER_SIZE {
        return Err(IndexError::FooterTooShort(data.len()));
    }
    Ok(md5::compute(&data[data.len() - NAMED_REGION_SIZE..]).0)
}

/// Validated index file bytes, searchable without building a map
///
/// The lookup table holds the last key of every page, so a key is found by a
/// binary search over the table followed by a scan of a single page.
#[derive(Debug, Clone)]
pub struct PagedIndexView<'a> {
    data: &'a [u8],
    footer: IndexFooter,
}

impl<'a> PagedIndexView<'a> {
    /// Parse the footer and verify every checksum
    pub fn new(data: &'a [u8]) -> IndexResult<Self> {
        if data.len() < FOOTER_SIZE {
            return Err(IndexError::FooterTooShort(data.len()));
        }

        let footer = IndexFooter::read(&mut Cursor::new(&data[data.len() - FOOTER_SIZE..]))?;
        footer.validate()?;

        let expected = footer.file_size();
        if expected != data.len() {
            return Err(IndexError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }

        let view = Self { data, footer };
        view.verify_checksums()?;
        Ok(view)
    }

    fn verify_checksums(&self) -> IndexResult<()> {
        let pages = self.page_count();
        let tables_start = pages * self.footer.page_size();
        let tables_end = self.data.len() - FOOTER_SIZE;

        let mut contents = self.data[tables_start..tables_end].to_vec();
        contents.extend_from_slice(&self.footer.last_page_hash);
        if truncated_md5(&contents) != self.footer.contents_hash {
            return Err(IndexError::ContentsChecksum);
        }

        let hashes_start = tables_start + pages * usize::from(self.footer.key_size);
        for page in 0..pages {
            let actual = truncated_md5(self.page(page));
            let expected = if page + 1 == pages {
                &self.footer.last_page_hash[..]
            } else {
                let start = hashes_start + page * CHECKSUM_SIZE;
                &self.data[start..start + CHECKSUM_SIZE]
            };
            if actual[..] != *expected {
                return Err(IndexError::PageChecksum(page));
            }
        }

        Ok(())
    }

    /// The parsed footer
    pub fn footer(&self) -> &IndexFooter {
        &self.footer
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.footer.entry_count as usize
    }

    /// True when the file holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of pages
    pub fn page_count(&self) -> usize {
        self.footer.page_count()
    }

    /// Raw bytes of page `page`, padding included
    pub fn page(&self, page: usize) -> &'a [u8] {
        let size = self.footer.page_size();
        &self.data[page * size..(page + 1) * size]
    }

    /// Lookup table key for page `page`
    pub fn last_key(&self, page: usize) -> &'a [u8] {
        let key_size = usize::from(self.footer.key_size);
        let start = self.page_count() * self.footer.page_size() + page * key_size;
        &self.data[start..start + key_size]
    }

    /// Entries stored in page `page`
    pub fn page_entries(&self, page: usize) -> impl Iterator<Item = IndexEntry> + '_ {
        let per_page = self.footer.entries_per_page();
        let count = self.len().saturating_sub(page * per_page).min(per_page);
        let entry_size = self.footer.entry_size();
        let bytes = self.page(page);

        (0..count).map(move |slot| decode_entry(&bytes[slot * entry_size..], &self.footer))
    }

    /// All entries in file order
    pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        (0..self.page_count()).flat_map(move |page| self.page_entries(page))
    }

    /// Find `key`, truncated to the index key size
    pub fn find(&self, key: &[u8]) -> IndexResult<Option<IndexLocation>> {
        let key_size = usize::from(self.footer.key_size);
        if key.len() < key_size {
            return Err(IndexError::KeyTooShort {
                expected: key_size,
                actual: key.len(),
            });
        }
        let key = &key[..key_size];

        let pages = self.page_count();
        let page = partition_point(pages, |p| self.last_key(p) < key);
        if page == pages {
            return Ok(None);
        }

        Ok(self
            .page_entries(page)
            .find(|entry| entry.key == key)
            .map(|entry| entry.location))
    }
}

/// First index in `0..len` for which `pred` is false
fn partition_point(len: usize, mut pred: impl FnMut(usize) -> bool) -> usize {
    let (mut low, mut high) = (0, len);
    while low < high {
        let mid = low + (high - low) / 2;
        if pred(mid) {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}
