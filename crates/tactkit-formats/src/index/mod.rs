//! Paged archive index files
//!
//! An index file maps encoding keys to `(offset, size)` ranges inside the
//! archive blob that shares its name.
//!
//! ```text
//! pages          N x page_size bytes, entries in key order, zero padded
//! lookup table   N x key_size, the last key of each page
//! page hashes    (N - 1) x 8, truncated MD5 of each page but the last
//! footer         36 bytes, see [`IndexFooter`]
//! ```
//!
//! The file is named by the MD5 of its last 28 bytes, from `contents_hash`
//! to the end of the footer.

mod entry;
mod error;
mod file;
mod footer;
mod view;

pub use entry::{IndexEntry, IndexLocation, IndexType, decode_entry, encode_entry};
pub use error::{IndexError, IndexResult};
pub use file::IndexFile;
pub use footer::{
    CHECKSUM_SIZE, DEFAULT_PAGE_SIZE_KB, FOOTER_SIZE, FULL_KEY_SIZE, INDEX_VERSION, IndexFooter,
    MIN_KEY_SIZE, NAMED_REGION_SIZE, truncated_md5,
};
pub use view::{PagedIndexView, index_name};
