//! Content-addressed on-disk layout
//!
//! Every persisted object lives at
//! `<root>/tpr/<product>/<folder>/<aa>/<bb>/<hash>[.index]`, where `aa` and
//! `bb` are the first two byte pairs of the lowercase hex hash. CDN hosts
//! serve the same relative path.

use std::path::{Path, PathBuf};

use crate::error::{StorageError, StorageResult};

/// Top-level folder of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Folder {
    /// Encoded files and data archives
    Data,
    /// Patch archives
    Patch,
}

impl Folder {
    /// Path segment for the folder
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Patch => "patch",
        }
    }
}

/// Resolves object paths under one storage root
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    product: String,
}

impl StorageLayout {
    /// Layout rooted at `root` for `product`
    pub fn new(root: impl Into<PathBuf>, product: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            product: product.into(),
        }
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Product path segment
    pub fn product(&self) -> &str {
        &self.product
    }

    /// Directory holding every object of `folder`
    pub fn folder_dir(&self, folder: Folder) -> PathBuf {
        self.root
            .join("tpr")
            .join(&self.product)
            .join(folder.as_str())
    }

    /// Relative object path, also the CDN request path
    pub fn relative_path(&self, folder: Folder, hash: &str, suffix: &str) -> StorageResult<String> {
        let hash = normalize_hash(hash)?;
        Ok(format!(
            "tpr/{}/{}/{}/{}/{hash}{suffix}",
            self.product,
            folder.as_str(),
            &hash[0..2],
            &hash[2..4],
        ))
    }

    /// Absolute object path
    pub fn object_path(&self, folder: Folder, hash: &str, suffix: &str) -> StorageResult<PathBuf> {
        let hash = normalize_hash(hash)?;
        Ok(self
            .folder_dir(folder)
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(format!("{hash}{suffix}")))
    }

    /// Data archive blob
    pub fn archive_path(&self, hash: &str) -> StorageResult<PathBuf> {
        self.object_path(Folder::Data, hash, "")
    }

    /// Data archive index
    pub fn index_path(&self, hash: &str) -> StorageResult<PathBuf> {
        self.object_path(Folder::Data, hash, ".index")
    }

    /// Patch archive blob
    pub fn patch_archive_path(&self, hash: &str) -> StorageResult<PathBuf> {
        self.object_path(Folder::Patch, hash, "")
    }

    /// Patch archive index
    pub fn patch_index_path(&self, hash: &str) -> StorageResult<PathBuf> {
        self.object_path(Folder::Patch, hash, ".index")
    }
}

/// Parse the archive name out of an index file path
///
/// Returns `None` for anything that is not `<32 hex>.index`.
pub fn archive_name_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".index")?;
    (stem.len() == 32 && stem.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| stem.to_ascii_lowercase())
}

fn normalize_hash(hash: &str) -> StorageResult<String> {
    if hash.len() < 4 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StorageError::InvalidArgument(format!(
            "not a hex object hash: {hash:?}"
        )));
    }
    Ok(hash.to_ascii_lowercase())
}
