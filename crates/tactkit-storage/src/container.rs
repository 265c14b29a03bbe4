//! Index and archive container
//!
//! The container owns every loaded index file plus a queue of records staged
//! for the next [`save`](IndexContainer::save). Reads consult the queue first,
//! then the loaded indices, then the configured CDN hosts.
//!
//! Locks are always taken queue first, indices second.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

use tactkit_crypto::{KeyStore, NoKeys};
use tactkit_formats::blte::{BlteReader, ContentRecord, EncodedRecord};
use tactkit_formats::index::{IndexFile, IndexLocation, IndexType};

use crate::cancel::CancellationToken;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::layout::{Folder, StorageLayout, archive_name_of};
use crate::packing::partition;
use crate::pool::run_pool;
use crate::remote::{CdnClient, RemoteSource};

/// Decoded view over a stored record
pub type FileReader = BlteReader<Box<dyn Read + Send>>;

/// Where a key was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Archive name, the hex checksum of its index
    pub archive: String,
    /// Role flags of the index holding the key
    pub kind: IndexType,
    /// Size and offset inside the archive
    pub location: IndexLocation,
}

/// Outcome of loading index files
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Archives whose index was loaded
    pub loaded: Vec<String>,
    /// Archives that could not be loaded, with the reason
    pub failed: Vec<(String, StorageError)>,
}

/// Outcome of flushing the queue
#[derive(Debug, Default)]
pub struct SaveReport {
    /// Archives written from queued records
    pub created: Vec<String>,
    /// Existing archives rewritten under a new name, as `(old, new)`
    pub rewritten: Vec<(String, String)>,
    /// Archives deleted because no entries were left
    pub removed: Vec<String>,
    /// Queued records dropped because an index already held their key
    pub duplicates: usize,
    /// Records or archives that stay queued or dirty, with the reason
    pub failed: Vec<(String, StorageError)>,
}

#[derive(Debug, Clone)]
enum Payload {
    File(PathBuf),
    Memory(Bytes),
}

impl Payload {
    /// Open for reading, `None` when the backing file is gone
    fn open(&self) -> StorageResult<Option<(Box<dyn Read + Send>, u64)>> {
        match self {
            Self::Memory(data) => Ok(Some((
                Box::new(Cursor::new(data.clone())),
                data.len() as u64,
            ))),
            Self::File(path) => match File::open(path) {
                Ok(file) => {
                    let len = file.metadata()?.len();
                    Ok(Some((Box::new(file), len)))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Copy exactly `expected` bytes into `out`
    fn copy_to(&self, expected: u64, out: &mut File) -> StorageResult<()> {
        match self {
            Self::Memory(data) => {
                check_size(data.len() as u64, expected)?;
                out.write_all(data)?;
            }
            Self::File(path) => {
                let mut file = File::open(path)?;
                check_size(file.metadata()?.len(), expected)?;
                let copied = io::copy(&mut file, out)?;
                check_size(copied, expected)?;
            }
        }
        Ok(())
    }
}

fn check_size(actual: u64, expected: u64) -> StorageResult<()> {
    if actual != expected {
        return Err(StorageError::InvalidArgument(format!(
            "payload is {actual} bytes, record says {expected}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct StagedRecord {
    record: ContentRecord,
    payload: Payload,
    target: Option<String>,
}

#[derive(Debug, Clone)]
struct LoadedIndex {
    name: String,
    folder: Folder,
    index: IndexFile,
    blob_path: PathBuf,
}

impl LoadedIndex {
    fn searchable(&self) -> bool {
        !self.index.kind().contains(IndexType::GROUP)
    }

    fn is_loose(&self) -> bool {
        self.index.kind().contains(IndexType::LOOSE)
    }

    fn owns_blob(&self) -> bool {
        !self.is_loose() && !self.index.kind().contains(IndexType::GROUP)
    }
}

/// Result of rewriting one archive
struct Rewrite {
    replacement: Option<LoadedIndex>,
    written: Vec<Vec<u8>>,
    rejected: Vec<(String, StorageError)>,
}

/// A resolved read: local path, CDN path and byte range
struct ReadTarget {
    local: PathBuf,
    remote: String,
    offset: u64,
    size: u64,
}

/// Set of archive indices plus the queue of records awaiting a flush
pub struct IndexContainer {
    config: StorageConfig,
    layout: StorageLayout,
    indices: RwLock<Vec<LoadedIndex>>,
    queue: Mutex<BTreeMap<Vec<u8>, StagedRecord>>,
    remote: Option<Arc<dyn RemoteSource>>,
    keys: Arc<dyn KeyStore>,
    staging_seq: AtomicU64,
}

impl std::fmt::Debug for IndexContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexContainer")
            .field("root", &self.layout.root())
            .field("indices", &self.indices.read().len())
            .field("queued", &self.queue.lock().len())
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

impl IndexContainer {
    /// Empty container for `config`
    ///
    /// A CDN client is created when the configuration lists hosts.
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        let remote: Option<Arc<dyn RemoteSource>> = if config.hosts.is_empty() {
            None
        } else {
            Some(Arc::new(CdnClient::new(&config)?))
        };

        Ok(Self {
            layout: StorageLayout::new(&config.root, &config.product),
            config,
            indices: RwLock::new(Vec::new()),
            queue: Mutex::new(BTreeMap::new()),
            remote,
            keys: Arc::new(NoKeys),
            staging_seq: AtomicU64::new(0),
        })
    }

    /// Open `config.root` and load every index under it
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let container = Self::new(config)?;
        container.load_indices(None)?;
        Ok(container)
    }

    /// Open `config.root`, loading only the named archives
    pub fn open_filtered(config: StorageConfig, archives: &[String]) -> StorageResult<Self> {
        let container = Self::new(config)?;
        let filter = archives.iter().map(|a| a.to_ascii_lowercase()).collect();
        container.load_indices(Some(&filter))?;
        Ok(container)
    }

    /// Use `keys` to decrypt encrypted blocks
    #[must_use]
    pub fn with_keys(mut self, keys: Arc<dyn KeyStore>) -> Self {
        self.keys = keys;
        self
    }

    /// Replace the remote byte source
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Path layout of the storage root
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Names of the loaded data archives, sorted
    pub fn archives(&self) -> Vec<String> {
        self.indices
            .read()
            .iter()
            .filter(|i| i.folder == Folder::Data)
            .map(|i| i.name.clone())
            .collect()
    }

    /// Number of loaded index files
    pub fn index_count(&self) -> usize {
        self.indices.read().len()
    }

    /// Number of staged records
    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Load index files from the storage root
    ///
    /// With a filter only archives named in it are loaded. Missing or
    /// unreadable files are reported per item; a malformed index aborts the
    /// whole load and leaves the container unchanged.
    pub fn load_indices(&self, filter: Option<&HashSet<String>>) -> StorageResult<LoadReport> {
        let root = self.layout.root();
        if !root.is_dir() {
            return Err(StorageError::DirectoryNotFound(root.to_path_buf()));
        }

        let mut candidates = VecDeque::new();
        for folder in [Folder::Data, Folder::Patch] {
            for path in scan_index_files(&self.layout.folder_dir(folder))? {
                let Some(name) = archive_name_of(&path) else {
                    continue;
                };
                if filter.is_some_and(|f| !f.contains(&name)) {
                    continue;
                }
                candidates.push_back((folder, name, path));
            }
        }

        let total = candidates.len();
        let queue = Mutex::new(candidates);
        let parsed: DashMap<(Folder, String), LoadedIndex> = DashMap::new();
        let failed = Mutex::new(Vec::new());
        let fatal = Mutex::new(None);
        let abort = AtomicBool::new(false);

        let work = || {
            while !abort.load(Ordering::Relaxed) {
                let Some((folder, name, path)) = queue.lock().pop_front() else {
                    break;
                };
                match self.parse_index(folder, &name, &path) {
                    Ok(index) => {
                        parsed.insert((folder, name), index);
                    }
                    Err(e) if e.is_fatal() => {
                        warn!(path = %path.display(), error = %e, "malformed index, aborting load");
                        abort.store(true, Ordering::Relaxed);
                        let mut slot = fatal.lock();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "skipping index");
                        failed.lock().push((name, e));
                    }
                }
            }
        };

        let workers = self.config.parse_parallelism.min(total);
        if workers <= 1 {
            work();
        } else {
            std::thread::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(&work);
                }
            });
        }

        if let Some(e) = fatal.into_inner() {
            return Err(e);
        }

        let mut report = LoadReport {
            loaded: Vec::with_capacity(parsed.len()),
            failed: failed.into_inner(),
        };

        let mut indices = self.indices.write();
        for ((folder, name), loaded) in parsed {
            match indices
                .iter_mut()
                .find(|i| i.folder == folder && i.name == name)
            {
                Some(existing) if existing.index.is_dirty() => {
                    debug!(archive = %name, "keeping index with unsaved changes");
                    report.failed.push((
                        name.clone(),
                        StorageError::InvalidArgument(format!("index {name} has unsaved changes")),
                    ));
                    continue;
                }
                Some(existing) => *existing = loaded,
                None => indices.push(loaded),
            }
            report.loaded.push(name);
        }
        indices.sort_by(|a, b| (a.folder, &a.name).cmp(&(b.folder, &b.name)));
        report.loaded.sort();

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            total = indices.len(),
            "loaded archive indices"
        );
        Ok(report)
    }

    fn parse_index(&self, folder: Folder, name: &str, path: &Path) -> StorageResult<LoadedIndex> {
        let role = match folder {
            Folder::Data => IndexType::DATA,
            Folder::Patch => IndexType::PATCH,
        };
        let index = IndexFile::open(path, role)?;
        if index.name().as_deref() != Some(name) {
            warn!(path = %path.display(), "index name does not match its contents");
        }
        Ok(LoadedIndex {
            name: name.to_string(),
            folder,
            index,
            blob_path: self.layout.object_path(folder, name, "")?,
        })
    }

    /// Stage a record whose encoded bytes live at its `blte_path`
    ///
    /// Returns `false` when the key is already queued.
    pub fn enqueue(&self, record: ContentRecord) -> StorageResult<bool> {
        let path = record.blte_path.clone().ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "record {} has no encoded file",
                record.encoding_key.to_hex()
            ))
        })?;
        self.stage(record, Payload::File(path), None)
    }

    /// Stage a record together with its encoded bytes
    pub fn enqueue_encoded(&self, encoded: EncodedRecord) -> StorageResult<bool> {
        let payload = Payload::Memory(Bytes::from(encoded.data));
        self.stage(encoded.record, payload, None)
    }

    /// Stage a record for appending to an existing data archive
    pub fn enqueue_into(&self, archive: &str, record: ContentRecord) -> StorageResult<bool> {
        let archive = archive.to_ascii_lowercase();
        let path = record.blte_path.clone().ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "record {} has no encoded file",
                record.encoding_key.to_hex()
            ))
        })?;

        let mut queue = self.queue.lock();
        let appendable = self
            .indices
            .read()
            .iter()
            .any(|i| i.folder == Folder::Data && i.name == archive && i.owns_blob());
        if !appendable {
            return Err(StorageError::InvalidArgument(format!(
                "no data archive named {archive}"
            )));
        }
        insert_staged(&mut queue, record, Payload::File(path), Some(archive))
    }

    fn stage(
        &self,
        record: ContentRecord,
        payload: Payload,
        target: Option<String>,
    ) -> StorageResult<bool> {
        let mut queue = self.queue.lock();
        insert_staged(&mut queue, record, payload, target)
    }

    /// Remove a staged record
    pub fn dequeue(&self, key: &[u8]) -> Option<ContentRecord> {
        self.queue.lock().remove(key).map(|staged| staged.record)
    }

    /// Remove `key` from the queue and from every data index
    ///
    /// Indices that lose an entry are rewritten on the next save. Returns
    /// `true` when anything was removed.
    pub fn remove(&self, key: &[u8]) -> StorageResult<bool> {
        let mut queue = self.queue.lock();
        let mut removed = queue.remove(key).is_some();

        let mut indices = self.indices.write();
        for loaded in indices.iter_mut().filter(|i| i.folder == Folder::Data) {
            if key.len() >= loaded.index.key_size() && loaded.index.remove(key)?.is_some() {
                debug!(archive = %loaded.name, key = %hex::encode(key), "removed entry");
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Find `key` in the loaded data indices
    pub fn get_index_entry(&self, key: &[u8]) -> StorageResult<Option<ArchiveEntry>> {
        let indices = self.indices.read();
        Ok(find_entry(&indices, Folder::Data, key)?.map(|(loaded, location)| ArchiveEntry {
            archive: loaded.name.clone(),
            kind: loaded.index.kind(),
            location,
        }))
    }

    /// True when `key` is staged or indexed
    pub fn contains(&self, key: &[u8]) -> StorageResult<bool> {
        if self.queue.lock().contains_key(key) {
            return Ok(true);
        }
        Ok(self.get_index_entry(key)?.is_some())
    }

    fn read_target(&self, folder: Folder, key: &[u8]) -> StorageResult<Option<ReadTarget>> {
        let indices = self.indices.read();
        let Some((loaded, location)) = find_entry(&indices, folder, key)? else {
            return Ok(None);
        };

        let size = u64::from(location.compressed_size);
        if loaded.is_loose() {
            let name = hex::encode(key);
            return Ok(Some(ReadTarget {
                local: self.layout.object_path(folder, &name, "")?,
                remote: self.layout.relative_path(folder, &name, "")?,
                offset: 0,
                size,
            }));
        }

        Ok(Some(ReadTarget {
            local: loaded.blob_path.clone(),
            remote: self.layout.relative_path(folder, &loaded.name, "")?,
            offset: u64::from(location.offset),
            size,
        }))
    }

    async fn read_range(
        &self,
        target: &ReadTarget,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<(Box<dyn Read + Send>, u64)>> {
        match File::open(&target.local) {
            Ok(mut file) => {
                file.seek(SeekFrom::Start(target.offset))?;
                return Ok(Some((Box::new(file.take(target.size)), target.size)));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let Some(remote) = &self.remote else {
            debug!(path = %target.local.display(), "archive not present locally");
            return Ok(None);
        };
        let data = remote
            .fetch_range(&target.remote, target.offset, target.size, cancel)
            .await?;
        Ok(data.map(|bytes| {
            let len = bytes.len() as u64;
            (Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>, len)
        }))
    }

    /// Open a decoded stream for `key`
    ///
    /// Staged records are served from the queue. `None` means the key is not
    /// indexed or its bytes are neither on disk nor on any CDN host.
    pub async fn open_file(&self, key: &[u8]) -> StorageResult<Option<FileReader>> {
        self.open_file_with_cancel(key, &CancellationToken::new())
            .await
    }

    /// [`open_file`](Self::open_file) with a cancellation token for remote fetches
    pub async fn open_file_with_cancel(
        &self,
        key: &[u8],
        cancel: &CancellationToken,
    ) -> StorageResult<Option<FileReader>> {
        let staged = self.queue.lock().get(key).map(|s| s.payload.clone());
        let source = match staged {
            Some(payload) => payload.open()?,
            None => match self.read_target(Folder::Data, key)? {
                Some(target) => self.read_range(&target, cancel).await?,
                None => return Ok(None),
            },
        };

        let Some((source, len)) = source else {
            return Ok(None);
        };
        Ok(Some(BlteReader::with_keys(source, len, Arc::clone(&self.keys))?))
    }

    /// Raw bytes of a patch archive entry
    pub async fn open_patch(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.open_patch_with_cancel(key, &CancellationToken::new())
            .await
    }

    /// [`open_patch`](Self::open_patch) with a cancellation token for remote fetches
    pub async fn open_patch_with_cancel(
        &self,
        key: &[u8],
        cancel: &CancellationToken,
    ) -> StorageResult<Option<Bytes>> {
        let Some(target) = self.read_target(Folder::Patch, key)? else {
            return Ok(None);
        };
        let Some((mut source, len)) = self.read_range(&target, cancel).await? else {
            return Ok(None);
        };

        let mut data = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
        source.read_to_end(&mut data)?;
        if data.len() as u64 != len {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("patch entry is {} of {len} bytes", data.len()),
            )));
        }
        Ok(Some(Bytes::from(data)))
    }

    /// Fetch `.index` files for `archives` from the CDN, then load them
    ///
    /// Files already on disk with the size the CDN reports are not fetched
    /// again. Per-archive failures are reported; malformed downloads and
    /// cancellation abort.
    pub async fn download_indices(
        &self,
        archives: &[String],
        cancel: &CancellationToken,
    ) -> StorageResult<LoadReport> {
        let remote = self
            .remote
            .clone()
            .ok_or_else(|| StorageError::Config("no CDN hosts configured".into()))?;

        let jobs = archives
            .iter()
            .map(|archive| {
                let name = archive.to_ascii_lowercase();
                Ok((
                    name.clone(),
                    self.layout.relative_path(Folder::Data, &name, ".index")?,
                    self.layout.index_path(&name)?,
                ))
            })
            .collect::<StorageResult<Vec<_>>>()?;
        let names: Vec<String> = jobs.iter().map(|(name, _, _)| name.clone()).collect();

        let token = cancel.clone();
        let outcomes = run_pool(jobs, self.config.download_workers, move |(_, remote_path, local)| {
            let remote = Arc::clone(&remote);
            let cancel = token.clone();
            async move { download_index(remote.as_ref(), &remote_path, &local, &cancel).await }
        })
        .await;

        let mut available = HashSet::new();
        let mut failed = Vec::new();
        for (name, outcome) in names.into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(())) => {
                    available.insert(name);
                }
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => failed.push((name, e)),
                None => failed.push((name, StorageError::Transport("download worker failed".into()))),
            }
        }
        cancel.check()?;

        let mut report = self.load_indices(Some(&available))?;
        report.failed.extend(failed);
        Ok(report)
    }

    /// Flush the queue and rewrite changed archives under the storage root
    pub fn save(&self) -> StorageResult<SaveReport> {
        let layout = self.layout.clone();
        self.save_with(&layout)
    }

    /// Flush the queue and rewrite changed archives under `root`
    ///
    /// Only archives that change are written; unchanged ones stay where they
    /// were loaded from.
    pub fn save_to(&self, root: impl AsRef<Path>) -> StorageResult<SaveReport> {
        let layout = StorageLayout::new(root.as_ref(), self.layout.product());
        self.save_with(&layout)
    }

    fn save_with(&self, dest: &StorageLayout) -> StorageResult<SaveReport> {
        let mut queue = self.queue.lock();
        let mut indices = self.indices.write();
        let mut report = SaveReport::default();

        // Records an index already holds are not written twice
        let mut duplicates = Vec::new();
        for key in queue.keys() {
            if find_entry(&indices, Folder::Data, key)?.is_some() {
                duplicates.push(key.clone());
            }
        }
        for key in duplicates {
            debug!(key = %hex::encode(&key), "dropping queued record already indexed");
            queue.remove(&key);
            report.duplicates += 1;
        }

        // Existing archives that lost entries or gain targeted records
        let mut position = 0;
        while position < indices.len() {
            let loaded = &indices[position];
            let targeted: Vec<Vec<u8>> = queue
                .iter()
                .filter(|(_, s)| loaded.folder == Folder::Data && s.target.as_deref() == Some(loaded.name.as_str()))
                .map(|(k, _)| k.clone())
                .collect();
            if !loaded.index.is_dirty() && targeted.is_empty() {
                position += 1;
                continue;
            }

            let old_name = loaded.name.clone();
            match self.rewrite_archive(dest, loaded, &targeted, &queue) {
                Ok(Rewrite {
                    replacement,
                    written,
                    rejected,
                }) => {
                    for key in &written {
                        queue.remove(key);
                    }
                    report.failed.extend(rejected);
                    remove_old_pair(dest, loaded, replacement.as_ref());

                    // Rejected records follow the archive to its new name
                    let retarget = replacement.as_ref().map(|r| r.name.clone());
                    for staged in queue.values_mut() {
                        if staged.target.as_deref() == Some(old_name.as_str()) {
                            staged.target.clone_from(&retarget);
                        }
                    }

                    match replacement {
                        Some(replacement) => {
                            info!(old = %old_name, new = %replacement.name, "rewrote archive");
                            report.rewritten.push((old_name, replacement.name.clone()));
                            indices[position] = replacement;
                            position += 1;
                        }
                        None => {
                            info!(archive = %old_name, "removed empty archive");
                            report.removed.push(old_name);
                            indices.remove(position);
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(archive = %old_name, error = %e, "archive rewrite failed");
                    report.failed.push((old_name, e));
                    position += 1;
                }
            }
        }

        // Everything else goes into new archives
        let pending: Vec<(Vec<u8>, StagedRecord)> = queue
            .iter()
            .filter(|(_, s)| s.target.is_none())
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect();
        let runs = partition(&pending, self.config.max_archive_size, |(_, s)| s.record.encoded_size);

        for run in runs {
            let items = &pending[run];
            let mut builder = self.archive_builder(dest, &IndexFile::new(IndexType::DATA))?;
            let mut written = Vec::new();
            for (key, staged) in items {
                match builder.append(key, &staged.payload, staged.record.encoded_size) {
                    Ok(()) => written.push(key.clone()),
                    Err(e) if e.is_fatal() => {
                        builder.abandon();
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(key = %hex::encode(key), error = %e, "could not archive record");
                        report.failed.push((hex::encode(key), e));
                    }
                }
            }

            match builder.finish(dest)? {
                Some(loaded) => {
                    info!(
                        archive = %loaded.name,
                        entries = loaded.index.len(),
                        bytes = loaded.index.next_offset(),
                        "created archive"
                    );
                    for key in &written {
                        queue.remove(key);
                    }
                    report.created.push(loaded.name.clone());
                    indices.push(loaded);
                }
                None => debug!(records = items.len(), "no records archived for partition"),
            }
        }

        indices.sort_by(|a, b| (a.folder, &a.name).cmp(&(b.folder, &b.name)));
        info!(
            created = report.created.len(),
            rewritten = report.rewritten.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            queued = queue.len(),
            "saved container"
        );
        Ok(report)
    }

    /// Rewrite one archive, returning its replacement and the queued keys written
    fn rewrite_archive(
        &self,
        dest: &StorageLayout,
        loaded: &LoadedIndex,
        targeted: &[Vec<u8>],
        queue: &BTreeMap<Vec<u8>, StagedRecord>,
    ) -> StorageResult<Rewrite> {
        if !loaded.owns_blob() {
            // Loose and group indices have no blob of their own
            let mut rewrite = Rewrite {
                replacement: None,
                written: Vec::new(),
                rejected: Vec::new(),
            };
            if loaded.index.is_empty() {
                return Ok(rewrite);
            }
            let mut index = loaded.index.clone();
            let mut bytes = Vec::new();
            let name = index.write(&mut bytes)?;
            let path = dest.object_path(loaded.folder, &name, ".index")?;
            write_file(&path, &bytes)?;
            let blob_path = dest.object_path(loaded.folder, &name, "")?;
            rewrite.replacement = Some(LoadedIndex {
                name,
                folder: loaded.folder,
                index,
                blob_path,
            });
            return Ok(rewrite);
        }

        let mut builder = self.archive_builder(dest, &loaded.index)?;
        if !loaded.index.is_empty() {
            let mut blob = match File::open(&loaded.blob_path) {
                Ok(blob) => blob,
                Err(e) => {
                    builder.abandon();
                    return Err(e.into());
                }
            };

            let mut existing: Vec<(&[u8], &IndexLocation)> = loaded.index.entries().collect();
            existing.sort_by_key(|(_, location)| location.offset);
            for (key, location) in existing {
                if let Err(e) = builder.copy_range(key, &mut blob, location) {
                    builder.abandon();
                    return Err(e);
                }
            }
        }

        let mut written = Vec::new();
        let mut rejected = Vec::new();
        for key in targeted {
            let Some(staged) = queue.get(key) else {
                continue;
            };
            match builder.append(key, &staged.payload, staged.record.encoded_size) {
                Ok(()) => written.push(key.clone()),
                Err(e) if e.is_fatal() => {
                    builder.abandon();
                    return Err(e);
                }
                Err(e) => rejected.push((hex::encode(key), e)),
            }
        }

        Ok(Rewrite {
            replacement: builder.finish(dest)?,
            written,
            rejected,
        })
    }

    fn archive_builder(&self, dest: &StorageLayout, like: &IndexFile) -> StorageResult<ArchiveBuilder> {
        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        let dir = dest.folder_dir(Folder::Data);
        fs::create_dir_all(&dir)?;
        let temp_path = dir.join(format!(".staging-{}-{seq}", std::process::id()));
        let blob = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        Ok(ArchiveBuilder {
            temp_path,
            blob,
            index: IndexFile::with_key_size(IndexType::DATA, like.key_size() as u8)?,
        })
    }
}

fn insert_staged(
    queue: &mut BTreeMap<Vec<u8>, StagedRecord>,
    record: ContentRecord,
    payload: Payload,
    target: Option<String>,
) -> StorageResult<bool> {
    if u32::try_from(record.encoded_size).is_err() {
        return Err(StorageError::InvalidArgument(format!(
            "record {} is too large for an archive entry",
            record.encoding_key.to_hex()
        )));
    }

    let key = record.encoding_key.as_bytes().to_vec();
    if queue.contains_key(&key) {
        return Ok(false);
    }
    debug!(key = %record.encoding_key.to_hex(), size = record.encoded_size, "staged record");
    queue.insert(
        key,
        StagedRecord {
            record,
            payload,
            target,
        },
    );
    Ok(true)
}

/// First searchable index in `folder` holding `key`
fn find_entry<'a>(
    indices: &'a [LoadedIndex],
    folder: Folder,
    key: &[u8],
) -> StorageResult<Option<(&'a LoadedIndex, IndexLocation)>> {
    for loaded in indices
        .iter()
        .filter(|i| i.folder == folder && i.searchable())
    {
        if key.len() < loaded.index.key_size() {
            continue;
        }
        if let Some(location) = loaded.index.try_get(key)? {
            return Ok(Some((loaded, location)));
        }
    }
    Ok(None)
}

/// Index files two directory levels below `dir`
fn scan_index_files(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !dir.is_dir() {
        return Ok(found);
    }
    for first in fs::read_dir(dir)? {
        let first = first?.path();
        if !first.is_dir() {
            continue;
        }
        for second in fs::read_dir(&first)? {
            let second = second?.path();
            if !second.is_dir() {
                continue;
            }
            for file in fs::read_dir(&second)? {
                let path = file?.path();
                if path.extension().is_some_and(|e| e == "index") {
                    found.push(path);
                }
            }
        }
    }
    found.sort();
    Ok(found)
}

fn write_file(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
}

/// Delete the pair a rewrite replaced, when it lives under `dest`
fn remove_old_pair(dest: &StorageLayout, old: &LoadedIndex, replacement: Option<&LoadedIndex>) {
    if replacement.is_some_and(|r| r.name == old.name) {
        return;
    }
    let Ok(index_path) = dest.object_path(old.folder, &old.name, ".index") else {
        return;
    };
    if !index_path.exists() {
        return;
    }
    let mut doomed = vec![index_path];
    if old.owns_blob() {
        doomed.push(old.blob_path.clone());
    }
    for path in doomed {
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "could not delete replaced archive file");
        }
    }
}

async fn download_index(
    remote: &dyn RemoteSource,
    remote_path: &str,
    local: &Path,
    cancel: &CancellationToken,
) -> StorageResult<()> {
    if let Ok(meta) = fs::metadata(local)
        && remote.content_length(remote_path, cancel).await? == Some(meta.len())
    {
        debug!(path = %local.display(), "index already present");
        return Ok(());
    }

    let data = remote
        .fetch(remote_path, cancel)
        .await?
        .ok_or_else(|| StorageError::Transport(format!("{remote_path}: all hosts failed")))?;

    // Refuse to persist anything that would not load
    IndexFile::from_bytes(&data, IndexType::DATA)?;

    let temp = local.with_extension("index.part");
    write_file(&temp, &data)?;
    fs::rename(&temp, local)?;
    debug!(path = %local.display(), bytes = data.len(), "downloaded index");
    Ok(())
}

/// Archive blob under construction plus its index
struct ArchiveBuilder {
    temp_path: PathBuf,
    blob: File,
    index: IndexFile,
}

impl ArchiveBuilder {
    /// Copy an existing entry from `source`
    fn copy_range(&mut self, key: &[u8], source: &mut File, location: &IndexLocation) -> StorageResult<()> {
        let size = u64::from(location.compressed_size);
        source.seek(SeekFrom::Start(u64::from(location.offset)))?;
        let copied = io::copy(&mut Read::by_ref(source).take(size), &mut self.blob)?;
        if copied != size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("archive ends inside entry {}", hex::encode(key)),
            )));
        }
        self.index.add(key, location.compressed_size)?;
        Ok(())
    }

    /// Append a staged payload, leaving the blob untouched on failure
    fn append(&mut self, key: &[u8], payload: &Payload, size: u64) -> StorageResult<()> {
        let compressed_size = u32::try_from(size)
            .map_err(|_| StorageError::InvalidArgument(format!("record of {size} bytes")))?;
        let start = self.index.next_offset();

        let result = payload.copy_to(size, &mut self.blob).and_then(|()| {
            if self.index.add(key, compressed_size)? {
                Ok(())
            } else {
                Err(StorageError::InvalidArgument(format!(
                    "duplicate key {}",
                    hex::encode(key)
                )))
            }
        });

        if let Err(e) = result {
            self.blob.set_len(start)?;
            self.blob.seek(SeekFrom::Start(start))?;
            return Err(e);
        }
        Ok(())
    }

    fn abandon(self) {
        drop(self.blob);
        if let Err(e) = fs::remove_file(&self.temp_path) {
            warn!(path = %self.temp_path.display(), error = %e, "could not delete staging file");
        }
    }

    /// Name and place the archive, `None` when nothing was written
    ///
    /// The staging file is deleted when placing fails.
    fn finish(self, dest: &StorageLayout) -> StorageResult<Option<LoadedIndex>> {
        let temp_path = self.temp_path.clone();
        let placed = self.place(dest);
        if placed.is_err()
            && temp_path.exists()
            && let Err(e) = fs::remove_file(&temp_path)
        {
            warn!(path = %temp_path.display(), error = %e, "could not delete staging file");
        }
        placed
    }

    fn place(self, dest: &StorageLayout) -> StorageResult<Option<LoadedIndex>> {
        let Self {
            temp_path,
            mut blob,
            mut index,
        } = self;

        if index.is_empty() {
            drop(blob);
            fs::remove_file(&temp_path)?;
            return Ok(None);
        }

        blob.flush()?;
        blob.sync_all()?;
        drop(blob);

        let mut bytes = Vec::new();
        let name = index.write(&mut bytes)?;
        let blob_path = dest.archive_path(&name)?;
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&temp_path, &blob_path)?;
        write_file(&dest.index_path(&name)?, &bytes)?;

        Ok(Some(LoadedIndex {
            name,
            folder: Folder::Data,
            index,
            blob_path,
        }))
    }
}
