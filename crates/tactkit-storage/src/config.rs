//! Configuration for the storage container

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

/// Largest archive blob created when flushing queued records
pub const DEFAULT_MAX_ARCHIVE_SIZE: u64 = 256_000_000;

/// Configuration for the storage container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage root, the `tpr/<product>` tree lives underneath
    pub root: PathBuf,

    /// Product path segment under `tpr/`
    pub product: String,

    /// Index parse workers, 0 or 1 parses sequentially
    pub parse_parallelism: usize,

    /// Concurrent downloads
    pub download_workers: usize,

    /// CDN hosts in priority order (`host` or `host:port`)
    pub hosts: Vec<String>,

    /// URL scheme for CDN requests
    pub scheme: String,

    /// Bound on one request to one host
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Bound on establishing a connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Largest archive blob written by a flush
    pub max_archive_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        Self {
            root: PathBuf::from("./data"),
            product: "wow".to_string(),
            parse_parallelism: cpus,
            download_workers: cpus,
            hosts: Vec::new(),
            scheme: "http".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_archive_size: DEFAULT_MAX_ARCHIVE_SIZE,
        }
    }
}

impl StorageConfig {
    /// Create a configuration rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load configuration from `TACTKIT_*` environment variables
    ///
    /// Unset variables keep their defaults. `TACTKIT_HOSTS` is a comma
    /// separated list.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_env_with_prefix("TACTKIT")
    }

    fn from_env_with_prefix(prefix: &str) -> StorageResult<Self> {
        let var = |name: &str| std::env::var(format!("{prefix}_{name}")).ok();
        let number = |name: &str| -> StorageResult<Option<u64>> {
            var(name)
                .map(|value| {
                    value.trim().parse().map_err(|_| {
                        StorageError::Config(format!("{prefix}_{name} is not a number: {value}"))
                    })
                })
                .transpose()
        };

        let mut config = Self::default();
        if let Some(root) = var("ROOT") {
            config.root = PathBuf::from(root);
        }
        if let Some(product) = var("PRODUCT") {
            config.product = product;
        }
        if let Some(hosts) = var("HOSTS") {
            config.hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(scheme) = var("SCHEME") {
            config.scheme = scheme;
        }
        if let Some(n) = number("PARSE_PARALLELISM")? {
            config.parse_parallelism = n as usize;
        }
        if let Some(n) = number("DOWNLOAD_WORKERS")? {
            config.download_workers = n as usize;
        }
        if let Some(n) = number("REQUEST_TIMEOUT")? {
            config.request_timeout = Duration::from_secs(n);
        }
        if let Some(n) = number("CONNECT_TIMEOUT")? {
            config.connect_timeout = Duration::from_secs(n);
        }
        if let Some(n) = number("MAX_ARCHIVE_SIZE")? {
            config.max_archive_size = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration, missing fields keep their defaults
    pub fn from_json(json: &str) -> StorageResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the container cannot work with
    pub fn validate(&self) -> StorageResult<()> {
        if self.max_archive_size == 0 {
            return Err(StorageError::Config("max_archive_size must be positive".into()));
        }
        if self.product.is_empty() || self.product.contains(['/', '\\']) {
            return Err(StorageError::Config(format!(
                "invalid product segment: {:?}",
                self.product
            )));
        }
        if !matches!(self.scheme.as_str(), "http" | "https") {
            return Err(StorageError::Config(format!(
                "unsupported scheme: {}",
                self.scheme
            )));
        }
        Ok(())
    }

    /// Set the storage root
    #[must_use]
    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    /// Set the product path segment
    #[must_use]
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    /// Set the CDN hosts
    #[must_use]
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Set the index parse parallelism
    #[must_use]
    pub const fn with_parse_parallelism(mut self, workers: usize) -> Self {
        self.parse_parallelism = workers;
        self
    }

    /// Set the download worker count
    #[must_use]
    pub const fn with_download_workers(mut self, workers: usize) -> Self {
        self.download_workers = workers;
        self
    }

    /// Set the per-host request timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the maximum archive size
    #[must_use]
    pub const fn with_max_archive_size(mut self, size: u64) -> Self {
        self.max_archive_size = size;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
