//! Index and archive container for TACT content-addressed storage
//!
//! Encoded records are staged in an [`IndexContainer`], packed into archive
//! blobs of bounded size on [`save`](IndexContainer::save), and resolved back
//! to decoded streams by encoding key. Each blob is described by a paged
//! index file and both are stored under a content-addressed tree:
//!
//! ```text
//! <root>/tpr/<product>/data/<aa>/<bb>/<archive>
//! <root>/tpr/<product>/data/<aa>/<bb>/<archive>.index
//! ```
//!
//! Archives missing locally are fetched by byte range from the configured
//! CDN hosts, trying each host in turn.
//!
//! # Example
//!
//! ```rust,no_run
//! use tactkit_formats::blte::{BlteWriter, EncodingMap};
//! use tactkit_storage::{IndexContainer, StorageConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let container = IndexContainer::new(StorageConfig::new("/srv/tact"))?;
//!
//! let encoded = BlteWriter::encode(b"file contents", EncodingMap::zlib(9))?;
//! let key = encoded.record.encoding_key;
//! container.enqueue_encoded(encoded)?;
//! container.save()?;
//!
//! let reader = container.open_file(key.as_bytes()).await?;
//! assert!(reader.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::cast_possible_truncation)] // Index fields are narrower than u64
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cancel;
pub mod config;
pub mod container;
pub mod error;
pub mod layout;
pub mod packing;
pub mod pool;
pub mod remote;

pub use cancel::CancellationToken;
pub use config::{DEFAULT_MAX_ARCHIVE_SIZE, StorageConfig};
pub use container::{ArchiveEntry, FileReader, IndexContainer, LoadReport, SaveReport};
pub use error::{StorageError, StorageResult};
pub use layout::{Folder, StorageLayout};
pub use packing::partition;
pub use remote::{CdnClient, RemoteSource};
