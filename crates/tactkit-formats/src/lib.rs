//! BLTE block codec and paged archive index format for TACT storage
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format fields
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // Domain-specific naming patterns
#![allow(clippy::return_self_not_must_use)] // Builder patterns
//! This crate provides the two binary formats a TACT storage engine is built on:
//!
//! - **BLTE**: the chunked container every stored file is encoded into. Each
//!   block is independently stored raw, zlib compressed or encrypted. The
//!   [`blte::BlteWriter`] produces a container plus its [`blte::ContentRecord`];
//!   the [`blte::BlteReader`] decodes one lazily behind `Read + Seek`.
//! - **Index files**: the paged, sorted key to location tables that describe
//!   the records stored in one archive blob ([`index::IndexFile`]).
//!
//! # Round trip
//!
//! ```
//! use std::io::{Read, Write};
//! use tactkit_formats::blte::{BlteReader, BlteWriter, EncodingMap};
//!
//! let mut writer = BlteWriter::new(EncodingMap::zlib(9));
//! writer.write_all(b"hello hello hello hello").unwrap();
//! let encoded = writer.finalize().unwrap().clone();
//!
//! let mut reader = BlteReader::from_bytes(encoded.data).unwrap();
//! let mut decoded = Vec::new();
//! reader.read_to_end(&mut decoded).unwrap();
//! assert_eq!(decoded, b"hello hello hello hello");
//! ```

#![warn(missing_docs)]

pub mod blte;
pub mod index;

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
pub(crate) mod test_utils;
