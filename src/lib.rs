//! # cellstore - Multi-Dimensional Array Storage Engine
//!
//! cellstore persists typed, sparse or dense N-dimensional arrays as
//! ordered collections of immutable, append-only *fragments* on a
//! pluggable file system, and executes read and write *queries* over
//! subarray regions into caller-owned buffers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │   Queries (read merge / write assembly)     │
//! ├──────────────────────┬──────────────────────┤
//! │      KV facade       │   Sorted adapters    │
//! ├──────────────────────┴──────────────────────┤
//! │  Fragments (writer / reader / footer)       │
//! ├─────────────────────────────────────────────┤
//! │  Tiles + codec pipeline (chunked compress)  │
//! ├─────────────────────────────────────────────┤
//! │  Schema & domain algebra (orders, MBRs)     │
//! ├─────────────────────────────────────────────┤
//! │  Storage manager (tile cache, snapshots)    │
//! ├─────────────────────────────────────────────┤
//! │  VFS (file:// | mem:// | s3:// | hdfs://)   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use cellstore::{
//!     ArraySchema, Attribute, Dimension, ReadBuffer, ReadQuery, StorageManager, WriteBuffer,
//!     WriteQuery,
//! };
//! use cellstore::config::Config;
//! use cellstore::types::{coords_to_bytes, ArrayType, Datatype, Layout};
//! use cellstore::vfs::Uri;
//!
//! let sm = StorageManager::new(Config::default());
//! let uri = Uri::new("file:///data/my_array");
//!
//! let schema = ArraySchema::new(
//!     ArrayType::Sparse,
//!     Datatype::Uint64,
//!     vec![
//!         Dimension::new("d1", [1u64, 4], Some(2)),
//!         Dimension::new("d2", [1u64, 4], Some(2)),
//!     ],
//!     vec![Attribute::new("a1", Datatype::Int32)],
//!     Layout::RowMajor,
//!     Layout::RowMajor,
//!     2,
//! )?;
//! sm.array_create(&uri, &schema)?;
//!
//! let mut write = WriteQuery::new(&sm, &uri, None, &["a1", "__coords"], Layout::Unordered)?;
//! write.submit(&[
//!     WriteBuffer::fixed(&7i32.to_le_bytes()),
//!     WriteBuffer::fixed(&coords_to_bytes(&[3u64, 3])),
//! ])?;
//! write.finalize()?;
//!
//! let mut out = [0u8; 64];
//! let mut buffers = [ReadBuffer::fixed(&mut out)];
//! let mut read = ReadQuery::new(&sm, &uri, None, &["a1"], Layout::GlobalOrder)?;
//! read.submit(&mut buffers)?;
//! ```
//!
//! ## Semantics
//!
//! - Writes are atomic at fragment granularity: a fragment becomes visible
//!   only through the final directory rename, and a failed write leaves no
//!   trace. Concurrent writers never conflict (unique fragment names).
//! - Reads operate on the fragment snapshot captured at query init; cells
//!   written by overlapping fragments resolve to the latest fragment in
//!   `(timestamp, host, thread)` insertion order.
//! - A read that fills a buffer suspends with `Overflowed` instead of
//!   failing; resubmitting resumes from the suspended cursor.
//!
//! ## Module Overview
//!
//! - [`schema`]: array schemas and the domain order/tiling algebra
//! - [`query`]: the read and write state machines
//! - [`fragment`]: on-disk fragment writer/reader and metadata footers
//! - [`codec`] / [`tile`]: the chunked tile compression pipeline
//! - [`kv`]: the key-value facade over hashed 2-D coordinates
//! - [`storage`]: the storage manager and shared tile cache
//! - [`vfs`]: the pluggable file-system seam
//! - [`config`]: engine constants and parameter structs

pub mod codec;
pub mod config;
pub mod error;
pub mod fragment;
pub mod kv;
pub mod query;
pub mod schema;
pub mod storage;
pub mod tile;
pub mod types;
pub mod vfs;

pub use error::{ErrorKind, VfsReason};
pub use query::{QueryStatus, ReadBuffer, ReadQuery, WriteBuffer, WriteQuery};
pub use schema::{ArraySchema, Attribute, Dimension};
pub use storage::StorageManager;
