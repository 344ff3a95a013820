//! # Storage Module
//!
//! The process-wide pieces: the [`StorageManager`] (explicitly constructed
//! and passed into every query; there are no globals) and the shared
//! [`TileCache`]. Also hosts the zerocopy parsing helper used by the
//! on-disk header structs.

mod manager;
mod tile_cache;

pub use manager::StorageManager;
pub use tile_cache::{TileCache, TileKey};

use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Parses a zerocopy struct from the front of a byte slice with size
/// validation.
#[inline]
pub(crate) fn parse_zerocopy<'a, T: FromBytes + KnownLayout + Immutable>(
    bytes: &'a [u8],
    type_name: &str,
) -> Result<&'a T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::ref_from_bytes(&bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}
