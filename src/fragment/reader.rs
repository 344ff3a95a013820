//! # Fragment Reader
//!
//! Random access to the tiles of a committed fragment: seek to the offset
//! recorded in the footer, read the compressed bytes, decompress through
//! the stream's codec. Decompressed tiles are served from (and admitted to)
//! the storage manager's shared tile cache, keyed by
//! `(fragment, stream, tile)` and accounted by decompressed size.

use std::sync::Arc;

use eyre::{Result, WrapErr};

use super::metadata::FragmentMetadata;
use crate::codec::for_compressor;
use crate::schema::{ArraySchema, StreamKind};
use crate::storage::{StorageManager, TileKey};
use crate::tile;
use crate::vfs::Vfs;

pub struct FragmentReader<'a> {
    sm: &'a StorageManager,
    schema: &'a ArraySchema,
    meta: Arc<FragmentMetadata>,
}

impl<'a> FragmentReader<'a> {
    pub fn new(sm: &'a StorageManager, schema: &'a ArraySchema, meta: Arc<FragmentMetadata>) -> Self {
        Self { sm, schema, meta }
    }

    pub fn meta(&self) -> &Arc<FragmentMetadata> {
        &self.meta
    }

    /// Number of cells in tile `t` of stream `stream` (fixed-size streams).
    pub fn cells_in_tile(&self, stream: usize, t: u64) -> u64 {
        let cell_size = self.schema.streams()[stream]
            .cell_size
            .expect("cell counting needs a fixed-size stream");
        self.meta.stream(stream).orig_sizes[t as usize] / cell_size
    }

    /// Reads (or serves from cache) the decompressed payload of tile `t`.
    pub fn tile(&self, stream: usize, t: u64) -> Result<Arc<Vec<u8>>> {
        let key = TileKey {
            fragment: self.meta.cache_id(),
            stream: stream as u32,
            tile: t,
        };
        if let Some(hit) = self.sm.tile_cache().get(&key) {
            return Ok(hit);
        }

        let stream_meta = self.meta.stream(stream);
        let offset = stream_meta.offsets[t as usize];
        let comp_size = stream_meta.comp_sizes[t as usize];
        let orig_size = stream_meta.orig_sizes[t as usize];
        let desc = &self.schema.streams()[stream];
        let file_uri = self.meta.uri().join(&desc.file_name);

        let compressed = self
            .sm
            .vfs()
            .read(&file_uri, offset, comp_size)
            .wrap_err_with(|| format!("failed to read tile {} of '{}'", t, file_uri))?;

        let codec = for_compressor(desc.compressor, desc.datatype);
        let payload = match desc.kind {
            StreamKind::Coords => tile::decompress_coords(
                codec.as_ref(),
                &compressed,
                self.schema.dim_num(),
                self.schema.coord_type().size(),
                orig_size,
            )?,
            _ => tile::decompress(codec.as_ref(), &compressed, orig_size)?,
        };

        let payload = Arc::new(payload);
        self.sm.tile_cache().insert(key, Arc::clone(&payload));
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fragment::FragmentWriter;
    use crate::schema::{Attribute, Dimension};
    use crate::types::{coords_to_bytes, ArrayType, Datatype, Layout};
    use crate::vfs::Uri;

    #[test]
    fn test_reader_roundtrips_tiles_through_cache() {
        let sm = StorageManager::new(Config::default());
        let schema = Arc::new(
            ArraySchema::new(
                ArrayType::Sparse,
                Datatype::Uint64,
                vec![
                    Dimension::new("d1", [1u64, 4], Some(2)),
                    Dimension::new("d2", [1u64, 4], Some(2)),
                ],
                vec![Attribute::new("a1", Datatype::Int32)],
                Layout::RowMajor,
                Layout::RowMajor,
                2,
            )
            .unwrap(),
        );
        let array = Uri::new("mem://arr");
        sm.array_create(&array, &schema).unwrap();

        let mut writer = FragmentWriter::new(&sm, Arc::clone(&schema), &array, None).unwrap();
        for (i, coords) in [[1u64, 1], [1, 2]].iter().enumerate() {
            writer
                .append_cell(&[&(i as i32).to_le_bytes()], Some(&coords_to_bytes(coords)))
                .unwrap();
        }
        let meta = writer.finalize().unwrap().unwrap();

        let reader = FragmentReader::new(&sm, &schema, meta);
        let attr_tile = reader.tile(0, 0).unwrap();
        assert_eq!(attr_tile.as_slice(), {
            let mut v = Vec::new();
            v.extend_from_slice(&0i32.to_le_bytes());
            v.extend_from_slice(&1i32.to_le_bytes());
            v
        });
        let coords_tile = reader.tile(1, 0).unwrap();
        assert_eq!(coords_tile.as_slice(), coords_to_bytes(&[1u64, 1, 1, 2]).as_slice());
        assert_eq!(reader.cells_in_tile(1, 0), 2);

        // Second read is a cache hit returning the same allocation.
        let again = reader.tile(0, 0).unwrap();
        assert!(Arc::ptr_eq(&attr_tile, &again));
    }
}
