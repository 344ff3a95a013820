//! # Fragment Writer
//!
//! Accumulates cells into per-stream tile buffers, compresses and appends
//! full tiles to the attribute files of an in-progress fragment directory,
//! and tracks the sparse tile index (MBRs, bounding coordinates, global
//! MBR) as cells arrive.
//!
//! ## Commit Protocol
//!
//! The fragment is staged under a dot-prefixed directory name that readers
//! never list. `finalize` flushes the last tile, writes the metadata
//! footer, drops the zero-byte success marker and atomically renames the
//! directory to its visible name; the rename is the commit point. Any
//! failure (or an explicit `abort`) deletes the staged directory; a partial
//! fragment is never observable. A writer that produced no cells commits
//! nothing and leaves the array byte-identical.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{ensure, Result, WrapErr};
use tracing::{debug, warn};

use super::metadata::{FragmentMetadata, StreamMeta};
use crate::codec::{for_compressor, Codec};
use crate::config::constants::{FRAGMENT_METADATA_FILENAME, OK_FILENAME};
use crate::error::ErrorKind;
use crate::schema::{ArraySchema, StreamDesc, StreamKind};
use crate::storage::StorageManager;
use crate::tile;
use crate::vfs::{Uri, Vfs};

enum WriterState {
    Open,
    Committed,
    Aborted,
}

struct StreamState {
    desc: StreamDesc,
    codec: Box<dyn Codec>,
    file_uri: Uri,
    staged: Vec<u8>,
    file_offset: u64,
    meta: StreamMeta,
}

pub struct FragmentWriter<'a> {
    sm: &'a StorageManager,
    schema: Arc<ArraySchema>,
    staging_uri: Uri,
    final_uri: Uri,
    subarray: Option<Vec<u8>>,
    expected_cells: Option<u64>,
    cells_per_tile: u64,
    streams: Vec<StreamState>,
    tile_cells: u64,
    tile_count: u64,
    total_cells: u64,
    mbrs: Vec<u8>,
    bounds: Vec<u8>,
    global_mbr: Vec<u8>,
    cur_mbr: Vec<u8>,
    cur_first: Vec<u8>,
    cur_last: Vec<u8>,
    state: WriterState,
}

impl<'a> FragmentWriter<'a> {
    /// Opens a staged fragment. Dense fragments require a tile-aligned
    /// subarray describing the region they cover; sparse fragments take
    /// none.
    pub fn new(
        sm: &'a StorageManager,
        schema: Arc<ArraySchema>,
        array_uri: &Uri,
        subarray: Option<&[u8]>,
    ) -> Result<Self> {
        let expected_cells = if schema.dense() {
            let subarray = subarray.ok_or_else(|| {
                ErrorKind::query("dense fragments require a target subarray")
            })?;
            if !schema.ops().tile_aligned(subarray) {
                return Err(ErrorKind::query(
                    "dense writes require a tile-aligned subarray",
                ));
            }
            Some(schema.ops().rect_cell_count(subarray).ok_or_else(|| {
                ErrorKind::query("dense write region cell count overflows u64")
            })?)
        } else {
            ensure!(
                subarray.is_none(),
                "sparse fragments are unbounded, no subarray applies"
            );
            None
        };

        let (staging_uri, final_uri) = new_fragment_uris(sm, array_uri)?;
        sm.vfs().create_dir(&staging_uri)?;

        let cells_per_tile = schema.cells_per_tile();
        let streams = schema
            .streams()
            .iter()
            .map(|desc| StreamState {
                codec: for_compressor(desc.compressor, desc.datatype),
                file_uri: staging_uri.join(&desc.file_name),
                staged: Vec::new(),
                file_offset: 0,
                meta: StreamMeta::default(),
                desc: desc.clone(),
            })
            .collect();

        Ok(Self {
            sm,
            schema,
            staging_uri,
            final_uri,
            subarray: subarray.map(|s| s.to_vec()),
            expected_cells,
            cells_per_tile,
            streams,
            tile_cells: 0,
            tile_count: 0,
            total_cells: 0,
            mbrs: Vec::new(),
            bounds: Vec::new(),
            global_mbr: Vec::new(),
            cur_mbr: Vec::new(),
            cur_first: Vec::new(),
            cur_last: Vec::new(),
            state: WriterState::Open,
        })
    }

    /// The committed name this fragment will take.
    pub fn fragment_uri(&self) -> &Uri {
        &self.final_uri
    }

    /// Appends one cell. `values` holds one byte slice per schema attribute
    /// in schema order; `coords` is required for sparse fragments.
    pub fn append_cell(&mut self, values: &[&[u8]], coords: Option<&[u8]>) -> Result<()> {
        debug_assert!(matches!(self.state, WriterState::Open));
        let schema = Arc::clone(&self.schema);
        ensure!(
            values.len() == schema.attributes().len(),
            "write covers {} attributes, schema has {}",
            values.len(),
            schema.attributes().len()
        );

        let mut stream_i = 0;
        for (attr, value) in schema.attributes().iter().zip(values) {
            if attr.var_size() {
                let offset = self.streams[stream_i + 1].staged.len() as u64;
                self.streams[stream_i]
                    .staged
                    .extend_from_slice(&offset.to_le_bytes());
                self.streams[stream_i + 1].staged.extend_from_slice(value);
                stream_i += 2;
            } else {
                let cell_size = attr.cell_size().unwrap() as usize;
                ensure!(
                    value.len() == cell_size,
                    "attribute '{}' cell is {} bytes, expected {}",
                    attr.name(),
                    value.len(),
                    cell_size
                );
                self.streams[stream_i].staged.extend_from_slice(value);
                stream_i += 1;
            }
        }

        if !schema.dense() {
            let coords = coords
                .ok_or_else(|| ErrorKind::query("sparse writes require coordinates"))?;
            ensure!(
                coords.len() == schema.coords_size(),
                "coordinates are {} bytes, expected {}",
                coords.len(),
                schema.coords_size()
            );
            self.streams[stream_i].staged.extend_from_slice(coords);
            schema.ops().expand_mbr(&mut self.cur_mbr, coords);
            if self.cur_first.is_empty() {
                self.cur_first.extend_from_slice(coords);
            }
            self.cur_last.clear();
            self.cur_last.extend_from_slice(coords);
        }

        self.tile_cells += 1;
        self.total_cells += 1;
        if self.tile_cells == self.cells_per_tile {
            self.flush_tile()?;
        }
        Ok(())
    }

    fn flush_tile(&mut self) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let dim_num = schema.dim_num();
        let elem = schema.coord_type().size();
        for stream in &mut self.streams {
            let mut compressed = Vec::new();
            match stream.desc.kind {
                StreamKind::Coords => tile::compress_coords(
                    stream.codec.as_ref(),
                    stream.desc.level,
                    &stream.staged,
                    dim_num,
                    elem,
                    &mut compressed,
                )?,
                _ => tile::compress(
                    stream.codec.as_ref(),
                    stream.desc.level,
                    &stream.staged,
                    &mut compressed,
                )?,
            }
            self.sm
                .vfs()
                .write(&stream.file_uri, &compressed, true)
                .wrap_err_with(|| {
                    format!("failed to append tile to '{}'", stream.file_uri)
                })?;
            stream.meta.offsets.push(stream.file_offset);
            stream.meta.comp_sizes.push(compressed.len() as u64);
            stream.meta.orig_sizes.push(stream.staged.len() as u64);
            stream.file_offset += compressed.len() as u64;
            stream.staged.clear();
        }

        if !schema.dense() {
            self.mbrs.extend_from_slice(&self.cur_mbr);
            self.bounds.extend_from_slice(&self.cur_first);
            self.bounds.extend_from_slice(&self.cur_last);
            let mbr = std::mem::take(&mut self.cur_mbr);
            schema.ops().expand_rect(&mut self.global_mbr, &mbr);
            self.cur_first.clear();
            self.cur_last.clear();
        }

        self.tile_count += 1;
        self.tile_cells = 0;
        Ok(())
    }

    /// Seals the fragment. Returns None when no cells were appended (the
    /// array stays untouched). On error the staged directory is removed.
    pub fn finalize(&mut self) -> Result<Option<Arc<FragmentMetadata>>> {
        match self.finalize_inner() {
            Ok(meta) => Ok(meta),
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    fn finalize_inner(&mut self) -> Result<Option<Arc<FragmentMetadata>>> {
        debug_assert!(matches!(self.state, WriterState::Open));
        if self.total_cells == 0 {
            self.abort();
            return Ok(None);
        }

        if self.schema.dense() {
            ensure!(
                self.tile_cells == 0 && Some(self.total_cells) == self.expected_cells,
                "dense write covered {} cells, region holds {}",
                self.total_cells,
                self.expected_cells.unwrap_or(0)
            );
            self.global_mbr = self.subarray.clone().unwrap();
        } else if self.tile_cells > 0 {
            self.flush_tile()?;
        }

        let meta = FragmentMetadata::new(
            self.final_uri.clone(),
            self.schema.dense(),
            self.subarray.clone(),
            self.tile_count,
            self.streams.iter().map(|s| s.meta.clone()).collect(),
            std::mem::take(&mut self.mbrs),
            std::mem::take(&mut self.bounds),
            std::mem::take(&mut self.global_mbr),
            self.schema.coords_size(),
        )?;

        let vfs = self.sm.vfs();
        vfs.write(
            &self.staging_uri.join(FRAGMENT_METADATA_FILENAME),
            &meta.serialize(),
            false,
        )?;
        vfs.create_file(&self.staging_uri.join(OK_FILENAME))?;
        vfs.move_dir(&self.staging_uri, &self.final_uri)?;
        self.state = WriterState::Committed;
        debug!(fragment = %self.final_uri, tiles = self.tile_count, cells = self.total_cells,
               "committed fragment");
        Ok(Some(Arc::new(meta)))
    }

    /// Removes the staged directory. Best-effort; the directory is
    /// invisible to readers either way.
    pub fn abort(&mut self) {
        if !matches!(self.state, WriterState::Open) {
            return;
        }
        self.state = WriterState::Aborted;
        if let Err(err) = self.sm.vfs().delete_dir(&self.staging_uri) {
            warn!(fragment = %self.staging_uri, error = %err,
                  "failed to clean up staged fragment");
        }
    }
}

impl Drop for FragmentWriter<'_> {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Builds the unique `(staging, final)` directory pair for a new fragment.
/// Visible names are `__<timestamp_ms>_<host>_<thread>` with zero-padded
/// components so directory order is insertion order; the staging name adds
/// a leading dot.
fn new_fragment_uris(sm: &StorageManager, array_uri: &Uri) -> Result<(Uri, Uri)> {
    let mut ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| ErrorKind::query("system clock is before the epoch"))?
        .as_millis() as u64;
    let host = host_id() % 10_000_000_000;
    let thread = thread_id() % 10_000_000_000;
    loop {
        let name = format!("__{:015}_{:010}_{:010}", ts, host, thread);
        let final_uri = array_uri.join(&name);
        let staging_uri = array_uri.join(&format!(".{}", name));
        if !sm.vfs().is_dir(&final_uri)? && !sm.vfs().is_dir(&staging_uri)? {
            return Ok((staging_uri, final_uri));
        }
        ts += 1;
    }
}

fn host_id() -> u64 {
    let mut hasher = DefaultHasher::new();
    match std::env::var_os("HOSTNAME") {
        Some(host) => host.hash(&mut hasher),
        None => std::process::id().hash(&mut hasher),
    }
    hasher.finish()
}

fn thread_id() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::{Attribute, Dimension};
    use crate::types::{coords_to_bytes, ArrayType, Datatype, Layout};

    fn sparse_schema() -> ArraySchema {
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
        .unwrap()
    }

    #[test]
    fn test_writer_commits_visible_fragment() {
        let sm = StorageManager::new(Config::default());
        let schema = Arc::new(sparse_schema());
        let array = Uri::new("mem://arr");
        sm.array_create(&array, &schema).unwrap();

        let mut writer = FragmentWriter::new(&sm, Arc::clone(&schema), &array, None).unwrap();
        for (i, coords) in [[1u64, 1], [1, 2], [2, 1]].iter().enumerate() {
            let v = (i as i32).to_le_bytes();
            writer
                .append_cell(&[&v], Some(&coords_to_bytes(coords)))
                .unwrap();
        }
        let meta = writer.finalize().unwrap().unwrap();
        assert_eq!(meta.tile_count(), 2);
        assert_eq!(meta.global_mbr(), coords_to_bytes(&[1u64, 2, 1, 2]).as_slice());

        let fragments = sm.fragments(&array, &schema).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].name(), meta.name());
    }

    #[test]
    fn test_empty_writer_commits_nothing() {
        let sm = StorageManager::new(Config::default());
        let schema = Arc::new(sparse_schema());
        let array = Uri::new("mem://arr");
        sm.array_create(&array, &schema).unwrap();

        let mut writer = FragmentWriter::new(&sm, Arc::clone(&schema), &array, None).unwrap();
        assert!(writer.finalize().unwrap().is_none());
        assert!(sm.fragments(&array, &schema).unwrap().is_empty());
        assert!(sm.vfs().ls_dirs(&array).unwrap().is_empty());
    }

    #[test]
    fn test_abort_removes_staging() {
        let sm = StorageManager::new(Config::default());
        let schema = Arc::new(sparse_schema());
        let array = Uri::new("mem://arr");
        sm.array_create(&array, &schema).unwrap();

        let mut writer = FragmentWriter::new(&sm, Arc::clone(&schema), &array, None).unwrap();
        writer
            .append_cell(&[&1i32.to_le_bytes()], Some(&coords_to_bytes(&[1u64, 1])))
            .unwrap();
        drop(writer);
        assert!(sm.fragments(&array, &schema).unwrap().is_empty());
        assert!(sm.vfs().ls_dirs(&array).unwrap().is_empty());
    }
}
