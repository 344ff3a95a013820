//! # Read Path
//!
//! A read merges the fragment snapshot captured at init into user buffers,
//! in the requested layout, resolving inter-fragment overwrites so the
//! latest fragment wins.
//!
//! ## Sparse Arrays
//!
//! Per-fragment cursors walk the candidate tiles whose MBRs intersect the
//! subarray (fragments whose global MBR misses it never reach I/O at all).
//! A k-way merge over the cursor heads emits the minimum coordinate under
//! the global order; on ties the highest-ranked (newest) fragment supplies
//! the cell and every older head with equal coordinates is discarded.
//!
//! ## Dense Arrays
//!
//! A domain walker enumerates the subarray in global order. Dense
//! fragments are rectangular and tile-aligned, so each coordinate is
//! served by direct tile addressing in the newest fragment containing it;
//! coordinates no fragment covers produce the type's empty sentinel.
//!
//! ## Overflow
//!
//! Cells are emitted atomically: before any byte is copied, every selected
//! attribute's remaining buffer space is checked. The first cell that does
//! not fit suspends the query with `Overflowed`, cursors intact; a
//! resubmission resumes exactly there.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use eyre::Result;
use smallvec::SmallVec;
use tracing::debug;

use super::sorted::SortedState;
use super::{check_read_buffers, resolve_read_attrs, AttrSel, QueryStatus, ReadBuffer};
use crate::error::ErrorKind;
use crate::fragment::{FragmentMetadata, FragmentReader};
use crate::schema::{ArraySchema, CellWalker};
use crate::storage::StorageManager;
use crate::types::Layout;
use crate::vfs::Uri;

pub struct ReadQuery<'a> {
    sm: &'a StorageManager,
    schema: Arc<ArraySchema>,
    subarray: Vec<u8>,
    attrs: Vec<AttrSel>,
    status: QueryStatus,
    cancelled: Arc<AtomicBool>,
    state: ReadState,
}

enum ReadState {
    /// No fragments or an empty subarray: nothing to produce.
    Done,
    Sparse(SparseState),
    Dense(DenseState),
    Sorted(SortedState),
}

impl<'a> ReadQuery<'a> {
    pub fn new(
        sm: &'a StorageManager,
        array_uri: &Uri,
        subarray: Option<&[u8]>,
        attr_names: &[&str],
        layout: Layout,
    ) -> Result<Self> {
        let schema = sm.array_schema(array_uri)?;
        let fragments = sm.fragments(array_uri, &schema)?;

        match layout {
            Layout::GlobalOrder => {}
            Layout::RowMajor | Layout::ColMajor => {
                if !schema.dense() {
                    return Err(ErrorKind::query(
                        "sorted reads apply to dense arrays; read sparse arrays in global order",
                    ));
                }
            }
            Layout::Unordered => {
                return Err(ErrorKind::query("reads cannot use the unordered layout"))
            }
        }

        let ops = schema.ops();
        let subarray = match subarray {
            Some(bytes) => {
                if bytes.len() != 2 * schema.coords_size() {
                    return Err(ErrorKind::query(format!(
                        "subarray is {} bytes, expected {}",
                        bytes.len(),
                        2 * schema.coords_size()
                    )));
                }
                if !ops.is_empty_rect(bytes) && !ops.rect_inside(bytes, schema.domain()) {
                    return Err(ErrorKind::query("subarray is out of the array domain"));
                }
                bytes.to_vec()
            }
            None => schema.domain().to_vec(),
        };

        let attrs = resolve_read_attrs(&schema, attr_names)?;

        let state = if fragments.is_empty() || ops.is_empty_rect(&subarray) {
            ReadState::Done
        } else if !schema.dense() {
            ReadState::Sparse(SparseState::new(&schema, &fragments, &subarray))
        } else if layout == Layout::GlobalOrder {
            ReadState::Dense(DenseState::new(&schema, &fragments, &subarray)?)
        } else {
            ReadState::Sorted(SortedState::new(&schema, &fragments, &subarray, layout)?)
        };

        Ok(Self {
            sm,
            schema,
            subarray,
            attrs,
            status: QueryStatus::InProgress,
            cancelled: Arc::new(AtomicBool::new(false)),
            state,
        })
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    /// Cooperative cancellation: setting the flag fails the query at the
    /// next cell boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Drives the read until completion or buffer overflow. `*_used`
    /// counters on the buffers report the bytes produced by this submit.
    pub fn submit(&mut self, buffers: &mut [ReadBuffer<'_>]) -> Result<QueryStatus> {
        if self.status == QueryStatus::Failed {
            return Err(ErrorKind::query("cannot resubmit a failed query"));
        }
        check_read_buffers(&self.attrs, buffers)?;
        for buffer in buffers.iter_mut() {
            buffer.data_used = 0;
            buffer.offsets_used = 0;
        }
        if self.status == QueryStatus::Completed {
            return Ok(QueryStatus::Completed);
        }

        let result = {
            let Self {
                sm,
                schema,
                subarray,
                attrs,
                cancelled,
                state,
                ..
            } = self;
            match state {
                ReadState::Done => Ok(QueryStatus::Completed),
                ReadState::Sparse(sparse) => {
                    sparse.drive(sm, schema, subarray, attrs, cancelled, buffers)
                }
                ReadState::Dense(dense) => dense.drive(sm, schema, attrs, cancelled, buffers),
                ReadState::Sorted(sorted) => sorted.drive(sm, schema, attrs, cancelled, buffers),
            }
        };

        match result {
            Ok(status) => {
                self.status = status;
                debug!(?status, "read submit finished");
                Ok(status)
            }
            Err(err) => {
                self.status = QueryStatus::Failed;
                Err(err)
            }
        }
    }
}

/// Where a cell's attribute values come from.
pub(super) enum CellSource<'x> {
    Fragment {
        meta: &'x Arc<FragmentMetadata>,
        tile: u64,
        pos: u64,
    },
    /// No fragment covers the coordinate (dense): empty sentinels.
    Empty,
}

/// Copies one cell into the user buffers, or returns Ok(false) without
/// copying anything if some attribute would overflow.
pub(super) fn emit_cell(
    sm: &StorageManager,
    schema: &ArraySchema,
    attrs: &[AttrSel],
    buffers: &mut [ReadBuffer<'_>],
    source: CellSource<'_>,
    coords: &[u8],
) -> Result<bool> {
    // Fit pass: var-size lengths come from the offsets tile, so no value
    // bytes are touched before the whole cell is known to fit.
    let mut var_plans: SmallVec<[(u64, u64); 8]> = SmallVec::new();
    for (sel, buffer) in attrs.iter().zip(buffers.iter()) {
        if !sel.var {
            let need = if sel.is_coords {
                coords.len()
            } else {
                sel.cell_size as usize
            };
            if buffer.data_used + need > buffer.data.len() {
                return Ok(false);
            }
            var_plans.push((0, 0));
        } else {
            let (start, len) = match &source {
                CellSource::Fragment { meta, tile, pos } => {
                    let reader = FragmentReader::new(sm, schema, Arc::clone(meta));
                    var_range(&reader, sel, *tile, *pos)?
                }
                CellSource::Empty => (0, sel.datatype.size() as u64),
            };
            let offsets = buffer.offsets.as_deref().unwrap();
            if buffer.offsets_used + 8 > offsets.len()
                || buffer.data_used + len as usize > buffer.data.len()
            {
                return Ok(false);
            }
            var_plans.push((start, len));
        }
    }

    // Copy pass.
    for ((sel, buffer), (start, len)) in attrs.iter().zip(buffers.iter_mut()).zip(&var_plans) {
        if sel.is_coords {
            buffer.data[buffer.data_used..buffer.data_used + coords.len()]
                .copy_from_slice(coords);
            buffer.data_used += coords.len();
        } else if !sel.var {
            let cell_size = sel.cell_size as usize;
            let dst = &mut buffer.data[buffer.data_used..buffer.data_used + cell_size];
            match &source {
                CellSource::Fragment { meta, tile, pos } => {
                    let reader = FragmentReader::new(sm, schema, Arc::clone(meta));
                    let payload = reader.tile(sel.stream, *tile)?;
                    let at = *pos as usize * cell_size;
                    dst.copy_from_slice(&payload[at..at + cell_size]);
                }
                CellSource::Empty => dst.copy_from_slice(&sentinel_cell(sel)),
            }
            buffer.data_used += cell_size;
        } else {
            let offsets = buffer.offsets.as_deref_mut().unwrap();
            offsets[buffer.offsets_used..buffer.offsets_used + 8]
                .copy_from_slice(&(buffer.data_used as u64).to_le_bytes());
            buffer.offsets_used += 8;
            match &source {
                CellSource::Fragment { meta, tile, .. } => {
                    let reader = FragmentReader::new(sm, schema, Arc::clone(meta));
                    let payload = reader.tile(sel.var_stream, *tile)?;
                    let (start, len) = (*start as usize, *len as usize);
                    buffer.data[buffer.data_used..buffer.data_used + len]
                        .copy_from_slice(&payload[start..start + len]);
                    buffer.data_used += len;
                }
                CellSource::Empty => {
                    let sentinel = sentinel_cell(sel);
                    buffer.data[buffer.data_used..buffer.data_used + sentinel.len()]
                        .copy_from_slice(&sentinel);
                    buffer.data_used += sentinel.len();
                }
            }
        }
    }
    Ok(true)
}

/// `(start, length)` of variable-size cell `pos` within its values tile.
pub(super) fn var_range(
    reader: &FragmentReader<'_>,
    sel: &AttrSel,
    tile: u64,
    pos: u64,
) -> Result<(u64, u64)> {
    let offsets_tile = reader.tile(sel.stream, tile)?;
    let cells = (offsets_tile.len() / 8) as u64;
    let at = |i: u64| -> u64 {
        u64::from_le_bytes(
            offsets_tile[i as usize * 8..(i as usize + 1) * 8]
                .try_into()
                .unwrap(),
        )
    };
    let start = at(pos);
    let end = if pos + 1 < cells {
        at(pos + 1)
    } else {
        reader.meta().stream(sel.var_stream).orig_sizes[tile as usize]
    };
    if start > end {
        return Err(ErrorKind::tile(format!(
            "offsets tile is not monotonic at cell {}",
            pos
        )));
    }
    Ok((start, end - start))
}

/// The empty-sentinel cell of an attribute: `val_num` sentinels fixed, one
/// sentinel element for variable size.
pub(super) fn sentinel_cell(sel: &AttrSel) -> SmallVec<[u8; 16]> {
    let reps = if sel.var { 1 } else { sel.val_num as usize };
    let mut out = Vec::with_capacity(reps * sel.datatype.size());
    for _ in 0..reps {
        sel.datatype.append_empty(&mut out);
    }
    SmallVec::from_vec(out)
}

/// Dense fragments that intersect the subarray, newest first.
pub(super) struct DenseSource {
    frags: Vec<Arc<FragmentMetadata>>,
}

impl DenseSource {
    pub(super) fn new(
        schema: &ArraySchema,
        fragments: &[Arc<FragmentMetadata>],
        subarray: &[u8],
    ) -> Self {
        let frags = fragments
            .iter()
            .rev()
            .filter(|meta| {
                meta.subarray()
                    .map(|region| schema.ops().intersects(region, subarray))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Self { frags }
    }

    /// The newest fragment containing `coords`, with the tile index and
    /// in-tile cell position of the coordinate there.
    pub(super) fn locate(
        &self,
        schema: &ArraySchema,
        coords: &[u8],
    ) -> Option<(&Arc<FragmentMetadata>, u64, u64)> {
        for meta in &self.frags {
            let region = meta.subarray().unwrap();
            if schema.ops().inside(coords, region) {
                let (tile, pos) = schema.ops().cell_addr_in(region, coords);
                return Some((meta, tile, pos));
            }
        }
        None
    }
}

struct DenseState {
    walker: Box<dyn CellWalker>,
    source: DenseSource,
}

impl DenseState {
    fn new(
        schema: &ArraySchema,
        fragments: &[Arc<FragmentMetadata>],
        subarray: &[u8],
    ) -> Result<Self> {
        Ok(Self {
            walker: schema.ops().walk(subarray, Layout::GlobalOrder)?,
            source: DenseSource::new(schema, fragments, subarray),
        })
    }

    fn drive(
        &mut self,
        sm: &StorageManager,
        schema: &ArraySchema,
        attrs: &[AttrSel],
        cancelled: &AtomicBool,
        buffers: &mut [ReadBuffer<'_>],
    ) -> Result<QueryStatus> {
        while !self.walker.done() {
            if cancelled.load(AtomicOrdering::Relaxed) {
                return Err(ErrorKind::interrupted("read query cancelled"));
            }
            let coords: SmallVec<[u8; 32]> = SmallVec::from_slice(self.walker.coords());
            let source = match self.source.locate(schema, &coords) {
                Some((meta, tile, pos)) => CellSource::Fragment { meta, tile, pos },
                None => CellSource::Empty,
            };
            if !emit_cell(sm, schema, attrs, buffers, source, &coords)? {
                return Ok(QueryStatus::Overflowed);
            }
            self.walker.advance();
        }
        Ok(QueryStatus::Completed)
    }
}

struct SparseCursor {
    meta: Arc<FragmentMetadata>,
    rank: usize,
    candidates: Vec<u64>,
    t_i: usize,
    pos: u64,
    tile_cells: u64,
    coords_tile: Option<Arc<Vec<u8>>>,
    current: Option<Vec<u8>>,
}

struct SparseState {
    cursors: Vec<SparseCursor>,
    primed: bool,
}

impl SparseState {
    fn new(
        schema: &ArraySchema,
        fragments: &[Arc<FragmentMetadata>],
        subarray: &[u8],
    ) -> Self {
        let ops = schema.ops();
        let mut cursors = Vec::new();
        for (rank, meta) in fragments.iter().enumerate() {
            if !ops.intersects(meta.global_mbr(), subarray) {
                continue;
            }
            let candidates: Vec<u64> = (0..meta.tile_count())
                .filter(|t| ops.intersects(meta.mbr(*t), subarray))
                .collect();
            if candidates.is_empty() {
                continue;
            }
            cursors.push(SparseCursor {
                meta: Arc::clone(meta),
                rank,
                candidates,
                t_i: 0,
                pos: 0,
                tile_cells: 0,
                coords_tile: None,
                current: None,
            });
        }
        Self {
            cursors,
            primed: false,
        }
    }

    fn drive(
        &mut self,
        sm: &StorageManager,
        schema: &ArraySchema,
        subarray: &[u8],
        attrs: &[AttrSel],
        cancelled: &AtomicBool,
        buffers: &mut [ReadBuffer<'_>],
    ) -> Result<QueryStatus> {
        if !self.primed {
            for cursor in &mut self.cursors {
                advance_cursor(sm, schema, subarray, cursor)?;
            }
            self.primed = true;
        }

        loop {
            if cancelled.load(AtomicOrdering::Relaxed) {
                return Err(ErrorKind::interrupted("read query cancelled"));
            }
            let Some(w) = self.pick_winner(schema) else {
                return Ok(QueryStatus::Completed);
            };
            let winner = &self.cursors[w];
            let coords = winner.current.clone().unwrap();
            let meta = Arc::clone(&winner.meta);
            let tile = winner.candidates[winner.t_i];
            let pos = winner.pos;
            let source = CellSource::Fragment {
                meta: &meta,
                tile,
                pos,
            };
            if !emit_cell(sm, schema, attrs, buffers, source, &coords)? {
                return Ok(QueryStatus::Overflowed);
            }
            // Advance the winner and discard equal coordinates from every
            // older fragment.
            for cursor in &mut self.cursors {
                let equal = cursor
                    .current
                    .as_ref()
                    .map(|cur| schema.ops().global_cmp(cur, &coords) == Ordering::Equal)
                    .unwrap_or(false);
                if equal {
                    cursor.pos += 1;
                    advance_cursor(sm, schema, subarray, cursor)?;
                }
            }
        }
    }

    /// Index of the cursor holding the minimum coordinate; newest fragment
    /// wins ties.
    fn pick_winner(&self, schema: &ArraySchema) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, cursor) in self.cursors.iter().enumerate() {
            let Some(cur) = &cursor.current else { continue };
            best = match best {
                None => Some(i),
                Some(b) => {
                    let best_cur = self.cursors[b].current.as_ref().unwrap();
                    match schema.ops().global_cmp(cur, best_cur) {
                        Ordering::Less => Some(i),
                        Ordering::Equal if cursor.rank > self.cursors[b].rank => Some(i),
                        _ => Some(b),
                    }
                }
            };
        }
        best
    }
}

/// Moves a cursor to its next in-subarray cell, loading candidate coords
/// tiles as it crosses tile boundaries.
fn advance_cursor(
    sm: &StorageManager,
    schema: &ArraySchema,
    subarray: &[u8],
    cursor: &mut SparseCursor,
) -> Result<()> {
    let coords_size = schema.coords_size();
    let coords_stream = schema
        .coords_stream()
        .expect("sparse arrays always carry a coordinates stream");
    loop {
        if cursor.t_i >= cursor.candidates.len() {
            cursor.current = None;
            return Ok(());
        }
        if cursor.coords_tile.is_none() {
            let reader = FragmentReader::new(sm, schema, Arc::clone(&cursor.meta));
            let tile = reader.tile(coords_stream, cursor.candidates[cursor.t_i])?;
            cursor.tile_cells = (tile.len() / coords_size) as u64;
            cursor.coords_tile = Some(tile);
        }
        let tile = Arc::clone(cursor.coords_tile.as_ref().unwrap());
        while cursor.pos < cursor.tile_cells {
            let at = cursor.pos as usize * coords_size;
            let coords = &tile[at..at + coords_size];
            if schema.ops().inside(coords, subarray) {
                cursor.current = Some(coords.to_vec());
                return Ok(());
            }
            cursor.pos += 1;
        }
        cursor.t_i += 1;
        cursor.pos = 0;
        cursor.coords_tile = None;
    }
}
