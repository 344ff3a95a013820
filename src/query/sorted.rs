//! # Sorted-Read Adapter
//!
//! Dense reads in row- or column-major layout wrap the global-order
//! machinery with a reorder stage. The subarray is partitioned into *tile
//! slabs*: one layer of space tiles along the slowest requested dimension,
//! spanning the subarray in the remaining dimensions. A slab is the
//! smallest region that can be drained contiguously in the requested
//! layout, because a single row (or column) of cells crosses every tile in
//! its layer.
//!
//! Each slab is filled in global order, scattering cells into their
//! requested-layout positions in a staging region, then drained linearly
//! into the user buffers. Two staging regions alternate between the fill
//! and drain roles, so the next slab is already staged when draining
//! finishes. Overflow suspends the drain cursor; staging itself cannot
//! overflow because its size is fixed by the schema and the subarray.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use eyre::Result;

use super::read::{sentinel_cell, var_range, DenseSource};
use super::{AttrSel, QueryStatus, ReadBuffer};
use crate::error::ErrorKind;
use crate::fragment::{FragmentMetadata, FragmentReader};
use crate::schema::ArraySchema;
use crate::storage::StorageManager;
use crate::types::Layout;

/// One staged slab: per-attribute cell payloads keyed by requested-layout
/// position.
struct Slab {
    cells: u64,
    drained: u64,
    /// Per attribute: `cells * cell_size` bytes (fixed and coordinates).
    fixed: Vec<Vec<u8>>,
    /// Per attribute: per-cell `(arena offset, length)` plus the arena
    /// (variable-size).
    var: Vec<(Vec<(u64, u64)>, Vec<u8>)>,
}

pub(super) struct SortedState {
    slabs: Vec<Vec<u8>>,
    next_slab: usize,
    layout: Layout,
    source: DenseSource,
    drain: Option<Slab>,
    prefill: Option<Slab>,
}

impl SortedState {
    pub(super) fn new(
        schema: &ArraySchema,
        fragments: &[Arc<FragmentMetadata>],
        subarray: &[u8],
        layout: Layout,
    ) -> Result<Self> {
        Ok(Self {
            slabs: schema.ops().slabs(subarray, layout)?,
            next_slab: 0,
            layout,
            source: DenseSource::new(schema, fragments, subarray),
            drain: None,
            prefill: None,
        })
    }

    pub(super) fn drive(
        &mut self,
        sm: &StorageManager,
        schema: &ArraySchema,
        attrs: &[AttrSel],
        cancelled: &AtomicBool,
        buffers: &mut [ReadBuffer<'_>],
    ) -> Result<QueryStatus> {
        loop {
            if self.drain.is_none() {
                if let Some(staged) = self.prefill.take() {
                    self.drain = Some(staged);
                } else if self.next_slab < self.slabs.len() {
                    let rect = self.slabs[self.next_slab].clone();
                    self.next_slab += 1;
                    self.drain = Some(fill_slab(
                        sm, schema, attrs, &self.source, &rect, self.layout, cancelled,
                    )?);
                } else {
                    return Ok(QueryStatus::Completed);
                }
                // Keep the second staging region filled ahead of the drain.
                if self.prefill.is_none() && self.next_slab < self.slabs.len() {
                    let rect = self.slabs[self.next_slab].clone();
                    self.next_slab += 1;
                    self.prefill = Some(fill_slab(
                        sm, schema, attrs, &self.source, &rect, self.layout, cancelled,
                    )?);
                }
            }

            let slab = self.drain.as_mut().unwrap();
            if !drain_slab(slab, attrs, buffers) {
                return Ok(QueryStatus::Overflowed);
            }
            self.drain = None;
        }
    }
}

/// Stages one slab: walks the slab in global order, fetching each cell
/// from the newest covering fragment (or synthesizing sentinels) into its
/// requested-layout position.
fn fill_slab(
    sm: &StorageManager,
    schema: &ArraySchema,
    attrs: &[AttrSel],
    source: &DenseSource,
    rect: &[u8],
    layout: Layout,
    cancelled: &AtomicBool,
) -> Result<Slab> {
    let ops = schema.ops();
    let cells = ops
        .rect_cell_count(rect)
        .ok_or_else(|| ErrorKind::query("slab cell count overflows u64"))?;

    let mut slab = Slab {
        cells,
        drained: 0,
        fixed: attrs
            .iter()
            .map(|sel| {
                if sel.var {
                    Vec::new()
                } else {
                    vec![0u8; cells as usize * sel.cell_size as usize]
                }
            })
            .collect(),
        var: attrs
            .iter()
            .map(|sel| {
                if sel.var {
                    (vec![(0u64, 0u64); cells as usize], Vec::new())
                } else {
                    (Vec::new(), Vec::new())
                }
            })
            .collect(),
    };

    let mut walker = ops.walk(rect, Layout::GlobalOrder)?;
    while !walker.done() {
        if cancelled.load(AtomicOrdering::Relaxed) {
            return Err(ErrorKind::interrupted("read query cancelled"));
        }
        let coords = walker.coords();
        let dest = ops.pos_in_rect(rect, coords, layout) as usize;
        let located = source.locate(schema, coords);

        for (ai, sel) in attrs.iter().enumerate() {
            if sel.is_coords {
                let cell_size = sel.cell_size as usize;
                slab.fixed[ai][dest * cell_size..(dest + 1) * cell_size]
                    .copy_from_slice(coords);
            } else if !sel.var {
                let cell_size = sel.cell_size as usize;
                let dst = &mut slab.fixed[ai][dest * cell_size..(dest + 1) * cell_size];
                match located {
                    Some((meta, tile, pos)) => {
                        let reader = FragmentReader::new(sm, schema, Arc::clone(meta));
                        let payload = reader.tile(sel.stream, tile)?;
                        let at = pos as usize * cell_size;
                        dst.copy_from_slice(&payload[at..at + cell_size]);
                    }
                    None => dst.copy_from_slice(&sentinel_cell(sel)),
                }
            } else {
                let (ranges, arena) = &mut slab.var[ai];
                let start = arena.len() as u64;
                match located {
                    Some((meta, tile, pos)) => {
                        let reader = FragmentReader::new(sm, schema, Arc::clone(meta));
                        let (vstart, vlen) = var_range(&reader, sel, tile, pos)?;
                        let payload = reader.tile(sel.var_stream, tile)?;
                        arena.extend_from_slice(
                            &payload[vstart as usize..(vstart + vlen) as usize],
                        );
                    }
                    None => arena.extend_from_slice(&sentinel_cell(sel)),
                }
                ranges[dest] = (start, arena.len() as u64 - start);
            }
        }
        walker.advance();
    }
    Ok(slab)
}

/// Drains staged cells into the user buffers from the suspended cursor.
/// Returns false (with the cursor updated) when a cell no longer fits.
fn drain_slab(slab: &mut Slab, attrs: &[AttrSel], buffers: &mut [ReadBuffer<'_>]) -> bool {
    for i in slab.drained..slab.cells {
        // Fit check across every selected attribute first.
        for (ai, (sel, buffer)) in attrs.iter().zip(buffers.iter()).enumerate() {
            if !sel.var {
                if buffer.data_used + sel.cell_size as usize > buffer.data.len() {
                    slab.drained = i;
                    return false;
                }
            } else {
                let (_, len) = slab.var[ai].0[i as usize];
                let offsets = buffer.offsets.as_deref().unwrap();
                if buffer.offsets_used + 8 > offsets.len()
                    || buffer.data_used + len as usize > buffer.data.len()
                {
                    slab.drained = i;
                    return false;
                }
            }
        }
        for (ai, (sel, buffer)) in attrs.iter().zip(buffers.iter_mut()).enumerate() {
            if !sel.var {
                let cell_size = sel.cell_size as usize;
                let src = &slab.fixed[ai][i as usize * cell_size..(i as usize + 1) * cell_size];
                buffer.data[buffer.data_used..buffer.data_used + cell_size].copy_from_slice(src);
                buffer.data_used += cell_size;
            } else {
                let (start, len) = slab.var[ai].0[i as usize];
                let arena = &slab.var[ai].1;
                let offsets = buffer.offsets.as_deref_mut().unwrap();
                offsets[buffer.offsets_used..buffer.offsets_used + 8]
                    .copy_from_slice(&(buffer.data_used as u64).to_le_bytes());
                buffer.offsets_used += 8;
                buffer.data[buffer.data_used..buffer.data_used + len as usize]
                    .copy_from_slice(&arena[start as usize..(start + len) as usize]);
                buffer.data_used += len as usize;
            }
        }
    }
    slab.drained = slab.cells;
    true
}
