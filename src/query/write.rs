//! # Write Path
//!
//! Three modes compose over the fragment writer, selected by layout:
//!
//! - **Global order** (`GlobalOrder`): the client promises cells already in
//!   global order; they stream straight into tiles. Submissions may repeat
//!   (incremental writes into the same fragment); the order promise is
//!   verified across submissions for sparse arrays.
//! - **Unordered** (`Unordered`, sparse): cells accumulate in staging
//!   buffers across submissions; `finalize` stable-sorts them by global
//!   order (ties keep the latest submission) and streams them into tiles.
//! - **Sorted** (`RowMajor`/`ColMajor`, dense): one submission covering
//!   the whole subarray in the requested layout; a gather pass reorders it
//!   into global order tile by tile.
//!
//! At most one fragment is produced per query; `finalize` seals it.
//! Nothing submitted means no fragment and an untouched array. Any error
//! tears the staged fragment down.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use eyre::Result;
use tracing::debug;

use super::{
    check_write_buffers, resolve_write_attrs, var_cell_bytes, AttrSel, QueryStatus, WriteBuffer,
};
use crate::error::ErrorKind;
use crate::fragment::FragmentWriter;
use crate::schema::ArraySchema;
use crate::storage::StorageManager;
use crate::types::Layout;
use crate::vfs::Uri;

pub struct WriteQuery<'a> {
    sm: &'a StorageManager,
    schema: Arc<ArraySchema>,
    array_uri: Uri,
    layout: Layout,
    /// Dense target region; sparse writes have none.
    subarray: Option<Vec<u8>>,
    attrs: Vec<AttrSel>,
    status: QueryStatus,
    cancelled: Arc<AtomicBool>,
    mode: WriteMode<'a>,
    finalized: bool,
}

enum WriteMode<'a> {
    Global {
        writer: Option<FragmentWriter<'a>>,
        last_coords: Option<Vec<u8>>,
    },
    Unordered(Staging),
    Sorted {
        written: bool,
        writer: Option<FragmentWriter<'a>>,
    },
}

/// Accumulated unordered cells, in submission order.
#[derive(Default)]
struct Staging {
    count: u64,
    coords: Vec<u8>,
    /// Per attribute: concatenated fixed cells (empty for var attributes).
    fixed: Vec<Vec<u8>>,
    /// Per attribute: per-cell `(arena offset, length)` plus the arena.
    var: Vec<(Vec<(u64, u64)>, Vec<u8>)>,
}

impl<'a> WriteQuery<'a> {
    pub fn new(
        sm: &'a StorageManager,
        array_uri: &Uri,
        subarray: Option<&[u8]>,
        attr_names: &[&str],
        layout: Layout,
    ) -> Result<Self> {
        let schema = sm.array_schema(array_uri)?;

        match layout {
            Layout::GlobalOrder => {}
            Layout::Unordered => {
                if schema.dense() {
                    return Err(ErrorKind::query(
                        "unordered writes apply to sparse arrays",
                    ));
                }
            }
            Layout::RowMajor | Layout::ColMajor => {
                if !schema.dense() {
                    return Err(ErrorKind::query("sorted writes apply to dense arrays"));
                }
            }
        }

        let subarray = if schema.dense() {
            let bytes = match subarray {
                Some(bytes) => {
                    if bytes.len() != 2 * schema.coords_size() {
                        return Err(ErrorKind::query(format!(
                            "subarray is {} bytes, expected {}",
                            bytes.len(),
                            2 * schema.coords_size()
                        )));
                    }
                    if !schema.ops().rect_inside(bytes, schema.domain()) {
                        return Err(ErrorKind::query("subarray is out of the array domain"));
                    }
                    bytes.to_vec()
                }
                None => schema.domain().to_vec(),
            };
            Some(bytes)
        } else {
            if subarray.is_some() {
                return Err(ErrorKind::query(
                    "sparse writes cover the whole domain, no subarray applies",
                ));
            }
            None
        };

        let attrs = resolve_write_attrs(&schema, attr_names)?;
        let mode = match layout {
            Layout::Unordered => WriteMode::Unordered(Staging {
                fixed: vec![Vec::new(); attrs.len()],
                var: attrs.iter().map(|_| (Vec::new(), Vec::new())).collect(),
                ..Staging::default()
            }),
            Layout::GlobalOrder => WriteMode::Global {
                writer: None,
                last_coords: None,
            },
            _ => WriteMode::Sorted {
                written: false,
                writer: None,
            },
        };

        Ok(Self {
            sm,
            schema,
            array_uri: array_uri.clone(),
            layout,
            subarray,
            attrs,
            status: QueryStatus::InProgress,
            cancelled: Arc::new(AtomicBool::new(false)),
            mode,
            finalized: false,
        })
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Processes one batch of cells. A successful submit reports
    /// `Completed`; the fragment only becomes visible at `finalize`.
    pub fn submit(&mut self, buffers: &[WriteBuffer<'_>]) -> Result<QueryStatus> {
        if self.finalized {
            return Err(ErrorKind::query("cannot submit to a finalized query"));
        }
        if self.status == QueryStatus::Failed {
            return Err(ErrorKind::query("cannot resubmit a failed query"));
        }
        let cells = check_write_buffers(&self.attrs, buffers)?;

        let result = self.submit_inner(buffers, cells);
        match result {
            Ok(()) => {
                self.status = QueryStatus::Completed;
                Ok(QueryStatus::Completed)
            }
            Err(err) => {
                self.fail();
                Err(err)
            }
        }
    }

    fn submit_inner(&mut self, buffers: &[WriteBuffer<'_>], cells: u64) -> Result<()> {
        let Self {
            sm,
            schema,
            array_uri,
            layout,
            subarray,
            attrs,
            cancelled,
            mode,
            ..
        } = self;
        let layout = *layout;
        let sparse = !schema.dense();

        match mode {
            WriteMode::Global {
                writer,
                last_coords,
            } => {
                if writer.is_none() {
                    *writer = Some(FragmentWriter::new(
                        *sm,
                        Arc::clone(schema),
                        array_uri,
                        subarray.as_deref(),
                    )?);
                }
                let writer = writer.as_mut().unwrap();
                let mut values: Vec<&[u8]> = Vec::with_capacity(attrs.len());
                for i in 0..cells {
                    if cancelled.load(AtomicOrdering::Relaxed) {
                        return Err(ErrorKind::interrupted("write query cancelled"));
                    }
                    values.clear();
                    let mut coords: Option<&[u8]> = None;
                    for (sel, buffer) in attrs.iter().zip(buffers) {
                        if sel.is_coords {
                            let cs = sel.cell_size as usize;
                            coords = Some(&buffer.data[i as usize * cs..(i as usize + 1) * cs]);
                        } else if sel.var {
                            values.push(var_cell_bytes(buffer, i, cells)?);
                        } else {
                            let cs = sel.cell_size as usize;
                            values.push(&buffer.data[i as usize * cs..(i as usize + 1) * cs]);
                        }
                    }
                    if sparse {
                        let cur = coords.unwrap();
                        if let Some(prev) = last_coords {
                            if schema.ops().global_cmp(prev, cur) == Ordering::Greater {
                                return Err(ErrorKind::query(
                                    "global-order write violates the global cell order",
                                ));
                            }
                        }
                        *last_coords = Some(cur.to_vec());
                    }
                    writer.append_cell(&values, coords)?;
                }
            }

            WriteMode::Unordered(staging) => {
                for i in 0..cells {
                    if cancelled.load(AtomicOrdering::Relaxed) {
                        return Err(ErrorKind::interrupted("write query cancelled"));
                    }
                    for (ai, (sel, buffer)) in attrs.iter().zip(buffers).enumerate() {
                        if sel.is_coords {
                            let cs = sel.cell_size as usize;
                            staging.coords.extend_from_slice(
                                &buffer.data[i as usize * cs..(i as usize + 1) * cs],
                            );
                        } else if sel.var {
                            let bytes = var_cell_bytes(buffer, i, cells)?;
                            let (ranges, arena) = &mut staging.var[ai];
                            ranges.push((arena.len() as u64, bytes.len() as u64));
                            arena.extend_from_slice(bytes);
                        } else {
                            let cs = sel.cell_size as usize;
                            staging.fixed[ai].extend_from_slice(
                                &buffer.data[i as usize * cs..(i as usize + 1) * cs],
                            );
                        }
                    }
                    staging.count += 1;
                }
            }

            WriteMode::Sorted { written, writer } => {
                if *written {
                    return Err(ErrorKind::query(
                        "sorted writes accept a single submission covering the subarray",
                    ));
                }
                let rect = subarray.as_deref().unwrap();
                let expected = schema.ops().rect_cell_count(rect).ok_or_else(|| {
                    ErrorKind::query("write region cell count overflows u64")
                })?;
                if cells != expected {
                    return Err(ErrorKind::query(format!(
                        "sorted write carries {} cells, subarray holds {}",
                        cells, expected
                    )));
                }
                *writer = Some(FragmentWriter::new(
                    *sm,
                    Arc::clone(schema),
                    array_uri,
                    Some(rect),
                )?);
                let writer = writer.as_mut().unwrap();

                let mut walker = schema.ops().walk(rect, Layout::GlobalOrder)?;
                let mut values: Vec<&[u8]> = Vec::with_capacity(attrs.len());
                while !walker.done() {
                    if cancelled.load(AtomicOrdering::Relaxed) {
                        return Err(ErrorKind::interrupted("write query cancelled"));
                    }
                    let src = schema.ops().pos_in_rect(rect, walker.coords(), layout);
                    values.clear();
                    for (sel, buffer) in attrs.iter().zip(buffers) {
                        if sel.var {
                            values.push(var_cell_bytes(buffer, src, cells)?);
                        } else {
                            let cs = sel.cell_size as usize;
                            values
                                .push(&buffer.data[src as usize * cs..(src as usize + 1) * cs]);
                        }
                    }
                    writer.append_cell(&values, None)?;
                    walker.advance();
                }
                *written = true;
            }
        }
        Ok(())
    }

    /// Seals the fragment (sorting staged cells first in unordered mode).
    /// A query that never received cells leaves the array untouched.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if self.status == QueryStatus::Failed {
            return Err(ErrorKind::query("cannot finalize a failed query"));
        }
        let result = self.finalize_inner();
        self.finalized = true;
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fail();
                Err(err)
            }
        }
    }

    fn finalize_inner(&mut self) -> Result<()> {
        match &mut self.mode {
            WriteMode::Global { writer, .. } | WriteMode::Sorted { writer, .. } => {
                if let Some(mut writer) = writer.take() {
                    writer.finalize()?;
                }
            }
            WriteMode::Unordered(staging) => {
                let staging = std::mem::take(staging);
                if staging.count > 0 {
                    self.flush_unordered(staging)?;
                }
            }
        }
        debug!(array = %self.array_uri, "write query finalized");
        Ok(())
    }

    /// Stable-sorts the staged cells by global order (later submissions win
    /// ties), deduplicates coordinates and streams them into a fragment.
    fn flush_unordered(&mut self, staging: Staging) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let ops = schema.ops();
        let cs = schema.coords_size();
        fn coords_of(coords: &[u8], cs: usize, i: u64) -> &[u8] {
            &coords[i as usize * cs..(i as usize + 1) * cs]
        }

        let mut order: Vec<u64> = (0..staging.count).collect();
        order.sort_by(|a, b| {
            ops.global_cmp(
                coords_of(&staging.coords, cs, *a),
                coords_of(&staging.coords, cs, *b),
            )
        });

        // Stable sort keeps equal coordinates in submission order, so the
        // last of each run is the latest write.
        let mut kept: Vec<u64> = Vec::with_capacity(order.len());
        for idx in order {
            match kept.last_mut() {
                Some(last)
                    if ops.global_cmp(
                        coords_of(&staging.coords, cs, *last),
                        coords_of(&staging.coords, cs, idx),
                    ) == Ordering::Equal =>
                {
                    *last = idx;
                }
                _ => kept.push(idx),
            }
        }

        let mut writer =
            FragmentWriter::new(self.sm, Arc::clone(&self.schema), &self.array_uri, None)?;
        let mut values: Vec<&[u8]> = Vec::with_capacity(self.attrs.len());
        for &idx in &kept {
            if self.cancelled.load(AtomicOrdering::Relaxed) {
                return Err(ErrorKind::interrupted("write query cancelled"));
            }
            values.clear();
            for (ai, sel) in self.attrs.iter().enumerate() {
                if sel.is_coords {
                    continue;
                }
                if sel.var {
                    let (start, len) = staging.var[ai].0[idx as usize];
                    values.push(&staging.var[ai].1[start as usize..(start + len) as usize]);
                } else {
                    let cell = sel.cell_size as usize;
                    values
                        .push(&staging.fixed[ai][idx as usize * cell..(idx as usize + 1) * cell]);
                }
            }
            writer.append_cell(&values, Some(coords_of(&staging.coords, cs, idx)))?;
        }
        writer.finalize()?;
        Ok(())
    }

    fn fail(&mut self) {
        self.status = QueryStatus::Failed;
        match &mut self.mode {
            WriteMode::Global { writer, .. } | WriteMode::Sorted { writer, .. } => {
                if let Some(mut writer) = writer.take() {
                    writer.abort();
                }
            }
            WriteMode::Unordered(staging) => *staging = Staging::default(),
        }
    }
}
