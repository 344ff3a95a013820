//! # Domain Algebra
//!
//! The query core works on raw little-endian coordinate bytes; this module
//! is the typed seam underneath it. A [`DomainOps`] object is built once per
//! schema and provides everything the state machines need:
//!
//! - the global cell order (tile order over domain-anchored space tiles,
//!   then cell order within a tile) and the plain cell orders
//! - containment, intersection and MBR algebra over rectangles laid out as
//!   `(lo_1, hi_1, lo_2, hi_2, …)` pairs
//! - dense-only arithmetic: cell counting, row/col-major positions,
//!   tile-aligned addressing, and [`CellWalker`]s that enumerate a
//!   rectangle's cells in a requested order
//!
//! Rectangles and coordinates are byte slices; the concrete coordinate type
//! is dispatched once, at construction, and never travels through the merge
//! loops.

use std::cmp::Ordering;

use eyre::Result;
use smallvec::SmallVec;

use crate::error::ErrorKind;
use crate::types::{Datatype, Layout};

/// Order-dependent domain and tiling operations over raw coordinate bytes.
pub trait DomainOps: Send + Sync {
    fn dim_num(&self) -> usize;
    fn coords_size(&self) -> usize;

    /// The total order induced by the schema's tile order then cell order.
    fn global_cmp(&self, a: &[u8], b: &[u8]) -> Ordering;
    /// The cell order alone (ignores tiling).
    fn cell_cmp(&self, a: &[u8], b: &[u8]) -> Ordering;

    fn inside(&self, coords: &[u8], rect: &[u8]) -> bool;
    fn rect_inside(&self, inner: &[u8], outer: &[u8]) -> bool;
    fn intersects(&self, a: &[u8], b: &[u8]) -> bool;
    /// True if some dimension has `lo > hi` (the empty rectangle).
    fn is_empty_rect(&self, rect: &[u8]) -> bool;

    /// Grows `mbr` to contain `coords`; an empty `mbr` becomes the point.
    fn expand_mbr(&self, mbr: &mut Vec<u8>, coords: &[u8]);
    /// Grows `acc` to contain `rect`; an empty `acc` becomes `rect`.
    fn expand_rect(&self, acc: &mut Vec<u8>, rect: &[u8]);

    /// Number of cells in `rect`, or None for real domains or on overflow.
    fn rect_cell_count(&self, rect: &[u8]) -> Option<u64>;
    /// Position of `coords` within `rect` under a row- or col-major layout.
    /// Integer domains only.
    fn pos_in_rect(&self, rect: &[u8], coords: &[u8], layout: Layout) -> u64;
    /// True if `rect` starts and ends on space-tile boundaries.
    fn tile_aligned(&self, rect: &[u8]) -> bool;
    /// `(tile index, cell position)` of `coords` within the tile-aligned
    /// `rect`, under the global order. Integer domains with extents only.
    fn cell_addr_in(&self, rect: &[u8], coords: &[u8]) -> (u64, u64);

    /// Enumerates the cells of `rect` in `layout` order. Integer domains
    /// only; `GlobalOrder` falls back to the cell order when the schema has
    /// no tile extents.
    fn walk(&self, rect: &[u8], layout: Layout) -> Result<Box<dyn CellWalker>>;
    /// Partitions `rect` into tile slabs along the slowest dimension of
    /// `layout`, in drain order.
    fn slabs(&self, rect: &[u8], layout: Layout) -> Result<Vec<Vec<u8>>>;
}

/// Incremental enumeration of a rectangle's cells.
pub trait CellWalker: Send {
    fn done(&self) -> bool;
    /// The current cell's coordinates. Valid until `advance`.
    fn coords(&self) -> &[u8];
    fn advance(&mut self);
}

/// Builds the typed implementation for a schema's coordinate type.
pub(crate) fn build(
    datatype: Datatype,
    dim_num: usize,
    domain: &[u8],
    extents: Option<&[u8]>,
    cell_order: Layout,
    tile_order: Layout,
) -> Box<dyn DomainOps> {
    match datatype {
        Datatype::Char | Datatype::Int8 => typed::<i8>(dim_num, domain, extents, cell_order, tile_order),
        Datatype::Uint8 => typed::<u8>(dim_num, domain, extents, cell_order, tile_order),
        Datatype::Int16 => typed::<i16>(dim_num, domain, extents, cell_order, tile_order),
        Datatype::Uint16 => typed::<u16>(dim_num, domain, extents, cell_order, tile_order),
        Datatype::Int32 => typed::<i32>(dim_num, domain, extents, cell_order, tile_order),
        Datatype::Uint32 => typed::<u32>(dim_num, domain, extents, cell_order, tile_order),
        Datatype::Int64 => typed::<i64>(dim_num, domain, extents, cell_order, tile_order),
        Datatype::Uint64 => typed::<u64>(dim_num, domain, extents, cell_order, tile_order),
        Datatype::Float32 => typed::<f32>(dim_num, domain, extents, cell_order, tile_order),
        Datatype::Float64 => typed::<f64>(dim_num, domain, extents, cell_order, tile_order),
    }
}

fn typed<T: CoordNum>(
    dim_num: usize,
    domain: &[u8],
    extents: Option<&[u8]>,
    cell_order: Layout,
    tile_order: Layout,
) -> Box<dyn DomainOps> {
    let mut lo = Vec::with_capacity(dim_num);
    let mut hi = Vec::with_capacity(dim_num);
    for d in 0..dim_num {
        lo.push(T::read(&domain[2 * d * T::SIZE..]));
        hi.push(T::read(&domain[(2 * d + 1) * T::SIZE..]));
    }
    let extents = extents.map(|bytes| {
        (0..dim_num)
            .map(|d| T::read(&bytes[d * T::SIZE..]))
            .collect::<Vec<T>>()
    });
    Box::new(TypedDomain {
        dim_num,
        lo,
        hi,
        extents,
        cell_order,
        tile_order,
    })
}

/// Scalar operations each coordinate type supplies. The integer-only
/// operations are unreachable for real domains: schema validation restricts
/// dense arrays (the only users) to integer coordinates.
trait CoordNum: Copy + Send + Sync + 'static {
    const SIZE: usize;
    const IS_INT: bool;

    fn read(bytes: &[u8]) -> Self;
    fn write(self, out: &mut [u8]);
    fn cmp_vals(a: Self, b: Self) -> Ordering;
    fn tile_slot(self, anchor: Self, extent: Self) -> u64;

    fn delta(hi: Self, lo: Self) -> u64;
    fn add_u64(self, n: u64) -> Self;
    /// `self + n`, saturating at `cap`. Space tiles at the domain edge may
    /// extend past the coordinate type's range; capping keeps the
    /// arithmetic in range.
    fn add_u64_capped(self, n: u64, cap: Self) -> Self;
    fn extent_to_u64(self) -> u64;
}

macro_rules! impl_coord_int {
    ($($ty:ty),*) => {
        $(
            impl CoordNum for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();
                const IS_INT: bool = true;

                fn read(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(bytes[..Self::SIZE].try_into().unwrap())
                }

                fn write(self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn cmp_vals(a: Self, b: Self) -> Ordering {
                    a.cmp(&b)
                }

                fn tile_slot(self, anchor: Self, extent: Self) -> u64 {
                    Self::delta(self, anchor) / extent.extent_to_u64()
                }

                fn delta(hi: Self, lo: Self) -> u64 {
                    (hi as i128 - lo as i128) as u64
                }

                fn add_u64(self, n: u64) -> Self {
                    (self as i128 + n as i128) as $ty
                }

                fn add_u64_capped(self, n: u64, cap: Self) -> Self {
                    let sum = self as i128 + n as i128;
                    if sum > cap as i128 {
                        cap
                    } else {
                        sum as $ty
                    }
                }

                fn extent_to_u64(self) -> u64 {
                    self as u64
                }
            }
        )*
    };
}

impl_coord_int!(i8, u8, i16, u16, i32, u32, i64, u64);

macro_rules! impl_coord_real {
    ($($ty:ty),*) => {
        $(
            impl CoordNum for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();
                const IS_INT: bool = false;

                fn read(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(bytes[..Self::SIZE].try_into().unwrap())
                }

                fn write(self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn cmp_vals(a: Self, b: Self) -> Ordering {
                    a.total_cmp(&b)
                }

                fn tile_slot(self, anchor: Self, extent: Self) -> u64 {
                    ((self - anchor) / extent).floor() as u64
                }

                fn delta(_hi: Self, _lo: Self) -> u64 {
                    unreachable!("integer domain operation on real coordinates")
                }

                fn add_u64(self, _n: u64) -> Self {
                    unreachable!("integer domain operation on real coordinates")
                }

                fn add_u64_capped(self, _n: u64, _cap: Self) -> Self {
                    unreachable!("integer domain operation on real coordinates")
                }

                fn extent_to_u64(self) -> u64 {
                    unreachable!("integer domain operation on real coordinates")
                }
            }
        )*
    };
}

impl_coord_real!(f32, f64);

struct TypedDomain<T> {
    dim_num: usize,
    lo: Vec<T>,
    hi: Vec<T>,
    extents: Option<Vec<T>>,
    cell_order: Layout,
    tile_order: Layout,
}

impl<T: CoordNum> TypedDomain<T> {
    fn coord(&self, coords: &[u8], d: usize) -> T {
        T::read(&coords[d * T::SIZE..])
    }

    fn rect_lo(&self, rect: &[u8], d: usize) -> T {
        T::read(&rect[2 * d * T::SIZE..])
    }

    fn rect_hi(&self, rect: &[u8], d: usize) -> T {
        T::read(&rect[(2 * d + 1) * T::SIZE..])
    }

    /// Dimensions from most to least significant for `layout`.
    fn sig_dims(&self, layout: Layout) -> SmallVec<[usize; 8]> {
        match layout {
            Layout::ColMajor => (0..self.dim_num).rev().collect(),
            _ => (0..self.dim_num).collect(),
        }
    }

    /// The dimension that varies slowest under `layout`.
    fn slab_axis(&self, layout: Layout) -> usize {
        match layout {
            Layout::ColMajor => self.dim_num - 1,
            _ => 0,
        }
    }

    fn cmp_by(&self, a: &[u8], b: &[u8], layout: Layout) -> Ordering {
        for d in self.sig_dims(layout) {
            let ord = T::cmp_vals(self.coord(a, d), self.coord(b, d));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl<T: CoordNum> DomainOps for TypedDomain<T> {
    fn dim_num(&self) -> usize {
        self.dim_num
    }

    fn coords_size(&self) -> usize {
        self.dim_num * T::SIZE
    }

    fn global_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        if let Some(extents) = &self.extents {
            for d in self.sig_dims(self.tile_order) {
                let slot_a = self.coord(a, d).tile_slot(self.lo[d], extents[d]);
                let slot_b = self.coord(b, d).tile_slot(self.lo[d], extents[d]);
                match slot_a.cmp(&slot_b) {
                    Ordering::Equal => {}
                    ord => return ord,
                }
            }
        }
        self.cmp_by(a, b, self.cell_order)
    }

    fn cell_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.cmp_by(a, b, self.cell_order)
    }

    fn inside(&self, coords: &[u8], rect: &[u8]) -> bool {
        for d in 0..self.dim_num {
            let c = self.coord(coords, d);
            if T::cmp_vals(c, self.rect_lo(rect, d)) == Ordering::Less
                || T::cmp_vals(c, self.rect_hi(rect, d)) == Ordering::Greater
            {
                return false;
            }
        }
        true
    }

    fn rect_inside(&self, inner: &[u8], outer: &[u8]) -> bool {
        for d in 0..self.dim_num {
            if T::cmp_vals(self.rect_lo(inner, d), self.rect_lo(outer, d)) == Ordering::Less
                || T::cmp_vals(self.rect_hi(inner, d), self.rect_hi(outer, d))
                    == Ordering::Greater
            {
                return false;
            }
        }
        true
    }

    fn intersects(&self, a: &[u8], b: &[u8]) -> bool {
        for d in 0..self.dim_num {
            if T::cmp_vals(self.rect_lo(a, d), self.rect_hi(b, d)) == Ordering::Greater
                || T::cmp_vals(self.rect_lo(b, d), self.rect_hi(a, d)) == Ordering::Greater
            {
                return false;
            }
        }
        true
    }

    fn is_empty_rect(&self, rect: &[u8]) -> bool {
        for d in 0..self.dim_num {
            if T::cmp_vals(self.rect_lo(rect, d), self.rect_hi(rect, d)) == Ordering::Greater {
                return true;
            }
        }
        false
    }

    fn expand_mbr(&self, mbr: &mut Vec<u8>, coords: &[u8]) {
        if mbr.is_empty() {
            for d in 0..self.dim_num {
                let c = self.coord(coords, d);
                let start = mbr.len();
                mbr.resize(start + 2 * T::SIZE, 0);
                c.write(&mut mbr[start..]);
                c.write(&mut mbr[start + T::SIZE..]);
            }
            return;
        }
        for d in 0..self.dim_num {
            let c = self.coord(coords, d);
            if T::cmp_vals(c, self.rect_lo(mbr, d)) == Ordering::Less {
                c.write(&mut mbr[2 * d * T::SIZE..]);
            }
            if T::cmp_vals(c, self.rect_hi(mbr, d)) == Ordering::Greater {
                c.write(&mut mbr[(2 * d + 1) * T::SIZE..]);
            }
        }
    }

    fn expand_rect(&self, acc: &mut Vec<u8>, rect: &[u8]) {
        if acc.is_empty() {
            acc.extend_from_slice(rect);
            return;
        }
        for d in 0..self.dim_num {
            let lo = self.rect_lo(rect, d);
            let hi = self.rect_hi(rect, d);
            if T::cmp_vals(lo, self.rect_lo(acc, d)) == Ordering::Less {
                lo.write(&mut acc[2 * d * T::SIZE..]);
            }
            if T::cmp_vals(hi, self.rect_hi(acc, d)) == Ordering::Greater {
                hi.write(&mut acc[(2 * d + 1) * T::SIZE..]);
            }
        }
    }

    fn rect_cell_count(&self, rect: &[u8]) -> Option<u64> {
        if !T::IS_INT || self.is_empty_rect(rect) {
            return if T::IS_INT { Some(0) } else { None };
        }
        let mut count: u64 = 1;
        for d in 0..self.dim_num {
            let extent = T::delta(self.rect_hi(rect, d), self.rect_lo(rect, d)).checked_add(1)?;
            count = count.checked_mul(extent)?;
        }
        Some(count)
    }

    fn pos_in_rect(&self, rect: &[u8], coords: &[u8], layout: Layout) -> u64 {
        let mut pos: u64 = 0;
        for d in self.sig_dims(layout) {
            let extent = T::delta(self.rect_hi(rect, d), self.rect_lo(rect, d)) + 1;
            pos = pos * extent + T::delta(self.coord(coords, d), self.rect_lo(rect, d));
        }
        pos
    }

    fn tile_aligned(&self, rect: &[u8]) -> bool {
        let extents = match &self.extents {
            Some(e) => e,
            None => return false,
        };
        for d in 0..self.dim_num {
            let ext = extents[d].extent_to_u64();
            if T::delta(self.rect_lo(rect, d), self.lo[d]) % ext != 0
                || (T::delta(self.rect_hi(rect, d), self.lo[d]) + 1) % ext != 0
            {
                return false;
            }
        }
        true
    }

    fn cell_addr_in(&self, rect: &[u8], coords: &[u8]) -> (u64, u64) {
        let extents = self
            .extents
            .as_ref()
            .expect("cell addressing requires tile extents");

        // Tile index within the rect's tile grid, in tile order.
        let mut tile_idx: u64 = 0;
        for d in self.sig_dims(self.tile_order) {
            let ext = extents[d];
            let grid_lo = self.rect_lo(rect, d).tile_slot(self.lo[d], ext);
            let grid_hi = self.rect_hi(rect, d).tile_slot(self.lo[d], ext);
            let slot = self.coord(coords, d).tile_slot(self.lo[d], ext);
            tile_idx = tile_idx * (grid_hi - grid_lo + 1) + (slot - grid_lo);
        }

        // Cell position within the (fully covered) space tile, in cell order.
        let mut cell_pos: u64 = 0;
        for d in self.sig_dims(self.cell_order) {
            let ext = extents[d].extent_to_u64();
            let slot = self.coord(coords, d).tile_slot(self.lo[d], extents[d]);
            let tile_lo = self.lo[d].add_u64(slot * ext);
            cell_pos = cell_pos * ext + T::delta(self.coord(coords, d), tile_lo);
        }

        (tile_idx, cell_pos)
    }

    fn walk(&self, rect: &[u8], layout: Layout) -> Result<Box<dyn CellWalker>> {
        if !T::IS_INT {
            return Err(ErrorKind::query(
                "cell enumeration requires an integer domain",
            ));
        }
        let mut lo = Vec::with_capacity(self.dim_num);
        let mut hi = Vec::with_capacity(self.dim_num);
        for d in 0..self.dim_num {
            lo.push(self.rect_lo(rect, d));
            hi.push(self.rect_hi(rect, d));
        }
        match layout {
            Layout::RowMajor | Layout::ColMajor => Ok(Box::new(Odometer::new(
                lo,
                hi,
                self.sig_dims(layout).into_vec(),
            ))),
            Layout::GlobalOrder => match &self.extents {
                None => Ok(Box::new(Odometer::new(
                    lo,
                    hi,
                    self.sig_dims(self.cell_order).into_vec(),
                ))),
                Some(extents) => Ok(Box::new(GlobalWalker::new(
                    lo,
                    hi,
                    self.lo.clone(),
                    extents.clone(),
                    self.sig_dims(self.tile_order).into_vec(),
                    self.sig_dims(self.cell_order).into_vec(),
                ))),
            },
            Layout::Unordered => Err(ErrorKind::query("cannot enumerate cells unordered")),
        }
    }

    fn slabs(&self, rect: &[u8], layout: Layout) -> Result<Vec<Vec<u8>>> {
        if !T::IS_INT {
            return Err(ErrorKind::query(
                "slab partitioning requires an integer domain",
            ));
        }
        let extents = match &self.extents {
            Some(e) => e,
            None => return Ok(vec![rect.to_vec()]),
        };
        let axis = self.slab_axis(layout);
        let ext = extents[axis];
        let ext_u64 = ext.extent_to_u64();
        let slot_lo = self.rect_lo(rect, axis).tile_slot(self.lo[axis], ext);
        let slot_hi = self.rect_hi(rect, axis).tile_slot(self.lo[axis], ext);

        let mut out = Vec::with_capacity((slot_hi - slot_lo + 1) as usize);
        for slot in slot_lo..=slot_hi {
            let tile_lo = self.lo[axis].add_u64(slot * ext_u64);
            let tile_hi = self
                .lo[axis]
                .add_u64_capped(slot * ext_u64 + (ext_u64 - 1), self.rect_hi(rect, axis));
            let lo = if T::cmp_vals(tile_lo, self.rect_lo(rect, axis)) == Ordering::Less {
                self.rect_lo(rect, axis)
            } else {
                tile_lo
            };
            let mut slab = rect.to_vec();
            lo.write(&mut slab[2 * axis * T::SIZE..]);
            tile_hi.write(&mut slab[(2 * axis + 1) * T::SIZE..]);
            out.push(slab);
        }
        Ok(out)
    }
}

/// Plain odometer over a rectangle: the last dimension in `sig_dims` varies
/// fastest.
struct Odometer<T> {
    lo: Vec<T>,
    hi: Vec<T>,
    sig_dims: Vec<usize>,
    cur: Vec<T>,
    buf: Vec<u8>,
    done: bool,
}

impl<T: CoordNum> Odometer<T> {
    fn new(lo: Vec<T>, hi: Vec<T>, sig_dims: Vec<usize>) -> Self {
        let done = lo
            .iter()
            .zip(&hi)
            .any(|(l, h)| T::cmp_vals(*l, *h) == Ordering::Greater);
        let cur = lo.clone();
        let mut walker = Self {
            lo,
            hi,
            sig_dims,
            cur,
            buf: Vec::new(),
            done,
        };
        walker.refresh();
        walker
    }

    fn refresh(&mut self) {
        self.buf.resize(self.cur.len() * T::SIZE, 0);
        for (d, v) in self.cur.iter().enumerate() {
            v.write(&mut self.buf[d * T::SIZE..]);
        }
    }
}

impl<T: CoordNum> CellWalker for Odometer<T> {
    fn done(&self) -> bool {
        self.done
    }

    fn coords(&self) -> &[u8] {
        debug_assert!(!self.done);
        &self.buf
    }

    fn advance(&mut self) {
        if self.done {
            return;
        }
        for &d in self.sig_dims.iter().rev() {
            if T::cmp_vals(self.cur[d], self.hi[d]) == Ordering::Less {
                self.cur[d] = self.cur[d].add_u64(1);
                self.refresh();
                return;
            }
            self.cur[d] = self.lo[d];
        }
        self.done = true;
    }
}

/// Tile-by-tile walker for the global order: an outer odometer over the
/// rectangle's space tiles (tile order) and an inner odometer over each
/// tile's intersection with the rectangle (cell order).
struct GlobalWalker<T> {
    rect_lo: Vec<T>,
    rect_hi: Vec<T>,
    anchor: Vec<T>,
    extents: Vec<T>,
    tile_sig: Vec<usize>,
    cell_sig: Vec<usize>,
    tile_slot_lo: Vec<u64>,
    tile_slot_hi: Vec<u64>,
    cur_slot: Vec<u64>,
    inner: Odometer<T>,
    done: bool,
}

impl<T: CoordNum> GlobalWalker<T> {
    fn new(
        rect_lo: Vec<T>,
        rect_hi: Vec<T>,
        anchor: Vec<T>,
        extents: Vec<T>,
        tile_sig: Vec<usize>,
        cell_sig: Vec<usize>,
    ) -> Self {
        let dim_num = rect_lo.len();
        let empty = rect_lo
            .iter()
            .zip(&rect_hi)
            .any(|(l, h)| T::cmp_vals(*l, *h) == Ordering::Greater);

        let mut tile_slot_lo = Vec::with_capacity(dim_num);
        let mut tile_slot_hi = Vec::with_capacity(dim_num);
        for d in 0..dim_num {
            tile_slot_lo.push(rect_lo[d].tile_slot(anchor[d], extents[d]));
            tile_slot_hi.push(rect_hi[d].tile_slot(anchor[d], extents[d]));
        }
        let cur_slot = tile_slot_lo.clone();

        let mut walker = Self {
            rect_lo,
            rect_hi,
            anchor,
            extents,
            tile_sig,
            cell_sig: cell_sig.clone(),
            tile_slot_lo,
            tile_slot_hi,
            cur_slot,
            inner: Odometer::new(Vec::new(), Vec::new(), cell_sig),
            done: empty,
        };
        if !walker.done {
            walker.enter_tile();
        }
        walker
    }

    /// Rebuilds the inner odometer for the current tile slot.
    fn enter_tile(&mut self) {
        let dim_num = self.rect_lo.len();
        let mut lo = Vec::with_capacity(dim_num);
        let mut hi = Vec::with_capacity(dim_num);
        for d in 0..dim_num {
            let ext = self.extents[d].extent_to_u64();
            let tile_lo = self.anchor[d].add_u64(self.cur_slot[d] * ext);
            let tile_hi = self.anchor[d].add_u64_capped(
                self.cur_slot[d] * ext + (ext - 1),
                self.rect_hi[d],
            );
            lo.push(
                if T::cmp_vals(tile_lo, self.rect_lo[d]) == Ordering::Less {
                    self.rect_lo[d]
                } else {
                    tile_lo
                },
            );
            hi.push(tile_hi);
        }
        self.inner = Odometer::new(lo, hi, self.cell_sig.clone());
    }

    /// Moves to the next tile slot in tile order; returns false at the end.
    fn next_tile(&mut self) -> bool {
        let sig = self.tile_sig.clone();
        for &d in sig.iter().rev() {
            if self.cur_slot[d] < self.tile_slot_hi[d] {
                self.cur_slot[d] += 1;
                self.enter_tile();
                return true;
            }
            self.cur_slot[d] = self.tile_slot_lo[d];
        }
        false
    }
}

impl<T: CoordNum> CellWalker for GlobalWalker<T> {
    fn done(&self) -> bool {
        self.done
    }

    fn coords(&self) -> &[u8] {
        debug_assert!(!self.done);
        self.inner.coords()
    }

    fn advance(&mut self) {
        if self.done {
            return;
        }
        self.inner.advance();
        while self.inner.done() {
            if !self.next_tile() {
                self.done = true;
                return;
            }
        }
    }
}
