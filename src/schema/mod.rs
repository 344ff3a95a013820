//! # Array Schema
//!
//! The immutable description of an array: dimensions with a shared
//! coordinate type and closed domain, optional tile extents, an ordered
//! attribute list, cell/tile orders, the sparse tile capacity and the
//! dense/sparse mode flag.
//!
//! Construction validates everything once; after that the schema is
//! read-only and freely aliased (`Arc`) by queries and fragment metadata.
//! The schema also owns two derived artifacts the rest of the engine leans
//! on:
//!
//! - the [`DomainOps`] object implementing the order and tiling algebra
//!   over raw coordinate bytes
//! - the canonical [`StreamDesc`] list: the on-disk attribute streams of a
//!   fragment, in fixed order (each fixed attribute one stream, each
//!   variable attribute an offsets stream plus a values stream, the
//!   coordinates stream last for sparse arrays)
//!
//! ## Serialization
//!
//! `__array_metadata.tdb` holds the schema as a little-endian blob: a
//! zerocopy header, the dimension and attribute records, and a trailing
//! CRC-32. Readers reject a foreign magic, a differing version major, or a
//! checksum mismatch.

mod attribute;
mod dimension;
mod domain;

pub use attribute::Attribute;
pub use dimension::Dimension;
pub use domain::{CellWalker, DomainOps};

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::constants::{
    self, CELL_VAR_OFFSETS_COMPRESSION, CELL_VAR_OFFSET_SIZE, COORDS, COORDS_COMPRESSION,
    DEFAULT_COMPRESSION_LEVEL, FILE_SUFFIX, NAME_MAX_LEN, REAL_COORDS_COMPRESSION, VERSION,
};
use crate::error::ErrorKind;
use crate::storage::parse_zerocopy;
use crate::types::{ArrayType, Compressor, Datatype, Layout};

const ARRAY_META_MAGIC: &[u8; 8] = b"CSTOREAM";

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// The kind of an on-disk attribute stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Fixed-size cells of an attribute.
    Fixed,
    /// Per-cell u64 offsets into the paired values stream.
    VarOffsets,
    /// Concatenated variable-size cell values.
    VarValues,
    /// Interleaved cell coordinates (sparse arrays).
    Coords,
}

/// One on-disk stream of a fragment, in the canonical schema order.
#[derive(Debug, Clone)]
pub struct StreamDesc {
    /// Attribute name, or `__coords`.
    pub name: String,
    /// File name inside a fragment directory.
    pub file_name: String,
    pub kind: StreamKind,
    pub compressor: Compressor,
    pub level: i32,
    /// Element type, consulted by width-aware codecs.
    pub datatype: Datatype,
    /// Bytes per cell for `Fixed`/`VarOffsets`/`Coords`; None for values
    /// streams.
    pub cell_size: Option<u64>,
}

pub struct ArraySchema {
    array_type: ArrayType,
    coord_type: Datatype,
    dims: Vec<Dimension>,
    attrs: Vec<Attribute>,
    cell_order: Layout,
    tile_order: Layout,
    capacity: u64,
    coords_compressor: Compressor,
    coords_level: i32,
    offsets_compressor: Compressor,
    offsets_level: i32,
    domain: Vec<u8>,
    ops: Box<dyn DomainOps>,
    streams: Vec<StreamDesc>,
}

impl std::fmt::Debug for ArraySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArraySchema")
            .field("array_type", &self.array_type)
            .field("coord_type", &self.coord_type)
            .field("dims", &self.dims)
            .field("attrs", &self.attrs)
            .field("cell_order", &self.cell_order)
            .field("tile_order", &self.tile_order)
            .field("capacity", &self.capacity)
            .field("coords_compressor", &self.coords_compressor)
            .field("coords_level", &self.coords_level)
            .field("offsets_compressor", &self.offsets_compressor)
            .field("offsets_level", &self.offsets_level)
            .field("domain", &self.domain)
            .field("streams", &self.streams)
            .finish()
    }
}

impl ArraySchema {
    pub fn new(
        array_type: ArrayType,
        coord_type: Datatype,
        dims: Vec<Dimension>,
        attrs: Vec<Attribute>,
        cell_order: Layout,
        tile_order: Layout,
        capacity: u64,
    ) -> Result<Self> {
        Self::new_impl(
            array_type, coord_type, dims, attrs, cell_order, tile_order, capacity, false,
        )
    }

    /// Constructor for the key-value facade, which legitimately uses the
    /// reserved dimension and attribute names.
    pub(crate) fn new_reserved(
        array_type: ArrayType,
        coord_type: Datatype,
        dims: Vec<Dimension>,
        attrs: Vec<Attribute>,
        cell_order: Layout,
        tile_order: Layout,
        capacity: u64,
    ) -> Result<Self> {
        Self::new_impl(
            array_type, coord_type, dims, attrs, cell_order, tile_order, capacity, true,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new_impl(
        array_type: ArrayType,
        coord_type: Datatype,
        dims: Vec<Dimension>,
        attrs: Vec<Attribute>,
        cell_order: Layout,
        tile_order: Layout,
        capacity: u64,
        allow_reserved: bool,
    ) -> Result<Self> {
        if dims.is_empty() {
            return Err(ErrorKind::schema("an array needs at least one dimension"));
        }
        if attrs.is_empty() {
            return Err(ErrorKind::schema("an array needs at least one attribute"));
        }
        if capacity == 0 {
            return Err(ErrorKind::schema("tile capacity must be positive"));
        }
        if coord_type == Datatype::Char {
            return Err(ErrorKind::schema("CHAR is not a coordinate type"));
        }
        if !matches!(cell_order, Layout::RowMajor | Layout::ColMajor)
            || !matches!(tile_order, Layout::RowMajor | Layout::ColMajor)
        {
            return Err(ErrorKind::schema(
                "cell and tile orders must be row- or column-major",
            ));
        }
        if array_type == ArrayType::Dense && coord_type.is_real() {
            return Err(ErrorKind::schema(
                "dense arrays require an integer coordinate type",
            ));
        }

        let elem = coord_type.size();
        let with_extent = dims.iter().filter(|d| d.tile_extent_bytes().is_some()).count();
        if with_extent != 0 && with_extent != dims.len() {
            return Err(ErrorKind::schema(
                "tile extents must be set on all dimensions or none",
            ));
        }
        if array_type == ArrayType::Dense && with_extent == 0 {
            return Err(ErrorKind::schema("dense arrays require tile extents"));
        }

        let mut names: Vec<&str> = Vec::new();
        for dim in &dims {
            validate_name(dim.name(), "dimension")?;
            let dim_reserved_ok = allow_reserved
                && (dim.name() == constants::KEY_DIM_1 || dim.name() == constants::KEY_DIM_2);
            if constants::reserved_name(dim.name()) && !dim_reserved_ok {
                return Err(ErrorKind::schema(format!(
                    "dimension name '{}' is reserved",
                    dim.name()
                )));
            }
            ensure!(
                dim.domain_bytes().len() == 2 * elem,
                "dimension '{}' domain width does not match the coordinate type",
                dim.name()
            );
            if let Some(extent) = dim.tile_extent_bytes() {
                ensure!(
                    extent.len() == elem,
                    "dimension '{}' tile extent width does not match the coordinate type",
                    dim.name()
                );
            }
            names.push(dim.name());
        }
        for attr in &attrs {
            validate_name(attr.name(), "attribute")?;
            let attr_reserved_ok = allow_reserved
                && (attr.name() == constants::KEY_ATTR_NAME
                    || attr.name() == constants::KEY_TYPE_ATTR_NAME);
            if constants::reserved_name(attr.name()) && !attr_reserved_ok {
                return Err(ErrorKind::schema(format!(
                    "attribute name '{}' is reserved",
                    attr.name()
                )));
            }
            if attr.val_num() == 0 {
                return Err(ErrorKind::schema(format!(
                    "attribute '{}' has zero values per cell",
                    attr.name()
                )));
            }
            names.push(attr.name());
        }
        let mut sorted = names.clone();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(ErrorKind::schema("duplicate attribute or dimension name"));
        }

        let mut domain = Vec::with_capacity(dims.len() * 2 * elem);
        for dim in &dims {
            domain.extend_from_slice(dim.domain_bytes());
        }
        let extents: Option<Vec<u8>> = if with_extent == dims.len() {
            let mut bytes = Vec::with_capacity(dims.len() * elem);
            for dim in &dims {
                bytes.extend_from_slice(dim.tile_extent_bytes().unwrap());
            }
            Some(bytes)
        } else {
            None
        };

        let ops = domain::build(
            coord_type,
            dims.len(),
            &domain,
            extents.as_deref(),
            cell_order,
            tile_order,
        );
        if ops.is_empty_rect(&domain) {
            return Err(ErrorKind::schema("domain is empty in some dimension"));
        }

        let (coords_compressor, offsets_compressor) = if coord_type.is_real() {
            (REAL_COORDS_COMPRESSION, CELL_VAR_OFFSETS_COMPRESSION)
        } else {
            (COORDS_COMPRESSION, CELL_VAR_OFFSETS_COMPRESSION)
        };

        let mut schema = Self {
            array_type,
            coord_type,
            dims,
            attrs,
            cell_order,
            tile_order,
            capacity,
            coords_compressor,
            coords_level: DEFAULT_COMPRESSION_LEVEL,
            offsets_compressor,
            offsets_level: DEFAULT_COMPRESSION_LEVEL,
            domain,
            ops,
            streams: Vec::new(),
        };
        schema.streams = schema.build_streams();
        Ok(schema)
    }

    fn build_streams(&self) -> Vec<StreamDesc> {
        let mut streams = Vec::new();
        for attr in &self.attrs {
            if attr.var_size() {
                streams.push(StreamDesc {
                    name: attr.name().to_string(),
                    file_name: format!("{}{}", attr.name(), FILE_SUFFIX),
                    kind: StreamKind::VarOffsets,
                    compressor: self.offsets_compressor,
                    level: self.offsets_level,
                    datatype: Datatype::Uint64,
                    cell_size: Some(CELL_VAR_OFFSET_SIZE),
                });
                streams.push(StreamDesc {
                    name: attr.name().to_string(),
                    file_name: format!("{}_var{}", attr.name(), FILE_SUFFIX),
                    kind: StreamKind::VarValues,
                    compressor: attr.compressor(),
                    level: attr.level(),
                    datatype: attr.datatype(),
                    cell_size: None,
                });
            } else {
                streams.push(StreamDesc {
                    name: attr.name().to_string(),
                    file_name: format!("{}{}", attr.name(), FILE_SUFFIX),
                    kind: StreamKind::Fixed,
                    compressor: attr.compressor(),
                    level: attr.level(),
                    datatype: attr.datatype(),
                    cell_size: attr.cell_size(),
                });
            }
        }
        if self.array_type == ArrayType::Sparse {
            streams.push(StreamDesc {
                name: COORDS.to_string(),
                file_name: format!("{}{}", COORDS, FILE_SUFFIX),
                kind: StreamKind::Coords,
                compressor: self.coords_compressor,
                level: self.coords_level,
                datatype: self.coord_type,
                cell_size: Some(self.coords_size() as u64),
            });
        }
        streams
    }

    pub fn array_type(&self) -> ArrayType {
        self.array_type
    }

    pub fn dense(&self) -> bool {
        self.array_type == ArrayType::Dense
    }

    pub fn coord_type(&self) -> Datatype {
        self.coord_type
    }

    pub fn dim_num(&self) -> usize {
        self.dims.len()
    }

    pub fn coords_size(&self) -> usize {
        self.dims.len() * self.coord_type.size()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attrs
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name() == name)
    }

    pub fn cell_order(&self) -> Layout {
        self.cell_order
    }

    pub fn tile_order(&self) -> Layout {
        self.tile_order
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The whole-domain rectangle in `(lo, hi)` pairs per dimension.
    pub fn domain(&self) -> &[u8] {
        &self.domain
    }

    pub fn ops(&self) -> &dyn DomainOps {
        self.ops.as_ref()
    }

    /// Cells per tile: the space-tile volume for dense arrays, the capacity
    /// for sparse arrays.
    pub fn cells_per_tile(&self) -> u64 {
        if self.dense() {
            let mut volume = 1u64;
            for dim in &self.dims {
                let extent = dim.tile_extent_bytes().unwrap();
                let mut buf = [0u8; 8];
                buf[..extent.len()].copy_from_slice(extent);
                volume *= u64::from_le_bytes(buf);
            }
            volume
        } else {
            self.capacity
        }
    }

    /// The canonical on-disk stream list.
    pub fn streams(&self) -> &[StreamDesc] {
        &self.streams
    }

    /// `(fixed-or-offsets stream, values stream)` indices of an attribute.
    pub fn attr_streams(&self, name: &str) -> Option<(usize, Option<usize>)> {
        for (i, stream) in self.streams.iter().enumerate() {
            match stream.kind {
                StreamKind::Fixed if stream.name == name => return Some((i, None)),
                StreamKind::VarOffsets if stream.name == name => return Some((i, Some(i + 1))),
                _ => {}
            }
        }
        None
    }

    /// Index of the coordinates stream (sparse arrays).
    pub fn coords_stream(&self) -> Option<usize> {
        self.streams
            .iter()
            .position(|s| s.kind == StreamKind::Coords)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let has_extents = self.dims[0].tile_extent_bytes().is_some();
        let header = ArrayMetaHeader {
            magic: *ARRAY_META_MAGIC,
            version_major: U32::new(VERSION[0]),
            version_minor: U32::new(VERSION[1]),
            version_rev: U32::new(VERSION[2]),
            array_type: self.array_type as u8,
            coord_type: self.coord_type as u8,
            cell_order: self.cell_order as u8,
            tile_order: self.tile_order as u8,
            has_extents: has_extents as u8,
            coords_compressor: self.coords_compressor as u8,
            offsets_compressor: self.offsets_compressor as u8,
            _pad: 0,
            dim_num: U32::new(self.dims.len() as u32),
            attr_num: U32::new(self.attrs.len() as u32),
            capacity: U64::new(self.capacity),
            cell_var_offset_size: U64::new(CELL_VAR_OFFSET_SIZE),
            coords_level: U32::new(self.coords_level as u32),
            offsets_level: U32::new(self.offsets_level as u32),
        };

        let mut out = Vec::new();
        out.extend_from_slice(header.as_bytes());
        for dim in &self.dims {
            out.extend_from_slice(&(dim.name().len() as u32).to_le_bytes());
            out.extend_from_slice(dim.name().as_bytes());
            out.extend_from_slice(dim.domain_bytes());
            if let Some(extent) = dim.tile_extent_bytes() {
                out.extend_from_slice(extent);
            }
        }
        for attr in &self.attrs {
            out.extend_from_slice(&(attr.name().len() as u32).to_le_bytes());
            out.extend_from_slice(attr.name().as_bytes());
            out.push(attr.datatype() as u8);
            out.extend_from_slice(&attr.val_num().to_le_bytes());
            out.push(attr.compressor() as u8);
            out.extend_from_slice(&(attr.level() as u32).to_le_bytes());
        }
        let crc = CRC32.checksum(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.len() > 4, "array metadata blob is truncated");
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        if CRC32.checksum(body) != stored {
            return Err(ErrorKind::schema("array metadata checksum mismatch"));
        }

        let header: &ArrayMetaHeader = parse_zerocopy(body, "ArrayMetaHeader")?;
        if &header.magic != ARRAY_META_MAGIC {
            return Err(ErrorKind::schema("array metadata has a foreign magic"));
        }
        if header.version_major.get() != VERSION[0] {
            return Err(ErrorKind::schema(format!(
                "array metadata version {} is not readable by version {}",
                header.version_major.get(),
                VERSION[0]
            )));
        }

        let array_type = ArrayType::try_from(header.array_type)?;
        let coord_type = Datatype::try_from(header.coord_type)?;
        let cell_order = Layout::try_from(header.cell_order)?;
        let tile_order = Layout::try_from(header.tile_order)?;
        let has_extents = header.has_extents != 0;
        let elem = coord_type.size();

        let mut pos = std::mem::size_of::<ArrayMetaHeader>();
        let mut dims = Vec::with_capacity(header.dim_num.get() as usize);
        for _ in 0..header.dim_num.get() {
            let name = read_name(body, &mut pos)?;
            ensure!(body.len() >= pos + 2 * elem, "truncated dimension domain");
            let domain = body[pos..pos + 2 * elem].to_vec();
            pos += 2 * elem;
            let extent = if has_extents {
                ensure!(body.len() >= pos + elem, "truncated tile extent");
                let e = body[pos..pos + elem].to_vec();
                pos += elem;
                Some(e)
            } else {
                None
            };
            dims.push(Dimension::from_bytes(name, domain, extent));
        }

        let mut attrs = Vec::with_capacity(header.attr_num.get() as usize);
        for _ in 0..header.attr_num.get() {
            let name = read_name(body, &mut pos)?;
            ensure!(body.len() >= pos + 10, "truncated attribute record");
            let datatype = Datatype::try_from(body[pos])?;
            pos += 1;
            let val_num = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
            pos += 4;
            let compressor = Compressor::try_from(body[pos])?;
            pos += 1;
            let level = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as i32;
            pos += 4;
            attrs.push(
                Attribute::new(name, datatype)
                    .with_val_num(val_num)
                    .with_compressor(compressor, level),
            );
        }
        ensure!(pos == body.len(), "array metadata has trailing bytes");

        let mut schema = Self::new_impl(
            array_type,
            coord_type,
            dims,
            attrs,
            cell_order,
            tile_order,
            header.capacity.get(),
            true,
        )?;
        schema.coords_compressor = Compressor::try_from(header.coords_compressor)?;
        schema.offsets_compressor = Compressor::try_from(header.offsets_compressor)?;
        schema.coords_level = header.coords_level.get() as i32;
        schema.offsets_level = header.offsets_level.get() as i32;
        schema.streams = schema.build_streams();
        Ok(schema)
    }
}

fn validate_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() || name.len() > NAME_MAX_LEN {
        return Err(ErrorKind::schema(format!(
            "invalid {} name length: {}",
            what,
            name.len()
        )));
    }
    Ok(())
}

fn read_name(body: &[u8], pos: &mut usize) -> Result<String> {
    ensure!(body.len() >= *pos + 4, "truncated name length");
    let len = u32::from_le_bytes(body[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    ensure!(len <= NAME_MAX_LEN, "name length {} out of range", len);
    ensure!(body.len() >= *pos + len, "truncated name");
    let name = std::str::from_utf8(&body[*pos..*pos + len])
        .map_err(|_| ErrorKind::schema("name is not valid UTF-8"))?
        .to_string();
    *pos += len;
    Ok(name)
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct ArrayMetaHeader {
    magic: [u8; 8],
    version_major: U32,
    version_minor: U32,
    version_rev: U32,
    array_type: u8,
    coord_type: u8,
    cell_order: u8,
    tile_order: u8,
    has_extents: u8,
    coords_compressor: u8,
    offsets_compressor: u8,
    _pad: u8,
    dim_num: U32,
    attr_num: U32,
    capacity: U64,
    cell_var_offset_size: U64,
    coords_level: U32,
    offsets_level: U32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sparse_schema() -> ArraySchema {
        ArraySchema::new(
            ArrayType::Sparse,
            Datatype::Uint64,
            vec![
                Dimension::new("d1", [1u64, 4], Some(2)),
                Dimension::new("d2", [1u64, 4], Some(2)),
            ],
            vec![
                Attribute::new("a1", Datatype::Int32),
                Attribute::new("a2", Datatype::Char).var(),
                Attribute::new("a3", Datatype::Float32).with_val_num(2),
            ],
            Layout::RowMajor,
            Layout::RowMajor,
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_stream_layout() {
        let schema = sparse_schema();
        let names: Vec<(&str, StreamKind)> = schema
            .streams()
            .iter()
            .map(|s| (s.file_name.as_str(), s.kind))
            .collect();
        assert_eq!(
            names,
            vec![
                ("a1.tdb", StreamKind::Fixed),
                ("a2.tdb", StreamKind::VarOffsets),
                ("a2_var.tdb", StreamKind::VarValues),
                ("a3.tdb", StreamKind::Fixed),
                ("__coords.tdb", StreamKind::Coords),
            ]
        );
        assert_eq!(schema.attr_streams("a2"), Some((1, Some(2))));
        assert_eq!(schema.attr_streams("a3"), Some((3, None)));
        assert_eq!(schema.coords_stream(), Some(4));
    }

    #[test]
    fn test_schema_serialization_roundtrip() {
        let schema = sparse_schema();
        let bytes = schema.serialize();
        let restored = ArraySchema::deserialize(&bytes).unwrap();
        assert_eq!(restored.array_type(), ArrayType::Sparse);
        assert_eq!(restored.coord_type(), Datatype::Uint64);
        assert_eq!(restored.capacity(), 2);
        assert_eq!(restored.dim_num(), 2);
        assert_eq!(restored.attributes(), schema.attributes());
        assert_eq!(restored.domain(), schema.domain());
        assert_eq!(restored.streams().len(), schema.streams().len());
    }

    #[test]
    fn test_schema_rejects_corruption_and_foreign_versions() {
        let schema = sparse_schema();
        let mut bytes = schema.serialize();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(ArraySchema::deserialize(&bytes).is_err());

        let mut bytes = schema.serialize();
        bytes[8] = 99; // version major
        assert!(ArraySchema::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_schema_validation() {
        // Reserved attribute name.
        let err = ArraySchema::new(
            ArrayType::Sparse,
            Datatype::Uint64,
            vec![Dimension::new("d1", [0u64, 9], None)],
            vec![Attribute::new("__coords", Datatype::Int32)],
            Layout::RowMajor,
            Layout::RowMajor,
            10,
        )
        .unwrap_err();
        assert!(matches!(ErrorKind::of(&err), Some(ErrorKind::Schema(_))));

        // Dense arrays need extents and integer coordinates.
        assert!(ArraySchema::new(
            ArrayType::Dense,
            Datatype::Uint64,
            vec![Dimension::new("d1", [0u64, 9], None)],
            vec![Attribute::new("a", Datatype::Int32)],
            Layout::RowMajor,
            Layout::RowMajor,
            10,
        )
        .is_err());
        assert!(ArraySchema::new(
            ArrayType::Dense,
            Datatype::Float64,
            vec![Dimension::new("d1", [0.0f64, 9.0], Some(1.0))],
            vec![Attribute::new("a", Datatype::Int32)],
            Layout::RowMajor,
            Layout::RowMajor,
            10,
        )
        .is_err());

        // Duplicate names.
        assert!(ArraySchema::new(
            ArrayType::Sparse,
            Datatype::Uint64,
            vec![Dimension::new("x", [0u64, 9], None)],
            vec![
                Attribute::new("x", Datatype::Int32),
            ],
            Layout::RowMajor,
            Layout::RowMajor,
            10,
        )
        .is_err());
    }

    #[test]
    fn test_cells_per_tile() {
        let schema = sparse_schema();
        assert_eq!(schema.cells_per_tile(), 2);

        let dense = ArraySchema::new(
            ArrayType::Dense,
            Datatype::Uint64,
            vec![
                Dimension::new("d1", [1u64, 4], Some(2)),
                Dimension::new("d2", [1u64, 4], Some(2)),
            ],
            vec![Attribute::new("a", Datatype::Int32)],
            Layout::RowMajor,
            Layout::RowMajor,
            constants::CAPACITY,
        )
        .unwrap();
        assert_eq!(dense.cells_per_tile(), 4);
    }
}
