//! # Fragment Metadata Footer
//!
//! The footer (`__fragment_metadata.tdb`) is the authoritative index of a
//! fragment: per-stream tile offsets, compressed and original sizes, and,
//! for sparse fragments, the per-tile MBRs, per-tile bounding-coordinate
//! pairs and the global MBR. Dense fragments record the rectangular region
//! they cover instead.
//!
//! ## Binary Layout (little-endian)
//!
//! ```text
//! FooterHeader | subarray | per stream: offsets, comp sizes, orig sizes
//!              | MBRs | bounding coords | global MBR | CRC-32
//! ```
//!
//! Readers reject a foreign magic, a differing version major, or a CRC
//! mismatch.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::constants::VERSION;
use crate::error::ErrorKind;
use crate::schema::ArraySchema;
use crate::storage::parse_zerocopy;
use crate::vfs::Uri;

const FRAGMENT_MAGIC: &[u8; 8] = b"CSTOREFM";

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Per-stream tile index: parallel vectors over tile ids.
#[derive(Debug, Clone, Default)]
pub struct StreamMeta {
    /// Byte offset of each compressed tile in the stream's file.
    pub offsets: Vec<u64>,
    /// Compressed byte size of each tile.
    pub comp_sizes: Vec<u64>,
    /// Decompressed byte size of each tile.
    pub orig_sizes: Vec<u64>,
}

#[derive(Debug)]
pub struct FragmentMetadata {
    uri: Uri,
    name: String,
    cache_id: u64,
    dense: bool,
    /// Region covered by a dense fragment (pairs layout); None for sparse.
    subarray: Option<Vec<u8>>,
    tile_count: u64,
    streams: Vec<StreamMeta>,
    /// Sparse: `tile_count` MBRs, each `2 * coords_size` bytes.
    mbrs: Vec<u8>,
    /// Sparse: `tile_count` (first, last) coordinate pairs.
    bounds: Vec<u8>,
    /// Tightest rectangle containing every cell of the fragment.
    global_mbr: Vec<u8>,
    insertion_order: (u64, u64, u64),
    coords_size: usize,
}

impl FragmentMetadata {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        uri: Uri,
        dense: bool,
        subarray: Option<Vec<u8>>,
        tile_count: u64,
        streams: Vec<StreamMeta>,
        mbrs: Vec<u8>,
        bounds: Vec<u8>,
        global_mbr: Vec<u8>,
        coords_size: usize,
    ) -> Result<Self> {
        let name = uri.last_component().to_string();
        let insertion_order = Self::parse_name(&name).ok_or_else(|| {
            ErrorKind::storage_manager(format!("malformed fragment name '{}'", name))
        })?;
        Ok(Self {
            cache_id: hash_uri(&uri),
            uri,
            name,
            dense,
            subarray,
            tile_count,
            streams,
            mbrs,
            bounds,
            global_mbr,
            insertion_order,
            coords_size,
        })
    }

    /// Parses `__<timestamp>_<host>_<thread>` into its insertion-order
    /// triple. Returns None for foreign directory names.
    pub fn parse_name(name: &str) -> Option<(u64, u64, u64)> {
        let rest = name.strip_prefix("__")?;
        let mut parts = rest.split('_');
        let ts = parts.next()?.parse().ok()?;
        let host = parts.next()?.parse().ok()?;
        let thread = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((ts, host, thread))
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable id used as the tile-cache fragment component.
    pub fn cache_id(&self) -> u64 {
        self.cache_id
    }

    pub fn dense(&self) -> bool {
        self.dense
    }

    pub fn subarray(&self) -> Option<&[u8]> {
        self.subarray.as_deref()
    }

    pub fn tile_count(&self) -> u64 {
        self.tile_count
    }

    pub fn stream(&self, idx: usize) -> &StreamMeta {
        &self.streams[idx]
    }

    /// The MBR of sparse tile `t`.
    pub fn mbr(&self, t: u64) -> &[u8] {
        let width = 2 * self.coords_size;
        &self.mbrs[t as usize * width..(t as usize + 1) * width]
    }

    /// The (first, last) bounding coordinates of sparse tile `t`.
    pub fn bounding_coords(&self, t: u64) -> &[u8] {
        let width = 2 * self.coords_size;
        &self.bounds[t as usize * width..(t as usize + 1) * width]
    }

    pub fn global_mbr(&self) -> &[u8] {
        &self.global_mbr
    }

    pub fn insertion_order(&self) -> (u64, u64, u64) {
        self.insertion_order
    }

    pub fn serialize(&self) -> Vec<u8> {
        let subarray = self.subarray.as_deref().unwrap_or(&[]);
        let header = FooterHeader {
            magic: *FRAGMENT_MAGIC,
            version_major: U32::new(VERSION[0]),
            version_minor: U32::new(VERSION[1]),
            version_rev: U32::new(VERSION[2]),
            dense: self.dense as u8,
            _pad: [0; 3],
            stream_num: U32::new(self.streams.len() as u32),
            tile_count: U64::new(self.tile_count),
            subarray_len: U64::new(subarray.len() as u64),
            mbrs_len: U64::new(self.mbrs.len() as u64),
            bounds_len: U64::new(self.bounds.len() as u64),
            global_mbr_len: U64::new(self.global_mbr.len() as u64),
        };

        let mut out = Vec::new();
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(subarray);
        for stream in &self.streams {
            for v in &stream.offsets {
                out.extend_from_slice(&v.to_le_bytes());
            }
            for v in &stream.comp_sizes {
                out.extend_from_slice(&v.to_le_bytes());
            }
            for v in &stream.orig_sizes {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.mbrs);
        out.extend_from_slice(&self.bounds);
        out.extend_from_slice(&self.global_mbr);
        let crc = CRC32.checksum(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    pub fn deserialize(bytes: &[u8], schema: &ArraySchema, uri: Uri) -> Result<Self> {
        ensure!(bytes.len() > 4, "fragment footer is truncated");
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        if CRC32.checksum(body) != stored {
            return Err(ErrorKind::storage_manager(format!(
                "fragment footer checksum mismatch in '{}'",
                uri
            )));
        }

        let header: &FooterHeader = parse_zerocopy(body, "FooterHeader")?;
        if &header.magic != FRAGMENT_MAGIC {
            return Err(ErrorKind::storage_manager("fragment footer foreign magic"));
        }
        if header.version_major.get() != VERSION[0] {
            return Err(ErrorKind::storage_manager(format!(
                "fragment footer version {} is not readable by version {}",
                header.version_major.get(),
                VERSION[0]
            )));
        }
        let dense = header.dense != 0;
        ensure!(
            dense == schema.dense(),
            "fragment mode does not match the array schema"
        );
        let stream_num = header.stream_num.get() as usize;
        ensure!(
            stream_num == schema.streams().len(),
            "fragment has {} streams, schema expects {}",
            stream_num,
            schema.streams().len()
        );

        let tile_count = header.tile_count.get();
        let mut pos = std::mem::size_of::<FooterHeader>();

        let subarray_len = header.subarray_len.get() as usize;
        ensure!(body.len() >= pos + subarray_len, "truncated fragment subarray");
        let subarray = if subarray_len > 0 {
            ensure!(
                subarray_len == 2 * schema.coords_size(),
                "fragment subarray width mismatch"
            );
            let s = body[pos..pos + subarray_len].to_vec();
            pos += subarray_len;
            Some(s)
        } else {
            None
        };

        let mut streams = Vec::with_capacity(stream_num);
        for _ in 0..stream_num {
            let mut stream = StreamMeta::default();
            for vec in [
                &mut stream.offsets,
                &mut stream.comp_sizes,
                &mut stream.orig_sizes,
            ] {
                ensure!(
                    body.len() >= pos + tile_count as usize * 8,
                    "truncated stream tile index"
                );
                vec.reserve(tile_count as usize);
                for _ in 0..tile_count {
                    vec.push(u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap()));
                    pos += 8;
                }
            }
            streams.push(stream);
        }

        let mbrs_len = header.mbrs_len.get() as usize;
        let bounds_len = header.bounds_len.get() as usize;
        let gmbr_len = header.global_mbr_len.get() as usize;
        ensure!(
            body.len() == pos + mbrs_len + bounds_len + gmbr_len,
            "fragment footer length mismatch"
        );
        let rect_width = 2 * schema.coords_size();
        if !dense {
            ensure!(
                mbrs_len == tile_count as usize * rect_width
                    && bounds_len == tile_count as usize * rect_width,
                "sparse tile index width mismatch"
            );
        }
        let mbrs = body[pos..pos + mbrs_len].to_vec();
        pos += mbrs_len;
        let bounds = body[pos..pos + bounds_len].to_vec();
        pos += bounds_len;
        let global_mbr = body[pos..pos + gmbr_len].to_vec();

        Self::new(
            uri,
            dense,
            subarray,
            tile_count,
            streams,
            mbrs,
            bounds,
            global_mbr,
            schema.coords_size(),
        )
    }
}

fn hash_uri(uri: &Uri) -> u64 {
    let mut hasher = DefaultHasher::new();
    uri.as_str().hash(&mut hasher);
    hasher.finish()
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct FooterHeader {
    magic: [u8; 8],
    version_major: U32,
    version_minor: U32,
    version_rev: U32,
    dense: u8,
    _pad: [u8; 3],
    stream_num: U32,
    tile_count: U64,
    subarray_len: U64,
    mbrs_len: U64,
    bounds_len: U64,
    global_mbr_len: U64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Dimension};
    use crate::types::{coords_to_bytes, ArrayType, Datatype, Layout};

    fn schema() -> ArraySchema {
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

    fn sample_meta(uri: &str) -> FragmentMetadata {
        FragmentMetadata::new(
            Uri::new(uri),
            false,
            None,
            1,
            vec![
                StreamMeta {
                    offsets: vec![0],
                    comp_sizes: vec![20],
                    orig_sizes: vec![8],
                },
                StreamMeta {
                    offsets: vec![0],
                    comp_sizes: vec![44],
                    orig_sizes: vec![32],
                },
            ],
            coords_to_bytes(&[1u64, 1, 1, 2]),
            coords_to_bytes(&[1u64, 1, 1, 2]),
            coords_to_bytes(&[1u64, 1, 1, 2]),
            16,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(
            FragmentMetadata::parse_name("__000000000000123_0000000007_0000000009"),
            Some((123, 7, 9))
        );
        assert_eq!(FragmentMetadata::parse_name("__array_metadata.tdb"), None);
        assert_eq!(FragmentMetadata::parse_name("frag"), None);
    }

    #[test]
    fn test_footer_roundtrip() {
        let schema = schema();
        let meta = sample_meta("mem://arr/__000000000000001_0000000002_0000000003");
        let bytes = meta.serialize();
        let restored = FragmentMetadata::deserialize(
            &bytes,
            &schema,
            Uri::new("mem://arr/__000000000000001_0000000002_0000000003"),
        )
        .unwrap();
        assert_eq!(restored.tile_count(), 1);
        assert_eq!(restored.insertion_order(), (1, 2, 3));
        assert_eq!(restored.stream(0).comp_sizes, vec![20]);
        assert_eq!(restored.mbr(0), coords_to_bytes(&[1u64, 1, 1, 2]).as_slice());
    }

    #[test]
    fn test_footer_rejects_corruption_and_version_skew() {
        let schema = schema();
        let meta = sample_meta("mem://arr/__000000000000001_0000000002_0000000003");
        let uri = Uri::new("mem://arr/__000000000000001_0000000002_0000000003");

        let mut bytes = meta.serialize();
        bytes[20] ^= 1;
        assert!(FragmentMetadata::deserialize(&bytes, &schema, uri.clone()).is_err());

        let mut bytes = meta.serialize();
        bytes[8] = 99; // version major
        let crc = CRC32.checksum(&bytes[..bytes.len() - 4]);
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&crc.to_le_bytes());
        assert!(FragmentMetadata::deserialize(&bytes, &schema, uri).is_err());
    }
}
