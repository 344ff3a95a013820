//! # Query Core
//!
//! Queries are the only way cells move between user buffers and fragments.
//! A query is initialized against a storage manager with an array, a
//! subarray, an attribute subset and a layout; submitting it drives a state
//! machine to `Completed`, `Overflowed` (reads only) or `Failed`.
//!
//! - [`ReadQuery`] merges the fragment snapshot captured at init into user
//!   buffers under the requested layout, resolving inter-fragment
//!   overwrites (latest fragment wins) and suspending on buffer overflow;
//!   a resubmission resumes from the saved cursor.
//! - [`WriteQuery`] buffers, orders and tiles user cells into a single new
//!   fragment, sealed by `finalize`.
//!
//! Buffers are caller-owned and passed at submit time: one byte buffer per
//! fixed-size attribute, an offsets buffer plus a values buffer per
//! variable-size attribute, the coordinates buffer last when `__coords` is
//! selected. `Overflowed` is a status, not an error: the client may grow
//! its buffers and resubmit, or accept the partial result.

mod read;
mod sorted;
mod write;

pub use read::ReadQuery;
pub use write::WriteQuery;

use crate::config::constants::{self, COORDS, NAME_MAX_LEN};
use crate::error::ErrorKind;
use crate::schema::ArraySchema;
use crate::types::Datatype;
use eyre::Result;

/// Lifecycle status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    InProgress,
    Completed,
    /// Some user buffer filled up mid-read; resubmit to resume.
    Overflowed,
    Failed,
}

/// One attribute's read buffers. Fixed-size attributes use `data` alone;
/// variable-size attributes pair an offsets buffer with a values buffer.
/// The `*_used` fields report bytes produced, updated on every submit.
pub struct ReadBuffer<'b> {
    pub data: &'b mut [u8],
    pub offsets: Option<&'b mut [u8]>,
    pub data_used: usize,
    pub offsets_used: usize,
}

impl<'b> ReadBuffer<'b> {
    pub fn fixed(data: &'b mut [u8]) -> Self {
        Self {
            data,
            offsets: None,
            data_used: 0,
            offsets_used: 0,
        }
    }

    pub fn var(offsets: &'b mut [u8], data: &'b mut [u8]) -> Self {
        Self {
            data,
            offsets: Some(offsets),
            data_used: 0,
            offsets_used: 0,
        }
    }
}

/// One attribute's write buffers, mirroring [`ReadBuffer`] with borrowed
/// input slices. Offsets are absolute byte positions into `data`.
pub struct WriteBuffer<'b> {
    pub data: &'b [u8],
    pub offsets: Option<&'b [u8]>,
}

impl<'b> WriteBuffer<'b> {
    pub fn fixed(data: &'b [u8]) -> Self {
        Self {
            data,
            offsets: None,
        }
    }

    pub fn var(offsets: &'b [u8], data: &'b [u8]) -> Self {
        Self {
            data,
            offsets: Some(offsets),
        }
    }
}

/// A resolved selected attribute.
#[derive(Debug, Clone)]
pub(crate) struct AttrSel {
    pub name: String,
    pub datatype: Datatype,
    pub val_num: u32,
    pub var: bool,
    pub is_coords: bool,
    /// Bytes per cell for fixed attributes and coordinates; 0 for var.
    pub cell_size: u64,
    /// Fixed/offsets/coords stream index (usize::MAX for dense coords,
    /// which are synthesized rather than stored).
    pub stream: usize,
    /// Values stream index when `var`.
    pub var_stream: usize,
}

/// Resolves a read attribute list. `__coords` is allowed anywhere in the
/// list; everything else must name a schema attribute.
pub(crate) fn resolve_read_attrs(schema: &ArraySchema, names: &[&str]) -> Result<Vec<AttrSel>> {
    if names.is_empty() {
        return Err(ErrorKind::query("no attributes selected"));
    }
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if name.is_empty() || name.len() > NAME_MAX_LEN {
            return Err(ErrorKind::query(format!(
                "invalid attribute name length: {}",
                name.len()
            )));
        }
        if *name == COORDS {
            out.push(AttrSel {
                name: COORDS.to_string(),
                datatype: schema.coord_type(),
                val_num: schema.dim_num() as u32,
                var: false,
                is_coords: true,
                cell_size: schema.coords_size() as u64,
                stream: schema.coords_stream().unwrap_or(usize::MAX),
                var_stream: usize::MAX,
            });
            continue;
        }
        // Reserved names resolve only where they genuinely exist as schema
        // attributes (the key-value facade's stores).
        let attr = schema.attribute(name).ok_or_else(|| {
            if constants::reserved_name(name) {
                ErrorKind::query(format!("attribute '{}' is reserved", name))
            } else {
                ErrorKind::query(format!("no attribute named '{}'", name))
            }
        })?;
        let (stream, var_stream) = schema.attr_streams(name).unwrap();
        out.push(AttrSel {
            name: attr.name().to_string(),
            datatype: attr.datatype(),
            val_num: attr.val_num(),
            var: attr.var_size(),
            is_coords: false,
            cell_size: attr.cell_size().unwrap_or(0),
            stream,
            var_stream: var_stream.unwrap_or(usize::MAX),
        });
    }
    check_duplicates(names)?;
    Ok(out)
}

/// Resolves a write attribute list: every schema attribute in schema order,
/// with `__coords` appended for sparse arrays.
pub(crate) fn resolve_write_attrs(schema: &ArraySchema, names: &[&str]) -> Result<Vec<AttrSel>> {
    let mut expected: Vec<&str> = schema.attributes().iter().map(|a| a.name()).collect();
    if !schema.dense() {
        expected.push(COORDS);
    }
    if names != expected.as_slice() {
        return Err(ErrorKind::query(format!(
            "write queries must list every attribute in schema order{}; expected {:?}",
            if schema.dense() {
                ""
            } else {
                " with __coords last"
            },
            expected
        )));
    }
    resolve_read_attrs(schema, names)
}

fn check_duplicates(names: &[&str]) -> Result<()> {
    let mut sorted: Vec<&str> = names.to_vec();
    sorted.sort_unstable();
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(ErrorKind::query("duplicate attribute in selection"));
    }
    Ok(())
}

/// Validates that the buffer list matches the attribute selection shape.
pub(crate) fn check_read_buffers(attrs: &[AttrSel], buffers: &[ReadBuffer<'_>]) -> Result<()> {
    if buffers.len() != attrs.len() {
        if attrs.last().map(|a| a.is_coords) == Some(true) && buffers.len() + 1 == attrs.len() {
            return Err(ErrorKind::query(
                "__coords was selected but no coordinates buffer was provided",
            ));
        }
        return Err(ErrorKind::query(format!(
            "{} buffers provided for {} selected attributes",
            buffers.len(),
            attrs.len()
        )));
    }
    for (attr, buffer) in attrs.iter().zip(buffers) {
        if attr.var && buffer.offsets.is_none() {
            return Err(ErrorKind::query(format!(
                "variable-size attribute '{}' needs an offsets buffer",
                attr.name
            )));
        }
        if !attr.var && buffer.offsets.is_some() {
            return Err(ErrorKind::query(format!(
                "fixed-size attribute '{}' takes no offsets buffer",
                attr.name
            )));
        }
    }
    Ok(())
}

/// Validates a write buffer list and returns the cell count it carries.
pub(crate) fn check_write_buffers(
    attrs: &[AttrSel],
    buffers: &[WriteBuffer<'_>],
) -> Result<u64> {
    if buffers.len() != attrs.len() {
        return Err(ErrorKind::query(format!(
            "{} buffers provided for {} attributes",
            buffers.len(),
            attrs.len()
        )));
    }
    let mut cells: Option<u64> = None;
    for (attr, buffer) in attrs.iter().zip(buffers) {
        let n = if attr.var {
            let offsets = buffer.offsets.ok_or_else(|| {
                ErrorKind::query(format!(
                    "variable-size attribute '{}' needs an offsets buffer",
                    attr.name
                ))
            })?;
            if offsets.len() % 8 != 0 {
                return Err(ErrorKind::query(format!(
                    "offsets buffer of '{}' is not a whole number of u64 entries",
                    attr.name
                )));
            }
            (offsets.len() / 8) as u64
        } else {
            if buffer.offsets.is_some() {
                return Err(ErrorKind::query(format!(
                    "fixed-size attribute '{}' takes no offsets buffer",
                    attr.name
                )));
            }
            if buffer.data.len() as u64 % attr.cell_size != 0 {
                return Err(ErrorKind::query(format!(
                    "buffer of '{}' is not a whole number of cells",
                    attr.name
                )));
            }
            buffer.data.len() as u64 / attr.cell_size
        };
        match cells {
            None => cells = Some(n),
            Some(prev) if prev != n => {
                return Err(ErrorKind::query(format!(
                    "attribute '{}' carries {} cells, previous attributes carry {}",
                    attr.name, n, prev
                )))
            }
            _ => {}
        }
    }
    Ok(cells.unwrap_or(0))
}

/// Extracts the byte range of variable-size cell `i` from a write buffer.
pub(crate) fn var_cell_bytes<'b>(
    buffer: &WriteBuffer<'b>,
    i: u64,
    cells: u64,
) -> Result<&'b [u8]> {
    let offsets = buffer.offsets.unwrap();
    let at = |j: u64| -> u64 {
        u64::from_le_bytes(
            offsets[j as usize * 8..(j as usize + 1) * 8]
                .try_into()
                .unwrap(),
        )
    };
    let start = at(i);
    let end = if i + 1 < cells {
        at(i + 1)
    } else {
        buffer.data.len() as u64
    };
    if start > end || end > buffer.data.len() as u64 {
        return Err(ErrorKind::query(format!(
            "offsets buffer is not monotonic at cell {}",
            i
        )));
    }
    Ok(&buffer.data[start as usize..end as usize])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Dimension};
    use crate::types::{ArrayType, Layout};

    fn schema() -> ArraySchema {
        ArraySchema::new(
            ArrayType::Sparse,
            Datatype::Uint64,
            vec![Dimension::new("d", [0u64, 9], None)],
            vec![
                Attribute::new("a1", Datatype::Int32),
                Attribute::new("a2", Datatype::Char).var(),
            ],
            Layout::RowMajor,
            Layout::RowMajor,
            4,
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_read_attrs() {
        let schema = schema();
        let sels = resolve_read_attrs(&schema, &["a1", "__coords"]).unwrap();
        assert_eq!(sels.len(), 2);
        assert!(!sels[0].var && !sels[0].is_coords);
        assert!(sels[1].is_coords);
        assert_eq!(sels[1].cell_size, 8);

        assert!(resolve_read_attrs(&schema, &["missing"]).is_err());
        assert!(resolve_read_attrs(&schema, &["a1", "a1"]).is_err());
        assert!(resolve_read_attrs(&schema, &["__key"]).is_err());
    }

    #[test]
    fn test_resolve_write_attrs_requires_schema_order() {
        let schema = schema();
        assert!(resolve_write_attrs(&schema, &["a1", "a2", "__coords"]).is_ok());
        assert!(resolve_write_attrs(&schema, &["a2", "a1", "__coords"]).is_err());
        assert!(resolve_write_attrs(&schema, &["a1", "a2"]).is_err());
    }

    #[test]
    fn test_check_write_buffers_counts_cells() {
        let schema = schema();
        let attrs = resolve_write_attrs(&schema, &["a1", "a2", "__coords"]).unwrap();
        let a1: Vec<u8> = (0..3i32).flat_map(|v| v.to_le_bytes()).collect();
        let offs: Vec<u8> = [0u64, 1, 3].iter().flat_map(|v| v.to_le_bytes()).collect();
        let vals = b"abbccc".to_vec();
        let coords = crate::types::coords_to_bytes(&[1u64, 2, 3]);
        let buffers = [
            WriteBuffer::fixed(&a1),
            WriteBuffer::var(&offs, &vals),
            WriteBuffer::fixed(&coords),
        ];
        assert_eq!(check_write_buffers(&attrs, &buffers).unwrap(), 3);

        let bytes = var_cell_bytes(&buffers[1], 1, 3).unwrap();
        assert_eq!(bytes, b"bb");
        let bytes = var_cell_bytes(&buffers[1], 2, 3).unwrap();
        assert_eq!(bytes, b"ccc");
    }
}
