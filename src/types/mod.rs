//! # Core Type System
//!
//! The canonical scalar [`Datatype`] enum used across schemas, tiles and
//! queries, plus the cell/tile [`Layout`] orders, the dense/sparse
//! [`ArrayType`] flag and the [`Compressor`] selection.
//!
//! ## Design Principles
//!
//! 1. **Single source of truth**: one `Datatype` enum used everywhere
//! 2. **Storage-efficient**: `#[repr(u8)]` single-byte discriminants that are
//!    stable on disk
//! 3. **Byte-oriented engine**: cell payloads travel as little-endian byte
//!    slices; the type tag is consulted only at the edges (schema
//!    validation, coordinate comparison, sentinel synthesis)
//!
//! ## Empty Sentinels
//!
//! Dense reads materialize cells no fragment has written. Each scalar type
//! has a dedicated "empty" value equal to the type's maximum; clients must
//! not write that value as a meaningful datum.

use eyre::bail;

/// Canonical scalar type for attributes and coordinates.
///
/// Uses `#[repr(u8)]` so the discriminant is stable in serialized schemas
/// and fragment footers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    Char = 0,
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Int64 = 7,
    Uint64 = 8,
    Float32 = 9,
    Float64 = 10,
}

impl Datatype {
    /// Returns the byte size of one value of this type.
    pub fn size(&self) -> usize {
        match self {
            Datatype::Char | Datatype::Int8 | Datatype::Uint8 => 1,
            Datatype::Int16 | Datatype::Uint16 => 2,
            Datatype::Int32 | Datatype::Uint32 | Datatype::Float32 => 4,
            Datatype::Int64 | Datatype::Uint64 | Datatype::Float64 => 8,
        }
    }

    /// Returns true for the integer types (including CHAR).
    pub fn is_integer(&self) -> bool {
        !self.is_real()
    }

    /// Returns true for FLOAT32/FLOAT64.
    pub fn is_real(&self) -> bool {
        matches!(self, Datatype::Float32 | Datatype::Float64)
    }

    /// Appends the little-endian bytes of this type's empty sentinel
    /// (the type maximum) to `out`.
    pub fn append_empty(&self, out: &mut Vec<u8>) {
        match self {
            Datatype::Char => out.extend_from_slice(&i8::MAX.to_le_bytes()),
            Datatype::Int8 => out.extend_from_slice(&i8::MAX.to_le_bytes()),
            Datatype::Uint8 => out.extend_from_slice(&u8::MAX.to_le_bytes()),
            Datatype::Int16 => out.extend_from_slice(&i16::MAX.to_le_bytes()),
            Datatype::Uint16 => out.extend_from_slice(&u16::MAX.to_le_bytes()),
            Datatype::Int32 => out.extend_from_slice(&i32::MAX.to_le_bytes()),
            Datatype::Uint32 => out.extend_from_slice(&u32::MAX.to_le_bytes()),
            Datatype::Int64 => out.extend_from_slice(&i64::MAX.to_le_bytes()),
            Datatype::Uint64 => out.extend_from_slice(&u64::MAX.to_le_bytes()),
            Datatype::Float32 => out.extend_from_slice(&f32::MAX.to_le_bytes()),
            Datatype::Float64 => out.extend_from_slice(&f64::MAX.to_le_bytes()),
        }
    }
}

impl TryFrom<u8> for Datatype {
    type Error = eyre::Report;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Datatype::Char),
            1 => Ok(Datatype::Int8),
            2 => Ok(Datatype::Uint8),
            3 => Ok(Datatype::Int16),
            4 => Ok(Datatype::Uint16),
            5 => Ok(Datatype::Int32),
            6 => Ok(Datatype::Uint32),
            7 => Ok(Datatype::Int64),
            8 => Ok(Datatype::Uint64),
            9 => Ok(Datatype::Float32),
            10 => Ok(Datatype::Float64),
            _ => bail!("invalid Datatype discriminant: {}", value),
        }
    }
}

/// Cell and tile orderings.
///
/// `RowMajor` means the last dimension varies fastest; `ColMajor` means the
/// first dimension varies fastest. `GlobalOrder` is the storage order
/// induced by the schema's tile order and cell order; `Unordered` is valid
/// only for writes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    RowMajor = 0,
    ColMajor = 1,
    GlobalOrder = 2,
    Unordered = 3,
}

impl TryFrom<u8> for Layout {
    type Error = eyre::Report;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Layout::RowMajor),
            1 => Ok(Layout::ColMajor),
            2 => Ok(Layout::GlobalOrder),
            3 => Ok(Layout::Unordered),
            _ => bail!("invalid Layout discriminant: {}", value),
        }
    }
}

/// Dense or sparse array mode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayType {
    Dense = 0,
    Sparse = 1,
}

impl TryFrom<u8> for ArrayType {
    type Error = eyre::Report;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ArrayType::Dense),
            1 => Ok(ArrayType::Sparse),
            _ => bail!("invalid ArrayType discriminant: {}", value),
        }
    }
}

/// Per-attribute codec selection. Concrete implementations live in
/// [`crate::codec`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compressor {
    NoCompression = 0,
    Zstd = 1,
    Lz4 = 2,
    Rle = 3,
    DoubleDelta = 4,
}

impl TryFrom<u8> for Compressor {
    type Error = eyre::Report;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Compressor::NoCompression),
            1 => Ok(Compressor::Zstd),
            2 => Ok(Compressor::Lz4),
            3 => Ok(Compressor::Rle),
            4 => Ok(Compressor::DoubleDelta),
            _ => bail!("invalid Compressor discriminant: {}", value),
        }
    }
}

mod private {
    pub trait Sealed {}
}

/// Scalar types usable as array coordinates.
///
/// Bridges typed client values (domains, subarrays, coordinates in tests
/// and the KV facade) to the byte-oriented engine core.
pub trait CoordValue: Copy + private::Sealed {
    const DATATYPE: Datatype;

    /// Appends the little-endian bytes of `self` to `out`.
    fn append_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_coord_value {
    ($($ty:ty => $dt:expr),* $(,)?) => {
        $(
            impl private::Sealed for $ty {}
            impl CoordValue for $ty {
                const DATATYPE: Datatype = $dt;

                fn append_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_coord_value! {
    i8 => Datatype::Int8,
    u8 => Datatype::Uint8,
    i16 => Datatype::Int16,
    u16 => Datatype::Uint16,
    i32 => Datatype::Int32,
    u32 => Datatype::Uint32,
    i64 => Datatype::Int64,
    u64 => Datatype::Uint64,
    f32 => Datatype::Float32,
    f64 => Datatype::Float64,
}

/// Flattens a typed slice into the engine's little-endian byte layout.
/// Convenient for building subarrays and coordinate buffers.
pub fn coords_to_bytes<T: CoordValue>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::DATATYPE.size());
    for v in values {
        v.append_le(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_sizes() {
        assert_eq!(Datatype::Char.size(), 1);
        assert_eq!(Datatype::Uint16.size(), 2);
        assert_eq!(Datatype::Int32.size(), 4);
        assert_eq!(Datatype::Float64.size(), 8);
    }

    #[test]
    fn test_datatype_roundtrip_discriminant() {
        for raw in 0..=10u8 {
            let dt = Datatype::try_from(raw).unwrap();
            assert_eq!(dt as u8, raw);
        }
        assert!(Datatype::try_from(11).is_err());
    }

    #[test]
    fn test_empty_sentinel_is_type_max() {
        let mut out = Vec::new();
        Datatype::Int32.append_empty(&mut out);
        assert_eq!(out, i32::MAX.to_le_bytes());

        out.clear();
        Datatype::Uint64.append_empty(&mut out);
        assert_eq!(out, u64::MAX.to_le_bytes());

        out.clear();
        Datatype::Char.append_empty(&mut out);
        assert_eq!(out, [127]);
    }

    #[test]
    fn test_coords_to_bytes_layout() {
        let bytes = coords_to_bytes(&[1u64, 4u64]);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[8..], &4u64.to_le_bytes());
    }
}
