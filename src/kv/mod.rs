//! # Key-Value Facade
//!
//! A key-value store is an ordinary sparse 2-D array over a synthetic
//! coordinate space: a typed key is hashed to a 128-bit MD5 digest,
//! interpreted as two little-endian u64 dimensions. A bulk put becomes an
//! unordered write that also persists the raw keys (through the reserved
//! `__key` and `__key_type` attributes), so the store can reconstruct them;
//! a point get derives the degenerate subarray `[d1,d1] x [d2,d2]` and
//! submits a global-order read.
//!
//! The digest input is `type_tag || size (u64 LE) || key bytes`. MD5
//! collisions are considered astronomically unlikely and are not handled:
//! a colliding key silently overwrites. A production-hardened revision
//! would key on a wider hash or verify the stored `__key` on get.

use eyre::{ensure, Result};

use crate::config::constants::{
    CAPACITY, COORDS, KEY_ATTR_NAME, KEY_DIM_1, KEY_DIM_2, KEY_TYPE_ATTR_NAME, KV_FILENAME,
};
use crate::error::ErrorKind;
use crate::query::{QueryStatus, ReadBuffer, ReadQuery, WriteBuffer, WriteQuery};
use crate::schema::{ArraySchema, Attribute, Dimension};
use crate::storage::StorageManager;
use crate::types::{coords_to_bytes, ArrayType, Compressor, Datatype, Layout};
use crate::vfs::{Uri, Vfs};

/// A batch of typed keys as three parallel streams: per-key type tags,
/// per-key offsets, and the concatenated key bytes.
#[derive(Default)]
pub struct Keys {
    types: Vec<u8>,
    offsets: Vec<u8>,
    bytes: Vec<u8>,
    num: u64,
}

impl Keys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one key. `key` holds one or more values of `datatype`
    /// (e.g. a CHAR string or a FLOAT64 pair).
    pub fn add_key(&mut self, key: &[u8], datatype: Datatype) -> Result<()> {
        ensure!(!key.is_empty(), "empty key");
        ensure!(
            key.len() % datatype.size() == 0,
            "key of {} bytes is not a whole number of {:?} values",
            key.len(),
            datatype
        );
        self.offsets
            .extend_from_slice(&(self.bytes.len() as u64).to_le_bytes());
        self.types.push(datatype as u8);
        self.bytes.extend_from_slice(key);
        self.num += 1;
        Ok(())
    }

    pub fn key_num(&self) -> u64 {
        self.num
    }

    fn key_bytes(&self, i: u64) -> &[u8] {
        let at = |j: u64| -> u64 {
            u64::from_le_bytes(
                self.offsets[j as usize * 8..(j as usize + 1) * 8]
                    .try_into()
                    .unwrap(),
            )
        };
        let start = at(i) as usize;
        let end = if i + 1 < self.num {
            at(i + 1) as usize
        } else {
            self.bytes.len()
        };
        &self.bytes[start..end]
    }

    /// The hashed coordinates of every key, interleaved, 16 bytes each.
    pub fn coords(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.num as usize * 16);
        for i in 0..self.num {
            let datatype = Datatype::try_from(self.types[i as usize]).unwrap();
            out.extend_from_slice(&key_digest(self.key_bytes(i), datatype));
        }
        out
    }

    fn offsets_bytes(&self) -> &[u8] {
        &self.offsets
    }

    fn types_bytes(&self) -> &[u8] {
        &self.types
    }

    fn values_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// MD5 digest of `type_tag || size(u64 LE) || bytes`, the 2-D coordinate
/// of a key.
pub(crate) fn key_digest(key: &[u8], datatype: Datatype) -> [u8; 16] {
    let mut input = Vec::with_capacity(9 + key.len());
    input.push(datatype as u8);
    input.extend_from_slice(&(key.len() as u64).to_le_bytes());
    input.extend_from_slice(key);
    md5::compute(&input).0
}

/// Creates a key-value store: the canonical sparse array over the two
/// reserved uint64 key dimensions, the user attributes plus the reserved
/// key-preserving attributes, and the `__kv.tdb` marker.
pub fn kv_create(sm: &StorageManager, uri: &Uri, attrs: Vec<Attribute>) -> Result<()> {
    let mut all_attrs = attrs;
    all_attrs.push(
        Attribute::new(KEY_ATTR_NAME, Datatype::Char)
            .var()
            .with_compressor(Compressor::Zstd, -1),
    );
    all_attrs.push(
        Attribute::new(KEY_TYPE_ATTR_NAME, Datatype::Char)
            .with_compressor(Compressor::Zstd, -1),
    );
    let schema = ArraySchema::new_reserved(
        ArrayType::Sparse,
        Datatype::Uint64,
        vec![
            Dimension::new(KEY_DIM_1, [0u64, u64::MAX], None),
            Dimension::new(KEY_DIM_2, [0u64, u64::MAX], None),
        ],
        all_attrs,
        Layout::RowMajor,
        Layout::RowMajor,
        CAPACITY,
    )?;
    sm.array_create(uri, &schema)?;
    sm.vfs().create_file(&uri.join(KV_FILENAME))?;
    Ok(())
}

/// Bulk put: one write buffer per user attribute, in store order, one cell
/// per key. Produces a single fragment.
pub fn kv_put(
    sm: &StorageManager,
    uri: &Uri,
    keys: &Keys,
    attr_names: &[&str],
    buffers: &[WriteBuffer<'_>],
) -> Result<()> {
    if !sm.is_kv(uri)? {
        return Err(ErrorKind::kv(format!("'{}' is not a key-value store", uri)));
    }
    if keys.key_num() == 0 {
        return Ok(());
    }
    let schema = sm.array_schema(uri)?;
    let user_attrs = kv_user_attrs(&schema);
    if attr_names != user_attrs.as_slice() {
        return Err(ErrorKind::kv(format!(
            "puts must list every store attribute in order; expected {:?}",
            user_attrs
        )));
    }
    if buffers.len() != attr_names.len() {
        return Err(ErrorKind::kv(format!(
            "{} buffers provided for {} attributes",
            buffers.len(),
            attr_names.len()
        )));
    }

    // Full write attribute list: user attributes, then the reserved
    // key-preserving attributes, then the hashed coordinates.
    let mut names: Vec<&str> = attr_names.to_vec();
    names.push(KEY_ATTR_NAME);
    names.push(KEY_TYPE_ATTR_NAME);
    names.push(COORDS);

    let coords = keys.coords();
    let mut all_buffers: Vec<WriteBuffer<'_>> = Vec::with_capacity(names.len());
    for buffer in buffers {
        all_buffers.push(WriteBuffer {
            data: buffer.data,
            offsets: buffer.offsets,
        });
    }
    all_buffers.push(WriteBuffer::var(
        keys.offsets_bytes(),
        keys.values_bytes(),
    ));
    all_buffers.push(WriteBuffer::fixed(keys.types_bytes()));
    all_buffers.push(WriteBuffer::fixed(&coords));

    let mut query = WriteQuery::new(sm, uri, None, &names, Layout::Unordered)?;
    query.submit(&all_buffers)?;
    query.finalize()
}

/// Point get: reads the cell of one key into the caller's buffers.
/// `Completed` with zero used bytes means the key is absent.
pub fn kv_get(
    sm: &StorageManager,
    uri: &Uri,
    key: &[u8],
    key_type: Datatype,
    attr_names: &[&str],
    buffers: &mut [ReadBuffer<'_>],
) -> Result<QueryStatus> {
    if !sm.is_kv(uri)? {
        return Err(ErrorKind::kv(format!("'{}' is not a key-value store", uri)));
    }
    let digest = key_digest(key, key_type);
    let d1 = u64::from_le_bytes(digest[..8].try_into().unwrap());
    let d2 = u64::from_le_bytes(digest[8..].try_into().unwrap());
    let subarray = coords_to_bytes(&[d1, d1, d2, d2]);

    let mut query = ReadQuery::new(sm, uri, Some(&subarray), attr_names, Layout::GlobalOrder)?;
    query.submit(buffers)
}

/// The user-visible attributes of a store, in schema order.
pub fn kv_user_attrs(schema: &ArraySchema) -> Vec<&str> {
    schema
        .attributes()
        .iter()
        .map(|a| a.name())
        .filter(|n| *n != KEY_ATTR_NAME && *n != KEY_TYPE_ATTR_NAME)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_digest_is_stable_and_type_sensitive() {
        let a = key_digest(&100i32.to_le_bytes(), Datatype::Int32);
        let b = key_digest(&100i32.to_le_bytes(), Datatype::Int32);
        assert_eq!(a, b);
        let c = key_digest(&100u32.to_le_bytes(), Datatype::Uint32);
        assert_ne!(a, c);
    }

    #[test]
    fn test_keys_streams() {
        let mut keys = Keys::new();
        keys.add_key(b"key_1", Datatype::Char).unwrap();
        keys.add_key(&42i32.to_le_bytes(), Datatype::Int32).unwrap();
        assert_eq!(keys.key_num(), 2);
        assert_eq!(keys.key_bytes(0), b"key_1");
        assert_eq!(keys.key_bytes(1), &42i32.to_le_bytes());
        assert_eq!(keys.types_bytes(), &[Datatype::Char as u8, Datatype::Int32 as u8]);
        assert_eq!(keys.coords().len(), 32);

        assert!(keys.add_key(&[1, 2, 3], Datatype::Int32).is_err());
    }
}
