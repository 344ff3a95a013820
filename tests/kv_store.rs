//! # Key-Value Store Tests
//!
//! A bulk put of typed keys followed by point gets returns the stored
//! values across key types (INT32, FLOAT32, FLOAT64-pair and CHAR-string
//! keys); absent keys read as zero cells; the reserved key-preserving
//! attributes are readable back.

use cellstore::config::Config;
use cellstore::kv::{kv_create, kv_get, kv_put, Keys};
use cellstore::types::{Datatype, Layout};
use cellstore::vfs::Uri;
use cellstore::{Attribute, QueryStatus, ReadBuffer, ReadQuery, StorageManager, WriteBuffer};

fn f64_pair(a: f64, b: f64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&a.to_le_bytes());
    out.extend_from_slice(&b.to_le_bytes());
    out
}

fn populated_store(sm: &StorageManager) -> Uri {
    let uri = Uri::new("mem://kv/store");
    kv_create(sm, &uri, vec![Attribute::new("a1", Datatype::Int32)]).unwrap();

    let mut keys = Keys::new();
    keys.add_key(&100i32.to_le_bytes(), Datatype::Int32).unwrap();
    keys.add_key(&200.0f32.to_le_bytes(), Datatype::Float32).unwrap();
    keys.add_key(&f64_pair(300.0, 300.1), Datatype::Float64).unwrap();
    keys.add_key(b"key_4", Datatype::Char).unwrap();

    let a1: Vec<u8> = (0..4i32).flat_map(|v| v.to_le_bytes()).collect();
    kv_put(sm, &uri, &keys, &["a1"], &[WriteBuffer::fixed(&a1)]).unwrap();
    uri
}

fn get_a1(sm: &StorageManager, uri: &Uri, key: &[u8], key_type: Datatype) -> Option<i32> {
    let mut data = [0u8; 16];
    let mut buffers = [ReadBuffer::fixed(&mut data)];
    let status = kv_get(sm, uri, key, key_type, &["a1"], &mut buffers).unwrap();
    assert_eq!(status, QueryStatus::Completed);
    match buffers[0].data_used {
        0 => None,
        4 => Some(i32::from_le_bytes(buffers[0].data[..4].try_into().unwrap())),
        n => panic!("point get produced {} bytes", n),
    }
}

#[test]
fn point_get_of_a_float64_pair_key() {
    let sm = StorageManager::new(Config::default());
    let uri = populated_store(&sm);
    assert_eq!(
        get_a1(&sm, &uri, &f64_pair(300.0, 300.1), Datatype::Float64),
        Some(2)
    );
}

#[test]
fn bulk_put_then_get_roundtrips_every_key() {
    let sm = StorageManager::new(Config::default());
    let uri = populated_store(&sm);

    assert_eq!(get_a1(&sm, &uri, &100i32.to_le_bytes(), Datatype::Int32), Some(0));
    assert_eq!(
        get_a1(&sm, &uri, &200.0f32.to_le_bytes(), Datatype::Float32),
        Some(1)
    );
    assert_eq!(
        get_a1(&sm, &uri, &f64_pair(300.0, 300.1), Datatype::Float64),
        Some(2)
    );
    assert_eq!(get_a1(&sm, &uri, b"key_4", Datatype::Char), Some(3));
}

#[test]
fn absent_keys_and_type_mismatches_read_nothing() {
    let sm = StorageManager::new(Config::default());
    let uri = populated_store(&sm);

    assert_eq!(get_a1(&sm, &uri, b"missing", Datatype::Char), None);
    // The digest covers the type tag: the same bytes under another type
    // are a different key.
    assert_eq!(get_a1(&sm, &uri, &100i32.to_le_bytes(), Datatype::Uint32), None);
}

#[test]
fn stored_keys_are_reconstructible() {
    let sm = StorageManager::new(Config::default());
    let uri = populated_store(&sm);

    // The reserved attributes persist the raw keys; a full scan returns
    // them alongside the values.
    let mut key_offsets = [0u8; 64];
    let mut key_bytes = [0u8; 256];
    let mut key_types = [0u8; 16];
    let mut buffers = [
        ReadBuffer::var(&mut key_offsets, &mut key_bytes),
        ReadBuffer::fixed(&mut key_types),
    ];
    let mut read = ReadQuery::new(
        &sm,
        &uri,
        None,
        &["__key", "__key_type"],
        Layout::GlobalOrder,
    )
    .unwrap();
    assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Completed);

    assert_eq!(buffers[0].offsets_used, 4 * 8);
    assert_eq!(buffers[1].data_used, 4);
    let stored_types: Vec<u8> = buffers[1].data[..4].to_vec();
    assert!(stored_types.contains(&(Datatype::Char as u8)));
    assert!(stored_types.contains(&(Datatype::Float64 as u8)));

    let total_key_bytes: usize = buffers[0].data_used;
    assert_eq!(total_key_bytes, 4 + 4 + 16 + 5);
}

#[test]
fn put_validates_store_and_attribute_list() {
    let sm = StorageManager::new(Config::default());
    let uri = populated_store(&sm);

    let mut keys = Keys::new();
    keys.add_key(b"k", Datatype::Char).unwrap();
    let a1 = 7i32.to_le_bytes();

    // Wrong attribute list.
    assert!(kv_put(&sm, &uri, &keys, &["missing"], &[WriteBuffer::fixed(&a1)]).is_err());

    // Not a key-value store.
    let plain = Uri::new("mem://kv/not_a_store");
    assert!(kv_put(&sm, &plain, &keys, &["a1"], &[WriteBuffer::fixed(&a1)]).is_err());
}
