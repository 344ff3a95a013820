//! # Sparse Query Tests
//!
//! End-to-end coverage of the sparse read/write paths:
//! 1. A global-order write followed by a full-domain read returns the
//!    identical cell sequence across fixed, variable-size and multi-value
//!    attributes.
//! 2. Unordered writes overwriting a coordinate resolve to the latest
//!    submission, both within one fragment and across fragments.
//! 3. A read with undersized buffers completes over several submissions,
//!    and the concatenated result is byte-identical to a single large read.

use cellstore::config::Config;
use cellstore::types::{coords_to_bytes, ArrayType, Datatype, Layout};
use cellstore::vfs::Uri;
use cellstore::{
    ArraySchema, Attribute, Dimension, QueryStatus, ReadBuffer, ReadQuery, StorageManager,
    WriteBuffer, WriteQuery,
};

/// The 2-D quickstart schema: uint64 domain [1,4]^2, 2x2 space tiles,
/// capacity 2, row-major orders.
fn quickstart_schema() -> ArraySchema {
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

/// The eight quickstart cells in global order.
fn quickstart_coords() -> Vec<u8> {
    coords_to_bytes(&[1u64, 1, 1, 2, 1, 4, 2, 3, 3, 1, 4, 2, 3, 3, 3, 4])
}

fn quickstart_a1() -> Vec<u8> {
    (0..8i32).flat_map(|v| v.to_le_bytes()).collect()
}

fn quickstart_a2() -> (Vec<u8>, Vec<u8>) {
    let offsets: Vec<u8> = [0u64, 1, 3, 6, 10, 11, 13, 16]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    (offsets, b"abbcccddddeffggghhhh".to_vec())
}

fn quickstart_a3() -> Vec<u8> {
    (0..8).flat_map(|i| {
        let lo = (i as f32) + 0.1;
        let hi = (i as f32) + 0.2;
        [lo.to_le_bytes(), hi.to_le_bytes()].concat()
    })
    .collect()
}

fn write_quickstart(sm: &StorageManager, uri: &Uri) {
    let a1 = quickstart_a1();
    let (a2_offsets, a2_values) = quickstart_a2();
    let a3 = quickstart_a3();
    let coords = quickstart_coords();

    let mut write = WriteQuery::new(
        sm,
        uri,
        None,
        &["a1", "a2", "a3", "__coords"],
        Layout::GlobalOrder,
    )
    .unwrap();
    let status = write
        .submit(&[
            WriteBuffer::fixed(&a1),
            WriteBuffer::var(&a2_offsets, &a2_values),
            WriteBuffer::fixed(&a3),
            WriteBuffer::fixed(&coords),
        ])
        .unwrap();
    assert_eq!(status, QueryStatus::Completed);
    write.finalize().unwrap();
}

mod global_write_then_full_read {
    use super::*;

    #[test]
    fn full_read_returns_the_written_sequence() {
        let sm = StorageManager::new(Config::default());
        let uri = Uri::new("mem://arrays/quickstart");
        sm.array_create(&uri, &quickstart_schema()).unwrap();
        write_quickstart(&sm, &uri);

        let mut a1 = [0u8; 64];
        let mut a2_offsets = [0u8; 128];
        let mut a2_values = [0u8; 64];
        let mut a3 = [0u8; 128];
        let mut coords = [0u8; 256];
        let mut buffers = [
            ReadBuffer::fixed(&mut a1),
            ReadBuffer::var(&mut a2_offsets, &mut a2_values),
            ReadBuffer::fixed(&mut a3),
            ReadBuffer::fixed(&mut coords),
        ];

        let mut read = ReadQuery::new(
            &sm,
            &uri,
            None,
            &["a1", "a2", "a3", "__coords"],
            Layout::GlobalOrder,
        )
        .unwrap();
        assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Completed);

        assert_eq!(buffers[0].data_used, 32);
        assert_eq!(&buffers[0].data[..32], quickstart_a1().as_slice());

        let (expected_offsets, expected_values) = quickstart_a2();
        assert_eq!(buffers[1].offsets_used, 64);
        assert_eq!(buffers[1].data_used, 20);
        assert_eq!(&buffers[1].offsets.as_deref().unwrap()[..64], expected_offsets.as_slice());
        assert_eq!(&buffers[1].data[..20], expected_values.as_slice());

        assert_eq!(buffers[2].data_used, 64);
        assert_eq!(&buffers[2].data[..64], quickstart_a3().as_slice());

        assert_eq!(buffers[3].data_used, 128);
        assert_eq!(&buffers[3].data[..128], quickstart_coords().as_slice());
    }

    #[test]
    fn read_of_an_empty_array_produces_nothing() {
        let sm = StorageManager::new(Config::default());
        let uri = Uri::new("mem://arrays/empty");
        sm.array_create(&uri, &quickstart_schema()).unwrap();

        let mut a1 = [0u8; 64];
        let mut buffers = [ReadBuffer::fixed(&mut a1)];
        let mut read = ReadQuery::new(&sm, &uri, None, &["a1"], Layout::GlobalOrder).unwrap();
        assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Completed);
        assert_eq!(buffers[0].data_used, 0);
    }

    #[test]
    fn out_of_domain_subarray_is_rejected_at_init() {
        let sm = StorageManager::new(Config::default());
        let uri = Uri::new("mem://arrays/oob");
        sm.array_create(&uri, &quickstart_schema()).unwrap();

        let subarray = coords_to_bytes(&[1u64, 9, 1, 4]);
        assert!(ReadQuery::new(&sm, &uri, Some(&subarray), &["a1"], Layout::GlobalOrder).is_err());
    }
}

mod unordered_overwrites {
    use super::*;

    fn single_attr_schema() -> ArraySchema {
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

    fn read_cell(sm: &StorageManager, uri: &Uri, coords: [u64; 2]) -> Option<i32> {
        let subarray = coords_to_bytes(&[coords[0], coords[0], coords[1], coords[1]]);
        let mut a1 = [0u8; 16];
        let mut buffers = [ReadBuffer::fixed(&mut a1)];
        let mut read =
            ReadQuery::new(sm, uri, Some(&subarray), &["a1"], Layout::GlobalOrder).unwrap();
        assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Completed);
        match buffers[0].data_used {
            0 => None,
            4 => Some(i32::from_le_bytes(buffers[0].data[..4].try_into().unwrap())),
            n => panic!("point read produced {} bytes", n),
        }
    }

    #[test]
    fn later_batch_wins_within_one_query() {
        let sm = StorageManager::new(Config::default());
        let uri = Uri::new("mem://arrays/unordered_one_query");
        sm.array_create(&uri, &single_attr_schema()).unwrap();

        let mut write =
            WriteQuery::new(&sm, &uri, None, &["a1", "__coords"], Layout::Unordered).unwrap();
        let batch1_values: Vec<u8> = [5i32, 1].iter().flat_map(|v| v.to_le_bytes()).collect();
        let batch1_coords = coords_to_bytes(&[3u64, 3, 1, 1]);
        write
            .submit(&[
                WriteBuffer::fixed(&batch1_values),
                WriteBuffer::fixed(&batch1_coords),
            ])
            .unwrap();
        let batch2_values = 99i32.to_le_bytes();
        let batch2_coords = coords_to_bytes(&[3u64, 3]);
        write
            .submit(&[
                WriteBuffer::fixed(&batch2_values),
                WriteBuffer::fixed(&batch2_coords),
            ])
            .unwrap();
        write.finalize().unwrap();

        assert_eq!(read_cell(&sm, &uri, [3, 3]), Some(99));
        assert_eq!(read_cell(&sm, &uri, [1, 1]), Some(1));
        assert_eq!(read_cell(&sm, &uri, [2, 2]), None);
    }

    #[test]
    fn later_fragment_wins_across_queries() {
        let sm = StorageManager::new(Config::default());
        let uri = Uri::new("mem://arrays/unordered_two_queries");
        sm.array_create(&uri, &single_attr_schema()).unwrap();

        for value in [5i32, 99] {
            let mut write =
                WriteQuery::new(&sm, &uri, None, &["a1", "__coords"], Layout::Unordered)
                    .unwrap();
            let values = value.to_le_bytes();
            let coords = coords_to_bytes(&[3u64, 3]);
            write
                .submit(&[WriteBuffer::fixed(&values), WriteBuffer::fixed(&coords)])
                .unwrap();
            write.finalize().unwrap();
        }

        let schema = sm.array_schema(&uri).unwrap();
        assert_eq!(sm.fragments(&uri, &schema).unwrap().len(), 2);
        assert_eq!(read_cell(&sm, &uri, [3, 3]), Some(99));
    }

    #[test]
    fn latest_of_overlapping_writes_wins_everywhere() {
        let sm = StorageManager::new(Config::default());
        let uri = Uri::new("mem://arrays/overlap");
        sm.array_create(&uri, &single_attr_schema()).unwrap();

        let batches: [&[(u64, u64, i32)]; 2] = [
            &[(1, 1, 1), (2, 2, 2), (3, 3, 3)],
            &[(2, 2, 20), (4, 4, 40)],
        ];
        for batch in batches {
            let mut write =
                WriteQuery::new(&sm, &uri, None, &["a1", "__coords"], Layout::Unordered)
                    .unwrap();
            let values: Vec<u8> = batch.iter().flat_map(|(_, _, v)| v.to_le_bytes()).collect();
            let coords: Vec<u8> = batch
                .iter()
                .flat_map(|(r, c, _)| coords_to_bytes(&[*r, *c]))
                .collect();
            write
                .submit(&[WriteBuffer::fixed(&values), WriteBuffer::fixed(&coords)])
                .unwrap();
            write.finalize().unwrap();
        }

        let mut a1 = [0u8; 64];
        let mut coords = [0u8; 128];
        let mut buffers = [ReadBuffer::fixed(&mut a1), ReadBuffer::fixed(&mut coords)];
        let mut read =
            ReadQuery::new(&sm, &uri, None, &["a1", "__coords"], Layout::GlobalOrder).unwrap();
        assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Completed);

        assert_eq!(buffers[0].data_used, 16);
        let values: Vec<i32> = buffers[0].data[..16]
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![1, 20, 3, 40]);
        assert_eq!(
            &buffers[1].data[..64],
            coords_to_bytes(&[1u64, 1, 2, 2, 3, 3, 4, 4]).as_slice()
        );
    }
}

mod overflow_resumption {
    use super::*;

    #[test]
    fn twelve_byte_buffer_completes_in_three_submissions() {
        let sm = StorageManager::new(Config::default());
        let uri = Uri::new("mem://arrays/overflow");
        sm.array_create(&uri, &quickstart_schema()).unwrap();
        write_quickstart(&sm, &uri);

        let mut read = ReadQuery::new(&sm, &uri, None, &["a1"], Layout::GlobalOrder).unwrap();
        let mut collected: Vec<u8> = Vec::new();

        let first: Vec<u8> = [0i32, 1, 2].iter().flat_map(|v| v.to_le_bytes()).collect();
        let second: Vec<u8> = [3i32, 4, 5].iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut a1 = [0u8; 12];
        let mut buffers = [ReadBuffer::fixed(&mut a1)];
        assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Overflowed);
        assert_eq!(buffers[0].data_used, 12);
        assert_eq!(&buffers[0].data[..12], first.as_slice());
        collected.extend_from_slice(&buffers[0].data[..buffers[0].data_used]);

        assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Overflowed);
        assert_eq!(buffers[0].data_used, 12);
        assert_eq!(&buffers[0].data[..12], second.as_slice());
        collected.extend_from_slice(&buffers[0].data[..buffers[0].data_used]);

        assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Completed);
        assert_eq!(buffers[0].data_used, 8);
        collected.extend_from_slice(&buffers[0].data[..buffers[0].data_used]);

        // Concatenation is byte-identical to a one-shot read.
        assert_eq!(collected, quickstart_a1());

        // A further submit stays complete and produces nothing.
        assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Completed);
        assert_eq!(buffers[0].data_used, 0);
    }

    #[test]
    fn overflow_resumes_variable_size_attributes() {
        let sm = StorageManager::new(Config::default());
        let uri = Uri::new("mem://arrays/overflow_var");
        sm.array_create(&uri, &quickstart_schema()).unwrap();
        write_quickstart(&sm, &uri);

        let mut read = ReadQuery::new(&sm, &uri, None, &["a2"], Layout::GlobalOrder).unwrap();
        let mut values_concat: Vec<u8> = Vec::new();
        let mut offsets = [0u8; 24];
        let mut values = [0u8; 8];
        let mut buffers = [ReadBuffer::var(&mut offsets, &mut values)];

        let mut rounds = 0;
        loop {
            let status = read.submit(&mut buffers).unwrap();
            values_concat.extend_from_slice(&buffers[0].data[..buffers[0].data_used]);
            rounds += 1;
            assert!(rounds < 16, "read did not converge");
            if status == QueryStatus::Completed {
                break;
            }
            assert_eq!(status, QueryStatus::Overflowed);
            assert!(buffers[0].data_used > 0 || buffers[0].offsets_used > 0);
        }
        assert_eq!(values_concat, quickstart_a2().1);
    }
}
