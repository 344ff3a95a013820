//! # Tile I/O
//!
//! A tile is the unit of storage and compression: up to `capacity` cells of
//! one attribute stream, stored contiguously. On disk a tile is a sequence
//! of chunk records:
//!
//! ```text
//! +------------------+--------------------+-------------------+
//! | original len u32 | compressed len u32 | compressed bytes  |
//! +------------------+--------------------+-------------------+
//! ```
//!
//! With the default chunk size of `i32::MAX` a tile is a single chunk unless
//! it exceeds 2 GiB. The original length per chunk lets decompression size
//! its buffers without trusting the codec output.
//!
//! ## Coordinate Tiles
//!
//! Coordinates arrive interleaved (`x1 y1 x2 y2 …`) but are stored dim-major
//! (`x1 x2 … y1 y2 …`), each dimension its own chunk sub-stream, so that
//! delta-style codecs see homogeneous runs. [`compress_coords`] and
//! [`decompress_coords`] perform the split and the reassembly.

use eyre::{ensure, Result};

use crate::codec::Codec;
use crate::config::constants::TILE_CHUNK_SIZE;
use crate::error::ErrorKind;

const CHUNK_HEADER_SIZE: usize = 8;

/// Compresses one tile's payload into chunk records appended to `out`.
pub fn compress(codec: &dyn Codec, level: i32, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let chunk_size = TILE_CHUNK_SIZE as usize;
    let mut offset = 0;
    loop {
        let end = (offset + chunk_size).min(input.len());
        let chunk = &input[offset..end];
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        let len_pos = out.len();
        out.extend_from_slice(&0u32.to_le_bytes());
        codec.compress(level, chunk, out)?;
        let compressed_len = out.len() - len_pos - 4;
        ensure!(
            compressed_len <= u32::MAX as usize,
            "compressed chunk of {} bytes exceeds the chunk record limit",
            compressed_len
        );
        out[len_pos..len_pos + 4].copy_from_slice(&(compressed_len as u32).to_le_bytes());
        offset = end;
        if offset >= input.len() {
            break;
        }
    }
    Ok(())
}

/// Decompresses a whole tile of `orig_size` bytes from its chunk records.
pub fn decompress(codec: &dyn Codec, input: &[u8], orig_size: u64) -> Result<Vec<u8>> {
    let mut out = vec![0u8; orig_size as usize];
    let consumed = decompress_into(codec, input, &mut out)?;
    ensure!(
        consumed == input.len(),
        "tile has {} trailing bytes after its chunk records",
        input.len() - consumed
    );
    Ok(out)
}

/// Decompresses chunk records from `input` until `out` is full; returns the
/// input bytes consumed. A zero-length tile is stored as a single empty
/// chunk record, so at least one record is always consumed.
fn decompress_into(codec: &dyn Codec, input: &[u8], out: &mut [u8]) -> Result<usize> {
    let mut pos = 0;
    let mut written = 0;
    loop {
        ensure!(
            input.len() >= pos + CHUNK_HEADER_SIZE,
            "truncated tile chunk header at byte {}",
            pos
        );
        let orig_len = u32::from_le_bytes(input[pos..pos + 4].try_into().unwrap()) as usize;
        let comp_len = u32::from_le_bytes(input[pos + 4..pos + 8].try_into().unwrap()) as usize;
        pos += CHUNK_HEADER_SIZE;
        ensure!(
            input.len() >= pos + comp_len,
            "truncated tile chunk body at byte {}",
            pos
        );
        ensure!(
            written + orig_len <= out.len(),
            "tile chunk overflows original size {}",
            out.len()
        );
        let chunk = &input[pos..pos + comp_len];
        let n = codec.decompress(chunk, &mut out[written..written + orig_len])?;
        ensure!(
            n == orig_len,
            "chunk decompressed to {} bytes, recorded {}",
            n,
            orig_len
        );
        pos += comp_len;
        written += orig_len;
        if written >= out.len() {
            break;
        }
    }
    Ok(pos)
}

/// Compresses an interleaved coordinates payload, one chunk sub-stream per
/// dimension.
pub fn compress_coords(
    codec: &dyn Codec,
    level: i32,
    interleaved: &[u8],
    dim_num: usize,
    elem_size: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let split = split_dims(interleaved, dim_num, elem_size)?;
    let dim_bytes = split.len() / dim_num.max(1);
    for d in 0..dim_num {
        compress(codec, level, &split[d * dim_bytes..(d + 1) * dim_bytes], out)?;
    }
    Ok(())
}

/// Decompresses a coordinates tile back to its interleaved layout.
pub fn decompress_coords(
    codec: &dyn Codec,
    input: &[u8],
    dim_num: usize,
    elem_size: usize,
    orig_size: u64,
) -> Result<Vec<u8>> {
    let orig_size = orig_size as usize;
    ensure!(
        dim_num > 0 && orig_size % (dim_num * elem_size) == 0,
        "coordinates tile of {} bytes is not a whole number of {}-dimensional cells",
        orig_size,
        dim_num
    );
    let dim_bytes = orig_size / dim_num;
    let mut split = vec![0u8; orig_size];
    let mut pos = 0;
    for d in 0..dim_num {
        let consumed =
            decompress_into(codec, &input[pos..], &mut split[d * dim_bytes..(d + 1) * dim_bytes])?;
        pos += consumed;
    }
    ensure!(
        pos == input.len(),
        "coordinates tile has {} trailing bytes",
        input.len() - pos
    );
    interleave_dims(&split, dim_num, elem_size)
}

/// Reorders `x1 y1 x2 y2 …` into `x1 x2 … y1 y2 …`.
pub(crate) fn split_dims(interleaved: &[u8], dim_num: usize, elem_size: usize) -> Result<Vec<u8>> {
    let coords_size = dim_num * elem_size;
    if coords_size == 0 || interleaved.len() % coords_size != 0 {
        return Err(ErrorKind::tile(format!(
            "coordinates payload of {} bytes is not a whole number of cells",
            interleaved.len()
        )));
    }
    let cells = interleaved.len() / coords_size;
    let mut out = vec![0u8; interleaved.len()];
    for cell in 0..cells {
        for d in 0..dim_num {
            let src = cell * coords_size + d * elem_size;
            let dst = d * cells * elem_size + cell * elem_size;
            out[dst..dst + elem_size].copy_from_slice(&interleaved[src..src + elem_size]);
        }
    }
    Ok(out)
}

/// Inverse of [`split_dims`].
pub(crate) fn interleave_dims(split: &[u8], dim_num: usize, elem_size: usize) -> Result<Vec<u8>> {
    let coords_size = dim_num * elem_size;
    if coords_size == 0 || split.len() % coords_size != 0 {
        return Err(ErrorKind::tile(format!(
            "split coordinates payload of {} bytes is not a whole number of cells",
            split.len()
        )));
    }
    let cells = split.len() / coords_size;
    let mut out = vec![0u8; split.len()];
    for cell in 0..cells {
        for d in 0..dim_num {
            let src = d * cells * elem_size + cell * elem_size;
            let dst = cell * coords_size + d * elem_size;
            out[dst..dst + elem_size].copy_from_slice(&split[src..src + elem_size]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{for_compressor, NoCompression};
    use crate::types::{Compressor, Datatype};

    #[test]
    fn test_tile_chunk_roundtrip() {
        let codec = for_compressor(Compressor::Zstd, Datatype::Int32);
        let payload: Vec<u8> = (0..1000i32).flat_map(|v| v.to_le_bytes()).collect();
        let mut compressed = Vec::new();
        compress(codec.as_ref(), -1, &payload, &mut compressed).unwrap();
        let restored = decompress(codec.as_ref(), &compressed, payload.len() as u64).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_empty_tile_is_one_empty_chunk() {
        let codec = NoCompression;
        let mut compressed = Vec::new();
        compress(&codec, -1, &[], &mut compressed).unwrap();
        assert_eq!(compressed.len(), CHUNK_HEADER_SIZE);
        let restored = decompress(&codec, &compressed, 0).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_split_dims_layout() {
        // Two u16 dimensions, three cells: (1,10) (2,20) (3,30).
        let interleaved = crate::types::coords_to_bytes(&[1u16, 10, 2, 20, 3, 30]);
        let split = split_dims(&interleaved, 2, 2).unwrap();
        assert_eq!(split, crate::types::coords_to_bytes(&[1u16, 2, 3, 10, 20, 30]));
        let back = interleave_dims(&split, 2, 2).unwrap();
        assert_eq!(back, interleaved);
    }

    #[test]
    fn test_coords_roundtrip_through_double_delta() {
        let codec = for_compressor(Compressor::DoubleDelta, Datatype::Uint64);
        let coords = crate::types::coords_to_bytes(&[1u64, 1, 1, 2, 2, 3, 4, 4]);
        let mut compressed = Vec::new();
        compress_coords(codec.as_ref(), -1, &coords, 2, 8, &mut compressed).unwrap();
        let restored =
            decompress_coords(codec.as_ref(), &compressed, 2, 8, coords.len() as u64).unwrap();
        assert_eq!(restored, coords);
    }
}
