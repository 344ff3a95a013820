//! # Tile Codec Pipeline
//!
//! Codecs map a byte slice to a byte slice, losslessly and deterministically:
//!
//! - `compress(level, input, output)` appends the compressed form to `output`
//! - `decompress(input, output)` fills `output` (whose length is the known
//!   original size, recorded in fragment metadata) and returns bytes written
//!
//! The pluggable seam is the [`Codec`] trait; [`for_compressor`] builds the
//! concrete codec for a schema's [`Compressor`] choice. ZSTD and LZ4 wrap
//! the ecosystem crates; double-delta and RLE are the two storage-native
//! algorithms that benefit from knowing the element width, so they are
//! constructed with the stream's datatype.
//!
//! Chunked framing of whole tiles (the 4-byte original-length / 4-byte
//! compressed-length records) lives in [`crate::tile`]; codecs here see one
//! chunk at a time.

pub mod varint;

use eyre::{ensure, Result};

use crate::error::ErrorKind;
use crate::types::{Compressor, Datatype};
use self::varint::{decode_varint, encode_varint};

/// A lossless byte-slice to byte-slice transform.
pub trait Codec: Send + Sync {
    /// Compresses `input`, appending to `output`. `level` is codec-defined;
    /// negative selects the codec's default.
    fn compress(&self, level: i32, input: &[u8], output: &mut Vec<u8>) -> Result<()>;

    /// Decompresses `input` into `output`, which is sized to the recorded
    /// original length. Returns the bytes written, which must fill `output`
    /// exactly.
    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<usize>;
}

/// Builds the codec for a compressor choice. `datatype` is the element type
/// of the stream, consulted by the width-aware codecs.
pub fn for_compressor(compressor: Compressor, datatype: Datatype) -> Box<dyn Codec> {
    match compressor {
        Compressor::NoCompression => Box::new(NoCompression),
        Compressor::Zstd => Box::new(ZstdCodec),
        Compressor::Lz4 => Box::new(Lz4Codec),
        Compressor::Rle => Box::new(Rle {
            elem_size: datatype.size(),
        }),
        Compressor::DoubleDelta => Box::new(DoubleDelta {
            elem_size: datatype.size(),
        }),
    }
}

/// Identity passthrough.
pub struct NoCompression;

impl Codec for NoCompression {
    fn compress(&self, _level: i32, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        output.extend_from_slice(input);
        Ok(())
    }

    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        ensure!(
            input.len() == output.len(),
            "no-compression chunk size mismatch: {} != {}",
            input.len(),
            output.len()
        );
        output.copy_from_slice(input);
        Ok(input.len())
    }
}

pub struct ZstdCodec;

impl Codec for ZstdCodec {
    fn compress(&self, level: i32, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        let level = if level < 0 { 0 } else { level };
        let compressed = zstd::bulk::compress(input, level)
            .map_err(|e| ErrorKind::codec(format!("zstd compression failed: {}", e)))?;
        output.extend_from_slice(&compressed);
        Ok(())
    }

    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let written = zstd::bulk::decompress_to_buffer(input, output)
            .map_err(|e| ErrorKind::codec(format!("zstd decompression failed: {}", e)))?;
        ensure!(
            written == output.len(),
            "zstd decompressed {} bytes, expected {}",
            written,
            output.len()
        );
        Ok(written)
    }
}

pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn compress(&self, _level: i32, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        let compressed = lz4_flex::compress_prepend_size(input);
        output.extend_from_slice(&compressed);
        Ok(())
    }

    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let decompressed = lz4_flex::decompress_size_prepended(input)
            .map_err(|e| ErrorKind::codec(format!("lz4 decompression failed: {}", e)))?;
        ensure!(
            decompressed.len() == output.len(),
            "lz4 decompressed {} bytes, expected {}",
            decompressed.len(),
            output.len()
        );
        output.copy_from_slice(&decompressed);
        Ok(decompressed.len())
    }
}

/// Run-length encoding over fixed-width elements: a sequence of
/// `[u32 run length LE][element bytes]` records.
pub struct Rle {
    elem_size: usize,
}

impl Codec for Rle {
    fn compress(&self, _level: i32, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        ensure!(
            input.len() % self.elem_size == 0,
            "rle input {} not a multiple of element size {}",
            input.len(),
            self.elem_size
        );
        let mut pos = 0;
        while pos < input.len() {
            let elem = &input[pos..pos + self.elem_size];
            let mut run: u32 = 1;
            let mut next = pos + self.elem_size;
            while next < input.len()
                && run < u32::MAX
                && &input[next..next + self.elem_size] == elem
            {
                run += 1;
                next += self.elem_size;
            }
            output.extend_from_slice(&run.to_le_bytes());
            output.extend_from_slice(elem);
            pos = next;
        }
        Ok(())
    }

    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let record = 4 + self.elem_size;
        ensure!(
            input.len() % record == 0,
            "rle stream length {} not a multiple of record size {}",
            input.len(),
            record
        );
        let mut written = 0;
        for chunk in input.chunks_exact(record) {
            let run = u32::from_le_bytes(chunk[..4].try_into().unwrap()) as usize;
            let elem = &chunk[4..];
            let bytes = run * self.elem_size;
            ensure!(
                written + bytes <= output.len(),
                "rle run overflows original size {}",
                output.len()
            );
            for _ in 0..run {
                output[written..written + self.elem_size].copy_from_slice(elem);
                written += self.elem_size;
            }
        }
        ensure!(
            written == output.len(),
            "rle decompressed {} bytes, expected {}",
            written,
            output.len()
        );
        Ok(written)
    }
}

/// Second-order delta encoding over fixed-width integers.
///
/// Values are widened to u64 and differenced with wrapping arithmetic, so
/// the transform is exact for every width; the residuals are zig-zag mapped
/// and varint encoded. Sorted coordinate streams and monotonic offset
/// streams produce near-constant deltas, collapsing to single-byte
/// residuals.
pub struct DoubleDelta {
    elem_size: usize,
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

impl DoubleDelta {
    fn load(&self, input: &[u8], idx: usize) -> u64 {
        let start = idx * self.elem_size;
        let mut buf = [0u8; 8];
        buf[..self.elem_size].copy_from_slice(&input[start..start + self.elem_size]);
        u64::from_le_bytes(buf)
    }

    fn store(&self, value: u64, output: &mut [u8], idx: usize) {
        let start = idx * self.elem_size;
        output[start..start + self.elem_size]
            .copy_from_slice(&value.to_le_bytes()[..self.elem_size]);
    }
}

impl Codec for DoubleDelta {
    fn compress(&self, _level: i32, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        ensure!(
            input.len() % self.elem_size == 0,
            "double-delta input {} not a multiple of element size {}",
            input.len(),
            self.elem_size
        );
        let n = input.len() / self.elem_size;
        encode_varint(n as u64, output);
        if n == 0 {
            return Ok(());
        }

        let first = self.load(input, 0);
        encode_varint(first, output);
        if n == 1 {
            return Ok(());
        }

        let second = self.load(input, 1);
        let mut prev_delta = second.wrapping_sub(first);
        encode_varint(zigzag(prev_delta as i64), output);
        let mut prev = second;

        for i in 2..n {
            let value = self.load(input, i);
            let delta = value.wrapping_sub(prev);
            let residual = delta.wrapping_sub(prev_delta);
            encode_varint(zigzag(residual as i64), output);
            prev = value;
            prev_delta = delta;
        }
        Ok(())
    }

    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let mut pos = 0;
        let (n, read) = decode_varint(input)?;
        pos += read;
        let n = n as usize;
        ensure!(
            n * self.elem_size == output.len(),
            "double-delta cell count {} does not match original size {}",
            n,
            output.len()
        );
        if n == 0 {
            return Ok(0);
        }

        let (first, read) = decode_varint(&input[pos..])?;
        pos += read;
        self.store(first, output, 0);
        if n == 1 {
            return Ok(self.elem_size);
        }

        let (zz, read) = decode_varint(&input[pos..])?;
        pos += read;
        let mut delta = unzigzag(zz) as u64;
        let mut prev = first.wrapping_add(delta);
        self.store(prev, output, 1);

        for i in 2..n {
            let (zz, read) = decode_varint(&input[pos..])?;
            pos += read;
            delta = delta.wrapping_add(unzigzag(zz) as u64);
            prev = prev.wrapping_add(delta);
            self.store(prev, output, i);
        }
        Ok(n * self.elem_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: &dyn Codec, input: &[u8]) {
        let mut compressed = Vec::new();
        codec.compress(-1, input, &mut compressed).unwrap();
        let mut output = vec![0u8; input.len()];
        let written = codec.decompress(&compressed, &mut output).unwrap();
        assert_eq!(written, input.len());
        assert_eq!(output, input);
    }

    #[test]
    fn test_zstd_and_lz4_roundtrip() {
        let data: Vec<u8> = (0..4096u32).flat_map(|v| (v / 7).to_le_bytes()).collect();
        roundtrip(&ZstdCodec, &data);
        roundtrip(&Lz4Codec, &data);
        roundtrip(&ZstdCodec, &[]);
    }

    #[test]
    fn test_rle_collapses_runs() {
        let codec = Rle { elem_size: 4 };
        let mut data = Vec::new();
        for _ in 0..1000 {
            data.extend_from_slice(&7i32.to_le_bytes());
        }
        let mut compressed = Vec::new();
        codec.compress(-1, &data, &mut compressed).unwrap();
        assert_eq!(compressed.len(), 8);
        roundtrip(&codec, &data);
    }

    #[test]
    fn test_double_delta_sorted_stream_is_compact() {
        let codec = DoubleDelta { elem_size: 8 };
        let data: Vec<u8> = (1000u64..2000).flat_map(|v| v.to_le_bytes()).collect();
        let mut compressed = Vec::new();
        codec.compress(-1, &data, &mut compressed).unwrap();
        // Constant stride: every residual after the first delta is zero.
        assert!(compressed.len() < data.len() / 4);
        roundtrip(&codec, &data);
    }

    #[test]
    fn test_double_delta_handles_wrapping_and_widths() {
        let codec = DoubleDelta { elem_size: 8 };
        let values = [0u64, u64::MAX, 1, u64::MAX / 2, 0, 42];
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        roundtrip(&codec, &data);

        let codec = DoubleDelta { elem_size: 2 };
        let values = [u16::MAX, 0, 1, u16::MAX, 7];
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        roundtrip(&codec, &data);

        let codec = DoubleDelta { elem_size: 1 };
        roundtrip(&codec, &[0u8, 255, 3, 17, 16, 15]);
    }

    #[test]
    fn test_double_delta_rejects_misaligned_input() {
        let codec = DoubleDelta { elem_size: 4 };
        let mut out = Vec::new();
        assert!(codec.compress(-1, &[1, 2, 3], &mut out).is_err());
    }
}
