//! # Engine Constants
//!
//! All numeric defaults, reserved names and on-disk file names in one place.
//! Several values are interdependent: the variable-cell offset size must
//! match the [`crate::types::Datatype::Uint64`] width because offset streams
//! are typed as UINT64 on disk, and the coordinate/offset default codecs must
//! be delta-friendly because both streams are sorted or monotonic in the
//! common case.

use crate::types::Compressor;

/// The array metadata file name.
pub const ARRAY_METADATA_FILENAME: &str = "__array_metadata.tdb";

/// The fragment metadata (footer) file name.
pub const FRAGMENT_METADATA_FILENAME: &str = "__fragment_metadata.tdb";

/// The array file-lock placeholder name.
pub const ARRAY_FILELOCK_NAME: &str = "__array_lock.tdb";

/// Zero-byte marker identifying a group directory.
pub const GROUP_FILENAME: &str = "__tiledb_group.tdb";

/// Zero-byte marker identifying a key-value store.
pub const KV_FILENAME: &str = "__kv.tdb";

/// Zero-byte success marker written last inside a fragment directory.
pub const OK_FILENAME: &str = "__ok.tdb";

/// The file suffix used for every engine file.
pub const FILE_SUFFIX: &str = ".tdb";

/// The default tile capacity (cells per sparse tile).
pub const CAPACITY: u64 = 1_000_000;

/// The size of a variable cell offset. Must equal the UINT64 width.
pub const CELL_VAR_OFFSET_SIZE: u64 = 8;

/// Special value indicating a variable number of values per cell.
pub const VAR_NUM: u32 = u32::MAX;

/// Special value indicating a variable cell size.
pub const VAR_SIZE: u64 = u64::MAX;

/// The size of a tile chunk. In practice at most one chunk per tile unless
/// a tile exceeds 2 GiB.
pub const TILE_CHUNK_SIZE: u64 = i32::MAX as u64;

/// The maximum attribute/dimension name length.
pub const NAME_MAX_LEN: usize = 256;

/// On-disk format version as `[major, minor, revision]`. Readers reject a
/// differing major.
pub const VERSION: [u32; 3] = [1, 2, 0];

/// Default compressor for integer coordinates.
pub const COORDS_COMPRESSION: Compressor = Compressor::DoubleDelta;

/// Default compressor for real (float) coordinates; double-delta is
/// meaningless for floats.
pub const REAL_COORDS_COMPRESSION: Compressor = Compressor::Zstd;

/// Default compressor for variable-cell offset streams.
pub const CELL_VAR_OFFSETS_COMPRESSION: Compressor = Compressor::DoubleDelta;

/// Default compression level (codec-defined default).
pub const DEFAULT_COMPRESSION_LEVEL: i32 = -1;

/// Tile cache shard count. Must be a power of two.
pub const CACHE_SHARD_COUNT: usize = 16;

/// Default byte budget for the shared tile cache.
pub const TILE_CACHE_SIZE: u64 = 64 * 1024 * 1024;

/// Default byte budget for cached array schemas.
pub const ARRAY_SCHEMA_CACHE_SIZE: u64 = 8 * 1024 * 1024;

/// Default byte budget for cached fragment metadata.
pub const FRAGMENT_METADATA_CACHE_SIZE: u64 = 8 * 1024 * 1024;

/// Special name reserved for the coordinates attribute.
pub const COORDS: &str = "__coords";

/// Reserved name for the key attribute in a key-value store.
pub const KEY_ATTR_NAME: &str = "__key";

/// Reserved name for the key-type attribute in a key-value store.
pub const KEY_TYPE_ATTR_NAME: &str = "__key_type";

/// Name of the first key dimension (a key is hashed into a 16-byte MD5
/// digest, represented as a 2-dimensional uint64 coordinate).
pub const KEY_DIM_1: &str = "__key_dim_1";

/// Name of the second key dimension.
pub const KEY_DIM_2: &str = "__key_dim_2";

/// Returns true if `name` collides with a reserved attribute or dimension
/// name.
pub fn reserved_name(name: &str) -> bool {
    name == COORDS
        || name == KEY_ATTR_NAME
        || name == KEY_TYPE_ATTR_NAME
        || name == KEY_DIM_1
        || name == KEY_DIM_2
}
