//! # Configuration Module
//!
//! Centralizes every engine constant and the runtime-tunable parameter
//! structs. Constants live in [`constants`] with their interdependencies
//! documented; the structs below mirror the storage-manager and VFS
//! parameter groups and carry sane defaults. Configuration *parsing* (files,
//! environment) is intentionally out of scope; construct a [`Config`] and
//! override fields directly.

pub mod constants;

/// Storage-manager parameters, fixed at construction time.
#[derive(Debug, Clone)]
pub struct SmParams {
    /// Byte budget for cached array schemas.
    pub array_schema_cache_size: u64,
    /// Byte budget for cached fragment metadata footers.
    pub fragment_metadata_cache_size: u64,
    /// Byte budget for the shared tile cache (decompressed bytes).
    pub tile_cache_size: u64,
}

impl Default for SmParams {
    fn default() -> Self {
        Self {
            array_schema_cache_size: constants::ARRAY_SCHEMA_CACHE_SIZE,
            fragment_metadata_cache_size: constants::FRAGMENT_METADATA_CACHE_SIZE,
            tile_cache_size: constants::TILE_CACHE_SIZE,
        }
    }
}

/// S3 backend parameters. The concrete backend is an external collaborator;
/// these surface here so a backend implementation receives its timeouts from
/// the same place as everything else.
#[derive(Debug, Clone)]
pub struct S3Params {
    pub region: String,
    pub scheme: String,
    pub endpoint_override: String,
    pub use_virtual_addressing: bool,
    pub file_buffer_size: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for S3Params {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            scheme: "https".to_string(),
            endpoint_override: String::new(),
            use_virtual_addressing: true,
            file_buffer_size: 5 * 1024 * 1024,
            connect_timeout_ms: 3000,
            request_timeout_ms: 3000,
        }
    }
}

/// HDFS backend parameters (placeholder; the backend is external).
#[derive(Debug, Clone, Default)]
pub struct HdfsParams {}

/// VFS parameters grouped per backend.
#[derive(Debug, Clone, Default)]
pub struct VfsParams {
    pub s3: S3Params,
    pub hdfs: HdfsParams,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub sm: SmParams,
    pub vfs: VfsParams,
}
