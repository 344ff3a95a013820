//! # Storage Manager
//!
//! The single process-wide engine instance. Owns the VFS router, the shared
//! tile cache and the schema / fragment-metadata caches; arrays, groups and
//! key-value stores are created and opened through it, and every query takes
//! a `&StorageManager` explicitly.
//!
//! ## Visibility Rules
//!
//! - An array is a directory carrying `__array_metadata.tdb`.
//! - A fragment is a committed (undotted) subdirectory carrying a metadata
//!   footer; in-progress fragments are dot-prefixed and invisible here.
//! - Fragment listings are sorted by the `(timestamp, host, thread)`
//!   insertion order embedded in fragment names, oldest first. Queries
//!   capture that list once at init and never refresh it.

use std::sync::Arc;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::TileCache;
use crate::config::constants::{
    ARRAY_FILELOCK_NAME, ARRAY_METADATA_FILENAME, FRAGMENT_METADATA_FILENAME, GROUP_FILENAME,
    KV_FILENAME,
};
use crate::config::Config;
use crate::error::ErrorKind;
use crate::fragment::FragmentMetadata;
use crate::schema::ArraySchema;
use crate::vfs::{Uri, Vfs, VfsRouter};

pub struct StorageManager {
    config: Config,
    vfs: VfsRouter,
    tile_cache: TileCache,
    schema_cache: Mutex<HashMap<String, Arc<ArraySchema>>>,
    fragment_meta_cache: Mutex<HashMap<String, Arc<FragmentMetadata>>>,
}

impl StorageManager {
    pub fn new(config: Config) -> Self {
        let vfs = VfsRouter::new(config.vfs.clone());
        let tile_cache = TileCache::new(config.sm.tile_cache_size);
        Self {
            config,
            vfs,
            tile_cache,
            schema_cache: Mutex::new(HashMap::new()),
            fragment_meta_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vfs(&self) -> &VfsRouter {
        &self.vfs
    }

    pub(crate) fn tile_cache(&self) -> &TileCache {
        &self.tile_cache
    }

    /// Creates an array directory, persists the schema and drops the
    /// file-lock placeholder.
    pub fn array_create(&self, uri: &Uri, schema: &ArraySchema) -> Result<()> {
        if self.vfs.is_dir(uri)? {
            return Err(ErrorKind::storage_manager(format!(
                "cannot create array: '{}' exists",
                uri
            )));
        }
        self.vfs.create_dir(uri)?;
        self.vfs
            .write(&uri.join(ARRAY_METADATA_FILENAME), &schema.serialize(), false)
            .wrap_err_with(|| format!("failed to persist schema for '{}'", uri))?;
        self.vfs.create_file(&uri.join(ARRAY_FILELOCK_NAME))?;
        debug!(array = %uri, "created array");
        Ok(())
    }

    pub fn is_array(&self, uri: &Uri) -> Result<bool> {
        self.vfs.is_file(&uri.join(ARRAY_METADATA_FILENAME))
    }

    /// Loads (and caches) an array's schema.
    pub fn array_schema(&self, uri: &Uri) -> Result<Arc<ArraySchema>> {
        if let Some(schema) = self.schema_cache.lock().get(uri.as_str()) {
            return Ok(Arc::clone(schema));
        }
        let meta_uri = uri.join(ARRAY_METADATA_FILENAME);
        if !self.vfs.is_file(&meta_uri)? {
            return Err(ErrorKind::storage_manager(format!(
                "'{}' is not an array",
                uri
            )));
        }
        let size = self.vfs.file_size(&meta_uri)?;
        let bytes = self.vfs.read(&meta_uri, 0, size)?;
        let schema = Arc::new(
            ArraySchema::deserialize(&bytes)
                .wrap_err_with(|| format!("failed to load schema of '{}'", uri))?,
        );
        let mut cache = self.schema_cache.lock();
        if cache.len() as u64 >= self.config.sm.array_schema_cache_size / 1024 {
            cache.clear();
        }
        cache.insert(uri.as_str().to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Lists the committed fragments of an array, oldest first per the
    /// `(timestamp, host, thread)` insertion order.
    pub fn fragments(
        &self,
        uri: &Uri,
        schema: &ArraySchema,
    ) -> Result<Vec<Arc<FragmentMetadata>>> {
        let mut out = Vec::new();
        for dir in self.vfs.ls_dirs(uri)? {
            let name = dir.last_component();
            if !name.starts_with("__") || FragmentMetadata::parse_name(name).is_none() {
                continue;
            }
            let footer_uri = dir.join(FRAGMENT_METADATA_FILENAME);
            if !self.vfs.is_file(&footer_uri)? {
                warn!(fragment = %dir, "fragment directory without footer, skipping");
                continue;
            }
            out.push(self.fragment_metadata(&dir, schema)?);
        }
        out.sort_by_key(|meta| meta.insertion_order());
        Ok(out)
    }

    fn fragment_metadata(
        &self,
        fragment_uri: &Uri,
        schema: &ArraySchema,
    ) -> Result<Arc<FragmentMetadata>> {
        if let Some(meta) = self.fragment_meta_cache.lock().get(fragment_uri.as_str()) {
            return Ok(Arc::clone(meta));
        }
        let footer_uri = fragment_uri.join(FRAGMENT_METADATA_FILENAME);
        let size = self.vfs.file_size(&footer_uri)?;
        let bytes = self.vfs.read(&footer_uri, 0, size)?;
        let meta = Arc::new(
            FragmentMetadata::deserialize(&bytes, schema, fragment_uri.clone())
                .wrap_err_with(|| format!("failed to load fragment footer '{}'", footer_uri))?,
        );
        let mut cache = self.fragment_meta_cache.lock();
        if cache.len() as u64 >= self.config.sm.fragment_metadata_cache_size / 1024 {
            cache.clear();
        }
        cache.insert(fragment_uri.as_str().to_string(), Arc::clone(&meta));
        Ok(meta)
    }

    /// Creates a group directory marked by its zero-byte file.
    pub fn group_create(&self, uri: &Uri) -> Result<()> {
        self.vfs.create_dir(uri)?;
        self.vfs.create_file(&uri.join(GROUP_FILENAME))?;
        Ok(())
    }

    pub fn is_group(&self, uri: &Uri) -> Result<bool> {
        self.vfs.is_file(&uri.join(GROUP_FILENAME))
    }

    pub fn is_kv(&self, uri: &Uri) -> Result<bool> {
        self.vfs.is_file(&uri.join(KV_FILENAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArrayType, Datatype, Layout};
    use crate::schema::{Attribute, Dimension};

    fn schema() -> ArraySchema {
        ArraySchema::new(
            ArrayType::Sparse,
            Datatype::Uint64,
            vec![Dimension::new("d", [0u64, 99], None)],
            vec![Attribute::new("a", Datatype::Int32)],
            Layout::RowMajor,
            Layout::RowMajor,
            10,
        )
        .unwrap()
    }

    #[test]
    fn test_array_create_and_open() {
        let sm = StorageManager::new(Config::default());
        let uri = Uri::new("mem://arrays/a");
        sm.array_create(&uri, &schema()).unwrap();
        assert!(sm.is_array(&uri).unwrap());
        assert!(!sm.is_group(&uri).unwrap());

        let loaded = sm.array_schema(&uri).unwrap();
        assert_eq!(loaded.capacity(), 10);
        // Second load hits the cache and returns the same Arc.
        let again = sm.array_schema(&uri).unwrap();
        assert!(Arc::ptr_eq(&loaded, &again));

        // Double create is refused.
        assert!(sm.array_create(&uri, &schema()).is_err());
    }

    #[test]
    fn test_group_create() {
        let sm = StorageManager::new(Config::default());
        let uri = Uri::new("mem://groups/g");
        sm.group_create(&uri).unwrap();
        assert!(sm.is_group(&uri).unwrap());
        assert!(!sm.is_array(&uri).unwrap());
    }
}
