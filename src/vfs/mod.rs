//! # Virtual File System
//!
//! Every byte the engine reads or writes goes through the [`Vfs`] trait: a
//! deliberately small operation set (directory CRUD, whole-file CRUD, ranged
//! read, append/overwrite write, listing) that backends implement per URI
//! scheme. The engine ships a POSIX backend (`file://`, the default for bare
//! paths) and an in-memory backend (`mem://`) used by the test suites for
//! I/O assertions and fault injection. `hdfs://` and `s3://` are recognized
//! schemes whose concrete backends are external collaborators; dispatching
//! to them reports an unsupported-backend error.
//!
//! ## Atomicity
//!
//! `move_dir` must be atomic within a backend: it is the fragment commit
//! point. Both shipped backends satisfy this (POSIX `rename(2)`; the memory
//! backend remaps under one lock).

mod mem;
mod posix;
mod uri;

pub use mem::MemVfs;
pub use posix::PosixVfs;
pub use uri::Uri;

use eyre::Result;

use crate::config::VfsParams;
use crate::error::{ErrorKind, VfsReason};

/// The file-system operation set the engine consumes.
pub trait Vfs: Send + Sync {
    fn is_dir(&self, uri: &Uri) -> Result<bool>;
    fn is_file(&self, uri: &Uri) -> Result<bool>;
    fn create_dir(&self, uri: &Uri) -> Result<()>;
    fn delete_dir(&self, uri: &Uri) -> Result<()>;
    /// Atomically renames a directory within the backend.
    fn move_dir(&self, from: &Uri, to: &Uri) -> Result<()>;
    /// Creates an empty file, truncating an existing one.
    fn create_file(&self, uri: &Uri) -> Result<()>;
    fn delete_file(&self, uri: &Uri) -> Result<()>;
    /// Reads exactly `len` bytes starting at `offset`.
    fn read(&self, uri: &Uri, offset: u64, len: u64) -> Result<Vec<u8>>;
    /// Writes `data`, creating the file if missing. With `append` the bytes
    /// are added at the end; otherwise the file is replaced.
    fn write(&self, uri: &Uri, data: &[u8], append: bool) -> Result<()>;
    fn file_size(&self, uri: &Uri) -> Result<u64>;
    /// Lists all immediate children (files and directories).
    fn ls(&self, uri: &Uri) -> Result<Vec<Uri>>;
    fn ls_dirs(&self, uri: &Uri) -> Result<Vec<Uri>>;
    fn ls_files(&self, uri: &Uri) -> Result<Vec<Uri>>;
}

/// Scheme-dispatching VFS facade owned by the storage manager.
pub struct VfsRouter {
    posix: PosixVfs,
    mem: MemVfs,
    #[allow(dead_code)]
    params: VfsParams,
}

impl VfsRouter {
    pub fn new(params: VfsParams) -> Self {
        Self {
            posix: PosixVfs::new(),
            mem: MemVfs::new(),
            params,
        }
    }

    /// The in-memory backend, exposed for test assertions (operation log,
    /// fault injection).
    pub fn mem(&self) -> &MemVfs {
        &self.mem
    }

    fn backend(&self, uri: &Uri) -> Result<&dyn Vfs> {
        match uri.scheme() {
            "file" => Ok(&self.posix),
            "mem" => Ok(&self.mem),
            "hdfs" | "s3" => Err(ErrorKind::vfs(
                VfsReason::UnsupportedScheme,
                format!("no backend compiled for '{}'", uri),
            )),
            other => Err(ErrorKind::vfs(
                VfsReason::InvalidUri,
                format!("unknown scheme '{}' in '{}'", other, uri),
            )),
        }
    }
}

impl Vfs for VfsRouter {
    fn is_dir(&self, uri: &Uri) -> Result<bool> {
        self.backend(uri)?.is_dir(uri)
    }

    fn is_file(&self, uri: &Uri) -> Result<bool> {
        self.backend(uri)?.is_file(uri)
    }

    fn create_dir(&self, uri: &Uri) -> Result<()> {
        self.backend(uri)?.create_dir(uri)
    }

    fn delete_dir(&self, uri: &Uri) -> Result<()> {
        self.backend(uri)?.delete_dir(uri)
    }

    fn move_dir(&self, from: &Uri, to: &Uri) -> Result<()> {
        if from.scheme() != to.scheme() {
            return Err(ErrorKind::vfs(
                VfsReason::InvalidUri,
                format!("move_dir across schemes: '{}' -> '{}'", from, to),
            ));
        }
        self.backend(from)?.move_dir(from, to)
    }

    fn create_file(&self, uri: &Uri) -> Result<()> {
        self.backend(uri)?.create_file(uri)
    }

    fn delete_file(&self, uri: &Uri) -> Result<()> {
        self.backend(uri)?.delete_file(uri)
    }

    fn read(&self, uri: &Uri, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.backend(uri)?.read(uri, offset, len)
    }

    fn write(&self, uri: &Uri, data: &[u8], append: bool) -> Result<()> {
        self.backend(uri)?.write(uri, data, append)
    }

    fn file_size(&self, uri: &Uri) -> Result<u64> {
        self.backend(uri)?.file_size(uri)
    }

    fn ls(&self, uri: &Uri) -> Result<Vec<Uri>> {
        self.backend(uri)?.ls(uri)
    }

    fn ls_dirs(&self, uri: &Uri) -> Result<Vec<Uri>> {
        self.backend(uri)?.ls_dirs(uri)
    }

    fn ls_files(&self, uri: &Uri) -> Result<Vec<Uri>> {
        self.backend(uri)?.ls_files(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_router_rejects_unsupported_schemes() {
        let router = VfsRouter::new(VfsParams::default());
        let err = router.is_dir(&Uri::new("s3://bucket/x")).unwrap_err();
        match ErrorKind::of(&err) {
            Some(ErrorKind::Vfs { reason, .. }) => {
                assert_eq!(*reason, VfsReason::UnsupportedScheme)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_router_dispatches_mem() {
        let router = VfsRouter::new(VfsParams::default());
        let dir = Uri::new("mem://d");
        router.create_dir(&dir).unwrap();
        assert!(router.is_dir(&dir).unwrap());
    }
}
