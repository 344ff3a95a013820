//! POSIX backend (`file://` and bare paths).

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

use super::{Uri, Vfs};
use crate::error::{ErrorKind, VfsReason};

pub struct PosixVfs;

impl PosixVfs {
    pub fn new() -> Self {
        PosixVfs
    }

    fn to_path(uri: &Uri) -> PathBuf {
        PathBuf::from(uri.path())
    }

    fn list(path: &Path) -> Result<Vec<(PathBuf, bool)>> {
        let mut out = Vec::new();
        let entries = fs::read_dir(path)
            .wrap_err_with(|| format!("failed to list '{}'", path.display()))?;
        for entry in entries {
            let entry = entry.wrap_err("failed to read directory entry")?;
            let is_dir = entry
                .file_type()
                .wrap_err("failed to stat directory entry")?
                .is_dir();
            out.push((entry.path(), is_dir));
        }
        out.sort();
        Ok(out)
    }
}

impl Default for PosixVfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs for PosixVfs {
    fn is_dir(&self, uri: &Uri) -> Result<bool> {
        Ok(Self::to_path(uri).is_dir())
    }

    fn is_file(&self, uri: &Uri) -> Result<bool> {
        Ok(Self::to_path(uri).is_file())
    }

    fn create_dir(&self, uri: &Uri) -> Result<()> {
        let path = Self::to_path(uri);
        if path.exists() {
            return Err(ErrorKind::vfs(
                VfsReason::AlreadyExists,
                format!("cannot create directory '{}'", uri),
            ));
        }
        fs::create_dir_all(&path)
            .wrap_err_with(|| format!("failed to create directory '{}'", uri))
    }

    fn delete_dir(&self, uri: &Uri) -> Result<()> {
        fs::remove_dir_all(Self::to_path(uri))
            .wrap_err_with(|| format!("failed to delete directory '{}'", uri))
    }

    fn move_dir(&self, from: &Uri, to: &Uri) -> Result<()> {
        fs::rename(Self::to_path(from), Self::to_path(to))
            .wrap_err_with(|| format!("failed to move '{}' to '{}'", from, to))
    }

    fn create_file(&self, uri: &Uri) -> Result<()> {
        File::create(Self::to_path(uri))
            .map(|_| ())
            .wrap_err_with(|| format!("failed to create file '{}'", uri))
    }

    fn delete_file(&self, uri: &Uri) -> Result<()> {
        fs::remove_file(Self::to_path(uri))
            .wrap_err_with(|| format!("failed to delete file '{}'", uri))
    }

    fn read(&self, uri: &Uri, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut file = File::open(Self::to_path(uri))
            .wrap_err_with(|| format!("failed to open '{}'", uri))?;
        file.seek(SeekFrom::Start(offset))
            .wrap_err_with(|| format!("failed to seek to {} in '{}'", offset, uri))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).map_err(|e| {
            ErrorKind::vfs(
                VfsReason::Io,
                format!("short read of {} bytes at {} from '{}': {}", len, offset, uri, e),
            )
        })?;
        Ok(buf)
    }

    fn write(&self, uri: &Uri, data: &[u8], append: bool) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(Self::to_path(uri))
            .wrap_err_with(|| format!("failed to open '{}' for writing", uri))?;
        file.write_all(data)
            .wrap_err_with(|| format!("failed to write {} bytes to '{}'", data.len(), uri))?;
        file.sync_data()
            .wrap_err_with(|| format!("failed to sync '{}'", uri))
    }

    fn file_size(&self, uri: &Uri) -> Result<u64> {
        let meta = fs::metadata(Self::to_path(uri))
            .wrap_err_with(|| format!("failed to stat '{}'", uri))?;
        Ok(meta.len())
    }

    fn ls(&self, uri: &Uri) -> Result<Vec<Uri>> {
        let base = Self::to_path(uri);
        Ok(Self::list(&base)?
            .into_iter()
            .map(|(p, _)| Uri::new(format!("file://{}", p.display())))
            .collect())
    }

    fn ls_dirs(&self, uri: &Uri) -> Result<Vec<Uri>> {
        let base = Self::to_path(uri);
        Ok(Self::list(&base)?
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .map(|(p, _)| Uri::new(format!("file://{}", p.display())))
            .collect())
    }

    fn ls_files(&self, uri: &Uri) -> Result<Vec<Uri>> {
        let base = Self::to_path(uri);
        Ok(Self::list(&base)?
            .into_iter()
            .filter(|(_, is_dir)| !*is_dir)
            .map(|(p, _)| Uri::new(format!("file://{}", p.display())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_posix_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let vfs = PosixVfs::new();
        let file = Uri::new(format!("file://{}/data.tdb", dir.path().display()));

        vfs.write(&file, b"hello", false).unwrap();
        vfs.write(&file, b" world", true).unwrap();

        assert_eq!(vfs.file_size(&file).unwrap(), 11);
        assert_eq!(vfs.read(&file, 6, 5).unwrap(), b"world");
    }

    #[test]
    fn test_posix_move_dir() {
        let dir = tempdir().unwrap();
        let vfs = PosixVfs::new();
        let from = Uri::new(format!("file://{}/a", dir.path().display()));
        let to = Uri::new(format!("file://{}/b", dir.path().display()));

        vfs.create_dir(&from).unwrap();
        vfs.write(&from.join("f.tdb"), b"x", false).unwrap();
        vfs.move_dir(&from, &to).unwrap();

        assert!(!vfs.is_dir(&from).unwrap());
        assert!(vfs.is_file(&to.join("f.tdb")).unwrap());
    }
}
