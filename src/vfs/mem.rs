//! In-memory backend (`mem://`).
//!
//! Backs the engine's test scheme. Besides implementing the full [`Vfs`]
//! operation set under a single lock (which makes `move_dir` trivially
//! atomic), it records an operation log and supports one-shot fault
//! injection so the suites can assert I/O behavior (MBR pruning) and
//! crash-safety (no partial fragment becomes visible).

use eyre::Result;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use super::{Uri, Vfs};
use crate::error::{ErrorKind, VfsReason};

#[derive(Default)]
struct MemState {
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
    op_log: Vec<String>,
    /// Countdown to the next injected failure; the op that decrements this
    /// to zero fails and disarms the trap.
    fail_countdown: Option<u64>,
}

impl MemState {
    fn tick(&mut self, op: &str, path: &str) -> Result<()> {
        self.op_log.push(format!("{} {}", op, path));
        if let Some(countdown) = &mut self.fail_countdown {
            *countdown -= 1;
            if *countdown == 0 {
                self.fail_countdown = None;
                return Err(ErrorKind::vfs(
                    VfsReason::Injected,
                    format!("injected fault at {} '{}'", op, path),
                ));
            }
        }
        Ok(())
    }

    fn child_of<'a>(path: &'a str, parent: &str) -> Option<&'a str> {
        let rest = path.strip_prefix(parent)?.strip_prefix('/')?;
        if rest.is_empty() || rest.contains('/') {
            None
        } else {
            Some(rest)
        }
    }
}

pub struct MemVfs {
    state: Mutex<MemState>,
}

impl MemVfs {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemState::default()),
        }
    }

    /// Arms a one-shot fault: the `nth` subsequent logged operation fails
    /// with an `Injected` VFS error, then the trap disarms.
    pub fn arm_fault(&self, nth: u64) {
        assert!(nth > 0, "fault ordinal is 1-based");
        self.state.lock().fail_countdown = Some(nth);
    }

    pub fn disarm_fault(&self) {
        self.state.lock().fail_countdown = None;
    }

    /// Returns true if an armed fault has not fired yet.
    pub fn fault_armed(&self) -> bool {
        self.state.lock().fail_countdown.is_some()
    }

    pub fn op_log(&self) -> Vec<String> {
        self.state.lock().op_log.clone()
    }

    pub fn clear_op_log(&self) {
        self.state.lock().op_log.clear();
    }
}

impl Default for MemVfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs for MemVfs {
    fn is_dir(&self, uri: &Uri) -> Result<bool> {
        Ok(self.state.lock().dirs.contains(uri.path()))
    }

    fn is_file(&self, uri: &Uri) -> Result<bool> {
        Ok(self.state.lock().files.contains_key(uri.path()))
    }

    fn create_dir(&self, uri: &Uri) -> Result<()> {
        let mut state = self.state.lock();
        state.tick("create_dir", uri.path())?;
        if !state.dirs.insert(uri.path().to_string()) {
            return Err(ErrorKind::vfs(
                VfsReason::AlreadyExists,
                format!("cannot create directory '{}'", uri),
            ));
        }
        Ok(())
    }

    fn delete_dir(&self, uri: &Uri) -> Result<()> {
        let mut state = self.state.lock();
        state.tick("delete_dir", uri.path())?;
        let path = uri.path().to_string();
        if !state.dirs.contains(&path) {
            return Err(ErrorKind::vfs(
                VfsReason::NotFound,
                format!("no such directory '{}'", uri),
            ));
        }
        let file_prefix = format!("{}/", path);
        state.files.retain(|k, _| !k.starts_with(&file_prefix));
        state
            .dirs
            .retain(|d| d != &path && !d.starts_with(&file_prefix));
        Ok(())
    }

    fn move_dir(&self, from: &Uri, to: &Uri) -> Result<()> {
        let mut state = self.state.lock();
        state.tick("move_dir", from.path())?;
        let from_path = from.path().to_string();
        let to_path = to.path().to_string();
        if !state.dirs.contains(&from_path) {
            return Err(ErrorKind::vfs(
                VfsReason::NotFound,
                format!("no such directory '{}'", from),
            ));
        }
        if state.dirs.contains(&to_path) {
            return Err(ErrorKind::vfs(
                VfsReason::AlreadyExists,
                format!("target directory exists '{}'", to),
            ));
        }
        let from_prefix = format!("{}/", from_path);
        let moved_dirs: Vec<String> = state
            .dirs
            .iter()
            .filter(|d| **d == from_path || d.starts_with(&from_prefix))
            .cloned()
            .collect();
        for d in moved_dirs {
            state.dirs.remove(&d);
            let renamed = format!("{}{}", to_path, &d[from_path.len()..]);
            state.dirs.insert(renamed);
        }
        let moved_files: Vec<String> = state
            .files
            .keys()
            .filter(|k| k.starts_with(&from_prefix))
            .cloned()
            .collect();
        for f in moved_files {
            let data = state.files.remove(&f).unwrap();
            let renamed = format!("{}{}", to_path, &f[from_path.len()..]);
            state.files.insert(renamed, data);
        }
        Ok(())
    }

    fn create_file(&self, uri: &Uri) -> Result<()> {
        let mut state = self.state.lock();
        state.tick("create_file", uri.path())?;
        state.files.insert(uri.path().to_string(), Vec::new());
        Ok(())
    }

    fn delete_file(&self, uri: &Uri) -> Result<()> {
        let mut state = self.state.lock();
        state.tick("delete_file", uri.path())?;
        if state.files.remove(uri.path()).is_none() {
            return Err(ErrorKind::vfs(
                VfsReason::NotFound,
                format!("no such file '{}'", uri),
            ));
        }
        Ok(())
    }

    fn read(&self, uri: &Uri, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        state.tick("read", uri.path())?;
        let data = state.files.get(uri.path()).ok_or_else(|| {
            ErrorKind::vfs(VfsReason::NotFound, format!("no such file '{}'", uri))
        })?;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= data.len() as u64)
            .ok_or_else(|| {
                ErrorKind::vfs(
                    VfsReason::Io,
                    format!(
                        "read of {} bytes at {} past end of '{}' ({} bytes)",
                        len,
                        offset,
                        uri,
                        data.len()
                    ),
                )
            })?;
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn write(&self, uri: &Uri, data: &[u8], append: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.tick("write", uri.path())?;
        let entry = state.files.entry(uri.path().to_string()).or_default();
        if !append {
            entry.clear();
        }
        entry.extend_from_slice(data);
        Ok(())
    }

    fn file_size(&self, uri: &Uri) -> Result<u64> {
        let mut state = self.state.lock();
        state.tick("file_size", uri.path())?;
        state
            .files
            .get(uri.path())
            .map(|d| d.len() as u64)
            .ok_or_else(|| {
                ErrorKind::vfs(VfsReason::NotFound, format!("no such file '{}'", uri))
            })
    }

    fn ls(&self, uri: &Uri) -> Result<Vec<Uri>> {
        let mut out = self.ls_dirs(uri)?;
        out.extend(self.ls_files(uri)?);
        out.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(out)
    }

    fn ls_dirs(&self, uri: &Uri) -> Result<Vec<Uri>> {
        let state = self.state.lock();
        let parent = uri.path();
        let mut names: Vec<&str> = state
            .dirs
            .iter()
            .filter_map(|d| MemState::child_of(d, parent))
            .collect();
        names.sort_unstable();
        Ok(names
            .into_iter()
            .map(|n| Uri::new(format!("mem://{}/{}", parent, n)))
            .collect())
    }

    fn ls_files(&self, uri: &Uri) -> Result<Vec<Uri>> {
        let state = self.state.lock();
        let parent = uri.path();
        let mut names: Vec<&str> = state
            .files
            .keys()
            .filter_map(|f| MemState::child_of(f, parent))
            .collect();
        names.sort_unstable();
        Ok(names
            .into_iter()
            .map(|n| Uri::new(format!("mem://{}/{}", parent, n)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_vfs_file_roundtrip() {
        let vfs = MemVfs::new();
        let f = Uri::new("mem://a/data.tdb");
        vfs.write(&f, b"abc", false).unwrap();
        vfs.write(&f, b"def", true).unwrap();
        assert_eq!(vfs.file_size(&f).unwrap(), 6);
        assert_eq!(vfs.read(&f, 2, 3).unwrap(), b"cde");
        assert!(vfs.read(&f, 4, 4).is_err());
    }

    #[test]
    fn test_mem_vfs_move_dir_is_atomic_rename() {
        let vfs = MemVfs::new();
        vfs.create_dir(&Uri::new("mem://arr/.__frag")).unwrap();
        vfs.write(&Uri::new("mem://arr/.__frag/a.tdb"), b"x", false)
            .unwrap();
        vfs.move_dir(&Uri::new("mem://arr/.__frag"), &Uri::new("mem://arr/__frag"))
            .unwrap();
        assert!(!vfs.is_dir(&Uri::new("mem://arr/.__frag")).unwrap());
        assert!(vfs.is_dir(&Uri::new("mem://arr/__frag")).unwrap());
        assert_eq!(vfs.read(&Uri::new("mem://arr/__frag/a.tdb"), 0, 1).unwrap(), b"x");
    }

    #[test]
    fn test_mem_vfs_ls_children_only() {
        let vfs = MemVfs::new();
        vfs.create_dir(&Uri::new("mem://arr")).unwrap();
        vfs.create_dir(&Uri::new("mem://arr/__f1")).unwrap();
        vfs.write(&Uri::new("mem://arr/__f1/a.tdb"), b"x", false)
            .unwrap();
        vfs.write(&Uri::new("mem://arr/meta.tdb"), b"y", false).unwrap();

        let dirs = vfs.ls_dirs(&Uri::new("mem://arr")).unwrap();
        assert_eq!(dirs, vec![Uri::new("mem://arr/__f1")]);
        let files = vfs.ls_files(&Uri::new("mem://arr")).unwrap();
        assert_eq!(files, vec![Uri::new("mem://arr/meta.tdb")]);
    }

    #[test]
    fn test_mem_vfs_fault_injection_fires_once() {
        let vfs = MemVfs::new();
        let f = Uri::new("mem://x");
        vfs.arm_fault(2);
        vfs.write(&f, b"1", false).unwrap();
        assert!(vfs.write(&f, b"2", true).is_err());
        assert!(!vfs.fault_armed());
        vfs.write(&f, b"3", true).unwrap();
    }
}
