//! In-memory filesystem used by the sampler and controller tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::collector::traits::FileSystem;

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
    write_denied: HashSet<PathBuf>,
}

/// Mock filesystem backed by in-memory maps.
///
/// Clones share the same underlying state, so a test can hand one handle to
/// a sampler or controller and keep another to inspect writes afterwards.
#[derive(Debug, Default, Clone)]
pub struct MockFs {
    inner: Arc<Mutex<Inner>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content. Parent directories are created
    /// implicitly.
    pub fn add_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) -> &Self {
        let path = path.into();
        let mut inner = self.inner.lock().unwrap();
        let mut parent = path.parent();
        while let Some(dir) = parent {
            inner.directories.insert(dir.to_path_buf());
            parent = dir.parent();
        }
        inner.files.insert(path, content.into());
        self
    }

    /// Adds an empty directory (and its ancestors).
    pub fn add_dir(&self, path: impl Into<PathBuf>) -> &Self {
        let path = path.into();
        let mut inner = self.inner.lock().unwrap();
        let mut parent = path.parent();
        while let Some(dir) = parent {
            inner.directories.insert(dir.to_path_buf());
            parent = dir.parent();
        }
        inner.directories.insert(path);
        self
    }

    /// Makes every subsequent write to `path` fail with `PermissionDenied`,
    /// simulating a kernel rejection of a control-file value.
    pub fn deny_writes(&self, path: impl Into<PathBuf>) -> &Self {
        self.inner.lock().unwrap().write_denied.insert(path.into());
        self
    }

    /// Returns the current content of a file, if present.
    pub fn file_content(&self, path: impl AsRef<Path>) -> Option<String> {
        self.inner.lock().unwrap().files.get(path.as_ref()).cloned()
    }

    /// Adds the standard `/proc/[pid]` files for a fake process.
    pub fn add_process(&self, proc_root: &Path, pid: u32, stat: &str, status: &str, io: &str) -> &Self {
        let base = proc_root.join(pid.to_string());
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("status"), status);
        self.add_file(base.join("io"), io);
        self
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.inner
            .lock()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.files.contains_key(path) || inner.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let inner = self.inner.lock().unwrap();
        if !inner.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory: {}", path.display()),
            ));
        }
        let mut entries: Vec<PathBuf> = inner
            .files
            .keys()
            .chain(inner.directories.iter())
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();
        entries.sort();
        entries.dedup();
        Ok(entries)
    }

    fn write_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.write_denied.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("write rejected: {}", path.display()),
            ));
        }
        let parent_exists = path
            .parent()
            .is_some_and(|p| inner.directories.contains(p));
        if !inner.files.contains_key(path) && !parent_exists {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            ));
        }
        inner.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("directory exists: {}", path.display()),
            ));
        }
        inner.directories.insert(path.to_path_buf());
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.directories.remove(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory: {}", path.display()),
            ));
        }
        inner.files.retain(|p, _| !p.starts_with(path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file_creates_parents() {
        let fs = MockFs::new();
        fs.add_file("/proc/42/stat", "content");
        assert!(fs.exists(Path::new("/proc/42/stat")));
        assert!(fs.exists(Path::new("/proc/42")));
        assert!(fs.exists(Path::new("/proc")));
    }

    #[test]
    fn test_read_missing_file() {
        let fs = MockFs::new();
        let err = fs.read_to_string(Path::new("/proc/1/stat")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_write_into_existing_dir() {
        let fs = MockFs::new();
        fs.add_dir("/sys/fs/cgroup/test");
        fs.write_string(Path::new("/sys/fs/cgroup/test/cgroup.procs"), "1234")
            .unwrap();
        assert_eq!(
            fs.file_content("/sys/fs/cgroup/test/cgroup.procs").unwrap(),
            "1234"
        );
    }

    #[test]
    fn test_write_without_parent_fails() {
        let fs = MockFs::new();
        let err = fs
            .write_string(Path::new("/sys/fs/cgroup/nope/cpu.max"), "x")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_deny_writes() {
        let fs = MockFs::new();
        fs.add_file("/sys/fs/cgroup/test/cpu.max", "max 100000");
        fs.deny_writes("/sys/fs/cgroup/test/cpu.max");
        let err = fs
            .write_string(Path::new("/sys/fs/cgroup/test/cpu.max"), "50000 100000")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_clones_share_state() {
        let fs = MockFs::new();
        let handle = fs.clone();
        fs.add_dir("/sys/fs/cgroup/shared");
        handle
            .write_string(Path::new("/sys/fs/cgroup/shared/cgroup.procs"), "7")
            .unwrap();
        assert_eq!(fs.file_content("/sys/fs/cgroup/shared/cgroup.procs").unwrap(), "7");
    }

    #[test]
    fn test_dir_lifecycle() {
        let fs = MockFs::new();
        fs.add_dir("/sys/fs/cgroup");
        fs.create_dir(Path::new("/sys/fs/cgroup/g1")).unwrap();
        assert!(fs.create_dir(Path::new("/sys/fs/cgroup/g1")).is_err());
        fs.add_file("/sys/fs/cgroup/g1/cgroup.procs", "");
        fs.remove_dir(Path::new("/sys/fs/cgroup/g1")).unwrap();
        assert!(!fs.exists(Path::new("/sys/fs/cgroup/g1/cgroup.procs")));
    }
}
