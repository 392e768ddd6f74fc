//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait allows the sampler and the cgroup controller to work
//! with the real `/proc` and `/sys/fs/cgroup` trees on Linux, or with a mock
//! implementation for testing on macOS or in CI.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Abstraction for filesystem operations.
///
/// Read operations serve the `/proc` sampler; write operations serve the
/// cgroup controller, which drives the kernel by writing into control files
/// and creating/removing group directories.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Writes a value into an existing file, replacing its contents.
    ///
    /// Control files are never created by this call: the kernel materializes
    /// them as soon as the group directory exists.
    fn write_string(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Creates a single directory. The parent must already exist.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Removes a single directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
}

/// Real filesystem implementation that delegates to `std::fs`.
///
/// Use this in production to access the actual `/proc` and cgroup trees.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn write_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        // O_TRUNC on a cgroup interface file is a no-op, but it matters for
        // regular files when the mock is swapped for the real tree in tests.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(contents.as_bytes())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_real_fs_read_to_string() {
        let fs = RealFs::new();
        let cargo_toml = env::current_dir().unwrap().join("Cargo.toml");
        let content = fs.read_to_string(&cargo_toml).unwrap();
        assert!(content.contains("[package]"));
    }

    #[test]
    fn test_real_fs_exists() {
        let fs = RealFs::new();
        let cargo_toml = env::current_dir().unwrap().join("Cargo.toml");
        assert!(fs.exists(&cargo_toml));
        assert!(!fs.exists(Path::new("/nonexistent/path/12345")));
    }

    #[test]
    fn test_real_fs_dir_lifecycle() {
        let fs = RealFs::new();
        let dir = tempfile::tempdir().unwrap();
        let group = dir.path().join("group-a");
        fs.create_dir(&group).unwrap();
        assert!(fs.exists(&group));
        assert!(fs.create_dir(&group).is_err());
        let entries = fs.read_dir(dir.path()).unwrap();
        assert_eq!(entries, vec![group.clone()]);
        fs.remove_dir(&group).unwrap();
        assert!(!fs.exists(&group));
    }

    #[test]
    fn test_real_fs_write_string_requires_existing_file() {
        let fs = RealFs::new();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cpu.max");
        assert!(fs.write_string(&file, "100000 100000").is_err());
        std::fs::write(&file, "max 100000").unwrap();
        fs.write_string(&file, "50000 100000").unwrap();
        assert_eq!(fs.read_to_string(&file).unwrap(), "50000 100000");
    }
}
