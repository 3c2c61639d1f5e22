// TailSleuth - platform/fs.rs
//
// Filesystem abstraction.
// Lets snapshot persistence be tested against failing or recording
// filesystems without touching the real disk.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

/// The handful of filesystem operations snapshot persistence needs.
pub trait Filesystem: Send + Sync {
    /// Create (or truncate) `path` for writing, creating missing parent
    /// directories first.
    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Open `path` for reading.
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Delete `path`.  Missing files are not an error.
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// `Filesystem` backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFilesystem;

impl Filesystem for RealFilesystem {
    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(fs::File::create(path)?))
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
