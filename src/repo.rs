//! Storage backend abstraction.
//!
//! [`Repo`] is the seam between the engine and the filesystem, so tests can
//! run the full engine against an in-memory [`Memory`] backend without
//! touching disk. Grounded on the same split the teacher draws between its
//! real and in-memory segment repos.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// Extra operations a [`Repo::Writer`] must support beyond [`std::io::Write`].
pub trait FileLike {
    /// Flush data (and, where the backend supports it, metadata) to stable
    /// storage. Called by `Engine::sync`.
    fn sync(&mut self) -> io::Result<()>;
}

impl FileLike for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// A storage backend for segment files, named by their base file name (e.g.
/// `"42.log"`, `"stream-42.log.pending"`).
pub trait Repo: Clone + Send + Sync + 'static {
    type Writer: Write + FileLike + Send;
    type Reader: Read + Send;

    /// Open `name` for appending, creating it if it does not exist.
    fn open_append(&self, name: &str) -> io::Result<Self::Writer>;

    /// Open `name` for reading from the beginning.
    fn open_read(&self, name: &str) -> io::Result<Self::Reader>;

    /// Current length of `name` in bytes. Errors if it does not exist.
    fn len(&self, name: &str) -> io::Result<u64>;

    fn exists(&self, name: &str) -> bool;

    fn remove(&self, name: &str) -> io::Result<()>;

    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Every file name currently present (segment listing, used on startup
    /// to discover existing segments for `verify_logs`).
    fn list_segments(&self) -> io::Result<Vec<String>>;
}

/// Real filesystem-backed [`Repo`].
#[derive(Clone, Debug)]
pub struct Fs {
    root: PathBuf,
}

impl Fs {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Repo for Fs {
    type Writer = File;
    type Reader = File;

    fn open_append(&self, name: &str) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(self.path(name))
    }

    fn open_read(&self, name: &str) -> io::Result<File> {
        File::open(self.path(name))
    }

    fn len(&self, name: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.path(name))?.len())
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path(name))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to))
    }

    fn list_segments(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

/// A single in-memory file: bytes plus a read cursor for readers opened
/// against it.
#[derive(Default)]
struct Blob(Vec<u8>);

/// In-memory [`Repo`] for tests. One [`Memory`] instance is one logical
/// directory; clones share the same backing map.
#[derive(Clone, Default)]
pub struct Memory {
    files: Arc<Mutex<HashMap<String, Arc<RwLock<Blob>>>>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, name: &str) -> Arc<RwLock<Blob>> {
        let mut files = self.files.lock().unwrap();
        files.entry(name.to_string()).or_default().clone()
    }
}

pub struct MemoryWriter {
    blob: Arc<RwLock<Blob>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.blob.write().unwrap().0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FileLike for MemoryWriter {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct MemoryReader {
    data: Vec<u8>,
    pos: usize,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Repo for Memory {
    type Writer = MemoryWriter;
    type Reader = MemoryReader;

    fn open_append(&self, name: &str) -> io::Result<MemoryWriter> {
        Ok(MemoryWriter {
            blob: self.get_or_create(name),
        })
    }

    fn open_read(&self, name: &str) -> io::Result<MemoryReader> {
        let files = self.files.lock().unwrap();
        let blob = files
            .get(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))?;
        Ok(MemoryReader {
            data: blob.read().unwrap().0.clone(),
            pos: 0,
        })
    }

    fn len(&self, name: &str) -> io::Result<u64> {
        let files = self.files.lock().unwrap();
        let blob = files
            .get(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))?;
        Ok(blob.read().unwrap().0.len() as u64)
    }

    fn exists(&self, name: &str) -> bool {
        self.files.lock().unwrap().contains_key(name)
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.files
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut files = self.files.lock().unwrap();
        let blob = files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, from.to_string()))?;
        files.insert(to.to_string(), blob);
        Ok(())
    }

    fn list_segments(&self) -> io::Result<Vec<String>> {
        Ok(self.files.lock().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trips_writes() {
        let repo = Memory::new();
        {
            let mut w = repo.open_append("a.log").unwrap();
            w.write_all(b"hello").unwrap();
        }
        assert_eq!(repo.len("a.log").unwrap(), 5);
        let mut r = repo.open_read("a.log").unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn memory_append_accumulates() {
        let repo = Memory::new();
        repo.open_append("a.log").unwrap().write_all(b"ab").unwrap();
        repo.open_append("a.log").unwrap().write_all(b"cd").unwrap();
        assert_eq!(repo.len("a.log").unwrap(), 4);
    }

    #[test]
    fn memory_rename_and_remove() {
        let repo = Memory::new();
        repo.open_append("a.pending").unwrap().write_all(b"x").unwrap();
        repo.rename("a.pending", "a.trimmed").unwrap();
        assert!(!repo.exists("a.pending"));
        assert!(repo.exists("a.trimmed"));
        repo.remove("a.trimmed").unwrap();
        assert!(!repo.exists("a.trimmed"));
    }

    #[test]
    fn fs_round_trips_writes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Fs::new(dir.path()).unwrap();
        repo.open_append("1.log").unwrap().write_all(b"segment").unwrap();
        assert_eq!(repo.len("1.log").unwrap(), 7);
        let mut buf = Vec::new();
        repo.open_read("1.log").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"segment");
    }
}
