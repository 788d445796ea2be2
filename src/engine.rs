//! The log engine: the public `append`/`read`/`trim`/`compact`/`sync`/`close`
//! surface, implemented generically over a [`Repo`] backend.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::address::{LogAddress, SegmentKey};
use crate::error::{AppendError, OpenError, ReadError};
use crate::manager::SegmentManager;
use crate::record::{DataType, LogData, LogEntry};
use crate::repo::{Fs, Memory, Repo};
use crate::Options;

/// The operations a log engine exposes, independent of its storage backend.
pub trait StreamLog {
    /// Append `payload` at `address`. Fails with
    /// [`AppendError::Overwrite`] if `address` already has a record, or has
    /// been trimmed.
    fn append(&self, address: LogAddress, payload: Vec<u8>) -> Result<(), AppendError>;

    /// Read the record at `address`. `Ok(None)` means the address has never
    /// been written, or has been trimmed; this is not an error.
    fn read(&self, address: LogAddress) -> Result<Option<LogData>, ReadError>;

    /// Mark `address` as trimmed. Best-effort: failures are logged, not
    /// propagated.
    fn trim(&self, address: LogAddress);

    /// Fold accumulated trims into permanent removal for every segment past
    /// the compaction threshold.
    fn compact(&self) -> std::io::Result<()>;

    /// Flush all dirty segments to stable storage.
    fn sync(&self) -> std::io::Result<()>;

    /// Flush and release all segment handles.
    fn close(self) -> std::io::Result<()>;

    /// Hook invoked after a successful `read`, mirroring the reference
    /// client's release callback. A no-op by default; present so callers
    /// that need reference-counted buffer release have a seam to use.
    fn release(&self, _address: LogAddress, _data: &LogData) {}
}

/// A log engine backed by storage implementation `R`.
pub struct Engine<R: Repo> {
    manager: SegmentManager<R>,
    compact_threshold: f64,
    no_verify: bool,
    /// Segments touched since the last `sync`, so `sync` need not flush
    /// every open segment unconditionally.
    dirty: Mutex<HashSet<SegmentKey>>,
}

/// A filesystem-backed engine.
pub type FileBackedLog = Engine<Fs>;

/// An in-memory engine, for tests.
pub type InMemoryLog = Engine<Memory>;

impl FileBackedLog {
    /// Open (or create) a log rooted at `opts.log_dir`, verifying every
    /// existing segment's header before returning.
    pub fn open(opts: &Options) -> Result<Self, OpenError> {
        let repo = Fs::new(&opts.log_dir).map_err(OpenError::Io)?;
        Self::with_repo(repo, opts)
    }
}

impl InMemoryLog {
    pub fn in_memory(opts: &Options) -> Result<Self, OpenError> {
        Self::with_repo(Memory::new(), opts)
    }
}

impl<R: Repo> Engine<R> {
    fn with_repo(repo: R, opts: &Options) -> Result<Self, OpenError> {
        let manager = SegmentManager::new(repo, opts.records_per_segment, opts.version, opts.no_verify);
        manager.verify_logs()?;
        Ok(Self {
            manager,
            compact_threshold: opts.compact_threshold,
            no_verify: opts.no_verify,
            dirty: Mutex::new(HashSet::new()),
        })
    }

    fn mark_dirty(&self, key: SegmentKey) {
        self.dirty.lock().unwrap().insert(key);
    }
}

fn map_open_err_append(address: LogAddress, err: OpenError) -> AppendError {
    match err {
        OpenError::Io(e) => AppendError::Io(e),
        OpenError::Corruption { source, .. } => AppendError::Corruption { address, source },
        OpenError::VersionMismatch { found, expected, .. } => AppendError::VersionMismatch { address, found, expected },
        OpenError::VerifyChecksumRequired { .. } => AppendError::VerifyChecksumRequired { address },
    }
}

fn map_open_err_read(address: LogAddress, err: OpenError) -> ReadError {
    match err {
        OpenError::Io(e) => ReadError::Io(e),
        OpenError::Corruption { source, .. } => ReadError::Corruption { address, source },
        OpenError::VersionMismatch { found, expected, .. } => ReadError::VersionMismatch { address, found, expected },
        OpenError::VerifyChecksumRequired { .. } => ReadError::VerifyChecksumRequired { address },
    }
}

impl<R: Repo> StreamLog for Engine<R> {
    fn append(&self, address: LogAddress, payload: Vec<u8>) -> Result<(), AppendError> {
        let handle = self
            .manager
            .get_or_open(&address)
            .map_err(|e| map_open_err_append(address, e))?;

        let entry = LogEntry {
            data_type: DataType::Data,
            global_address: address.address,
            payload,
            rank: 0,
            commit_flag: true,
            streams: address.stream.into_iter().collect(),
            backpointers: Default::default(),
            logical_addresses: Default::default(),
        };

        handle.append(address.address, &entry)?;
        self.mark_dirty(handle.key());
        Ok(())
    }

    fn read(&self, address: LogAddress) -> Result<Option<LogData>, ReadError> {
        let handle = self
            .manager
            .get_or_open(&address)
            .map_err(|e| map_open_err_read(address, e))?;
        let result = handle.read(address.address)?;
        if let Some(data) = &result {
            self.release(address, data);
        }
        Ok(result)
    }

    fn trim(&self, address: LogAddress) {
        match self.manager.get_or_open(&address) {
            Ok(handle) => {
                handle.trim(address.address);
                self.mark_dirty(handle.key());
            }
            Err(err) => {
                log::warn!("trim({address:?}): failed to open segment: {err}");
            }
        }
    }

    fn compact(&self) -> std::io::Result<()> {
        for handle in self.manager.open_segments() {
            if handle.needs_compaction(self.compact_threshold) {
                if let Err(err) = handle.compact() {
                    log::error!("compact() on segment {}: {err}", handle.key());
                }
            }
        }
        Ok(())
    }

    fn sync(&self) -> std::io::Result<()> {
        let keys: Vec<SegmentKey> = self.dirty.lock().unwrap().drain().collect();
        for key in keys {
            for handle in self.manager.open_segments() {
                if handle.key() == key {
                    handle.sync()?;
                }
            }
        }
        Ok(())
    }

    fn close(self) -> std::io::Result<()> {
        self.sync()?;
        for handle in self.manager.open_segments() {
            handle.sync()?;
        }
        Ok(())
    }
}

impl<R: Repo> Engine<R> {
    /// Whether this engine was configured to skip checksum verification.
    pub fn no_verify(&self) -> bool {
        self.no_verify
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> Options {
        Options {
            compact_threshold: 2.0,
            records_per_segment: 4,
            ..Options::default()
        }
    }

    #[test]
    fn append_and_read_round_trip() {
        let engine = InMemoryLog::in_memory(&opts()).unwrap();
        let addr = LogAddress::untagged(0);
        engine.append(addr, b"hello".to_vec()).unwrap();
        let data = engine.read(addr).unwrap().unwrap();
        assert_eq!(data.payload, b"hello");
    }

    #[test]
    fn overwrite_is_rejected() {
        let engine = InMemoryLog::in_memory(&opts()).unwrap();
        let addr = LogAddress::untagged(1);
        engine.append(addr, b"a".to_vec()).unwrap();
        let err = engine.append(addr, b"b".to_vec()).unwrap_err();
        assert!(matches!(err, AppendError::Overwrite(_)));
    }

    #[test]
    fn addresses_roll_across_segments() {
        let engine = InMemoryLog::in_memory(&opts()).unwrap();
        for i in 0..10u64 {
            engine.append(LogAddress::untagged(i), i.to_be_bytes().to_vec()).unwrap();
        }
        for i in 0..10u64 {
            let data = engine.read(LogAddress::untagged(i)).unwrap().unwrap();
            assert_eq!(data.payload, i.to_be_bytes().to_vec());
        }
    }

    #[test]
    fn trim_and_compact_removes_record() {
        let engine = InMemoryLog::in_memory(&opts()).unwrap();
        for i in 0..4u64 {
            engine.append(LogAddress::untagged(i), vec![i as u8]).unwrap();
        }
        engine.trim(LogAddress::untagged(0));
        engine.trim(LogAddress::untagged(1));
        engine.compact().unwrap();
        assert_eq!(engine.read(LogAddress::untagged(0)).unwrap(), None);
        assert_eq!(engine.read(LogAddress::untagged(2)).unwrap().unwrap().payload, vec![2]);
    }

    #[test]
    fn tagged_and_untagged_addresses_are_independent() {
        let engine = InMemoryLog::in_memory(&opts()).unwrap();
        let stream = crate::address::StreamId::new_v4();
        engine.append(LogAddress::untagged(0), b"untagged".to_vec()).unwrap();
        engine.append(LogAddress::tagged(stream, 0), b"tagged".to_vec()).unwrap();
        assert_eq!(engine.read(LogAddress::untagged(0)).unwrap().unwrap().payload, b"untagged");
        assert_eq!(
            engine.read(LogAddress::tagged(stream, 0)).unwrap().unwrap().payload,
            b"tagged"
        );
    }

    #[test]
    fn sync_and_close_succeed() {
        let engine = InMemoryLog::in_memory(&opts()).unwrap();
        engine.append(LogAddress::untagged(0), b"x".to_vec()).unwrap();
        engine.sync().unwrap();
        engine.close().unwrap();
    }
}
