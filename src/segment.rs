//! A single segment's three files: `<base>.log`, `<base>.log.trimmed`,
//! `<base>.log.pending`.
//!
//! [`SegmentHandle`] owns the writers for all three and the in-memory
//! `known`/`trimmed`/`pending` address sets populated by scanning them on
//! open. Per the concurrency model, the compound "is this address already
//! spoken for" check and the set insert that follows it are deliberately two
//! separate critical sections, not one atomic operation: the engine relies
//! on its caller never issuing two concurrent appends for the same address
//! (single-writer-per-address, enforced by the sequencer upstream), not on
//! this handle serializing them itself.

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::address::SegmentKey;
use crate::error::{AppendError, Corruption, OpenError, ReadError};
use crate::frame::{decode_frame, decode_record, encode_frame, encode_record};
use crate::record::{FileHeader, LogData, LogEntry, TrimEntry};
use crate::repo::{FileLike, Repo};

/// An append-only writer plus its cached length, so callers don't need an
/// extra `stat` per write to know the segment's current size.
struct Channel<W> {
    writer: W,
    size: u64,
}

impl<W: Write + FileLike> Channel<W> {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.size += bytes.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.writer.sync()
    }
}

pub(crate) struct SegmentHandle<R: Repo> {
    repo: R,
    key: SegmentKey,
    data_name: String,
    trimmed_name: String,
    pending_name: String,
    version: u32,
    /// Whether this segment's records are checksum-verified on read/scan:
    /// `header.verify_checksum && !engine.no_verify`.
    verify: bool,
    /// `RECORDS_PER_LOG_FILE`: compaction only runs once
    /// `|known| + |trimmed|` reaches this count.
    records_per_segment: u64,

    data: Mutex<Channel<R::Writer>>,
    trimmed_ch: Mutex<Channel<R::Writer>>,
    pending_ch: Mutex<Channel<R::Writer>>,

    known: Mutex<HashSet<u64>>,
    trimmed_set: Mutex<HashSet<u64>>,
    pending_set: Mutex<HashSet<u64>>,
}

fn read_all<R: Repo>(repo: &R, name: &str) -> io::Result<Vec<u8>> {
    let mut reader = repo.open_read(name)?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Read exactly `len` bytes (or up to EOF if the file is shorter), never
/// more. Used to bound a read to a size snapshotted under the writer's lock.
fn read_up_to<R: Repo>(repo: &R, name: &str, len: u64) -> io::Result<Vec<u8>> {
    let reader = repo.open_read(name)?;
    let mut buf = Vec::new();
    reader.take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

impl<R: Repo> SegmentHandle<R> {
    /// Open an existing segment or create a fresh one, scanning its data
    /// file to populate `known` and its trim files to populate
    /// `trimmed`/`pending`.
    pub(crate) fn open(
        repo: R,
        key: SegmentKey,
        version: u32,
        records_per_segment: u64,
        no_verify: bool,
    ) -> Result<Arc<Self>, OpenError> {
        let data_name = format!("{}.log", key.base_name());
        let trimmed_name = format!("{}.log.trimmed", key.base_name());
        let pending_name = format!("{}.log.pending", key.base_name());

        let mut known = HashSet::new();
        let verify;

        if repo.exists(&data_name) {
            let bytes = read_all(&repo, &data_name)?;
            let mut cursor = bytes.as_slice();

            let header_body = decode_frame(&mut cursor, true)
                .map_err(|source| OpenError::Corruption { path: data_name.clone(), source })?
                .ok_or_else(|| OpenError::Corruption {
                    path: data_name.clone(),
                    source: Corruption::MalformedRecord("segment has no file header"),
                })?;
            let header = FileHeader::decode(&header_body)
                .map_err(|source| OpenError::Corruption { path: data_name.clone(), source })?;

            if header.version > version {
                return Err(OpenError::VersionMismatch {
                    path: data_name,
                    found: header.version,
                    expected: version,
                });
            }
            if header.verify_checksum && no_verify {
                return Err(OpenError::VerifyChecksumRequired { path: data_name });
            }
            verify = header.verify_checksum && !no_verify;

            loop {
                match decode_record(&mut cursor, verify) {
                    Ok(None) => break,
                    Ok(Some(body)) => {
                        let entry = LogEntry::decode(&body)
                            .map_err(|source| OpenError::Corruption { path: data_name.clone(), source })?;
                        known.insert(entry.global_address);
                    }
                    Err(source) => return Err(OpenError::Corruption { path: data_name.clone(), source }),
                }
            }
        } else {
            verify = !no_verify;
            let header = FileHeader {
                version,
                verify_checksum: verify,
            };
            let mut w = repo.open_append(&data_name)?;
            w.write_all(&encode_frame(&header.encode()))?;
            w.sync()?;
        }

        let trimmed_set = Self::scan_trim_file(&repo, &trimmed_name)?;
        let pending_set = Self::scan_trim_file(&repo, &pending_name)?;

        let data = Channel {
            size: repo.len(&data_name)?,
            writer: repo.open_append(&data_name)?,
        };
        let trimmed_ch = Channel {
            size: repo.len(&trimmed_name).unwrap_or(0),
            writer: repo.open_append(&trimmed_name)?,
        };
        let pending_ch = Channel {
            size: repo.len(&pending_name).unwrap_or(0),
            writer: repo.open_append(&pending_name)?,
        };

        Ok(Arc::new(Self {
            repo,
            key,
            data_name,
            trimmed_name,
            pending_name,
            version,
            verify,
            records_per_segment,
            data: Mutex::new(data),
            trimmed_ch: Mutex::new(trimmed_ch),
            pending_ch: Mutex::new(pending_ch),
            known: Mutex::new(known),
            trimmed_set: Mutex::new(trimmed_set),
            pending_set: Mutex::new(pending_set),
        }))
    }

    /// Trim files are best-effort bookkeeping: a missing file means no
    /// entries yet, and a truncated tail just stops the scan early, same as
    /// the data file's record scan.
    fn scan_trim_file(repo: &R, name: &str) -> io::Result<HashSet<u64>> {
        let mut set = HashSet::new();
        if !repo.exists(name) {
            return Ok(set);
        }
        let bytes = read_all(repo, name)?;
        let mut cursor = bytes.as_slice();
        while let Some(entry) = TrimEntry::decode(&mut cursor)? {
            set.insert(entry.address as u64);
        }
        Ok(set)
    }

    pub(crate) fn key(&self) -> SegmentKey {
        self.key
    }

    fn is_known(&self, address: u64) -> bool {
        self.known.lock().unwrap().contains(&address)
    }

    /// Whether `address` has been folded into the terminal `trimmed` state,
    /// or merely has a pending trim recorded against it. Used for
    /// append-rejection and trim-idempotency, where either is sufficient
    /// reason not to write: a plain-scan `read`, however, must not consult
    /// `pending` (see [`Self::read`]).
    fn is_trimmed(&self, address: u64) -> bool {
        self.trimmed_set.lock().unwrap().contains(&address) || self.pending_set.lock().unwrap().contains(&address)
    }

    /// Current length of the data file, snapshotted under the writer's lock.
    pub(crate) fn size_data(&self) -> u64 {
        self.data.lock().unwrap().size
    }

    /// Current length of the `.trimmed` file, snapshotted under its lock.
    pub(crate) fn size_trimmed(&self) -> u64 {
        self.trimmed_ch.lock().unwrap().size
    }

    /// Current length of the `.pending` file, snapshotted under its lock.
    pub(crate) fn size_pending(&self) -> u64 {
        self.pending_ch.lock().unwrap().size
    }

    /// Append `entry` at `address`. Rejects the write if the address is
    /// already known or already trimmed; otherwise writes the record and
    /// marks the address known.
    pub(crate) fn append(&self, address: u64, entry: &LogEntry) -> Result<(), AppendError> {
        if self.is_known(address) || self.is_trimmed(address) {
            return Err(AppendError::Overwrite(crate::address::LogAddress::untagged(address)));
        }
        let bytes = encode_record(&entry.encode());
        self.data.lock().unwrap().append(&bytes)?;
        self.known.lock().unwrap().insert(address);
        Ok(())
    }

    /// Read the record at `address` by a pure physical scan of the data
    /// file, bounded to the size snapshotted under the writer's lock (the
    /// mechanism by which a read is guaranteed to see every append whose
    /// handle-mutex release preceded it). `Ok(None)` covers both "never
    /// written" and "trimmed" (folded into the terminal `trimmed_set` by a
    /// prior [`Self::compact`]): a merely *pending* trim does not suppress a
    /// read, since the record physically still resides in the data file
    /// until compaction rewrites it away.
    pub(crate) fn read(&self, address: u64) -> Result<Option<LogData>, ReadError> {
        if !self.is_known(address) || self.trimmed_set.lock().unwrap().contains(&address) {
            return Ok(None);
        }
        let size = self.size_data();
        let bytes = read_up_to(&self.repo, &self.data_name, size)?;
        let mut cursor = bytes.as_slice();

        let _header = decode_frame(&mut cursor, true).map_err(|source| ReadError::Corruption {
            address: crate::address::LogAddress::untagged(address),
            source,
        })?;

        loop {
            match decode_record(&mut cursor, self.verify) {
                Ok(None) => return Ok(None),
                Ok(Some(body)) => {
                    let entry = LogEntry::decode(&body).map_err(|source| ReadError::Corruption {
                        address: crate::address::LogAddress::untagged(address),
                        source,
                    })?;
                    if entry.global_address == address {
                        return Ok(Some(entry));
                    }
                }
                Err(source) => {
                    return Err(ReadError::Corruption {
                        address: crate::address::LogAddress::untagged(address),
                        source,
                    })
                }
            }
        }
    }

    /// Record a trim intent for `address` in the `.pending` file.
    /// Best-effort: I/O errors are logged and swallowed rather than
    /// propagated, per the trim error-handling rule.
    pub(crate) fn trim(&self, address: u64) {
        if self.is_trimmed(address) {
            return;
        }
        let entry = TrimEntry::new(address);
        let mut buf = Vec::new();
        entry.encode(&mut buf);
        if let Err(err) = self.pending_ch.lock().unwrap().append(&buf) {
            log::warn!(
                "trim({address}) on segment {}: failed to persist pending trim: {err}",
                self.key
            );
            return;
        }
        self.pending_set.lock().unwrap().insert(address);
    }

    pub(crate) fn known_count(&self) -> usize {
        self.known.lock().unwrap().len()
    }

    pub(crate) fn trimmed_count(&self) -> usize {
        self.trimmed_set.lock().unwrap().len()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending_set.lock().unwrap().len()
    }

    /// Whether every address in this segment's range has been written or
    /// trimmed (`|known| + |trimmed| == records_per_segment`). Compaction
    /// only ever applies to a full segment; one still being actively
    /// appended to is left alone.
    fn is_full(&self) -> bool {
        let total = self.known_count() as u64 + self.trimmed_count() as u64;
        total >= self.records_per_segment
    }

    /// `|pending| * threshold >= |known| - |trimmed|`: whether this segment
    /// has accumulated enough pending trims, relative to its live record
    /// count, to be worth compacting. Never true for a segment that isn't
    /// yet full.
    pub(crate) fn needs_compaction(&self, threshold: f64) -> bool {
        if !self.is_full() {
            return false;
        }
        let known = self.known_count() as f64;
        let trimmed = self.trimmed_count() as f64;
        let pending = self.pending_count() as f64;
        let live = (known - trimmed).max(0.0);
        pending * threshold >= live
    }

    /// Fold pending trims into `trimmed`, rewrite the data file to drop
    /// trimmed records, and reset the pending file to empty. A no-op on a
    /// segment that isn't yet full.
    pub(crate) fn compact(&self) -> io::Result<()> {
        if !self.is_full() {
            return Ok(());
        }
        let pending_snapshot: Vec<u64> = self.pending_set.lock().unwrap().iter().copied().collect();
        if pending_snapshot.is_empty() {
            return Ok(());
        }

        {
            let mut trimmed_ch = self.trimmed_ch.lock().unwrap();
            let mut trimmed_set = self.trimmed_set.lock().unwrap();
            for address in &pending_snapshot {
                let entry = TrimEntry::new(*address);
                let mut buf = Vec::new();
                entry.encode(&mut buf);
                trimmed_ch.append(&buf)?;
                trimmed_set.insert(*address);
            }
        }

        self.rewrite_data_file()?;

        self.repo.remove(&self.pending_name).ok();
        let new_pending = Channel {
            writer: self.repo.open_append(&self.pending_name)?,
            size: 0,
        };
        *self.pending_ch.lock().unwrap() = new_pending;
        self.pending_set.lock().unwrap().clear();

        Ok(())
    }

    fn rewrite_data_file(&self) -> io::Result<()> {
        let trimmed_set = self.trimmed_set.lock().unwrap().clone();
        let bytes = read_all(&self.repo, &self.data_name)?;
        let mut cursor = bytes.as_slice();

        let header_body = decode_frame(&mut cursor, true)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing segment header"))?;

        let mut surviving = Vec::new();
        loop {
            match decode_record(&mut cursor, self.verify) {
                Ok(None) => break,
                Ok(Some(body)) => {
                    let entry = LogEntry::decode(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    if !trimmed_set.contains(&entry.global_address) {
                        surviving.push(entry);
                    }
                }
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }
        }

        let tmp_name = format!("{}.compact.tmp", self.key.base_name());
        let repo = self.repo.clone();
        let cleanup_tmp = scopeguard::guard(tmp_name.clone(), move |tmp_name| {
            repo.remove(&tmp_name).ok();
        });
        {
            let mut tmp = self.repo.open_append(&tmp_name)?;
            tmp.write_all(&encode_frame(&header_body))?;
            for entry in &surviving {
                tmp.write_all(&encode_record(&entry.encode()))?;
            }
            tmp.sync()?;
        }
        self.repo.remove(&self.data_name).ok();
        self.repo.rename(&tmp_name, &self.data_name)?;
        scopeguard::ScopeGuard::into_inner(cleanup_tmp);

        let new_data = Channel {
            size: self.repo.len(&self.data_name)?,
            writer: self.repo.open_append(&self.data_name)?,
        };
        *self.data.lock().unwrap() = new_data;

        let mut known = self.known.lock().unwrap();
        known.retain(|addr| !trimmed_set.contains(addr));

        Ok(())
    }

    pub(crate) fn sync(&self) -> io::Result<()> {
        self.data.lock().unwrap().sync()?;
        self.trimmed_ch.lock().unwrap().sync()?;
        self.pending_ch.lock().unwrap().sync()?;
        Ok(())
    }

    pub(crate) fn version(&self) -> u32 {
        self.version
    }
}
