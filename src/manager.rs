//! Maps addresses to open [`SegmentHandle`]s, creating them on first touch.
//!
//! The manager's own mutex only guards the handle map itself (the
//! create-or-fetch decision); once a handle is obtained, callers operate on
//! it independently of the manager and of each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::address::{LogAddress, SegmentKey};
use crate::error::OpenError;
use crate::repo::Repo;
use crate::segment::SegmentHandle;

pub(crate) struct SegmentManager<R: Repo> {
    repo: R,
    records_per_segment: u64,
    version: u32,
    no_verify: bool,
    handles: Mutex<HashMap<SegmentKey, Arc<SegmentHandle<R>>>>,
}

impl<R: Repo> SegmentManager<R> {
    pub(crate) fn new(repo: R, records_per_segment: u64, version: u32, no_verify: bool) -> Self {
        Self {
            repo,
            records_per_segment,
            version,
            no_verify,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get_or_open(&self, addr: &LogAddress) -> Result<Arc<SegmentHandle<R>>, OpenError> {
        let key = SegmentKey::for_address(addr, self.records_per_segment);

        if let Some(handle) = self.handles.lock().unwrap().get(&key) {
            return Ok(handle.clone());
        }

        let handle = SegmentHandle::open(
            self.repo.clone(),
            key,
            self.version,
            self.records_per_segment,
            self.no_verify,
        )?;

        let mut handles = self.handles.lock().unwrap();
        Ok(handles.entry(key).or_insert(handle).clone())
    }

    /// Every segment currently open in this manager.
    pub(crate) fn open_segments(&self) -> Vec<Arc<SegmentHandle<R>>> {
        self.handles.lock().unwrap().values().cloned().collect()
    }

    /// Validate that every segment on disk opens cleanly: used at startup to
    /// surface version mismatches or corrupt headers before the engine
    /// accepts any traffic, rather than discovering them lazily on first
    /// access.
    pub(crate) fn verify_logs(&self) -> Result<(), OpenError> {
        for name in self.repo.list_segments().map_err(OpenError::Io)? {
            let Some(key) = parse_segment_base(&name) else {
                continue;
            };
            self.get_or_open(&LogAddress::new(key.stream, key.number.0 * self.records_per_segment))?;
        }
        Ok(())
    }
}

/// Recover a [`SegmentKey`] from a segment file name, accepting any of the
/// three suffixes (`.log`, `.log.trimmed`, `.log.pending`).
fn parse_segment_base(file_name: &str) -> Option<SegmentKey> {
    let base = file_name
        .strip_suffix(".log.pending")
        .or_else(|| file_name.strip_suffix(".log.trimmed"))
        .or_else(|| file_name.strip_suffix(".log"))?;

    let (stream, number) = match base.rsplit_once('-') {
        Some((stream, number)) => (Some(crate::address::StreamId(stream.parse().ok()?)), number),
        None => (None, base),
    };
    let number = number.parse().ok()?;
    Some(SegmentKey {
        stream,
        number: crate::address::SegmentNumber(number),
    })
}
