//! A segmented, append-only, checksum-framed on-disk log.
//!
//! The log is addressed by [`address::LogAddress`] rather than by byte
//! offset: each address maps deterministically to one segment
//! (`address / records_per_segment`), and segments are never rewritten in
//! place except by explicit [`engine::StreamLog::compact`]. See
//! [`engine::Engine`] for the operations surface and [`repo::Repo`] for the
//! storage backend seam.

use std::path::PathBuf;

pub mod address;
pub mod engine;
pub mod error;
mod frame;
mod manager;
pub mod record;
pub mod repo;
mod segment;
#[cfg(feature = "test")]
pub mod test_support;
mod varint;

pub use crate::address::{LogAddress, SegmentNumber, StreamId};
pub use crate::engine::{Engine, FileBackedLog, InMemoryLog, StreamLog};
pub use crate::record::{DataType, LogData};

/// The log format version written by this build, and the maximum version a
/// [`FileBackedLog`]/[`InMemoryLog`] opened with default [`Options`] will
/// accept.
pub const DEFAULT_LOG_FORMAT_VERSION: u32 = 1;

/// Default number of records per segment (`RECORDS_PER_LOG_FILE`).
pub const DEFAULT_RECORDS_PER_SEGMENT: u64 = 10_000;

/// [`Engine`] options.
#[derive(Clone, Debug)]
pub struct Options {
    /// Directory holding the segment files. Ignored by [`InMemoryLog`].
    ///
    /// Default: `"."`
    pub log_dir: PathBuf,
    /// Skip checksum verification on read and on segment-open scan.
    ///
    /// A segment written with verification enabled cannot be opened by an
    /// engine configured with `no_verify: true`; see
    /// [`error::OpenError::VerifyChecksumRequired`].
    ///
    /// Default: `false`
    pub no_verify: bool,
    /// Number of addresses that map to a single segment
    /// (`RECORDS_PER_LOG_FILE`).
    ///
    /// Default: [`DEFAULT_RECORDS_PER_SEGMENT`]
    pub records_per_segment: u64,
    /// The log format version to write, and the maximum supported version.
    ///
    /// Default: [`DEFAULT_LOG_FORMAT_VERSION`]
    pub version: u32,
    /// The `|pending| * threshold >= |known| - |trimmed|` multiplier that
    /// decides whether a segment is due for compaction.
    ///
    /// Default: `20.0`
    pub compact_threshold: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("."),
            no_verify: false,
            records_per_segment: DEFAULT_RECORDS_PER_SEGMENT,
            version: DEFAULT_LOG_FORMAT_VERSION,
            compact_threshold: 20.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_sane() {
        let opts = Options::default();
        assert_eq!(opts.records_per_segment, DEFAULT_RECORDS_PER_SEGMENT);
        assert!(!opts.no_verify);
        assert_eq!(opts.version, DEFAULT_LOG_FORMAT_VERSION);
    }

    #[test]
    fn in_memory_log_opens_with_defaults() {
        let engine = InMemoryLog::in_memory(&Options::default()).unwrap();
        engine.close().unwrap();
    }
}
