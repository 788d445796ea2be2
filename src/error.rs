//! Error types surfaced by [`crate::engine`].
//!
//! `not-found` is deliberately not a variant here: per the spec it is a
//! normal outcome of [`crate::engine::Engine::read`], represented as
//! `Ok(None)`.

use std::io;

use thiserror::Error;

use crate::address::LogAddress;

/// A checksum mismatch, or a frame claiming an implausible length.
///
/// Distinct from a short read: a torn tail (last record partially written)
/// is reported as a graceful end-of-scan, never as corruption.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum Corruption {
    #[error("checksum mismatch")]
    Checksum,
    #[error("frame length {0} exceeds the maximum record size")]
    FrameTooLarge(u32),
    #[error("malformed record body: {0}")]
    MalformedRecord(&'static str),
}

/// Error returned by [`crate::engine::Engine::append`].
#[derive(Debug, Error)]
pub enum AppendError {
    /// `log_address` already has a materialized record, or is already
    /// trimmed. Never retried by the engine.
    #[error("address {0:?} is already present in the log")]
    Overwrite(LogAddress),
    #[error("data corruption in segment for {address:?}")]
    Corruption {
        address: LogAddress,
        #[source]
        source: Corruption,
    },
    #[error("segment for {address:?}: log format version {found} is newer than the supported version {expected}")]
    VersionMismatch {
        address: LogAddress,
        found: u32,
        expected: u32,
    },
    #[error("segment for {address:?}: header requires checksum verification, but the engine is configured with no_verify")]
    VerifyChecksumRequired { address: LogAddress },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Error returned by [`crate::engine::Engine::read`].
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("data corruption in segment for {address:?}")]
    Corruption {
        address: LogAddress,
        #[source]
        source: Corruption,
    },
    #[error("segment for {address:?}: log format version {found} is newer than the supported version {expected}")]
    VersionMismatch {
        address: LogAddress,
        found: u32,
        expected: u32,
    },
    #[error("segment for {address:?}: header requires checksum verification, but the engine is configured with no_verify")]
    VerifyChecksumRequired { address: LogAddress },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Error returned while opening or verifying segments at engine construction.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("segment {path}: log format version {found} is newer than the supported version {expected}")]
    VersionMismatch {
        path: String,
        found: u32,
        expected: u32,
    },
    #[error("segment {path}: header requests checksum verification, but the engine is configured with no_verify")]
    VerifyChecksumRequired { path: String },
    #[error("segment {path}: corrupt header")]
    Corruption {
        path: String,
        #[source]
        source: Corruption,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}
