//! On-disk record schemas: the segment's [`FileHeader`], the [`LogEntry`]
//! wrapped by every [`crate::frame`] record, and the [`TrimEntry`] written to
//! the `.pending`/`.trimmed` trim files.
//!
//! Encoding is hand-rolled rather than going through `serde`, mirroring how
//! the teacher encodes its own commit header (`commit.rs::Header`): a fixed,
//! deterministic field order, with length-prefixed variable-sized pieces.

use std::collections::{BTreeMap, BTreeSet};
use std::io;

use uuid::Uuid;

use crate::address::StreamId;
use crate::error::Corruption;
use crate::varint::{decode_varint, encode_varint};

/// The first record of every segment. Read during segment open; a mismatched
/// `version` is fatal, and if the engine requires verification but the
/// header says otherwise, the segment is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub verify_checksum: bool,
}

impl FileHeader {
    pub const ENCODED_LEN: usize = 4 + 1;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(self.verify_checksum as u8);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Corruption> {
        if buf.len() != Self::ENCODED_LEN {
            return Err(Corruption::MalformedRecord("file header has unexpected length"));
        }
        let version = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let verify_checksum = match buf[4] {
            0 => false,
            1 => true,
            _ => return Err(Corruption::MalformedRecord("file header verify_checksum is not a bool")),
        };
        Ok(Self { version, verify_checksum })
    }
}

/// Tag distinguishing the kind of record stored at an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    /// An ordinary data record.
    Data = 0,
    /// A hole-filling record (no payload written by the original client).
    Hole = 1,
    /// An explicitly empty record.
    Empty = 2,
    /// Marks the address as trimmed (reserved; trims are normally tracked
    /// out-of-band in `.pending`/`.trimmed`, not as data-file records).
    Trim = 3,
    /// A record carrying only rank/ordering metadata, no payload.
    RankOnly = 4,
}

impl DataType {
    fn from_u8(b: u8) -> Result<Self, Corruption> {
        match b {
            0 => Ok(Self::Data),
            1 => Ok(Self::Hole),
            2 => Ok(Self::Empty),
            3 => Ok(Self::Trim),
            4 => Ok(Self::RankOnly),
            _ => Err(Corruption::MalformedRecord("unknown data_type tag")),
        }
    }
}

/// The record wrapped by every framed [`crate::frame`] entry in a segment's
/// data file. Opaque to the engine except `global_address`, which must equal
/// the address the caller supplied to `append`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub data_type: DataType,
    pub global_address: u64,
    pub payload: Vec<u8>,
    pub rank: i64,
    pub commit_flag: bool,
    pub streams: BTreeSet<StreamId>,
    pub backpointers: BTreeMap<StreamId, i64>,
    pub logical_addresses: BTreeMap<StreamId, i64>,
}

/// `read`'s materialized result. Structurally identical to [`LogEntry`]: the
/// spec calls the caller-facing value `LogData` and the on-disk schema
/// `LogEntry`, but draws no distinction in shape between the two.
pub type LogData = LogEntry;

impl LogEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.data_type as u8);
        out.extend_from_slice(&self.global_address.to_be_bytes());
        out.extend_from_slice(&self.rank.to_be_bytes());
        out.push(self.commit_flag as u8);

        encode_varint(self.payload.len() as u64, &mut out);
        out.extend_from_slice(&self.payload);

        encode_varint(self.streams.len() as u64, &mut out);
        for stream in &self.streams {
            out.extend_from_slice(stream.0.as_bytes());
        }

        encode_map(&self.backpointers, &mut out);
        encode_map(&self.logical_addresses, &mut out);

        out
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, Corruption> {
        let data_type = take_u8(&mut buf)?;
        let data_type = DataType::from_u8(data_type)?;
        let global_address = take_u64(&mut buf)?;
        let rank = take_i64(&mut buf)?;
        let commit_flag = match take_u8(&mut buf)? {
            0 => false,
            1 => true,
            _ => return Err(Corruption::MalformedRecord("commit_flag is not a bool")),
        };

        let payload_len = take_varint(&mut buf)? as usize;
        if buf.len() < payload_len {
            return Err(Corruption::MalformedRecord("payload length exceeds record body"));
        }
        let (payload, rest) = buf.split_at(payload_len);
        let payload = payload.to_vec();
        buf = rest;

        let stream_count = take_varint(&mut buf)?;
        let mut streams = BTreeSet::new();
        for _ in 0..stream_count {
            streams.insert(StreamId(take_uuid(&mut buf)?));
        }

        let backpointers = decode_map(&mut buf)?;
        let logical_addresses = decode_map(&mut buf)?;

        if !buf.is_empty() {
            return Err(Corruption::MalformedRecord("trailing bytes after record"));
        }

        Ok(Self {
            data_type,
            global_address,
            payload,
            rank,
            commit_flag,
            streams,
            backpointers,
            logical_addresses,
        })
    }
}

fn encode_map(map: &BTreeMap<StreamId, i64>, out: &mut Vec<u8>) {
    encode_varint(map.len() as u64, out);
    for (stream, value) in map {
        out.extend_from_slice(stream.0.as_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn decode_map(buf: &mut &[u8]) -> Result<BTreeMap<StreamId, i64>, Corruption> {
    let count = take_varint(buf)?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let stream = StreamId(take_uuid(buf)?);
        let value = take_i64(buf)?;
        map.insert(stream, value);
    }
    Ok(map)
}

fn take_u8(buf: &mut &[u8]) -> Result<u8, Corruption> {
    let (&b, rest) = buf
        .split_first()
        .ok_or(Corruption::MalformedRecord("unexpected end of record"))?;
    *buf = rest;
    Ok(b)
}

fn take_u64(buf: &mut &[u8]) -> Result<u64, Corruption> {
    if buf.len() < 8 {
        return Err(Corruption::MalformedRecord("unexpected end of record"));
    }
    let (bytes, rest) = buf.split_at(8);
    *buf = rest;
    Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
}

fn take_i64(buf: &mut &[u8]) -> Result<i64, Corruption> {
    take_u64(buf).map(|v| v as i64)
}

fn take_uuid(buf: &mut &[u8]) -> Result<Uuid, Corruption> {
    if buf.len() < 16 {
        return Err(Corruption::MalformedRecord("unexpected end of record"));
    }
    let (bytes, rest) = buf.split_at(16);
    *buf = rest;
    let arr: [u8; 16] = bytes.try_into().unwrap();
    Ok(Uuid::from_bytes(arr))
}

fn take_varint(buf: &mut &[u8]) -> Result<u64, Corruption> {
    decode_varint(buf).ok_or(Corruption::MalformedRecord("truncated varint"))
}

/// A trim intent: `{checksum, address}`. Written length-prefixed to
/// `.pending` and later `.trimmed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrimEntry {
    pub checksum: u32,
    pub address: i64,
}

impl TrimEntry {
    const BODY_LEN: usize = 4 + 8;

    pub fn new(address: u64) -> Self {
        Self {
            checksum: crc32c::crc32c(&address.to_be_bytes()),
            address: address as i64,
        }
    }

    /// Append this entry's length-prefixed encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_varint(Self::BODY_LEN as u64, out);
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.address.to_be_bytes());
    }

    /// Decode one length-prefixed entry from the front of `buf`.
    ///
    /// Like [`crate::frame::decode_record`], a short read returns `Ok(None)`
    /// rather than an error: trim files are best-effort bookkeeping and a
    /// torn tail there is not treated as fatal corruption.
    pub fn decode(buf: &mut &[u8]) -> io::Result<Option<Self>> {
        let checkpoint = *buf;
        let Some(len) = decode_varint(buf) else {
            *buf = checkpoint;
            return Ok(None);
        };
        if len as usize != Self::BODY_LEN || buf.len() < Self::BODY_LEN {
            *buf = checkpoint;
            return Ok(None);
        }
        let checksum = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let address = i64::from_be_bytes(buf[4..12].try_into().unwrap());
        *buf = &buf[Self::BODY_LEN..];
        Ok(Some(Self { checksum, address }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn file_header_roundtrip() {
        let hdr = FileHeader {
            version: 1,
            verify_checksum: true,
        };
        let encoded = hdr.encode();
        assert_eq!(FileHeader::decode(&encoded).unwrap(), hdr);
    }

    #[test]
    fn log_entry_roundtrip() {
        let stream = StreamId::new_v4();
        let entry = LogEntry {
            data_type: DataType::Data,
            global_address: 42,
            payload: b"hello".to_vec(),
            rank: -7,
            commit_flag: true,
            streams: BTreeSet::from([stream]),
            backpointers: BTreeMap::from([(stream, 41)]),
            logical_addresses: BTreeMap::from([(stream, 1)]),
        };
        let encoded = entry.encode();
        let decoded = LogEntry::decode(&encoded).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn log_entry_empty_collections_roundtrip() {
        let entry = LogEntry {
            data_type: DataType::Empty,
            global_address: 0,
            payload: Vec::new(),
            rank: 0,
            commit_flag: false,
            streams: BTreeSet::new(),
            backpointers: BTreeMap::new(),
            logical_addresses: BTreeMap::new(),
        };
        let encoded = entry.encode();
        assert_eq!(LogEntry::decode(&encoded).unwrap(), entry);
    }

    #[test]
    fn trim_entry_roundtrip() {
        let entry = TrimEntry::new(99);
        let mut buf = Vec::new();
        entry.encode(&mut buf);
        let mut slice = buf.as_slice();
        let decoded = TrimEntry::decode(&mut slice).unwrap().unwrap();
        assert_eq!(decoded, entry);
        assert!(slice.is_empty());
    }

    #[test]
    fn trim_entries_concatenate() {
        let a = TrimEntry::new(1);
        let b = TrimEntry::new(2);
        let mut buf = Vec::new();
        a.encode(&mut buf);
        b.encode(&mut buf);

        let mut slice = buf.as_slice();
        assert_eq!(TrimEntry::decode(&mut slice).unwrap().unwrap(), a);
        assert_eq!(TrimEntry::decode(&mut slice).unwrap().unwrap(), b);
        assert_eq!(TrimEntry::decode(&mut slice).unwrap(), None);
    }

    proptest! {
        #[test]
        fn log_entry_roundtrip_arbitrary(
            address in any::<u64>(),
            rank in any::<i64>(),
            payload in prop::collection::vec(any::<u8>(), 0..256),
            commit_flag in any::<bool>(),
        ) {
            let entry = LogEntry {
                data_type: DataType::Data,
                global_address: address,
                payload,
                rank,
                commit_flag,
                streams: BTreeSet::new(),
                backpointers: BTreeMap::new(),
                logical_addresses: BTreeMap::new(),
            };
            let encoded = entry.encode();
            prop_assert_eq!(LogEntry::decode(&encoded).unwrap(), entry);
        }
    }
}
