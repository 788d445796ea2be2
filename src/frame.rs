//! Frame codec.
//!
//! Encodes a message `m` of byte length `n` as `checksum(m) :: n :: m`, where
//! `checksum` is CRC32C. [`LogRecord`][crate::record] entries are additionally
//! prefixed with the fixed 2-byte [`DELIMITER`] before the metadata.
//!
//! Decoding works off an in-memory byte slice rather than a [`std::io::Read`]:
//! callers (`Engine::read`, segment scan on open, compaction) all snapshot a
//! segment's size under its handle lock and read that many bytes up front, so
//! decoding is just advancing a cursor through a buffer. This also makes the
//! short-read-vs-corruption distinction in [`decode_record`] straightforward.

use crate::error::Corruption;

/// `"LE"` in ASCII, big-endian.
pub const DELIMITER: u16 = 0x4C45;
pub const DELIMITER_SIZE: usize = 2;

/// Size of the fixed `{checksum: u32, length: u32}` prefix.
pub const METADATA_SIZE: usize = 8;

/// Upper bound on a single frame's body length. Guards against a bitflip in
/// the (unchecksummed) metadata prefix producing a wild length that would
/// otherwise look like an ordinary short read.
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub checksum: u32,
    pub length: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        let mut buf = [0u8; METADATA_SIZE];
        buf[0..4].copy_from_slice(&self.checksum.to_be_bytes());
        buf[4..8].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; METADATA_SIZE]) -> Self {
        Self {
            checksum: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            length: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

pub fn checksum(bytes: &[u8]) -> u32 {
    crc32c::crc32c(bytes)
}

/// Encode a bare frame (no delimiter): metadata followed by `body`. Used for
/// the segment's [`crate::record::FileHeader`], which is the first frame of
/// every segment and is never delimited.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        checksum: checksum(body),
        length: body.len() as u32,
    };
    let mut out = Vec::with_capacity(METADATA_SIZE + body.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(body);
    out
}

/// Encode a delimited [`crate::record::LogEntry`] record.
pub fn encode_record(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(DELIMITER_SIZE + METADATA_SIZE + body.len());
    out.extend_from_slice(&DELIMITER.to_be_bytes());
    out.extend_from_slice(&encode_frame(body));
    out
}

/// Decode a bare frame from the front of `buf`, advancing it past the frame
/// on success.
///
/// Returns `Ok(None)` on any short read (not enough bytes yet for the
/// metadata prefix or for the claimed body) -- this is the graceful,
/// non-corrupting end-of-scan case described in the spec. Returns `Err` only
/// for a genuinely malformed frame: an implausible length, or (when `verify`
/// is set) a checksum mismatch on a body that *was* fully read.
pub fn decode_frame(buf: &mut &[u8], verify: bool) -> Result<Option<Vec<u8>>, Corruption> {
    if buf.len() < METADATA_SIZE {
        return Ok(None);
    }
    let meta: [u8; METADATA_SIZE] = buf[..METADATA_SIZE].try_into().unwrap();
    let header = FrameHeader::decode(&meta);
    if header.length > MAX_RECORD_SIZE {
        return Err(Corruption::FrameTooLarge(header.length));
    }
    let rest = &buf[METADATA_SIZE..];
    if rest.len() < header.length as usize {
        return Ok(None);
    }
    let (body, rest) = rest.split_at(header.length as usize);
    if verify {
        let actual = checksum(body);
        if actual != header.checksum {
            return Err(Corruption::Checksum);
        }
    }
    *buf = rest;
    Ok(Some(body.to_vec()))
}

/// Decode a delimited record from the front of `buf`.
///
/// A missing or mismatched delimiter is treated exactly like a short read:
/// it ends the scan gracefully rather than reporting corruption, since it is
/// indistinguishable from the tail of a torn write.
pub fn decode_record(buf: &mut &[u8], verify: bool) -> Result<Option<Vec<u8>>, Corruption> {
    if buf.len() < DELIMITER_SIZE {
        return Ok(None);
    }
    let delimiter = u16::from_be_bytes([buf[0], buf[1]]);
    if delimiter != DELIMITER {
        return Ok(None);
    }
    let mut rest = &buf[DELIMITER_SIZE..];
    match decode_frame(&mut rest, verify)? {
        None => Ok(None),
        Some(body) => {
            *buf = rest;
            Ok(Some(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn frame_roundtrip() {
        let body = b"hello world";
        let encoded = encode_frame(body);
        let mut buf = encoded.as_slice();
        let decoded = decode_frame(&mut buf, true).unwrap().unwrap();
        assert_eq!(decoded, body);
        assert!(buf.is_empty());
    }

    #[test]
    fn record_roundtrip() {
        let body = b"a record's payload";
        let encoded = encode_record(body);
        let mut buf = encoded.as_slice();
        let decoded = decode_record(&mut buf, true).unwrap().unwrap();
        assert_eq!(decoded, body);
        assert!(buf.is_empty());
    }

    #[test]
    fn short_read_is_graceful() {
        let encoded = encode_record(b"payload");
        for cut in 0..encoded.len() {
            let mut buf = &encoded[..cut];
            assert_eq!(decode_record(&mut buf, true).unwrap(), None, "cut at {cut}");
        }
    }

    #[test]
    fn bad_delimiter_is_graceful_not_corruption() {
        let mut encoded = encode_record(b"payload");
        encoded[0] ^= 0xff;
        let mut buf = encoded.as_slice();
        assert_eq!(decode_record(&mut buf, true).unwrap(), None);
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let mut encoded = encode_record(b"payload-bytes");
        let body_start = DELIMITER_SIZE + METADATA_SIZE;
        encoded[body_start] ^= 0xff;
        let mut buf = encoded.as_slice();
        assert_eq!(decode_record(&mut buf, true).unwrap_err(), Corruption::Checksum);
    }

    #[test]
    fn verification_disabled_ignores_corruption() {
        let mut encoded = encode_record(b"payload-bytes");
        let body_start = DELIMITER_SIZE + METADATA_SIZE;
        encoded[body_start] ^= 0xff;
        let mut buf = encoded.as_slice();
        let decoded = decode_record(&mut buf, false).unwrap().unwrap();
        assert_ne!(decoded, b"payload-bytes");
    }

    #[test]
    fn implausible_length_is_corruption_even_with_bytes_available() {
        let mut buf = vec![0u8; METADATA_SIZE + 4];
        let header = FrameHeader {
            checksum: 0,
            length: MAX_RECORD_SIZE + 1,
        };
        buf[..METADATA_SIZE].copy_from_slice(&header.encode());
        let mut slice = buf.as_slice();
        assert_eq!(
            decode_frame(&mut slice, true).unwrap_err(),
            Corruption::FrameTooLarge(MAX_RECORD_SIZE + 1)
        );
    }

    proptest! {
        #[test]
        fn frame_roundtrip_arbitrary(body in prop::collection::vec(any::<u8>(), 0..4096)) {
            let encoded = encode_frame(&body);
            let mut buf = encoded.as_slice();
            let decoded = decode_frame(&mut buf, true).unwrap().unwrap();
            prop_assert_eq!(decoded, body);
            prop_assert!(buf.is_empty());
        }
    }
}
