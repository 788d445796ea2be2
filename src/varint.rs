//! Varint encoding used for the length prefix of [`crate::record::TrimEntry`]
//! records.
//!
//! Base-128 varint, least-significant chunk first, matching the encoding
//! protobuf uses. `TrimEntry`'s encoded body is always 12 bytes, so in
//! practice the prefix is always a single byte, but the implementation does
//! not assume that.

#[inline]
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            out.push(value as u8);
            break;
        }
        out.push(((value & 0x7f) | 0x80) as u8);
        value >>= 7;
    }
}

/// Decode a varint from the front of `buf`, advancing it past the varint on
/// success.
///
/// Returns `None` if `buf` runs out before a terminating byte is found; the
/// caller should treat this the same as any other short read.
#[inline]
pub fn decode_varint(buf: &mut &[u8]) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    let mut consumed = 0;
    for &byte in buf.iter() {
        consumed += 1;
        if shift >= 64 {
            return None;
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            *buf = &buf[consumed..];
            return Some(result);
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn varint_roundtrip(val in any::<u64>()) {
            let mut buf = Vec::new();
            encode_varint(val, &mut buf);
            let mut slice = buf.as_slice();
            assert_eq!(decode_varint(&mut slice), Some(val));
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn short_buffer_is_none() {
        let mut buf = Vec::new();
        encode_varint(u64::MAX, &mut buf);
        let mut slice = &buf[..buf.len() - 1];
        assert_eq!(decode_varint(&mut slice), None);
    }
}
