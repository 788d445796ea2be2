//! Address types.
//!
//! A [`LogAddress`] is the engine's primary key. Untagged addresses live in
//! one global namespace; addresses tagged with a [`StreamId`] live in a
//! namespace of their own, so a tagged and an untagged address with the same
//! numeric value never collide.

use std::fmt;

use uuid::Uuid;

/// Tags a [`LogAddress`] as belonging to a particular stream's namespace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_hyphenated(&self) -> uuid::fmt::Hyphenated {
        self.0.hyphenated()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for StreamId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// An absolute, monotonic 64-bit address, optionally tagged with a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogAddress {
    pub stream: Option<StreamId>,
    pub address: u64,
}

impl LogAddress {
    pub fn new(stream: Option<StreamId>, address: u64) -> Self {
        Self { stream, address }
    }

    pub fn untagged(address: u64) -> Self {
        Self { stream: None, address }
    }

    pub fn tagged(stream: StreamId, address: u64) -> Self {
        Self {
            stream: Some(stream),
            address,
        }
    }

    /// The segment this address falls into, given `records_per_segment`.
    pub fn segment_number(&self, records_per_segment: u64) -> SegmentNumber {
        SegmentNumber(self.address / records_per_segment)
    }
}

/// `address / RECORDS_PER_LOG_FILE`. Never stored; always computed from a
/// [`LogAddress`] and the engine's configured segment size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentNumber(pub u64);

impl fmt::Display for SegmentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a segment within an engine instance: the combination of an
/// optional stream and a segment number is what maps to one on-disk
/// `.log`/`.log.trimmed`/`.log.pending` file triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SegmentKey {
    pub stream: Option<StreamId>,
    pub number: SegmentNumber,
}

impl SegmentKey {
    pub fn for_address(addr: &LogAddress, records_per_segment: u64) -> Self {
        Self {
            stream: addr.stream,
            number: addr.segment_number(records_per_segment),
        }
    }

    /// The shared file-name stem for this segment's `.log`/`.log.trimmed`/`.log.pending` triple.
    pub fn base_name(&self) -> String {
        match self.stream {
            Some(stream) => format!("{stream}-{}", self.number),
            None => self.number.to_string(),
        }
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_number_boundaries() {
        let records_per_segment = 4;
        assert_eq!(LogAddress::untagged(0).segment_number(records_per_segment), SegmentNumber(0));
        assert_eq!(LogAddress::untagged(3).segment_number(records_per_segment), SegmentNumber(0));
        assert_eq!(LogAddress::untagged(4).segment_number(records_per_segment), SegmentNumber(1));
        assert_eq!(
            LogAddress::untagged(u64::MAX).segment_number(records_per_segment),
            SegmentNumber(u64::MAX / records_per_segment)
        );
    }

    #[test]
    fn tagged_and_untagged_addresses_map_to_different_segments() {
        let records_per_segment = 10_000;
        let stream = StreamId::new_v4();
        let untagged = SegmentKey::for_address(&LogAddress::untagged(42), records_per_segment);
        let tagged = SegmentKey::for_address(&LogAddress::tagged(stream, 42), records_per_segment);
        assert_ne!(untagged.base_name(), tagged.base_name());
    }
}
