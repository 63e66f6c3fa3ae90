//! Shared data types that cross module boundaries.

use std::fmt;

/// Identity of a Channel, process-unique.
pub type ChannelId = uuid::Uuid;

/// Identity of a Receiver, process-unique.
pub type ReceiverId = uuid::Uuid;

/// Opaque identity of a playlist entry. Two frames with equal `SourceId`
/// belong to the same logical track; the sequence of ids returned by a
/// [`crate::source_stream::SourceStream`] only ever stays equal or strictly
/// advances in playlist order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub String);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        SourceId(value.to_string())
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        SourceId(value)
    }
}

/// A fixed-size decoded PCM frame as handed to the broadcaster by a
/// [`crate::source_stream::SourceStream`]. Decoding from a container/codec
/// format happens upstream of this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source_id: SourceId,
    pub bytes: Vec<u8>,
}

/// What a `next_frame` call on a SourceStream can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Frame(Frame),
    End,
}

/// A frame that has been assigned a playback deadline and a sequence number
/// by the broadcaster, ready to hand to an [`crate::emitter::Emitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedPacket {
    pub packet_number: u64,
    pub playback_at: i64,
    pub source_id: SourceId,
    pub bytes: Vec<u8>,
}

/// A packet that has been handed to one or more Emitters but whose
/// `playback_at` has not yet elapsed. Kept so it can be re-buffered (normal
/// stop) or revoked (skip) before it reaches the wire. One packet may carry
/// a different handle per receiver, since each receiver has its own
/// Emitter and a late joiner is buffered with a handle of its own.
#[derive(Debug, Clone)]
pub struct InFlightPacket {
    pub handles: Vec<(ReceiverId, crate::emitter::EmitterHandle)>,
    pub playback_at: i64,
    pub source_id: SourceId,
    pub bytes: Vec<u8>,
}
