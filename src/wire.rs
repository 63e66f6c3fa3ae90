//! On-the-wire encodings: audio packets, the time-sync exchange, and the
//! 4-byte ASCII control opcodes sent to a receiver.

/// `[playback_at: i64 BE][pcm_payload]`.
pub fn encode_packet(playback_at: i64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&playback_at.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub playback_at: i64,
    pub payload: Vec<u8>,
}

pub fn decode_packet(buf: &[u8]) -> Option<DecodedPacket> {
    if buf.len() < 8 {
        return None;
    }
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&buf[..8]);
    Some(DecodedPacket {
        playback_at: i64::from_be_bytes(ts),
        payload: buf[8..].to_vec(),
    })
}

/// 4-byte ASCII control opcode sent ahead of any opcode-specific payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Play,
    Flush,
    Stop,
    Sync,
}

impl ControlOp {
    pub const fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            ControlOp::Play => b"PLAY",
            ControlOp::Flush => b"FLSH",
            ControlOp::Stop => b"STOP",
            ControlOp::Sync => b"SYNC",
        }
    }

    /// Unknown opcodes are ignored by the caller, not an error here.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"PLAY" => Some(ControlOp::Play),
            b"FLSH" => Some(ControlOp::Flush),
            b"STOP" => Some(ControlOp::Stop),
            b"SYNC" => Some(ControlOp::Sync),
            _ => None,
        }
    }
}

/// `SYNC[t1]` — a receiver's sync request.
pub fn encode_sync_request(t1: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(ControlOp::Sync.as_bytes());
    buf.extend_from_slice(&t1.to_be_bytes());
    buf
}

pub fn decode_sync_request(buf: &[u8]) -> Option<i64> {
    if buf.len() != 12 || ControlOp::from_bytes(&buf[..4]) != Some(ControlOp::Sync) {
        return None;
    }
    let mut t1 = [0u8; 8];
    t1.copy_from_slice(&buf[4..12]);
    Some(i64::from_be_bytes(t1))
}

/// `SYNC[t1][t2][t3]` — the broadcaster's sync response.
pub fn encode_sync_response(t1: i64, t2: i64, t3: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(28);
    buf.extend_from_slice(ControlOp::Sync.as_bytes());
    buf.extend_from_slice(&t1.to_be_bytes());
    buf.extend_from_slice(&t2.to_be_bytes());
    buf.extend_from_slice(&t3.to_be_bytes());
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncResponse {
    pub t1: i64,
    pub t2: i64,
    pub t3: i64,
}

pub fn decode_sync_response(buf: &[u8]) -> Option<SyncResponse> {
    if buf.len() != 28 || ControlOp::from_bytes(&buf[..4]) != Some(ControlOp::Sync) {
        return None;
    }
    let read_i64 = |range: std::ops::Range<usize>| {
        let mut a = [0u8; 8];
        a.copy_from_slice(&buf[range]);
        i64::from_be_bytes(a)
    };
    Some(SyncResponse {
        t1: read_i64(4..12),
        t2: read_i64(12..20),
        t3: read_i64(20..28),
    })
}
