//! Sync protocol messages and their wire format
//!
//! Every frame starts with the `<PTP>` marker followed by a one-byte kind tag
//! and a kind-specific payload. Multi-byte fields are little-endian.
//!
//! ```text
//! | <PTP> | kind | payload                                   |
//! |   5   |  1   | SyncRequest:   cycles u64             (8) |
//! |       |      | Sync:          seq u16, t1 u64       (10) |
//! |       |      | DelayRequest:  seq u16, t2 u64, t3 u64 (18) |
//! |       |      | DelayResponse: seq u16, t1 u64, t4 u64 (18) |
//! ```

use core::fmt;
use core::ops::Deref;

use thiserror::Error;

/// Leading marker identifying sync protocol traffic
pub const MARKER: &[u8; 5] = b"<PTP>";

/// Marker plus kind tag
pub const HEADER_LEN: usize = MARKER.len() + 1;

/// Size of the largest frame
pub const MAX_FRAME_LEN: usize = HEADER_LEN + 18;

/// Message kind identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageKind {
    /// Peripheral asks the master to run a round
    SyncRequest = 0x00,
    /// Master announces a cycle, carries t1
    Sync = 0x01,
    /// Peripheral reply, carries t2 and t3
    DelayRequest = 0x02,
    /// Master reply, carries t1 and t4
    DelayResponse = 0x03,
}

impl MessageKind {
    /// Parse a kind tag
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Self::SyncRequest),
            0x01 => Some(Self::Sync),
            0x02 => Some(Self::DelayRequest),
            0x03 => Some(Self::DelayResponse),
            _ => None,
        }
    }

    /// Payload length that follows the header for this kind
    pub const fn payload_len(self) -> usize {
        match self {
            Self::SyncRequest => 8,
            Self::Sync => 10,
            Self::DelayRequest | Self::DelayResponse => 18,
        }
    }

    /// Total frame length for this kind
    pub const fn frame_len(self) -> usize {
        HEADER_LEN + self.payload_len()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SyncRequest => write!(f, "SYNC_REQUEST"),
            Self::Sync => write!(f, "SYNC"),
            Self::DelayRequest => write!(f, "DELAY_REQUEST"),
            Self::DelayResponse => write!(f, "DELAY_RESPONSE"),
        }
    }
}

/// Sync protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncMessage {
    /// Request a round of `num_sync_cycles` cycles
    SyncRequest {
        /// Number of cycles the peripheral wants
        num_sync_cycles: u32,
    },
    /// Cycle announcement
    Sync {
        /// Cycle sequence number
        sequence: u16,
        /// Master send time
        t1: u64,
    },
    /// Delay request
    DelayRequest {
        /// Sequence number of the Sync being answered
        sequence: u16,
        /// Peripheral receive time of the Sync
        t2: u64,
        /// Peripheral send time of this message
        t3: u64,
    },
    /// Delay response
    DelayResponse {
        /// Sequence number of the cycle
        sequence: u16,
        /// Echo of the cycle's t1
        t1: u64,
        /// Master receive time of the Delay request
        t4: u64,
    },
}

/// Codec errors. All of them mean the frame carried the marker but could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Frame shorter than the header
    #[error("frame truncated: {len} bytes")]
    Truncated {
        /// Received length
        len: usize,
    },
    /// Frame does not start with the protocol marker
    #[error("missing protocol marker")]
    BadMarker,
    /// Kind tag is not a known message
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),
    /// Frame length does not match its kind
    #[error("{kind} frame must be {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Decoded kind
        kind: MessageKind,
        /// Length the kind requires
        expected: usize,
        /// Received length
        actual: usize,
    },
    /// Sync request carried a cycle count of zero or beyond `u32`
    #[error("invalid sync cycle count {0}")]
    InvalidCycleCount(u64),
}

/// Encoded frame, stored inline
#[derive(Clone, Copy)]
pub struct Frame {
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl Frame {
    fn new() -> Self {
        Self {
            buf: [0; MAX_FRAME_LEN],
            len: 0,
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frame").field(&self.as_bytes()).finish()
    }
}

impl SyncMessage {
    /// Kind of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::SyncRequest { .. } => MessageKind::SyncRequest,
            Self::Sync { .. } => MessageKind::Sync,
            Self::DelayRequest { .. } => MessageKind::DelayRequest,
            Self::DelayResponse { .. } => MessageKind::DelayResponse,
        }
    }

    /// Cycle sequence number, if the message belongs to a cycle
    pub fn sequence(&self) -> Option<u16> {
        match *self {
            Self::SyncRequest { .. } => None,
            Self::Sync { sequence, .. }
            | Self::DelayRequest { sequence, .. }
            | Self::DelayResponse { sequence, .. } => Some(sequence),
        }
    }

    /// Serialize to a frame
    pub fn to_bytes(&self) -> Frame {
        let mut frame = Frame::new();
        frame.put(MARKER);
        frame.put(&[self.kind() as u8]);
        match *self {
            Self::SyncRequest { num_sync_cycles } => {
                frame.put(&u64::from(num_sync_cycles).to_le_bytes());
            }
            Self::Sync { sequence, t1 } => {
                frame.put(&sequence.to_le_bytes());
                frame.put(&t1.to_le_bytes());
            }
            Self::DelayRequest { sequence, t2, t3 } => {
                frame.put(&sequence.to_le_bytes());
                frame.put(&t2.to_le_bytes());
                frame.put(&t3.to_le_bytes());
            }
            Self::DelayResponse { sequence, t1, t4 } => {
                frame.put(&sequence.to_le_bytes());
                frame.put(&t1.to_le_bytes());
                frame.put(&t4.to_le_bytes());
            }
        }
        frame
    }

    /// Parse a frame
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::Truncated { len: data.len() });
        }
        if !is_protocol_message(data) {
            return Err(CodecError::BadMarker);
        }

        let tag = data[MARKER.len()];
        let kind = MessageKind::from_u8(tag).ok_or(CodecError::UnknownKind(tag))?;
        if data.len() != kind.frame_len() {
            return Err(CodecError::LengthMismatch {
                kind,
                expected: kind.frame_len(),
                actual: data.len(),
            });
        }

        let payload = &data[HEADER_LEN..];
        let message = match kind {
            MessageKind::SyncRequest => {
                let cycles = le_u64(payload);
                let num_sync_cycles = u32::try_from(cycles)
                    .ok()
                    .filter(|&n| n > 0)
                    .ok_or(CodecError::InvalidCycleCount(cycles))?;
                Self::SyncRequest { num_sync_cycles }
            }
            MessageKind::Sync => Self::Sync {
                sequence: le_u16(payload),
                t1: le_u64(&payload[2..]),
            },
            MessageKind::DelayRequest => Self::DelayRequest {
                sequence: le_u16(payload),
                t2: le_u64(&payload[2..]),
                t3: le_u64(&payload[10..]),
            },
            MessageKind::DelayResponse => Self::DelayResponse {
                sequence: le_u16(payload),
                t1: le_u64(&payload[2..]),
                t4: le_u64(&payload[10..]),
            },
        };
        Ok(message)
    }
}

/// Cheap check for the protocol marker
///
/// Only the leading marker is inspected, so unrelated traffic of any size is
/// rejected in constant time.
pub fn is_protocol_message(data: &[u8]) -> bool {
    data.len() >= MARKER.len() && data[..MARKER.len()] == MARKER[..]
}

/// Decode a protocol frame
pub fn parse(data: &[u8]) -> Result<SyncMessage, CodecError> {
    SyncMessage::from_bytes(data)
}

/// Encode a protocol message
pub fn encode(message: &SyncMessage) -> Frame {
    message.to_bytes()
}

fn le_u16(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

fn le_u64(data: &[u8]) -> u64 {
    u64::from_le_bytes([
        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
    ])
}
