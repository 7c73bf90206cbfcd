//! Sync protocol wire format
//!
//! Message framing, the cheap marker check used to separate protocol traffic
//! from everything else on a shared link, and decoding into [`SyncMessage`].

/// Message types and codec
pub mod message;

pub use message::{
    encode, is_protocol_message, parse, CodecError, Frame, MessageKind, SyncMessage,
    MAX_FRAME_LEN,
};
