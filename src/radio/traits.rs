/// Link channel information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelInfo {
    /// Radio channel number the link is operating on
    pub channel: u8,
    /// Hardware address of the remote peer
    pub peer: [u8; 6],
    /// RSSI of the last received packet in dBm, if known
    pub rssi: Option<i16>,
}

impl ChannelInfo {
    /// Create channel info for a peer on a channel
    pub fn new(channel: u8, peer: [u8; 6]) -> Self {
        Self {
            channel,
            peer,
            rssi: None,
        }
    }
}

/// Point-to-point radio link capability
///
/// This is the only surface the sync sequencers use to reach the transport.
/// Implementations wrap whatever stack carries the bytes (ESP-NOW, a serial
/// framing layer, a LoRa modem) and hand back the stack's own envelope type.
/// The sequencers unwrap envelopes to raw message bytes with an extractor
/// callback, so a link never needs to know about the sync protocol.
pub trait RadioLink {
    /// Envelope type delivered by the transport
    type Envelope;

    /// Error type for link operations
    type Error: core::fmt::Debug;

    /// Send a raw payload to the peer
    fn send(&mut self, payload: &[u8]) -> Result<(), Self::Error>;

    /// Take the next received envelope without blocking
    ///
    /// Returns `Err(nb::Error::WouldBlock)` when nothing has arrived.
    fn receive(&mut self) -> nb::Result<Self::Envelope, Self::Error>;

    /// Get the current channel/peer information
    fn channel_info(&self) -> ChannelInfo;
}
