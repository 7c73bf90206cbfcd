//! Link endpoint shared by the sequencers
//!
//! Bundles the radio link, the envelope extractor, the timestamp source and
//! the delay provider. All waiting happens here, as bounded polling loops
//! that sleep between empty polls.

use embedded_hal::blocking::delay::DelayMs;
use heapless::Deque;
use log::{debug, warn};

use crate::clock::{CounterWidth, TimestampSource};
use crate::protocol::{is_protocol_message, parse, SyncMessage};
use crate::radio::RadioLink;

/// Foreign envelopes kept for the application
pub const PASSTHROUGH_CAPACITY: usize = 8;

/// Envelopes read by one [`Endpoint::try_receive`] call
pub const RECEIVE_BURST: usize = 16;

/// Result of reading one envelope
enum Polled {
    /// Nothing waiting on the link
    Empty,
    /// Foreign or malformed envelope, handled
    Consumed,
    Message(Received),
}

/// A protocol message with its local receive time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Decoded message
    pub message: SyncMessage,
    /// Timestamp taken as the envelope came off the link
    pub rx_time: u64,
}

/// Link endpoint
pub struct Endpoint<L: RadioLink, X, C, D> {
    link: L,
    extract: X,
    clock: C,
    delay: D,
    poll_interval_ms: u32,
    passthrough: Deque<L::Envelope, PASSTHROUGH_CAPACITY>,
}

impl<L, X, C, D> Endpoint<L, X, C, D>
where
    L: RadioLink,
    X: Fn(&L::Envelope) -> &[u8],
    C: TimestampSource,
    D: DelayMs<u32>,
{
    /// Create an endpoint
    pub fn new(link: L, extract: X, clock: C, delay: D, poll_interval_ms: u32) -> Self {
        Self {
            link,
            extract,
            clock,
            delay,
            poll_interval_ms,
            passthrough: Deque::new(),
        }
    }

    /// Current timestamp
    pub fn now(&mut self) -> u64 {
        self.clock.now_us()
    }

    /// Width of the timestamp counter
    pub fn counter_width(&self) -> CounterWidth {
        self.clock.counter_width()
    }

    /// Sleep on the delay provider
    pub fn sleep_ms(&mut self, ms: u32) {
        if ms > 0 {
            self.delay.delay_ms(ms);
        }
    }

    /// Encode and send a message
    pub fn send(&mut self, message: &SyncMessage) -> Result<(), L::Error> {
        debug!("tx {}", message.kind());
        self.link.send(&message.to_bytes())
    }

    /// Take the next protocol message without waiting
    ///
    /// Foreign envelopes are queued for the application and malformed
    /// protocol frames are dropped. Reads at most [`RECEIVE_BURST`]
    /// envelopes, so a busy link cannot hold the caller.
    pub fn try_receive(&mut self) -> Option<Received> {
        for _ in 0..RECEIVE_BURST {
            match self.poll_link() {
                Polled::Empty => return None,
                Polled::Consumed => {}
                Polled::Message(received) => return Some(received),
            }
        }
        None
    }

    /// Poll until `select` accepts a message or `timeout_ms` elapses
    ///
    /// Protocol messages `select` rejects are discarded. Returns the selected
    /// value with the message's receive time. The deadline is checked after
    /// every envelope, so steady traffic cannot extend the wait.
    pub fn wait_for<T, F>(&mut self, timeout_ms: u32, mut select: F) -> Option<(T, u64)>
    where
        F: FnMut(&SyncMessage) -> Option<T>,
    {
        let width = self.clock.counter_width();
        let timeout_us = i64::from(timeout_ms) * 1_000;
        let start = self.clock.now_us();

        loop {
            let idle = match self.poll_link() {
                Polled::Message(received) => {
                    if let Some(value) = select(&received.message) {
                        return Some((value, received.rx_time));
                    }
                    debug!("ignoring unexpected {}", received.message.kind());
                    false
                }
                Polled::Consumed => false,
                Polled::Empty => true,
            };

            if width.diff(self.clock.now_us(), start) > timeout_us {
                return None;
            }
            if idle {
                self.sleep_ms(self.poll_interval_ms);
            }
        }
    }

    /// Pop the oldest non-protocol envelope
    pub fn pop_passthrough(&mut self) -> Option<L::Envelope> {
        self.passthrough.pop_front()
    }

    /// Number of queued non-protocol envelopes
    pub fn passthrough_len(&self) -> usize {
        self.passthrough.len()
    }

    /// Radio link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutable radio link
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn poll_link(&mut self) -> Polled {
        let envelope = match self.link.receive() {
            Ok(envelope) => envelope,
            Err(nb::Error::WouldBlock) => return Polled::Empty,
            Err(nb::Error::Other(e)) => {
                warn!("link receive failed: {:?}", e);
                return Polled::Empty;
            }
        };
        let rx_time = self.clock.now_us();

        let bytes = (self.extract)(&envelope);
        if !is_protocol_message(bytes) {
            self.pass_through(envelope);
            return Polled::Consumed;
        }
        match parse(bytes) {
            Ok(message) => {
                debug!("rx {} at {}", message.kind(), rx_time);
                Polled::Message(Received { message, rx_time })
            }
            Err(e) => {
                warn!("dropping malformed sync frame: {}", e);
                Polled::Consumed
            }
        }
    }

    fn pass_through(&mut self, envelope: L::Envelope) {
        if self.passthrough.push_back(envelope).is_err() {
            warn!("pass-through queue full, dropping foreign envelope");
        }
    }
}
