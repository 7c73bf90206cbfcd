//! Timestamp sources and the real-time clock
//!
//! Two collaborators are supplied by the board:
//! - a [`TimestampSource`], a free-running microsecond counter used for all
//!   protocol timing, possibly narrower than 64 bits and wrapping
//! - a [`RealTimeClock`], the wall clock the peripheral corrects
//!
//! The counter must run on the timeline the RTC keeps (for example the RTC's
//! own microsecond reading) so that a measured offset is an offset of the RTC.

pub mod applier;

pub use applier::{Applied, ClockApplier};

use chrono::{NaiveDateTime, TimeDelta};
use thiserror::Error;

/// Width of a wrapping counter
///
/// Differences between two readings are taken modulo the counter range and
/// interpreted as signed, so intervals shorter than half the range survive a
/// wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CounterWidth {
    bits: u32,
}

impl CounterWidth {
    /// Full 64-bit counter
    pub const FULL: Self = Self { bits: 64 };

    /// Create a counter width. Returns `None` outside 2..=64 bits.
    pub const fn new(bits: u32) -> Option<Self> {
        if bits >= 2 && bits <= 64 {
            Some(Self { bits })
        } else {
            None
        }
    }

    /// Counter width in bits
    pub const fn bits(self) -> u32 {
        self.bits
    }

    /// Largest counter value
    pub const fn max_value(self) -> u64 {
        if self.bits == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }

    /// Whether a reading fits the counter
    pub const fn contains(self, ticks: u64) -> bool {
        ticks <= self.max_value()
    }

    /// Signed difference `later - earlier` modulo the counter range
    pub fn diff(self, later: u64, earlier: u64) -> i64 {
        let raw = later.wrapping_sub(earlier) & self.max_value();
        if self.bits == 64 {
            return raw as i64;
        }
        let half = 1u64 << (self.bits - 1);
        if raw >= half {
            raw.wrapping_sub(1u64 << self.bits) as i64
        } else {
            raw as i64
        }
    }

    /// Advance a reading by `delta` ticks, wrapping at the counter range
    pub fn add(self, ticks: u64, delta: u64) -> u64 {
        ticks.wrapping_add(delta) & self.max_value()
    }
}

impl Default for CounterWidth {
    fn default() -> Self {
        Self::FULL
    }
}

/// Monotonic microsecond counter
pub trait TimestampSource {
    /// Current reading in microseconds
    fn now_us(&mut self) -> u64;

    /// Width of the counter
    fn counter_width(&self) -> CounterWidth {
        CounterWidth::FULL
    }
}

/// Real-time clock errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RtcError<E> {
    /// Underlying RTC failed
    #[error("rtc device error: {0:?}")]
    Device(E),
    /// Adjustment would leave the representable date range
    #[error("rtc adjustment out of range")]
    OutOfRange,
}

/// Settable wall clock
pub trait RealTimeClock {
    /// Error type for RTC operations
    type Error: core::fmt::Debug;

    /// Read the current date and time
    fn datetime(&mut self) -> Result<NaiveDateTime, Self::Error>;

    /// Set the date and time
    fn set_datetime(&mut self, datetime: NaiveDateTime) -> Result<(), Self::Error>;

    /// Shift the clock by `delta_us` microseconds
    ///
    /// The default reads, shifts and writes back. RTCs with an offset
    /// register should override this.
    fn adjust_micros(&mut self, delta_us: i64) -> Result<(), RtcError<Self::Error>> {
        let now = self.datetime().map_err(RtcError::Device)?;
        let adjusted = now
            .checked_add_signed(TimeDelta::microseconds(delta_us))
            .ok_or(RtcError::OutOfRange)?;
        self.set_datetime(adjusted).map_err(RtcError::Device)
    }
}
