//! Offset and delay from four-timestamp exchanges
//!
//! ```text
//! delay  = ((t4 - t1) - (t3 - t2)) / 2
//! offset = ((t2 - t1) + (t3 - t4)) / 2
//! ```
//!
//! t1 and t4 are master readings, t2 and t3 peripheral readings. Each
//! difference is taken modulo the counter range before combining, and a
//! positive offset means the peripheral is ahead of the master.

use thiserror::Error;

use crate::clock::CounterWidth;

/// Timestamps captured during one cycle
///
/// A `None` entry means the message that carries it was lost and the cycle
/// was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimestampQuad {
    /// Master send time of Sync
    pub t1: Option<u64>,
    /// Peripheral receive time of Sync
    pub t2: Option<u64>,
    /// Peripheral send time of Delay request
    pub t3: Option<u64>,
    /// Master receive time of Delay request
    pub t4: Option<u64>,
}

impl TimestampQuad {
    /// Create a complete quad
    pub fn new(t1: u64, t2: u64, t3: u64, t4: u64) -> Self {
        Self {
            t1: Some(t1),
            t2: Some(t2),
            t3: Some(t3),
            t4: Some(t4),
        }
    }

    /// Whether all four timestamps were captured
    pub fn is_complete(&self) -> bool {
        self.t1.is_some() && self.t2.is_some() && self.t3.is_some() && self.t4.is_some()
    }
}

/// Offset and delay derived from one quad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OffsetSample {
    /// Peripheral clock minus master clock (microseconds)
    pub offset: i64,
    /// One-way equivalent transit delay (microseconds)
    pub delay: i64,
}

impl OffsetSample {
    /// Round-trip transit time, both directions
    pub fn round_trip(&self) -> i64 {
        self.delay.saturating_mul(2)
    }
}

/// Reasons a cycle yields no usable sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SampleError {
    /// A message in the cycle was lost
    #[error("cycle incomplete")]
    Incomplete,
    /// A reading is outside the counter range or an interval ran backwards
    #[error("clock wraparound detected")]
    ClockWraparound,
    /// Timestamps imply a negative transit time
    #[error("negative delay {0} us")]
    NegativeDelay(i64),
    /// Transit time above the configured ceiling
    #[error("delay {delay} us exceeds {limit} us")]
    ExcessiveDelay {
        /// Computed delay
        delay: i64,
        /// Configured ceiling
        limit: u64,
    },
}

/// Offset calculator for a given counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetCalculator {
    width: CounterWidth,
    max_delay_us: Option<u64>,
}

impl OffsetCalculator {
    /// Create a calculator
    pub fn new(width: CounterWidth, max_delay_us: Option<u64>) -> Self {
        Self {
            width,
            max_delay_us,
        }
    }

    /// Compute the sample for a quad, or flag the cycle invalid
    pub fn calculate(&self, quad: &TimestampQuad) -> Result<OffsetSample, SampleError> {
        let (t1, t2, t3, t4) = match (quad.t1, quad.t2, quad.t3, quad.t4) {
            (Some(t1), Some(t2), Some(t3), Some(t4)) => (t1, t2, t3, t4),
            _ => return Err(SampleError::Incomplete),
        };
        if ![t1, t2, t3, t4].iter().all(|&t| self.width.contains(t)) {
            return Err(SampleError::ClockWraparound);
        }

        // Same-clock intervals must run forward
        let master_interval = self.width.diff(t4, t1);
        let periph_interval = self.width.diff(t3, t2);
        if master_interval < 0 || periph_interval < 0 {
            return Err(SampleError::ClockWraparound);
        }

        let outbound = i128::from(self.width.diff(t2, t1));
        let inbound = i128::from(self.width.diff(t3, t4));
        let offset = (outbound + inbound).div_euclid(2);
        let delay = (i128::from(master_interval) - i128::from(periph_interval)).div_euclid(2);

        let offset = i64::try_from(offset).map_err(|_| SampleError::ClockWraparound)?;
        let delay = i64::try_from(delay).map_err(|_| SampleError::ClockWraparound)?;

        if delay < 0 {
            return Err(SampleError::NegativeDelay(delay));
        }
        if let Some(limit) = self.max_delay_us {
            if delay as u64 > limit {
                return Err(SampleError::ExcessiveDelay { delay, limit });
            }
        }

        Ok(OffsetSample { offset, delay })
    }
}

/// Compute offset and delay from four 64-bit microsecond readings
pub fn calculate_offset(t1: u64, t2: u64, t3: u64, t4: u64) -> Result<OffsetSample, SampleError> {
    OffsetCalculator::default().calculate(&TimestampQuad::new(t1, t2, t3, t4))
}
