//! Sync rounds
//!
//! A round is a sequence of cycles. Each cycle exchanges `Sync`,
//! `DelayRequest` and `DelayResponse` and yields a [`TimestampQuad`]; the
//! peripheral reduces the round's quads to a single [`CorrectionResult`].

pub mod endpoint;
pub mod filter;
pub mod master;
pub mod offset;
pub mod peripheral;

pub use endpoint::{Endpoint, Received};
pub use filter::{
    process_offsets, process_offsets_with, FilterError, FilterPolicy, InterquartileMean, Mean,
    Median, OffsetFilter,
};
pub use master::{MasterSequencer, MasterState};
pub use offset::{calculate_offset, OffsetCalculator, OffsetSample, SampleError, TimestampQuad};
pub use peripheral::{PeripheralSequencer, PeripheralState};

use heapless::Vec;
use thiserror::Error;

use crate::protocol::MessageKind;

/// Most cycles a single round may run
pub const MAX_SYNC_CYCLES: usize = 32;

/// Requested cycle count is zero or above [`MAX_SYNC_CYCLES`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("invalid cycle count {0}")]
pub struct InvalidCycleCount(pub u32);

pub(crate) fn check_cycle_count(num_sync_cycles: u32) -> Result<usize, InvalidCycleCount> {
    match num_sync_cycles as usize {
        n @ 1..=MAX_SYNC_CYCLES => Ok(n),
        _ => Err(InvalidCycleCount(num_sync_cycles)),
    }
}

/// Why a cycle was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleFailure {
    /// The expected message did not arrive in time
    Timeout(MessageKind),
    /// The link refused a send
    Link,
    /// A newer `Sync` arrived before the cycle finished
    Superseded,
}

/// Outcome of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleRecord {
    /// Sequence number of the cycle's `Sync`
    pub sequence: u16,
    /// Timestamps captured so far
    pub quad: TimestampQuad,
    /// Set when the cycle was abandoned
    pub failure: Option<CycleFailure>,
}

impl CycleRecord {
    /// Whether the cycle ran to the end
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.quad.is_complete()
    }
}

/// Every cycle of one round, in order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoundRecord {
    /// Round counter of the sequencer that ran it
    pub round: u32,
    /// One record per attempted cycle
    pub cycles: Vec<CycleRecord, MAX_SYNC_CYCLES>,
}

impl RoundRecord {
    /// Captured quads, one per cycle
    pub fn quads(&self) -> impl Iterator<Item = &TimestampQuad> + '_ {
        self.cycles.iter().map(|c| &c.quad)
    }

    /// Number of cycles that ran to the end
    pub fn completed(&self) -> usize {
        self.cycles.iter().filter(|c| c.is_complete()).count()
    }

    /// Number of attempted cycles
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    /// Whether no cycle was attempted
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }
}

/// Aggregated correction for one round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CorrectionResult {
    /// Round the correction was computed from
    pub round: u32,
    /// Peripheral clock minus master clock (microseconds)
    pub offset_us: i64,
    /// Samples that survived validation
    pub valid_samples: usize,
    /// Cycles attempted
    pub total_cycles: usize,
}
