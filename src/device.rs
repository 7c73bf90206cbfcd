//! High-level sync device
//!
//! [`SyncDevice`] owns the radio link and the clocks and runs whichever side
//! of the protocol its [`Role`] selects. A master is usually driven by
//! calling [`SyncDevice::poll_master`] from the application loop; a
//! peripheral calls [`SyncDevice::synchronize`] whenever it wants its RTC
//! corrected.

use embedded_hal::blocking::delay::DelayMs;
use heapless::Vec;
use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    clock::{Applied, ClockApplier, RealTimeClock, RtcError, TimestampSource},
    config::{ConfigError, SyncConfig},
    protocol::SyncMessage,
    radio::RadioLink,
    sync::{
        endpoint::RECEIVE_BURST, process_offsets_with, CorrectionResult, Endpoint,
        InvalidCycleCount, MasterSequencer, OffsetCalculator, OffsetSample, PeripheralSequencer,
        RoundRecord, SampleError, MAX_SYNC_CYCLES,
    },
};

/// Side of the protocol a device runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Time source
    Master,
    /// Time follower
    Peripheral,
}

/// Sync device error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncError<E> {
    /// Operation belongs to the other role
    #[error("operation requires the {expected:?} role")]
    WrongRole {
        /// Role the operation needs
        expected: Role,
    },
    /// Cycle count is zero or too large
    #[error("invalid cycle count {0}")]
    InvalidCycleCount(u32),
    /// Every cycle of the round was invalid; the RTC was not touched
    #[error("round {round} produced no valid samples")]
    NoValidSamples {
        /// Round that failed
        round: u32,
    },
    /// RTC adjustment failed
    #[error("clock adjustment failed: {0:?}")]
    Clock(RtcError<E>),
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(ConfigError),
}

impl<E> From<InvalidCycleCount> for SyncError<E> {
    fn from(error: InvalidCycleCount) -> Self {
        SyncError::InvalidCycleCount(error.0)
    }
}

/// Outcome of a peripheral synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Correction computed from the round
    pub correction: CorrectionResult,
    /// What happened to the RTC
    pub applied: Applied,
    /// The round's captured timestamps
    pub record: RoundRecord,
}

/// Sync device
pub struct SyncDevice<L, X, C, R, D>
where
    L: RadioLink,
{
    role: Role,
    config: SyncConfig,
    endpoint: Endpoint<L, X, C, D>,
    master: MasterSequencer,
    peripheral: PeripheralSequencer,
    applier: ClockApplier<R>,
}

impl<L, X, C, R, D> SyncDevice<L, X, C, R, D>
where
    L: RadioLink,
    X: Fn(&L::Envelope) -> &[u8],
    C: TimestampSource,
    R: RealTimeClock,
    D: DelayMs<u32>,
{
    /// Create a new sync device
    ///
    /// `extract` unwraps the link's envelopes to raw message bytes.
    pub fn new(
        role: Role,
        config: SyncConfig,
        link: L,
        extract: X,
        clock: C,
        rtc: R,
        delay: D,
    ) -> Result<Self, SyncError<R::Error>> {
        config.validate().map_err(SyncError::Config)?;

        Ok(Self {
            role,
            config,
            endpoint: Endpoint::new(link, extract, clock, delay, config.poll_interval_ms),
            master: MasterSequencer::new(&config),
            peripheral: PeripheralSequencer::new(&config),
            applier: ClockApplier::new(rtc),
        })
    }

    /// Device role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Active configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Serve a pending sync request, if any
    ///
    /// Looks at up to [`RECEIVE_BURST`] protocol messages already received.
    /// When a `SyncRequest` is among them, runs a round of the requested
    /// length, clamped to [`MAX_SYNC_CYCLES`], and returns its record.
    pub fn poll_master(&mut self) -> Result<Option<RoundRecord>, SyncError<R::Error>> {
        self.require(Role::Master)?;

        for _ in 0..RECEIVE_BURST {
            let Some(received) = self.endpoint.try_receive() else {
                break;
            };
            match received.message {
                SyncMessage::SyncRequest { num_sync_cycles } => {
                    let cycles = num_sync_cycles.min(MAX_SYNC_CYCLES as u32);
                    if cycles != num_sync_cycles {
                        warn!(
                            "peer asked for {} cycles, running {}",
                            num_sync_cycles, cycles
                        );
                    }
                    let record = self.master.run_round(&mut self.endpoint, cycles)?;
                    return Ok(Some(record));
                }
                other => debug!("master idle, ignoring {}", other.kind()),
            }
        }
        Ok(None)
    }

    /// Run a master round of `num_sync_cycles` cycles
    pub fn run_master_round(
        &mut self,
        num_sync_cycles: u32,
    ) -> Result<RoundRecord, SyncError<R::Error>> {
        self.require(Role::Master)?;
        Ok(self.master.run_round(&mut self.endpoint, num_sync_cycles)?)
    }

    /// Run a peripheral round and return the raw timestamps
    pub fn run_peripheral_round(
        &mut self,
        initiate_sync: bool,
        num_sync_cycles: u32,
    ) -> Result<RoundRecord, SyncError<R::Error>> {
        self.require(Role::Peripheral)?;
        Ok(self
            .peripheral
            .run_round(&mut self.endpoint, initiate_sync, num_sync_cycles)?)
    }

    /// Reduce a round to a correction
    pub fn compute_correction(
        &self,
        record: &RoundRecord,
    ) -> Result<CorrectionResult, SyncError<R::Error>> {
        let calculator =
            OffsetCalculator::new(self.endpoint.counter_width(), self.config.max_delay_us);

        let samples: Vec<Result<OffsetSample, SampleError>, MAX_SYNC_CYCLES> = record
            .cycles
            .iter()
            .map(|cycle| {
                let sample = match cycle.failure {
                    Some(_) => Err(SampleError::Incomplete),
                    None => calculator.calculate(&cycle.quad),
                };
                if let Err(e) = &sample {
                    debug!("cycle {} rejected: {}", cycle.sequence, e);
                }
                sample
            })
            .collect();

        let valid_samples = samples.iter().filter(|s| s.is_ok()).count();
        let offset_us = process_offsets_with(samples.iter(), &self.config.filter).map_err(|_| {
            SyncError::NoValidSamples {
                round: record.round,
            }
        })?;

        Ok(CorrectionResult {
            round: record.round,
            offset_us,
            valid_samples,
            total_cycles: record.len(),
        })
    }

    /// Run a full peripheral synchronization
    ///
    /// Runs a round of the configured length, computes the correction and
    /// applies it to the RTC. If no cycle produced a valid sample the RTC is
    /// left untouched and [`SyncError::NoValidSamples`] is returned.
    pub fn synchronize(&mut self, initiate_sync: bool) -> Result<SyncReport, SyncError<R::Error>> {
        let record = self.run_peripheral_round(initiate_sync, self.config.num_sync_cycles)?;
        let correction = match self.compute_correction(&record) {
            Ok(correction) => correction,
            Err(e) => {
                warn!("round {}: no valid samples, clock unchanged", record.round);
                return Err(e);
            }
        };
        let applied = self
            .applier
            .apply_offset(&correction)
            .map_err(SyncError::Clock)?;

        info!(
            "round {}: offset {} us from {}/{} samples",
            correction.round, correction.offset_us, correction.valid_samples, correction.total_cycles
        );
        Ok(SyncReport {
            correction,
            applied,
            record,
        })
    }

    /// Apply a correction computed elsewhere
    pub fn apply_correction(
        &mut self,
        correction: &CorrectionResult,
    ) -> Result<Applied, SyncError<R::Error>> {
        self.require(Role::Peripheral)?;
        self.applier.apply_offset(correction).map_err(SyncError::Clock)
    }

    /// Pop the oldest non-protocol envelope received by the link
    pub fn take_passthrough(&mut self) -> Option<L::Envelope> {
        self.endpoint.pop_passthrough()
    }

    /// Radio link
    pub fn link(&self) -> &L {
        self.endpoint.link()
    }

    /// Mutable radio link
    pub fn link_mut(&mut self) -> &mut L {
        self.endpoint.link_mut()
    }

    /// Real-time clock
    pub fn rtc(&self) -> &R {
        self.applier.rtc()
    }

    /// Mutable real-time clock
    pub fn rtc_mut(&mut self) -> &mut R {
        self.applier.rtc_mut()
    }

    fn require(&self, expected: Role) -> Result<(), SyncError<R::Error>> {
        if self.role == expected {
            Ok(())
        } else {
            Err(SyncError::WrongRole { expected })
        }
    }
}
