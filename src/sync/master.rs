//! Master side of a sync round

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, info, warn};

use super::endpoint::Endpoint;
use super::{check_cycle_count, CycleFailure, CycleRecord, InvalidCycleCount, RoundRecord};
use crate::clock::TimestampSource;
use crate::config::SyncConfig;
use crate::protocol::{MessageKind, SyncMessage};
use crate::radio::RadioLink;

/// Master sequencer states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MasterState {
    /// No cycle in flight
    Idle,
    /// Sync sent, waiting for the matching Delay request
    AwaitDelayRequest,
    /// Last cycle finished, more to run
    CycleDone,
    /// All cycles of the round attempted
    RoundComplete,
}

/// Drives the master through the cycles of a round
#[derive(Debug)]
pub struct MasterSequencer {
    state: MasterState,
    timeout_ms: u32,
    cycle_gap_ms: u32,
    /// Next cycle sequence number, carried across rounds
    next_sequence: u16,
    round: u32,
    /// Cycles in the current round, zero when no round is active
    target: usize,
    record: RoundRecord,
}

impl MasterSequencer {
    /// Create a sequencer using the configured timeout and cycle gap
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            state: MasterState::Idle,
            timeout_ms: config.timeout_ms,
            cycle_gap_ms: config.cycle_gap_ms,
            next_sequence: 0,
            round: 0,
            target: 0,
            record: RoundRecord::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> MasterState {
        self.state
    }

    /// Rounds started so far
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Begin a round of `num_sync_cycles` cycles
    ///
    /// Any unfinished round is discarded.
    pub fn start_round(&mut self, num_sync_cycles: u32) -> Result<(), InvalidCycleCount> {
        let target = check_cycle_count(num_sync_cycles)?;
        self.round = self.round.wrapping_add(1);
        self.target = target;
        self.record = RoundRecord {
            round: self.round,
            cycles: heapless::Vec::new(),
        };
        self.state = MasterState::Idle;
        Ok(())
    }

    /// Whether every cycle of the active round has been attempted
    pub fn is_complete(&self) -> bool {
        self.target > 0 && self.record.len() >= self.target
    }

    /// Run the next cycle of the active round
    ///
    /// Returns `None` when there is no active round or it is already
    /// complete.
    pub fn run_cycle<L, X, C, D>(
        &mut self,
        endpoint: &mut Endpoint<L, X, C, D>,
    ) -> Option<CycleRecord>
    where
        L: RadioLink,
        X: Fn(&L::Envelope) -> &[u8],
        C: TimestampSource,
        D: DelayMs<u32>,
    {
        if self.target == 0 || self.is_complete() {
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let mut cycle = CycleRecord {
            sequence,
            ..CycleRecord::default()
        };

        let t1 = endpoint.now();
        cycle.quad.t1 = Some(t1);
        if let Err(e) = endpoint.send(&SyncMessage::Sync { sequence, t1 }) {
            warn!("cycle {}: sync send failed: {:?}", sequence, e);
            cycle.failure = Some(CycleFailure::Link);
            return Some(self.end_cycle(endpoint, cycle));
        }

        self.state = MasterState::AwaitDelayRequest;
        let reply = endpoint.wait_for(self.timeout_ms, |message| match *message {
            SyncMessage::DelayRequest {
                sequence: seq,
                t2,
                t3,
            } if seq == sequence => Some((t2, t3)),
            _ => None,
        });

        match reply {
            Some(((t2, t3), t4)) => {
                cycle.quad.t2 = Some(t2);
                cycle.quad.t3 = Some(t3);
                cycle.quad.t4 = Some(t4);
                if let Err(e) = endpoint.send(&SyncMessage::DelayResponse { sequence, t1, t4 }) {
                    warn!("cycle {}: delay response send failed: {:?}", sequence, e);
                    cycle.failure = Some(CycleFailure::Link);
                }
            }
            None => {
                warn!(
                    "cycle {}: timed out waiting for {}",
                    sequence,
                    MessageKind::DelayRequest
                );
                cycle.failure = Some(CycleFailure::Timeout(MessageKind::DelayRequest));
            }
        }

        Some(self.end_cycle(endpoint, cycle))
    }

    /// Close the active round and hand back its record
    pub fn finish(&mut self) -> RoundRecord {
        self.target = 0;
        self.state = MasterState::Idle;
        core::mem::take(&mut self.record)
    }

    /// Run a complete round
    pub fn run_round<L, X, C, D>(
        &mut self,
        endpoint: &mut Endpoint<L, X, C, D>,
        num_sync_cycles: u32,
    ) -> Result<RoundRecord, InvalidCycleCount>
    where
        L: RadioLink,
        X: Fn(&L::Envelope) -> &[u8],
        C: TimestampSource,
        D: DelayMs<u32>,
    {
        self.start_round(num_sync_cycles)?;
        info!("master round {}: {} cycles", self.round, num_sync_cycles);

        while self.run_cycle(endpoint).is_some() {}

        let record = self.finish();
        info!(
            "master round {} done: {}/{} cycles completed",
            record.round,
            record.completed(),
            record.len()
        );
        Ok(record)
    }

    fn end_cycle<L, X, C, D>(
        &mut self,
        endpoint: &mut Endpoint<L, X, C, D>,
        cycle: CycleRecord,
    ) -> CycleRecord
    where
        L: RadioLink,
        X: Fn(&L::Envelope) -> &[u8],
        C: TimestampSource,
        D: DelayMs<u32>,
    {
        debug!("cycle {}: {:?}", cycle.sequence, cycle.quad);
        if self.record.cycles.push(cycle).is_err() {
            warn!("round record full, dropping cycle {}", cycle.sequence);
        }

        // Let the peripheral finish with the cycle before the next Sync
        endpoint.sleep_ms(self.cycle_gap_ms);

        self.state = if self.is_complete() {
            MasterState::RoundComplete
        } else {
            MasterState::CycleDone
        };
        cycle
    }
}
