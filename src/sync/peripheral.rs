//! Peripheral side of a sync round
//!
//! The peripheral answers each `Sync` with a `DelayRequest` and collects the
//! master's `DelayResponse`. A `DelayResponse` only completes a cycle if both
//! its sequence number and its t1 echo match the `Sync` being answered, so a
//! late reply from an abandoned cycle cannot be mistaken for a fresh one.
//!
//! If a newer `Sync` shows up while the peripheral is still waiting for a
//! `DelayResponse`, the master has moved on: the current cycle is abandoned
//! and the new `Sync` opens the next one.

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, info, warn};

use super::endpoint::Endpoint;
use super::{check_cycle_count, CycleFailure, CycleRecord, InvalidCycleCount, RoundRecord};
use crate::clock::TimestampSource;
use crate::config::SyncConfig;
use crate::protocol::{MessageKind, SyncMessage};
use crate::radio::RadioLink;

/// Peripheral sequencer states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeripheralState {
    /// No cycle in flight
    Idle,
    /// Asking the master to start a round
    SendSyncRequest,
    /// Waiting for the master's Sync
    AwaitSync,
    /// Answering a Sync
    SendDelayRequest,
    /// Waiting for the master's Delay response
    AwaitDelayResponse,
    /// Last cycle finished, more to run
    CycleDone,
    /// All cycles of the round attempted
    RoundComplete,
}

/// A received Sync not yet answered
#[derive(Debug, Clone, Copy)]
struct PendingSync {
    sequence: u16,
    t1: u64,
    t2: u64,
}

/// What arrived while waiting for a Delay response
enum Reply {
    Response(u64),
    NewSync { sequence: u16, t1: u64 },
}

/// Drives the peripheral through the cycles of a round
#[derive(Debug)]
pub struct PeripheralSequencer {
    state: PeripheralState,
    timeout_ms: u32,
    round: u32,
    target: usize,
    record: RoundRecord,
    pending_sync: Option<PendingSync>,
}

impl PeripheralSequencer {
    /// Create a sequencer using the configured timeout
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            state: PeripheralState::Idle,
            timeout_ms: config.timeout_ms,
            round: 0,
            target: 0,
            record: RoundRecord::default(),
            pending_sync: None,
        }
    }

    /// Current state
    pub fn state(&self) -> PeripheralState {
        self.state
    }

    /// Rounds started so far
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Begin a round of `num_sync_cycles` cycles
    pub fn start_round(&mut self, num_sync_cycles: u32) -> Result<(), InvalidCycleCount> {
        let target = check_cycle_count(num_sync_cycles)?;
        self.round = self.round.wrapping_add(1);
        self.target = target;
        self.record = RoundRecord {
            round: self.round,
            cycles: heapless::Vec::new(),
        };
        self.pending_sync = None;
        self.state = PeripheralState::Idle;
        Ok(())
    }

    /// Ask the master to run the active round
    pub fn request_round<L, X, C, D>(
        &mut self,
        endpoint: &mut Endpoint<L, X, C, D>,
    ) -> Result<(), L::Error>
    where
        L: RadioLink,
        X: Fn(&L::Envelope) -> &[u8],
        C: TimestampSource,
        D: DelayMs<u32>,
    {
        self.state = PeripheralState::SendSyncRequest;
        let num_sync_cycles = self.target as u32;
        let result = endpoint.send(&SyncMessage::SyncRequest { num_sync_cycles });
        self.state = PeripheralState::Idle;
        result
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
        let mut cycle = CycleRecord::default();

        self.state = PeripheralState::AwaitSync;
        let sync = self.pending_sync.take().or_else(|| {
            endpoint
                .wait_for(self.timeout_ms, |message| match *message {
                    SyncMessage::Sync { sequence, t1 } => Some((sequence, t1)),
                    _ => None,
                })
                .map(|((sequence, t1), t2)| PendingSync { sequence, t1, t2 })
        });
        let PendingSync { sequence, t1, t2 } = match sync {
            Some(sync) => sync,
            None => {
                warn!("timed out waiting for {}", MessageKind::Sync);
                cycle.failure = Some(CycleFailure::Timeout(MessageKind::Sync));
                return Some(self.end_cycle(cycle));
            }
        };
        cycle.sequence = sequence;
        cycle.quad.t1 = Some(t1);
        cycle.quad.t2 = Some(t2);

        self.state = PeripheralState::SendDelayRequest;
        let t3 = endpoint.now();
        cycle.quad.t3 = Some(t3);
        if let Err(e) = endpoint.send(&SyncMessage::DelayRequest { sequence, t2, t3 }) {
            warn!("cycle {}: delay request send failed: {:?}", sequence, e);
            cycle.failure = Some(CycleFailure::Link);
            return Some(self.end_cycle(cycle));
        }

        self.state = PeripheralState::AwaitDelayResponse;
        let reply = endpoint.wait_for(self.timeout_ms, |message| match *message {
            SyncMessage::DelayResponse {
                sequence: seq,
                t1: echo,
                t4,
            } if seq == sequence && echo == t1 => Some(Reply::Response(t4)),
            SyncMessage::Sync {
                sequence: seq,
                t1: next_t1,
            } if seq != sequence => Some(Reply::NewSync {
                sequence: seq,
                t1: next_t1,
            }),
            _ => None,
        });

        match reply {
            Some((Reply::Response(t4), _)) => cycle.quad.t4 = Some(t4),
            Some((Reply::NewSync { sequence: next, t1 }, t2)) => {
                warn!("cycle {}: superseded by cycle {}", sequence, next);
                cycle.failure = Some(CycleFailure::Superseded);
                self.pending_sync = Some(PendingSync {
                    sequence: next,
                    t1,
                    t2,
                });
            }
            None => {
                warn!(
                    "cycle {}: timed out waiting for {}",
                    sequence,
                    MessageKind::DelayResponse
                );
                cycle.failure = Some(CycleFailure::Timeout(MessageKind::DelayResponse));
            }
        }

        Some(self.end_cycle(cycle))
    }

    /// Close the active round and hand back its record
    pub fn finish(&mut self) -> RoundRecord {
        self.target = 0;
        self.pending_sync = None;
        self.state = PeripheralState::Idle;
        core::mem::take(&mut self.record)
    }

    /// Run a complete round, optionally asking the master to start it
    pub fn run_round<L, X, C, D>(
        &mut self,
        endpoint: &mut Endpoint<L, X, C, D>,
        initiate_sync: bool,
        num_sync_cycles: u32,
    ) -> Result<RoundRecord, InvalidCycleCount>
    where
        L: RadioLink,
        X: Fn(&L::Envelope) -> &[u8],
        C: TimestampSource,
        D: DelayMs<u32>,
    {
        self.start_round(num_sync_cycles)?;
        info!("peripheral round {}: {} cycles", self.round, num_sync_cycles);

        if initiate_sync {
            if let Err(e) = self.request_round(endpoint) {
                warn!("sync request send failed: {:?}", e);
            }
        }

        while self.run_cycle(endpoint).is_some() {}

        let record = self.finish();
        info!(
            "peripheral round {} done: {}/{} cycles completed",
            record.round,
            record.completed(),
            record.len()
        );
        Ok(record)
    }

    fn end_cycle(&mut self, cycle: CycleRecord) -> CycleRecord {
        debug!("cycle {}: {:?}", cycle.sequence, cycle.quad);
        if self.record.cycles.push(cycle).is_err() {
            warn!("round record full, dropping cycle {}", cycle.sequence);
        }
        self.state = if self.is_complete() {
            PeripheralState::RoundComplete
        } else {
            PeripheralState::CycleDone
        };
        cycle
    }
}
