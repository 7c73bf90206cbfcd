use thiserror::Error;

use crate::sync::{FilterPolicy, MAX_SYNC_CYCLES};

/// Default time to wait for each expected message
pub const DEFAULT_TIMEOUT_MS: u32 = 1_000;
/// Default pause between empty polls of the link
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 1;
/// Default pause the master takes after each cycle
pub const DEFAULT_CYCLE_GAP_MS: u32 = 25;

/// Configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Cycle count outside 1..=MAX_SYNC_CYCLES
    #[error("num_sync_cycles must be in 1..={max}, got {0}", max = MAX_SYNC_CYCLES)]
    InvalidCycleCount(u32),
    /// A zero timeout would abandon every cycle
    #[error("timeout_ms must be non-zero")]
    ZeroTimeout,
}

/// Sync protocol configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Per-message wait in milliseconds
    pub timeout_ms: u32,
    /// Cycles per round the peripheral requests
    pub num_sync_cycles: u32,
    /// Sleep between empty link polls in milliseconds
    pub poll_interval_ms: u32,
    /// Master pause after each cycle in milliseconds
    pub cycle_gap_ms: u32,
    /// Reject samples whose delay exceeds this (microseconds)
    pub max_delay_us: Option<u64>,
    /// Offset reduction policy
    pub filter: FilterPolicy,
}

impl SyncConfig {
    /// Create a configuration with a timeout and cycle count, other fields default
    pub fn new(timeout_ms: u32, num_sync_cycles: u32) -> Self {
        Self {
            timeout_ms,
            num_sync_cycles,
            ..Self::default()
        }
    }

    /// Set the poll interval
    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u32) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Set the master's inter-cycle gap
    pub fn with_cycle_gap_ms(mut self, cycle_gap_ms: u32) -> Self {
        self.cycle_gap_ms = cycle_gap_ms;
        self
    }

    /// Set the delay ceiling
    pub fn with_max_delay_us(mut self, max_delay_us: u64) -> Self {
        self.max_delay_us = Some(max_delay_us);
        self
    }

    /// Set the filter policy
    pub fn with_filter(mut self, filter: FilterPolicy) -> Self {
        self.filter = filter;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_sync_cycles == 0 || self.num_sync_cycles as usize > MAX_SYNC_CYCLES {
            return Err(ConfigError::InvalidCycleCount(self.num_sync_cycles));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            num_sync_cycles: 1,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            cycle_gap_ms: DEFAULT_CYCLE_GAP_MS,
            max_delay_us: None,
            filter: FilterPolicy::Mean,
        }
    }
}
