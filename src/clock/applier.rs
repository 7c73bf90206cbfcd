//! Commits round corrections to the real-time clock

use log::{debug, info};

use super::{RealTimeClock, RtcError};
use crate::sync::CorrectionResult;

/// What applying a correction did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Applied {
    /// The RTC was shifted by `delta_us`
    Adjusted {
        /// Shift applied, the negated offset
        delta_us: i64,
    },
    /// Zero offset, the RTC was left alone
    Unchanged,
    /// This round was already applied
    AlreadyApplied,
}

/// Owns the RTC and applies at most one correction per round
#[derive(Debug)]
pub struct ClockApplier<R> {
    rtc: R,
    last_round: Option<u32>,
}

impl<R: RealTimeClock> ClockApplier<R> {
    /// Wrap an RTC
    pub fn new(rtc: R) -> Self {
        Self {
            rtc,
            last_round: None,
        }
    }

    /// Shift the RTC by the negated offset of `correction`
    ///
    /// A peripheral running ahead (positive offset) is moved back.
    pub fn apply_offset(
        &mut self,
        correction: &CorrectionResult,
    ) -> Result<Applied, RtcError<R::Error>> {
        if self.last_round == Some(correction.round) {
            debug!("round {} already applied", correction.round);
            return Ok(Applied::AlreadyApplied);
        }
        if correction.offset_us == 0 {
            self.last_round = Some(correction.round);
            return Ok(Applied::Unchanged);
        }

        let delta_us = correction
            .offset_us
            .checked_neg()
            .ok_or(RtcError::OutOfRange)?;
        self.rtc.adjust_micros(delta_us)?;
        self.last_round = Some(correction.round);

        info!("rtc adjusted by {} us (round {})", delta_us, correction.round);
        Ok(Applied::Adjusted { delta_us })
    }

    /// Round of the last correction applied
    pub fn last_round(&self) -> Option<u32> {
        self.last_round
    }

    /// The wrapped RTC
    pub fn rtc(&self) -> &R {
        &self.rtc
    }

    /// The wrapped RTC, mutably
    pub fn rtc_mut(&mut self) -> &mut R {
        &mut self.rtc
    }

    /// Release the RTC
    pub fn into_inner(self) -> R {
        self.rtc
    }
}
