//! Reduce per-cycle samples to one correction
//!
//! Invalid cycles are dropped first. The remaining offsets are reduced by an
//! [`OffsetFilter`]; all policies use integer arithmetic so the same input
//! always gives the same output.

use heapless::Vec;
use thiserror::Error;

use super::offset::{OffsetSample, SampleError};
use super::MAX_SYNC_CYCLES;

/// Filter errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterError {
    /// Every cycle in the round was invalid
    #[error("no valid samples in round")]
    NoValidSamples,
}

/// Offset reduction policy
pub trait OffsetFilter {
    /// Reduce a non-empty set of offsets. The slice may be reordered.
    fn reduce(&self, offsets: &mut [i64]) -> i64;
}

/// Arithmetic mean, truncated toward zero
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean;

impl OffsetFilter for Mean {
    fn reduce(&self, offsets: &mut [i64]) -> i64 {
        mean(offsets)
    }
}

/// Median; the lower-rounded midpoint of the two middle values for even counts
#[derive(Debug, Clone, Copy, Default)]
pub struct Median;

impl OffsetFilter for Median {
    fn reduce(&self, offsets: &mut [i64]) -> i64 {
        offsets.sort_unstable();
        let mid = offsets.len() / 2;
        if offsets.len() % 2 == 1 {
            offsets[mid]
        } else {
            let sum = i128::from(offsets[mid - 1]) + i128::from(offsets[mid]);
            sum.div_euclid(2) as i64
        }
    }
}

/// Mean after Tukey fence outlier removal
///
/// Values outside `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]` are dropped before
/// averaging. Quartiles use linear interpolation between closest ranks.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterquartileMean;

impl OffsetFilter for InterquartileMean {
    fn reduce(&self, offsets: &mut [i64]) -> i64 {
        offsets.sort_unstable();

        // Quartiles scaled by 100 to keep the interpolation exact
        let q1 = percentile_x100(offsets, 25);
        let q3 = percentile_x100(offsets, 75);
        let iqr = q3 - q1;

        // Fences scaled by 200: 2*Q - 3*IQR == 200 * (Q - 1.5 IQR) / 100
        let lower = 2 * q1 - 3 * iqr;
        let upper = 2 * q3 + 3 * iqr;
        let inside = |x: i64| {
            let x = i128::from(x) * 200;
            lower <= x && x <= upper
        };

        let start = offsets.iter().position(|&x| inside(x)).unwrap_or(0);
        let end = offsets
            .iter()
            .rposition(|&x| inside(x))
            .map_or(offsets.len(), |i| i + 1);
        mean(&offsets[start..end])
    }
}

/// Built-in filter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterPolicy {
    /// [`Mean`]
    #[default]
    Mean,
    /// [`Median`]
    Median,
    /// [`InterquartileMean`]
    InterquartileMean,
}

impl OffsetFilter for FilterPolicy {
    fn reduce(&self, offsets: &mut [i64]) -> i64 {
        match self {
            Self::Mean => Mean.reduce(offsets),
            Self::Median => Median.reduce(offsets),
            Self::InterquartileMean => InterquartileMean.reduce(offsets),
        }
    }
}

/// Value at `percent` of sorted data, times 100
fn percentile_x100(sorted: &[i64], percent: usize) -> i128 {
    let rank_x100 = (sorted.len() - 1) * percent;
    let floor = rank_x100 / 100;
    let frac = (rank_x100 % 100) as i128;
    if frac == 0 {
        return i128::from(sorted[floor]) * 100;
    }
    i128::from(sorted[floor]) * (100 - frac) + i128::from(sorted[floor + 1]) * frac
}

fn mean(offsets: &[i64]) -> i64 {
    let sum: i128 = offsets.iter().map(|&x| i128::from(x)).sum();
    (sum / offsets.len() as i128) as i64
}

/// Reduce samples with the baseline mean
pub fn process_offsets<'a, I>(samples: I) -> Result<i64, FilterError>
where
    I: IntoIterator<Item = &'a Result<OffsetSample, SampleError>>,
{
    process_offsets_with(samples, &Mean)
}

/// Reduce samples with a chosen policy
///
/// At most [`MAX_SYNC_CYCLES`] valid samples are used; a round never
/// produces more.
pub fn process_offsets_with<'a, I, F>(samples: I, filter: &F) -> Result<i64, FilterError>
where
    I: IntoIterator<Item = &'a Result<OffsetSample, SampleError>>,
    F: OffsetFilter + ?Sized,
{
    let mut offsets: Vec<i64, MAX_SYNC_CYCLES> = Vec::new();
    for sample in samples.into_iter().flatten() {
        if offsets.push(sample.offset).is_err() {
            log::warn!("more than {} samples, ignoring the rest", MAX_SYNC_CYCLES);
            break;
        }
    }

    if offsets.is_empty() {
        return Err(FilterError::NoValidSamples);
    }
    Ok(filter.reduce(&mut offsets))
}
