//! Memory budgeting for the out-of-core channel pipeline.

use crate::{Error, Result};
use sysinfo::System;

const MEMORY_OVERHEAD_FACTOR: f64 = 1.2;

/// Memory and threading limits for streaming a channel timepoint by timepoint.
#[derive(Clone, Debug)]
pub struct OutOfCoreConfig {
    /// Share of available memory that decoded timepoints may occupy, in (0, 1].
    pub memory_fraction: f64,
    /// Fixed byte budget for decoded timepoints; overrides `memory_fraction`.
    pub memory_budget_bytes: Option<usize>,
    /// Threads decoding illumination sides and running the fusion kernels.
    pub parallelism: Option<usize>,
    /// Most reduced timepoints waiting for the writer at once.
    pub queue_depth: usize,
}

impl Default for OutOfCoreConfig {
    fn default() -> Self {
        Self {
            memory_fraction: 0.5,
            memory_budget_bytes: None,
            parallelism: None,
            queue_depth: 2,
        }
    }
}

impl OutOfCoreConfig {
    /// Budget decoded timepoints as a share of available memory.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Budget decoded timepoints with a fixed byte count.
    #[must_use]
    pub fn with_memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    /// Threads used to decode the sides of one timepoint.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_parallelism`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads.max(1));
        self
    }

    /// Reduced timepoints the reader may run ahead of the writer.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_queue_depth`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Fallible variant of [`Self::with_parallelism`].
    ///
    /// # Errors
    /// Returns an error if `threads` is 0.
    pub fn try_with_parallelism(mut self, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::InvalidFormat(
                "parallelism must be at least 1".to_string(),
            ));
        }
        self.parallelism = Some(threads);
        Ok(self)
    }

    /// Fallible variant of [`Self::with_queue_depth`].
    ///
    /// # Errors
    /// Returns an error if `depth` is 0.
    pub fn try_with_queue_depth(mut self, depth: usize) -> Result<Self> {
        if depth == 0 {
            return Err(Error::InvalidFormat(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        self.queue_depth = depth;
        Ok(self)
    }

    /// Queue depth, never below one timepoint.
    #[must_use]
    pub fn effective_queue_depth(&self) -> usize {
        self.queue_depth.max(1)
    }

    /// Bytes available for decoded timepoints.
    ///
    /// # Errors
    /// Returns an error if the share is outside (0, 1] or available memory reads as 0.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_budget_bytes(&self) -> Result<usize> {
        if let Some(bytes) = self.memory_budget_bytes {
            return Ok(bytes);
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::InvalidFormat(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::InvalidFormat(
                "available system memory reported as 0".to_string(),
            ));
        }
        let budget = (available as f64 * self.memory_fraction).floor() as u64;
        Ok(usize::try_from(budget).unwrap_or(usize::MAX))
    }

    /// Number of reduced timepoints that may wait between stages.
    ///
    /// One timepoint is always being decoded; the remaining budget is split
    /// into queue slots, capped by [`Self::effective_queue_depth`] and never
    /// below 1.
    ///
    /// # Errors
    /// Returns an error if the memory budget cannot be resolved.
    pub fn in_flight_timepoints(&self, bytes_per_timepoint: usize) -> Result<usize> {
        let budget = self.resolve_budget_bytes()?;
        let slots = slots_for_budget(budget, bytes_per_timepoint).saturating_sub(1);
        Ok(slots.clamp(1, self.effective_queue_depth()))
    }

    /// Dedicated rayon pool when a thread count is configured.
    ///
    /// # Errors
    /// Returns an error if the pool cannot be built.
    pub fn thread_pool(&self) -> Result<Option<rayon::ThreadPool>> {
        let Some(threads) = self.parallelism else {
            return Ok(None);
        };
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .map(Some)
            .map_err(|e| Error::InvalidFormat(format!("thread pool: {e}")))
    }
}

/// Bytes held by one timepoint of `sides` illumination volumes of `shape`.
#[must_use]
pub fn timepoint_bytes(shape: (usize, usize, usize), sides: usize) -> usize {
    shape
        .0
        .saturating_mul(shape.1)
        .saturating_mul(shape.2)
        .saturating_mul(sides.max(1))
        .saturating_mul(std::mem::size_of::<u16>())
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn slots_for_budget(budget_bytes: usize, bytes_per_timepoint: usize) -> usize {
    let per_slot = (bytes_per_timepoint as f64 * MEMORY_OVERHEAD_FACTOR).ceil() as usize;
    budget_bytes / per_slot.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_clamp_and_validate() {
        let config = OutOfCoreConfig::default()
            .with_queue_depth(0)
            .with_parallelism(0);
        assert_eq!(config.queue_depth, 1);
        assert_eq!(config.parallelism, Some(1));
        assert!(OutOfCoreConfig::default().try_with_queue_depth(0).is_err());
        assert!(OutOfCoreConfig::default().try_with_parallelism(0).is_err());
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let config = OutOfCoreConfig::default().with_memory_fraction(1.5);
        assert!(config.resolve_budget_bytes().is_err());
        let config = OutOfCoreConfig::default().with_memory_fraction(0.0);
        assert!(config.resolve_budget_bytes().is_err());
    }

    #[test]
    fn test_in_flight_follows_budget() {
        let per_tp = timepoint_bytes((10, 100, 100), 2);
        assert_eq!(per_tp, 400_000);

        let roomy = OutOfCoreConfig::default()
            .with_memory_budget_bytes(per_tp * 100)
            .with_queue_depth(4);
        assert_eq!(roomy.in_flight_timepoints(per_tp).unwrap(), 4);

        let tight = OutOfCoreConfig::default()
            .with_memory_budget_bytes(per_tp * 3)
            .with_queue_depth(8);
        assert_eq!(tight.in_flight_timepoints(per_tp).unwrap(), 1);

        let starved = OutOfCoreConfig::default().with_memory_budget_bytes(1);
        assert_eq!(starved.in_flight_timepoints(per_tp).unwrap(), 1);
    }

    #[test]
    fn test_thread_pool_only_when_configured() {
        assert!(OutOfCoreConfig::default().thread_pool().unwrap().is_none());
        let pool = OutOfCoreConfig::default()
            .with_parallelism(2)
            .thread_pool()
            .unwrap()
            .unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }
}
