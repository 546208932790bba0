//! Statistics for bulk cache population.

use std::time::{Duration, Instant};

/// Outcome of a bulk fetch-and-cache run (install or offline download).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Number of resources fetched and stored.
    pub fetched: usize,
    /// Number of resources already present and skipped.
    pub already_cached: usize,
    /// Total bytes stored.
    pub total_bytes: u64,
    /// Wall time for the run.
    pub elapsed: Duration,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStats {
    /// Creates empty statistics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fetched: 0,
            already_cached: 0,
            total_bytes: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Returns the average transfer speed in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.total_bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Builder for accumulating statistics during a run.
pub struct SyncStatsBuilder {
    fetched: usize,
    already_cached: usize,
    total_bytes: u64,
    start_time: Instant,
}

impl Default for SyncStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatsBuilder {
    /// Starts timing a new run.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fetched: 0,
            already_cached: 0,
            total_bytes: 0,
            start_time: Instant::now(),
        }
    }

    /// Sets the number of resources that did not need fetching.
    pub const fn set_already_cached(&mut self, count: usize) {
        self.already_cached = count;
    }

    /// Records one stored resource.
    pub const fn add_fetch(&mut self, bytes: u64) {
        self.fetched += 1;
        self.total_bytes += bytes;
    }

    /// Builds the final statistics.
    #[must_use]
    pub fn build(self) -> SyncStats {
        SyncStats {
            fetched: self.fetched,
            already_cached: self.already_cached,
            total_bytes: self.total_bytes,
            elapsed: self.start_time.elapsed(),
        }
    }
}
