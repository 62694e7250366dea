//! Run metrics
//!
//! Atomic counters updated from worker threads, snapshotted at the end
//! of a run.

use crate::interfaces::WriteOutcome;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one run
#[derive(Debug, Default)]
pub struct RunMetrics {
    /// Reps compiled by executing their action sequence
    pub reps_compiled: AtomicU64,

    /// Reps satisfied from the cross-run cache
    pub cache_hits: AtomicU64,

    /// Suspensions on unmet dependencies
    pub suspensions: AtomicU64,

    /// Resumptions of suspended reps
    pub resumes: AtomicU64,

    /// Reps whose compilation failed
    pub failures: AtomicU64,

    /// Writes by outcome
    pub writes_created: AtomicU64,
    pub writes_updated: AtomicU64,
    pub writes_identical: AtomicU64,
    pub writes_skipped: AtomicU64,
}

impl RunMetrics {
    /// Fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_compiled(&self) {
        self.reps_compiled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suspension(&self) {
        self.suspensions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resume(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, outcome: WriteOutcome) {
        let counter = match outcome {
            WriteOutcome::Created => &self.writes_created,
            WriteOutcome::Updated => &self.writes_updated,
            WriteOutcome::Identical => &self.writes_identical,
            WriteOutcome::Skipped => &self.writes_skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Plain-value snapshot of the counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reps_compiled: self.reps_compiled.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            suspensions: self.suspensions.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            writes_created: self.writes_created.load(Ordering::Relaxed),
            writes_updated: self.writes_updated.load(Ordering::Relaxed),
            writes_identical: self.writes_identical.load(Ordering::Relaxed),
            writes_skipped: self.writes_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`RunMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub reps_compiled: u64,
    pub cache_hits: u64,
    pub suspensions: u64,
    pub resumes: u64,
    pub failures: u64,
    pub writes_created: u64,
    pub writes_updated: u64,
    pub writes_identical: u64,
    pub writes_skipped: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "compiled: {} | cached: {} | failed: {}",
            self.reps_compiled, self.cache_hits, self.failures
        )?;
        writeln!(
            f,
            "suspensions: {} | resumes: {}",
            self.suspensions, self.resumes
        )?;
        write!(
            f,
            "writes: {} created, {} updated, {} identical, {} skipped",
            self.writes_created, self.writes_updated, self.writes_identical, self.writes_skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = RunMetrics::new();
        metrics.record_compiled();
        metrics.record_compiled();
        metrics.record_cache_hit();
        metrics.record_write(WriteOutcome::Created);
        metrics.record_write(WriteOutcome::Identical);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.reps_compiled, 2);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.writes_created, 1);
        assert_eq!(snapshot.writes_identical, 1);
        assert_eq!(snapshot.failures, 0);
    }
}
