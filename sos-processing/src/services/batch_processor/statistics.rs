//! Per-run statistics
//!
//! Workers update the counters concurrently; a snapshot is taken for
//! progress events and the final log line.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::services::observation_transformer::TransformDiagnostics;

/// Live counters of one provider run
#[derive(Debug, Default)]
pub struct RunStatistics {
    chunks: AtomicU64,
    read: AtomicU64,
    processed: AtomicU64,
    invalid: AtomicU64,
    diffused: AtomicU64,
    fail_safe_diffusions: AtomicU64,
    area_overlaps: AtomicU64,
    taxa_resolved_by_name: AtomicU64,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&self, records: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.read.fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Account for one transformed record
    pub fn record(&self, valid: bool, diagnostics: &TransformDiagnostics) {
        if valid {
            self.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.invalid.fetch_add(1, Ordering::Relaxed);
        }
        if diagnostics.diffused {
            self.diffused.fetch_add(1, Ordering::Relaxed);
        }
        if diagnostics.diffusion_fail_safe {
            self.fail_safe_diffusions.fetch_add(1, Ordering::Relaxed);
        }
        if diagnostics.taxon_resolved_by_name {
            self.taxa_resolved_by_name.fetch_add(1, Ordering::Relaxed);
        }
        self.area_overlaps
            .fetch_add(diagnostics.area_overlaps as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            chunks: self.chunks.load(Ordering::Relaxed),
            read: self.read.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            diffused: self.diffused.load(Ordering::Relaxed),
            fail_safe_diffusions: self.fail_safe_diffusions.load(Ordering::Relaxed),
            area_overlaps: self.area_overlaps.load(Ordering::Relaxed),
            taxa_resolved_by_name: self.taxa_resolved_by_name.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RunStatistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub chunks: u64,
    pub read: u64,
    pub processed: u64,
    pub invalid: u64,
    pub diffused: u64,
    pub fail_safe_diffusions: u64,
    pub area_overlaps: u64,
    pub taxa_resolved_by_name: u64,
}

impl StatisticsSnapshot {
    pub fn display_string(&self) -> String {
        let mut line = format!(
            "{} read, {} processed, {} invalid, {} diffused",
            self.read, self.processed, self.invalid, self.diffused
        );
        if self.fail_safe_diffusions > 0 {
            line.push_str(&format!(", {} fail-safe", self.fail_safe_diffusions));
        }
        if self.area_overlaps > 0 {
            line.push_str(&format!(", {} area overlaps", self.area_overlaps));
        }
        line
    }
}
