//! Engine counters
//!
//! Lock-free counters shared by the initiator and callback executor.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineStats {
    attempted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    aborted: AtomicU64,
    compensations: AtomicU64,
    compensation_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineMetrics {
    /// `initiate()` calls
    pub attempted: u64,
    /// Pre-flight rejections (no loan requested)
    pub rejected: u64,
    /// Callbacks that reached `Completed`
    pub completed: u64,
    /// Callbacks that reached `Aborted`
    pub aborted: u64,
    /// Compensating actions executed
    pub compensations: u64,
    pub compensation_failures: u64,
}

impl EngineStats {
    pub fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compensation(&self, succeeded: bool) {
        self.compensations.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.compensation_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> EngineMetrics {
        EngineMetrics {
            attempted: self.attempted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
            compensation_failures: self.compensation_failures.load(Ordering::Relaxed),
        }
    }
}
