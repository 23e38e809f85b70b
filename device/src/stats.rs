//! Device counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the interrupt and completion paths
#[derive(Debug, Default)]
pub struct DeviceStats {
    slot_interrupts: AtomicU64,
    spurious_interrupts: AtomicU64,
    jobs_completed: AtomicU64,
}

/// Point-in-time copy of [`DeviceStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub slot_interrupts: u64,
    pub spurious_interrupts: u64,
    pub jobs_completed: u64,
}

impl DeviceStats {
    pub(crate) fn record_slot_interrupt(&self) {
        self.slot_interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_spurious(&self) {
        self.spurious_interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completion(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            slot_interrupts: self.slot_interrupts.load(Ordering::Relaxed),
            spurious_interrupts: self.spurious_interrupts.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
        }
    }
}
