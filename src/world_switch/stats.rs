/*!
 * Lock-Free World-Switch Statistics
 * Atomic counters updated by the driver loop, read by monitoring without the switch lock
 */

use crate::core::types::{ContextState, FunctionId, SchedBlock, SchedMode, WorldSwitchId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one world switch
///
/// # Performance
/// - Cache-line aligned to prevent false sharing with the switch state
/// - Relaxed ordering only; snapshots may be slightly inconsistent with each other
#[repr(C, align(64))]
#[derive(Default)]
pub struct AtomicSwitchStats {
    cycles: AtomicU64,
    switches: AtomicU64,
    saves: AtomicU64,
    skips: AtomicU64,
    holds: AtomicU64,
    failures: AtomicU64,
    timer_expiries: AtomicU64,
}

impl AtomicSwitchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Performance
    /// Hot path - once per loop iteration
    #[inline(always)]
    pub fn inc_cycles(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// # Performance
    /// Hot path - once per successful load
    #[inline(always)]
    pub fn inc_switches(&self) {
        self.switches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_saves(&self) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_skips(&self) {
        self.skips.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_holds(&self) {
        self.holds.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_timer_expiries(&self) {
        self.timer_expiries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for c in [
            &self.cycles,
            &self.switches,
            &self.saves,
            &self.skips,
            &self.holds,
            &self.failures,
            &self.timer_expiries,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(super) fn counters(&self) -> SwitchCounters {
        SwitchCounters {
            cycles: self.cycles.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            holds: self.holds.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timer_expiries: self.timer_expiries.load(Ordering::Relaxed),
        }
    }
}

/// Raw counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCounters {
    pub cycles: u64,
    pub switches: u64,
    pub saves: u64,
    /// Picks that passed over the list head
    pub skips: u64,
    /// Hybrid-liquid cycles that kept the resident function
    pub holds: u64,
    pub failures: u64,
    pub timer_expiries: u64,
}

/// Monitoring view of a world switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchStats {
    pub id: WorldSwitchId,
    pub block: SchedBlock,
    pub mode: SchedMode,
    pub running: bool,
    pub current_function: FunctionId,
    pub state: ContextState,
    pub active: Vec<FunctionId>,
    pub counters: SwitchCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let stats = AtomicSwitchStats::new();
        stats.inc_cycles();
        stats.inc_cycles();
        stats.inc_switches();
        stats.inc_failures();
        let c = stats.counters();
        assert_eq!((c.cycles, c.switches, c.failures), (2, 1, 1));
        stats.reset();
        assert_eq!(stats.counters(), SwitchCounters::default());
    }
}
