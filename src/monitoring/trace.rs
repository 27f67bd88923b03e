/*!
 * Switch Trace
 * Bounded lock-free ring of engine transitions for post-mortem dumps
 */

use crate::core::types::{fn_name, EngineId, FunctionId};
use crossbeam_queue::ArrayQueue;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// One engine hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub seq: u64,
    pub timestamp_us: u64,
    pub engine: EngineId,
    pub from_fn: FunctionId,
    pub from_state: &'static str,
    pub to_fn: FunctionId,
    pub to_state: &'static str,
    pub latency_us: u64,
    pub ok: bool,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} @{}us engine{} {}({}) -> {}({}) {}us{}",
            self.seq,
            self.timestamp_us,
            self.engine,
            fn_name(self.from_fn),
            self.from_state,
            fn_name(self.to_fn),
            self.to_state,
            self.latency_us,
            if self.ok { "" } else { " FAILED" }
        )
    }
}

/// Fixed-capacity trace; the oldest entries are evicted when full
pub struct SwitchTrace {
    ring: ArrayQueue<TraceEntry>,
    seq: AtomicU64,
}

impl SwitchTrace {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: ArrayQueue::new(capacity.max(1)),
            seq: AtomicU64::new(0),
        }
    }

    /// Append an entry, evicting the oldest one when full
    ///
    /// # Performance
    /// Lock-free; called once per engine hop
    #[inline]
    pub fn record(&self, mut entry: TraceEntry) {
        entry.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.ring.force_push(entry);
    }

    /// Total entries ever recorded
    #[inline]
    pub fn recorded(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Copy of everything currently held, oldest first
    ///
    /// Entries recorded concurrently may land before the copied ones.
    pub fn recent(&self) -> Vec<TraceEntry> {
        let entries = self.drain();
        for e in &entries {
            let _ = self.ring.force_push(e.clone());
        }
        entries
    }

    /// Remove and return everything currently held, oldest first
    pub fn drain(&self) -> Vec<TraceEntry> {
        let mut out = Vec::with_capacity(self.ring.len());
        while let Some(e) = self.ring.pop() {
            out.push(e);
        }
        out
    }
}
