/*!
 * Lock-Free Histogram
 * Fixed-bucket counters for run lengths and command latency
 */

use crate::core::limits::HISTOGRAM_SIZE;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Linear histogram: bucket `i` covers `[start + i*interval, start + (i+1)*interval)`,
/// the last bucket also takes everything above
///
/// # Performance
/// - Cache-line aligned
/// - Relaxed atomics only; safe to record from the worker while monitoring reads
#[repr(C, align(64))]
pub struct Histogram {
    start: u64,
    interval: u64,
    buckets: [AtomicU64; HISTOGRAM_SIZE],
    samples: AtomicU64,
    sum: AtomicU64,
}

/// Point-in-time copy of a histogram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub start: u64,
    pub interval: u64,
    pub buckets: Vec<u64>,
    pub samples: u64,
    pub sum: u64,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> u64 {
        if self.samples == 0 {
            0
        } else {
            self.sum / self.samples
        }
    }
}

impl Histogram {
    pub fn new(start: u64, interval: u64) -> Self {
        Self {
            start,
            interval: interval.max(1),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            samples: AtomicU64::new(0),
            sum: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    fn bucket_of(&self, value: u64) -> usize {
        let offset = value.saturating_sub(self.start) / self.interval;
        (offset as usize).min(HISTOGRAM_SIZE - 1)
    }

    /// Record one sample
    ///
    /// # Performance
    /// Hot path - called on every accounting stop and every hardware command
    #[inline(always)]
    pub fn record(&self, value: u64) {
        self.buckets[self.bucket_of(value)].fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for b in &self.buckets {
            b.store(0, Ordering::Relaxed);
        }
        self.samples.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            start: self.start,
            interval: self.interval,
            buckets: self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum: self.sum.load(Ordering::Relaxed),
        }
    }
}
