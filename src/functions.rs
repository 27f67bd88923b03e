/*!
 * Function Slot Table
 *
 * The scheduler's view of the PF and VF slots: per-block time slices, availability,
 * the load-only `skip_run` flag and the auto-run marker written by the auto backend.
 * Sharded so world switches on different engine groups never contend.
 */

use crate::core::errors::{Result, SchedError};
use crate::core::limits::{MAX_FUNCTION_SLOTS, MM_BANDWIDTH_FRAME_RATE};
use crate::core::types::{
    bit, ids, is_valid_fn, FunctionId, FunctionMask, SchedBlock, PF_IDX,
};
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Lifecycle of a function slot as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionStatus {
    /// Not provisioned
    #[default]
    Unavailable,
    /// Provisioned but not scheduled
    Available,
    /// Admitted to a world switch
    Active,
    /// Guest suspended; may be shut down without a reload
    Suspended,
}

/// Per-slot scheduling fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSlot {
    pub time_slice: [u32; SchedBlock::COUNT],
    pub bandwidth: [u32; SchedBlock::COUNT],
    pub status: FunctionStatus,
    pub skip_run: bool,
    pub auto_run: bool,
}

/// Sharded slot table shared by every world switch on a device
pub struct FunctionTable {
    slots: DashMap<FunctionId, FunctionSlot, RandomState>,
    num_vf: AtomicU32,
    max_bandwidth: [AtomicU32; SchedBlock::COUNT],
}

impl FunctionTable {
    pub fn new() -> Self {
        let slots = DashMap::with_capacity_and_hasher(MAX_FUNCTION_SLOTS as usize, RandomState::new());
        for idx in 0..MAX_FUNCTION_SLOTS {
            slots.insert(idx, FunctionSlot::default());
        }
        if let Some(mut pf) = slots.get_mut(&PF_IDX) {
            pf.status = FunctionStatus::Available;
        }
        Self {
            slots,
            num_vf: AtomicU32::new(0),
            max_bandwidth: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    #[inline]
    fn check(idx: FunctionId) -> Result<()> {
        if is_valid_fn(idx) {
            Ok(())
        } else {
            Err(SchedError::InvalidFunction(idx))
        }
    }

    fn read<T>(&self, idx: FunctionId, f: impl FnOnce(&FunctionSlot) -> T) -> Option<T> {
        self.slots.get(&idx).map(|s| f(&s))
    }

    fn write(&self, idx: FunctionId, f: impl FnOnce(&mut FunctionSlot)) -> Result<()> {
        Self::check(idx)?;
        match self.slots.get_mut(&idx) {
            Some(mut s) => {
                f(&mut s);
                Ok(())
            }
            None => Err(SchedError::InvalidFunction(idx)),
        }
    }

    pub fn slot(&self, idx: FunctionId) -> Option<FunctionSlot> {
        self.read(idx, |s| s.clone())
    }

    // -- time slices ---------------------------------------------------------

    /// Configured slice for a block; zero for unknown slots
    #[inline]
    pub fn time_slice(&self, idx: FunctionId, block: SchedBlock) -> u32 {
        self.read(idx, |s| s.time_slice[block.index()]).unwrap_or(0)
    }

    pub fn set_time_slice(&self, idx: FunctionId, block: SchedBlock, us: u32) -> Result<()> {
        self.write(idx, |s| s.time_slice[block.index()] = us)
    }

    /// Set the same slice on every block
    pub fn set_time_slice_all(&self, idx: FunctionId, us: u32) -> Result<()> {
        self.write(idx, |s| s.time_slice = [us; SchedBlock::COUNT])
    }

    // -- status ----------------------------------------------------------------

    pub fn status(&self, idx: FunctionId) -> FunctionStatus {
        self.read(idx, |s| s.status).unwrap_or_default()
    }

    pub fn set_status(&self, idx: FunctionId, status: FunctionStatus) -> Result<()> {
        self.write(idx, |s| s.status = status)
    }

    #[inline]
    pub fn is_active(&self, idx: FunctionId) -> bool {
        self.status(idx) == FunctionStatus::Active
    }

    #[inline]
    pub fn is_suspended(&self, idx: FunctionId) -> bool {
        self.status(idx) == FunctionStatus::Suspended
    }

    /// Mark a slot admitted or back to merely available
    pub fn set_active(&self, idx: FunctionId, active: bool) -> Result<()> {
        self.set_status(
            idx,
            if active {
                FunctionStatus::Active
            } else {
                FunctionStatus::Available
            },
        )
    }

    /// Mask of active slots
    pub fn active_mask(&self) -> FunctionMask {
        self.slots
            .iter()
            .filter(|e| e.value().status == FunctionStatus::Active)
            .fold(0, |m, e| m | bit(*e.key()))
    }

    /// Active VFs on the device, PF excluded
    pub fn active_count(&self) -> u32 {
        (self.active_mask() & !bit(PF_IDX)).count_ones()
    }

    // -- flags -----------------------------------------------------------------

    pub fn skip_run(&self, idx: FunctionId) -> bool {
        self.read(idx, |s| s.skip_run).unwrap_or(false)
    }

    pub fn set_skip_run(&self, idx: FunctionId, skip: bool) -> Result<()> {
        self.write(idx, |s| s.skip_run = skip)
    }

    pub fn auto_run(&self, idx: FunctionId) -> bool {
        self.read(idx, |s| s.auto_run).unwrap_or(false)
    }

    pub fn set_auto_run(&self, idx: FunctionId, enabled: bool) -> Result<()> {
        self.write(idx, |s| s.auto_run = enabled)
    }

    pub fn auto_run_mask(&self) -> FunctionMask {
        self.slots
            .iter()
            .filter(|e| e.value().auto_run)
            .fold(0, |m, e| m | bit(*e.key()))
    }

    /// Lowest slot with auto-run enabled
    pub fn first_auto_run(&self) -> Option<FunctionId> {
        ids(self.auto_run_mask()).next()
    }

    // -- VF count --------------------------------------------------------------

    #[inline]
    pub fn num_vf(&self) -> u32 {
        self.num_vf.load(Ordering::Acquire)
    }

    /// Provision the first `num_vf` VF slots; the rest become unavailable
    pub fn set_num_vf(&self, num_vf: u32) -> Result<()> {
        if num_vf >= MAX_FUNCTION_SLOTS {
            return Err(SchedError::InvalidFunction(num_vf));
        }
        for idx in 0..PF_IDX {
            if let Some(mut s) = self.slots.get_mut(&idx) {
                if idx < num_vf {
                    if s.status == FunctionStatus::Unavailable {
                        s.status = FunctionStatus::Available;
                    }
                } else {
                    *s = FunctionSlot::default();
                }
            }
        }
        self.num_vf.store(num_vf, Ordering::Release);
        Ok(())
    }

    // -- multimedia bandwidth ----------------------------------------------------

    pub fn set_max_bandwidth(&self, block: SchedBlock, max_bw: u32) {
        self.max_bandwidth[block.index()].store(max_bw, Ordering::Relaxed);
    }

    pub fn max_bandwidth(&self, block: SchedBlock) -> u32 {
        self.max_bandwidth[block.index()].load(Ordering::Relaxed)
    }

    /// Slice granting `bw` of the block's encode/decode capacity
    ///
    /// `slice = bw * 1e6 / (max_bw * 30)`; zero when either side is unknown.
    pub fn bandwidth_to_time_slice(&self, block: SchedBlock, bw: u32) -> u32 {
        let max_bw = self.max_bandwidth(block) as u64;
        if bw == 0 || max_bw == 0 {
            return 0;
        }
        let ts = (bw as u64 * 1_000_000) / (max_bw * MM_BANDWIDTH_FRAME_RATE);
        ts.min(u32::MAX as u64) as u32
    }

    /// Inverse of [`Self::bandwidth_to_time_slice`]
    pub fn time_slice_to_bandwidth(&self, block: SchedBlock, ts: u32) -> u32 {
        let max_bw = self.max_bandwidth(block) as u64;
        let bw = max_bw * MM_BANDWIDTH_FRAME_RATE * ts as u64 / 1_000_000;
        bw.min(u32::MAX as u64) as u32
    }

    /// Record a bandwidth share and derive the block's slice from it
    pub fn set_bandwidth(&self, idx: FunctionId, block: SchedBlock, bw: u32) -> Result<u32> {
        if !block.is_mm() {
            return Err(SchedError::not_supported("bandwidth applies to multimedia blocks"));
        }
        let ts = self.bandwidth_to_time_slice(block, bw);
        self.write(idx, |s| {
            s.bandwidth[block.index()] = bw;
            s.time_slice[block.index()] = ts;
        })?;
        Ok(ts)
    }

    pub fn bandwidth(&self, idx: FunctionId, block: SchedBlock) -> u32 {
        self.read(idx, |s| s.bandwidth[block.index()]).unwrap_or(0)
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}
