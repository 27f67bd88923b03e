/*!
 * Core Types
 * Function slots, engine ids, scheduling blocks, modes and context states
 */

use super::limits::{MAX_FUNCTION_SLOTS, MAX_HW_ENGINES};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Function slot index (VFs `0..31`, PF at [`PF_IDX`])
pub type FunctionId = u32;

/// Hardware scheduling engine index
pub type EngineId = u32;

/// World switch (logical scheduler) index
pub type WorldSwitchId = u32;

/// One bit per function slot
pub type FunctionMask = u32;

/// One bit per hardware engine
pub type EngineMask = u32;

/// Error and event text; labels up to 23 bytes stay off the heap
pub type InlineString = smartstring::alias::String;

/// Reserved slot of the physical function
pub const PF_IDX: FunctionId = 31;

/// Slot of an unassigned entry
pub const INVALID_FN: FunctionId = u32::MAX;

/// Check that a function id addresses a real slot
#[inline(always)]
pub const fn is_valid_fn(idx: FunctionId) -> bool {
    idx < MAX_FUNCTION_SLOTS
}

/// Check that an engine id addresses a real engine
#[inline(always)]
pub const fn is_valid_engine(id: EngineId) -> bool {
    id < MAX_HW_ENGINES
}

/// Single-bit mask for a slot
#[inline(always)]
pub const fn bit(idx: u32) -> u32 {
    if idx < 32 {
        1u32 << idx
    } else {
        0
    }
}

/// Iterator over the set bits of a mask, lowest first
#[derive(Debug, Clone, Copy)]
pub struct BitIter(u32);

impl Iterator for BitIter {
    type Item = u32;

    #[inline]
    fn next(&mut self) -> Option<u32> {
        if self.0 == 0 {
            return None;
        }
        let idx = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(idx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for BitIter {}

/// Walk the ids set in `mask`
#[inline]
pub fn ids(mask: u32) -> BitIter {
    BitIter(mask)
}

/// Mask of the first `num_vf` VF slots
#[inline]
pub const fn vf_mask(num_vf: u32) -> FunctionMask {
    if num_vf >= 32 {
        u32::MAX
    } else {
        (1u32 << num_vf) - 1
    }
}

/// Human-readable slot name used in logs
pub fn fn_name(idx: FunctionId) -> String {
    match idx {
        PF_IDX => "PF".to_string(),
        INVALID_FN => "INVALID".to_string(),
        n => format!("VF{}", n),
    }
}

/// Engine class a world switch drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedBlock {
    Gfx,
    Uvd,
    Vce,
    Uvd1,
    Vcn,
    Vcn1,
    Jpeg,
}

impl SchedBlock {
    pub const ALL: [SchedBlock; 7] = [
        SchedBlock::Gfx,
        SchedBlock::Uvd,
        SchedBlock::Vce,
        SchedBlock::Uvd1,
        SchedBlock::Vcn,
        SchedBlock::Vcn1,
        SchedBlock::Jpeg,
    ];

    pub const COUNT: usize = 7;

    /// Position in per-block tables
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Multimedia engines are everything except GFX
    #[inline(always)]
    pub const fn is_mm(self) -> bool {
        !matches!(self, SchedBlock::Gfx)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedBlock::Gfx => "gfx",
            SchedBlock::Uvd => "uvd",
            SchedBlock::Vce => "vce",
            SchedBlock::Uvd1 => "uvd1",
            SchedBlock::Vcn => "vcn",
            SchedBlock::Vcn1 => "vcn1",
            SchedBlock::Jpeg => "jpeg",
        }
    }
}

impl fmt::Display for SchedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling mode of an engine group
///
/// Modes up to and including [`SchedMode::Liquid`] are driven by the hardware itself;
/// the rest run the software world-switch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedMode {
    /// Hardware cycles with fixed quanta
    Solid = 1,
    /// Hardware preempts on detected idle
    Liquid = 2,
    /// Software credit/debit fairness
    Fairness = 3,
    /// Software fixed time slice
    RoundRobin = 4,
    /// Software activity-based preemption
    HybridLiquid = 5,
}

impl SchedMode {
    /// Highest mode handled by the hardware scheduler
    pub const MAX_HW_MODE: SchedMode = SchedMode::Liquid;

    #[inline(always)]
    pub fn is_hardware(self) -> bool {
        self <= Self::MAX_HW_MODE
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "solid" => Some(SchedMode::Solid),
            "liquid" => Some(SchedMode::Liquid),
            "fairness" | "fair" => Some(SchedMode::Fairness),
            "round_robin" | "roundrobin" | "rr" => Some(SchedMode::RoundRobin),
            "hybrid_liquid" | "hybridliquid" => Some(SchedMode::HybridLiquid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedMode::Solid => "solid",
            SchedMode::Liquid => "liquid",
            SchedMode::Fairness => "fairness",
            SchedMode::RoundRobin => "round_robin",
            SchedMode::HybridLiquid => "hybrid_liquid",
        }
    }
}

impl fmt::Display for SchedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Residency state of a logical scheduler's current function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ContextState {
    Clear = 0,
    Saved = 1,
    Loaded = 2,
    /// Sticky until an external reset clears it
    Abnormal = 3,
}

impl ContextState {
    #[inline(always)]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => ContextState::Clear,
            1 => ContextState::Saved,
            2 => ContextState::Loaded,
            _ => ContextState::Abnormal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextState::Clear => "clear",
            ContextState::Saved => "saved",
            ContextState::Loaded => "loaded",
            ContextState::Abnormal => "abnormal",
        }
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hardware break-point debug mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BpMode {
    #[default]
    Disabled,
    Mode1,
    Mode2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_iter_walks_lowest_first() {
        let v: Vec<u32> = ids(0b1010_0101).collect();
        assert_eq!(v, vec![0, 2, 5, 7]);
        assert_eq!(ids(0).count(), 0);
        assert_eq!(ids(u32::MAX).len(), 32);
    }

    #[test]
    fn test_vf_mask() {
        assert_eq!(vf_mask(0), 0);
        assert_eq!(vf_mask(3), 0b111);
        assert_eq!(vf_mask(32), u32::MAX);
    }

    #[test]
    fn test_mode_ordering_splits_hw_and_sw() {
        assert!(SchedMode::Solid.is_hardware());
        assert!(SchedMode::Liquid.is_hardware());
        assert!(!SchedMode::Fairness.is_hardware());
        assert!(!SchedMode::HybridLiquid.is_hardware());
        assert_eq!(SchedMode::from_str("rr"), Some(SchedMode::RoundRobin));
        assert_eq!(SchedMode::from_str("bogus"), None);
    }

    #[test]
    fn test_context_state_roundtrip_through_u8() {
        for s in [
            ContextState::Clear,
            ContextState::Saved,
            ContextState::Loaded,
            ContextState::Abnormal,
        ] {
            assert_eq!(ContextState::from_u8(s.as_u8()), s);
        }
    }

    #[test]
    fn test_fn_name() {
        assert_eq!(fn_name(PF_IDX), "PF");
        assert_eq!(fn_name(4), "VF4");
    }
}
