/*!
 * Partition Layout
 * Compute partitions and the world-switch plan derived from them
 */

use crate::core::errors::{ConfigError, Result, SchedError};
use crate::core::limits::MAX_WORLD_SWITCHES;
use crate::core::types::{bit, ids, EngineMask, FunctionMask, SchedBlock};
use crate::device::Device;
use serde::{Deserialize, Serialize};

/// One compute partition: the functions it hosts and the engines it owns
///
/// Engines may appear in more than one partition (a shared multimedia engine); the
/// world switch driving it then serves the functions of every such partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub vf_mask: FunctionMask,
    pub engines: EngineMask,
}

impl Partition {
    pub const fn new(vf_mask: FunctionMask, engines: EngineMask) -> Self {
        Self { vf_mask, engines }
    }

    /// Single partition owning every engine
    pub fn whole_device(dev: &Device, vf_mask: FunctionMask) -> Self {
        let engines = match dev.engine_count() {
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        };
        Self::new(vf_mask, engines)
    }
}

/// A world switch to be created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchPlan {
    pub block: SchedBlock,
    pub engine_mask: EngineMask,
    pub allowed: FunctionMask,
}

/// Group engines into world switches
///
/// Within one partition, engines of the same block are switched in lock-step by one
/// world switch. An engine already claimed by an earlier partition keeps its switch,
/// which additionally serves this partition's functions.
pub fn plan_world_switches(dev: &Device, partitions: &[Partition]) -> Result<Vec<SwitchPlan>> {
    let mut plans: Vec<SwitchPlan> = Vec::new();
    let mut start_idx = 0;

    for p in partitions {
        for e in ids(p.engines) {
            let block = dev.engine(e)?.block();

            if let Some(plan) = plans.iter_mut().find(|pl| pl.engine_mask & bit(e) != 0) {
                plan.allowed |= p.vf_mask;
                continue;
            }
            if let Some(plan) = plans[start_idx..].iter_mut().find(|pl| pl.block == block) {
                plan.engine_mask |= bit(e);
                plan.allowed |= p.vf_mask;
                continue;
            }
            if plans.len() >= MAX_WORLD_SWITCHES as usize {
                return Err(SchedError::Config(ConfigError::invalid(
                    "partitions",
                    format!("more than {} world switches", MAX_WORLD_SWITCHES),
                )));
            }
            plans.push(SwitchPlan {
                block,
                engine_mask: bit(e),
                allowed: p.vf_mask,
            });
        }
        start_idx = plans.len();
    }
    Ok(plans)
}

/// Recompute each switch's allowed functions for a new partition layout
///
/// Every partition must overlap at least one existing switch.
pub fn remap_allowed(
    switches: &[(EngineMask, FunctionMask)],
    partitions: &[Partition],
) -> Result<Vec<FunctionMask>> {
    let mut allowed = vec![0; switches.len()];
    for (i, p) in partitions.iter().enumerate() {
        let mut hit = false;
        for (slot, (engines, _)) in allowed.iter_mut().zip(switches) {
            if engines & p.engines != 0 {
                *slot |= p.vf_mask;
                hit = true;
            }
        }
        if !hit {
            return Err(SchedError::Config(ConfigError::invalid(
                "partitions",
                format!("partition {} (engines {:#x}) maps to no world switch", i, p.engines),
            )));
        }
    }
    Ok(allowed)
}
