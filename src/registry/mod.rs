/*!
 * Scheduler Registry
 *
 * Owns every world switch of a device and fans function lifecycle calls out to the
 * switches whose partition admits the function. Switch ids are dense and stable for the
 * life of the registry.
 */

mod builder;
pub mod partition;
pub mod traits;

pub use builder::RegistryBuilder;
pub use partition::{plan_world_switches, remap_allowed, Partition, SwitchPlan};
pub use traits::{SchedulerControl, SchedulerQuery, WorldSwitchApi};

use crate::core::errors::{Result, SchedError};
use crate::core::types::{
    bit, fn_name, ids, is_valid_fn, vf_mask, ContextState, FunctionId, FunctionMask, SchedBlock,
    SchedMode, WorldSwitchId, PF_IDX,
};
use crate::device::Device;
use crate::functions::FunctionStatus;
use crate::world_switch::{SwitchStats, WorldSwitch};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;

/// Set of world switches driving one device
pub struct Registry {
    dev: Arc<Device>,
    switches: Vec<Arc<WorldSwitch>>,
    partitions: RwLock<Vec<Partition>>,
}

impl Registry {
    pub fn builder(dev: Arc<Device>) -> RegistryBuilder {
        RegistryBuilder::new(dev)
    }

    pub(super) fn from_parts(
        dev: Arc<Device>,
        switches: Vec<Arc<WorldSwitch>>,
        partitions: Vec<Partition>,
    ) -> Self {
        Self {
            dev,
            switches,
            partitions: RwLock::new(partitions),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    pub fn get(&self, id: WorldSwitchId) -> Result<&Arc<WorldSwitch>> {
        self.switches
            .get(id as usize)
            .ok_or(SchedError::UnknownWorldSwitch(id))
    }

    pub fn world_switches(&self) -> &[Arc<WorldSwitch>] {
        &self.switches
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    pub fn partitions(&self) -> Vec<Partition> {
        self.partitions.read().clone()
    }

    /// Switches whose partition admits `f`
    fn serving(&self, f: FunctionId) -> impl Iterator<Item = &Arc<WorldSwitch>> + '_ {
        self.switches.iter().filter(move |ws| ws.is_allowed(f))
    }

    // -- function lifecycle ----------------------------------------------------------

    /// Admit a function on every switch of its partition
    pub fn add_function(&self, f: FunctionId) -> Result<()> {
        if !is_valid_fn(f) {
            return Err(SchedError::InvalidFunction(f));
        }
        let mut added = 0;
        for ws in self.serving(f) {
            ws.add_function(f)?;
            added += 1;
        }
        if added == 0 {
            warn!("{} belongs to no partition", fn_name(f));
            return Err(SchedError::InvalidFunction(f));
        }
        Ok(())
    }

    /// Withdraw a function everywhere; switches that never held it are skipped
    pub fn remove_function(&self, f: FunctionId) -> Result<()> {
        if !is_valid_fn(f) {
            return Err(SchedError::InvalidFunction(f));
        }
        for ws in self.serving(f) {
            match ws.remove_function(f) {
                Ok(()) | Err(SchedError::InvalidFunction(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.dev.functions().set_status(f, FunctionStatus::Available)?;
        Ok(())
    }

    /// Start every switch, continuing past failures
    pub fn start(&self) -> Result<()> {
        self.for_each_collect(self.switches.iter(), |ws| ws.start())
    }

    /// Start the switches named by a bitmask of ids
    pub fn start_mask(&self, mask: u32) -> Result<()> {
        let mut selected = Vec::new();
        for id in ids(mask) {
            selected.push(self.get(id)?);
        }
        self.for_each_collect(selected.into_iter(), |ws| ws.start())
    }

    /// Stop every switch, continuing past failures
    pub fn stop(&self) -> Result<()> {
        self.for_each_collect(self.switches.iter(), |ws| ws.stop())
    }

    pub fn update_time_slice(&self, f: FunctionId) -> Result<()> {
        if !is_valid_fn(f) {
            return Err(SchedError::InvalidFunction(f));
        }
        for ws in self.serving(f) {
            ws.update_time_slice(f)?;
        }
        Ok(())
    }

    fn for_each_collect<'a>(
        &self,
        switches: impl Iterator<Item = &'a Arc<WorldSwitch>>,
        op: impl Fn(&WorldSwitch) -> Result<()>,
    ) -> Result<()> {
        let mut first = None;
        for ws in switches {
            if let Err(e) = op(ws.as_ref()) {
                warn!("World switch {}: {}", ws.id(), e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    // -- tuning ---------------------------------------------------------------------

    /// Configure a slice and push it to the running switches
    ///
    /// `block == None` sets every block. A fairness GFX switch keeps one slice for the
    /// whole group, so every VF it serves receives the new value.
    pub fn set_time_slice(&self, f: FunctionId, block: Option<SchedBlock>, us: u32) -> Result<()> {
        if !is_valid_fn(f) {
            return Err(SchedError::InvalidFunction(f));
        }
        if us == 0 {
            return Err(SchedError::invalid_time_slice("time slice must be non-zero"));
        }
        let table = self.dev.functions();
        match block {
            Some(b) => table.set_time_slice(f, b, us)?,
            None => table.set_time_slice_all(f, us)?,
        }

        let num_vf = table.num_vf();
        for ws in self.serving(f) {
            if block.map_or(false, |b| b != ws.block()) {
                continue;
            }
            if ws.block() == SchedBlock::Gfx && ws.mode() == SchedMode::Fairness && f != PF_IDX {
                for member in ids(ws.allowed_functions() & vf_mask(num_vf)) {
                    if member != f {
                        table.set_time_slice(member, SchedBlock::Gfx, us)?;
                    }
                    ws.update_time_slice(member)?;
                }
            } else {
                ws.update_time_slice(f)?;
            }
        }
        debug!("{} time slice {}us on {:?}", fn_name(f), us, block);
        Ok(())
    }

    /// Provision `num_vf` VFs and rebuild the switches' lists
    pub fn set_num_vf(&self, num_vf: u32) -> Result<()> {
        if let Some(ws) = self.switches.iter().find(|ws| ws.is_running()) {
            return Err(SchedError::invalid_transition(format!(
                "world switch {} is running",
                ws.id()
            )));
        }
        self.dev.functions().set_num_vf(num_vf)?;
        let per_gfx = self
            .switches
            .iter()
            .filter(|ws| ws.block() == SchedBlock::Gfx)
            .map(|ws| (ws.allowed_functions() & vf_mask(num_vf)).count_ones())
            .max()
            .unwrap_or(num_vf);
        self.dev.set_num_vf_per_gfx(per_gfx);
        for ws in &self.switches {
            ws.set_num_vf(num_vf)?;
        }
        info!("Provisioned {} VFs, {} per GFX partition", num_vf, per_gfx);
        Ok(())
    }

    /// Re-assign functions after the partition layout changed
    pub fn remap(&self, partitions: Vec<Partition>) -> Result<()> {
        let current: Vec<_> = self
            .switches
            .iter()
            .map(|ws| (ws.engine_mask(), ws.allowed_functions()))
            .collect();
        let allowed = remap_allowed(&current, &partitions)?;
        if let Some(ws) = self.switches.iter().find(|ws| ws.is_running()) {
            return Err(SchedError::invalid_transition(format!(
                "world switch {} must be stopped to remap partitions",
                ws.id()
            )));
        }
        for (ws, mask) in self.switches.iter().zip(allowed) {
            ws.apply_allowed_functions(mask)?;
        }
        *self.partitions.write() = partitions;
        Ok(())
    }

    pub fn toggle_skip_next_punish(&self, f: FunctionId, enable: bool) {
        for ws in self.serving(f) {
            ws.toggle_skip_next_punish(f, enable);
        }
    }

    pub fn setup_self_switch(&self, enable: bool) {
        for ws in &self.switches {
            ws.setup_self_switch(enable);
        }
    }

    /// Apply an idle minimum slice to every hybrid-liquid GFX switch
    pub fn set_hliquid_min_ts(&self, us: u32) -> Result<u32> {
        let mut applied = None;
        for ws in self.switches.iter().filter(|ws| {
            ws.block() == SchedBlock::Gfx && ws.mode() == SchedMode::HybridLiquid
        }) {
            applied = Some(ws.set_hliquid_min_ts(us)?);
        }
        applied.ok_or_else(|| SchedError::not_supported("no hybrid-liquid GFX world switch"))
    }

    pub fn hliquid_min_ts(&self) -> Option<u32> {
        self.switches
            .iter()
            .find(|ws| ws.block() == SchedBlock::Gfx && ws.mode() == SchedMode::HybridLiquid)
            .map(|ws| ws.hliquid_min_ts())
    }

    // -- status ----------------------------------------------------------------------

    /// Bitmask of running switch ids
    pub fn list_running(&self) -> u32 {
        self.switches
            .iter()
            .filter(|ws| ws.is_running())
            .fold(0, |mask, ws| mask | bit(ws.id()))
    }

    pub fn all_states_ok(&self) -> bool {
        self.switches.iter().all(|ws| ws.is_state_ok())
    }

    /// First switch in the Abnormal state
    pub fn abnormal_world_switch(&self) -> Option<WorldSwitchId> {
        self.switches
            .iter()
            .find(|ws| ws.state() == ContextState::Abnormal)
            .map(|ws| ws.id())
    }

    pub fn stats(&self) -> Vec<SwitchStats> {
        self.switches.iter().map(|ws| ws.stats()).collect()
    }

    // -- reset and bring-up --------------------------------------------------------------

    /// Drop context state for the functions in `mask` ahead of a whole-GPU reset
    pub fn clear_state_for_reset(&self, mask: FunctionMask) {
        for ws in &self.switches {
            ws.clear_for_reset(mask);
        }
        info!("Cleared scheduler state for {:#x}", mask);
    }

    /// Admit the PF everywhere before any VF is brought up
    pub fn init_pf_early(&self) -> Result<()> {
        for ws in &self.switches {
            ws.add_function(PF_IDX)?;
        }
        Ok(())
    }

    /// Pin (or release) every manual switch to one function and wake them
    pub fn force_switch(&self, target: Option<FunctionId>) -> Result<()> {
        if let Some(f) = target {
            if !is_valid_fn(f) {
                return Err(SchedError::InvalidFunction(f));
            }
        }
        let mut config = (**self.dev.config()).clone();
        config.force_switch_fn = target;
        self.dev.update_config(config)?;
        for ws in &self.switches {
            ws.wake();
        }
        info!("Force switch target: {:?}", target);
        Ok(())
    }

    /// Hardware reported the GFX ring idle
    pub fn signal_idle(&self) {
        for ws in &self.switches {
            ws.signal_idle();
        }
    }

    pub fn set_busy_status(&self, id: WorldSwitchId, mask: FunctionMask) -> Result<()> {
        self.get(id)?.set_busy_status(mask);
        Ok(())
    }
}

impl SchedulerControl for Registry {
    fn add_function(&self, ws: WorldSwitchId, function: FunctionId) -> Result<()> {
        self.get(ws)?.add_function(function)
    }

    fn remove_function(&self, ws: WorldSwitchId, function: FunctionId) -> Result<()> {
        self.get(ws)?.remove_function(function)
    }

    fn start(&self, ws: WorldSwitchId) -> Result<()> {
        self.get(ws)?.start()
    }

    fn stop(&self, ws: WorldSwitchId) -> Result<()> {
        self.get(ws)?.stop()
    }

    fn update_time_slice(&self, ws: WorldSwitchId, function: FunctionId) -> Result<()> {
        self.get(ws)?.update_time_slice(function)
    }
}

impl SchedulerQuery for Registry {
    fn get_current_function(&self, ws: WorldSwitchId) -> Result<FunctionId> {
        self.get(ws)?.current_function()
    }

    fn get_state(&self, ws: WorldSwitchId) -> Result<ContextState> {
        Ok(self.get(ws)?.state())
    }

    fn set_mode(&self, ws: WorldSwitchId, mode: SchedMode) -> Result<()> {
        self.get(ws)?.set_mode(mode)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Registry drop: stop failed: {}", e);
        }
    }
}
