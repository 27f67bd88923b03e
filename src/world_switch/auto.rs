/*!
 * Auto Backend
 *
 * The hardware scheduler cycles admitted functions by itself. Software only programs
 * the time-quanta table, admits and withdraws functions and pauses or resumes the
 * engines around reconfiguration.
 */

use super::{SelfSwitchTrigger, SwitchState, WorldSwitch};
use crate::core::errors::{Result, SchedError};
use crate::core::types::{fn_name, ContextState, FunctionId, SchedBlock};
use crate::hw::command::HwCommand;
use crate::monitoring::events::SchedEventKind;
use log::{debug, error, info};

/// Options packed into the quanta table, one byte each
const QUANTA_OPTIONS: u32 = 4;

impl WorldSwitch {
    /// Index into the quanta table for a slice in µs
    ///
    /// Picks the first option at least as long as the slice. When none is, the last
    /// option is replaced and the device-wide table updated.
    fn time_quanta_index(&self, time_slice: u32) -> u8 {
        if time_slice == 0 {
            return 0;
        }
        let quanta = (time_slice / 1000).min(u8::MAX as u32);
        if quanta == 0 {
            return 0;
        }
        let option = self.dev.time_quanta_option(self.block);
        for i in 0..QUANTA_OPTIONS {
            if (option >> (8 * i)) & 0xff >= quanta {
                return i as u8;
            }
        }
        let last = QUANTA_OPTIONS - 1;
        let grown = (option & !(0xff << (8 * last))) | (quanta << (8 * last));
        debug!(
            "World switch {}: quanta table {:#010x} -> {:#010x}",
            self.id, option, grown
        );
        self.dev.set_time_quanta_option(self.block, grown);
        last as u8
    }

    /// Program the quanta table (when it changed) and the function's index
    fn program_quanta(&self, st: &mut SwitchState, f: FunctionId, time_slice: u32) -> Result<()> {
        let idx = self.time_quanta_index(time_slice);
        let option = self.dev.time_quanta_option(self.block);
        if st.time_quanta_option != option {
            self.issue_all(HwCommand::SetTimeQuantaOption(option), f)?;
            st.time_quanta_option = option;
        }
        self.issue_all(HwCommand::SetTimeQuantaIndex(idx), f)?;
        Ok(())
    }

    pub(super) fn auto_add(&self, f: FunctionId) -> Result<()> {
        let ts = self.dev.functions().time_slice(f, self.block);
        let mut st = self.state.lock();
        self.program_quanta(&mut st, f, ts)?;
        self.dev.functions().set_active(f, true)?;
        self.issue_all(HwCommand::AutoSchedAdd, f)?;
        self.dev.functions().set_auto_run(f, true)?;
        self.mark_inited(f);
        info!("World switch {}: {} admitted to the hardware scheduler", self.id, fn_name(f));
        Ok(())
    }

    pub(super) fn auto_remove(&self, f: FunctionId) -> Result<()> {
        let _st = self.state.lock();
        self.clear_inited(f);
        self.dev.functions().set_auto_run(f, false)?;
        self.issue_all(HwCommand::AutoSchedRemove, f)?;
        info!("World switch {}: {} withdrawn from the hardware scheduler", self.id, fn_name(f));
        Ok(())
    }

    pub(super) fn auto_update_time_slice(&self, f: FunctionId) -> Result<()> {
        if self.block != SchedBlock::Gfx {
            return Ok(());
        }
        let ts = self.dev.functions().time_slice(f, self.block);
        let mut st = self.state.lock();
        self.program_quanta(&mut st, f, ts)?;
        self.config_auto_sched_mode(&st)
    }

    /// Re-apply the hardware mode, pausing a running scheduler around it
    fn config_auto_sched_mode(&self, st: &SwitchState) -> Result<()> {
        let running = self.is_running();
        if running {
            self.pause_group(None)?;
        }
        self.issue_all(HwCommand::ConfigAutoMode(self.mode()), st.curr_idx)?;
        if running {
            for engine in self.engines() {
                engine.run_auto(&self.dev, None)?;
            }
        }
        Ok(())
    }

    fn stop_auto_locked(&self, st: &mut SwitchState) -> Result<()> {
        let res = if st.curr_state == ContextState::Abnormal {
            if let Some(e) = self.first_engine() {
                if let Ok(f) = self.dev.hw().active_fn(e) {
                    st.curr_idx = f;
                }
            }
            Ok(())
        } else {
            match self.pause_group(None) {
                Ok(()) => {
                    st.curr_state = ContextState::Saved;
                    if let Some(e) = self.first_engine().and_then(|e| self.dev.engine(e).ok()) {
                        st.curr_idx = e.current_fn();
                    }
                    self.stats.inc_saves();
                    Ok(())
                }
                Err(e) => {
                    error!("World switch {}: pausing the hardware scheduler failed: {}", self.id, e);
                    st.curr_state = ContextState::Abnormal;
                    self.stats.inc_failures();
                    Err(SchedError::from(e))
                }
            }
        };
        let stop = self.stop_policy();
        let curr = st.curr_idx;
        st.list.stop_record(curr, self.dev.now_us(), stop);
        self.set_running(false);
        self.publish(st);
        res
    }

    pub(super) fn auto_stop(&self) -> Result<()> {
        if !self.is_running() && self.state() != ContextState::Loaded {
            return Ok(());
        }
        let mut st = self.state.lock();
        self.stop_auto_locked(&mut st)?;
        info!("World switch {}: hardware scheduler stopped", self.id);
        Ok(())
    }

    /// Hand every engine of the group to the hardware scheduler
    ///
    /// GFX engines are paused and reconfigured first; a pending single-function
    /// self-switch change reprograms function 0's quanta on the way.
    fn start_engines(&self, curr: FunctionId, trigger: SelfSwitchTrigger, num: u32) -> Result<()> {
        let mode = self.mode();
        for engine in self.engines() {
            if self.block == SchedBlock::Gfx {
                if num == 1 && trigger != SelfSwitchTrigger::None {
                    if trigger == SelfSwitchTrigger::Disable {
                        engine.pause(&self.dev, None)?;
                    }
                    let idx = self.time_quanta_index(self.dev.asic_gfx_time_slice(num));
                    let option = self.dev.time_quanta_option(self.block);
                    self.dev
                        .issue(engine.id(), HwCommand::SetTimeQuantaOption(option), 0, 0)?;
                    self.dev
                        .issue(engine.id(), HwCommand::SetTimeQuantaIndex(idx), 0, 0)?;
                }
                engine.pause(&self.dev, None)?;
                self.dev
                    .issue(engine.id(), HwCommand::ConfigAutoMode(mode), curr, curr)?;
            }
            engine.run_auto(&self.dev, None)?;
        }
        Ok(())
    }

    pub(super) fn auto_start(&self) -> Result<()> {
        let mut st = self.state.lock();
        let num = self.dev.num_vf_per_gfx();

        if let Some(target) = self.dev.config().force_switch_fn {
            if self.is_running() {
                self.stop_auto_locked(&mut st)?;
            }
            info!("World switch {}: forced onto {}", self.id, fn_name(target));
            return self.switch_to_locked(&mut st, target);
        }

        if self.is_running() && (st.auto_trigger == SelfSwitchTrigger::None || num != 1) {
            return Ok(());
        }
        if st.curr_state == ContextState::Abnormal {
            return Err(SchedError::Abnormal(self.id));
        }

        let trigger = st.auto_trigger;
        let mode = self.mode();
        let res = self.start_engines(st.curr_idx, trigger, num);

        if let Err(e) = res {
            error!("World switch {}: starting the hardware scheduler failed: {}", self.id, e);
            self.dev
                .post_event(SchedEventKind::SchedResetVf, st.curr_idx, self.block);
            self.stats.inc_failures();
            return Err(e);
        }
        if trigger != SelfSwitchTrigger::None && num == 1 {
            st.time_quanta_option = self.dev.time_quanta_option(self.block);
        }
        st.auto_trigger = SelfSwitchTrigger::None;

        if let Some(f) = self.first_engine().and_then(|e| self.dev.hw().active_fn(e).ok()) {
            st.curr_idx = f;
        }
        st.curr_state = ContextState::Loaded;
        let curr = st.curr_idx;
        let now = self.dev.now_us();
        st.list.start_record(curr, now);
        self.set_running(true);
        self.publish(&st);
        info!("World switch {}: hardware scheduler running in {} mode", self.id, mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SchedConfig;
    use crate::core::types::{bit, SchedMode};
    use crate::device::Device;
    use crate::hw::sim::{FaultRule, SimulatedHardware};
    use crate::monitoring::events::EventQueue;
    use std::sync::Arc;

    fn rig(block: SchedBlock) -> (Arc<SimulatedHardware>, Arc<WorldSwitch>) {
        rig_with_events(block, Arc::new(EventQueue::new()))
    }

    fn rig_with_events(
        block: SchedBlock,
        events: Arc<EventQueue>,
    ) -> (Arc<SimulatedHardware>, Arc<WorldSwitch>) {
        let hw = Arc::new(SimulatedHardware::new(1));
        let dev = Device::builder(hw.clone())
            .with_engine(block, SchedMode::Solid)
            .with_config(SchedConfig::testing())
            .with_events(events)
            .with_num_vf(2)
            .build()
            .unwrap();
        dev.functions().set_time_slice_all(0, 6000).unwrap();
        dev.functions().set_time_slice_all(1, 10_000).unwrap();
        let ws = WorldSwitch::builder(dev, 0, block)
            .with_engine(0)
            .with_allowed(0b11)
            .inline()
            .build()
            .unwrap();
        (hw, ws)
    }

    #[test]
    fn test_add_programs_quanta_and_admits() {
        let (hw, ws) = rig(SchedBlock::Gfx);
        ws.add_function(0).unwrap();
        assert_eq!(hw.time_quanta(0), (0x0600_0000, 3));
        assert_eq!(hw.admitted(0), bit(0));
        assert!(ws.device().functions().auto_run(0));
        assert!(ws.device().functions().is_active(0));

        // A longer slice grows the last option
        ws.add_function(1).unwrap();
        assert_eq!(hw.time_quanta(0), (0x0a00_0000, 3));
        assert_eq!(hw.admitted(0), 0b11);
    }

    #[test]
    fn test_index_picks_first_fitting_option() {
        let (_hw, ws) = rig(SchedBlock::Gfx);
        ws.device().set_time_quanta_option(SchedBlock::Gfx, 0x1e0f_0a05);
        assert_eq!(ws.time_quanta_index(5000), 0);
        assert_eq!(ws.time_quanta_index(7000), 1);
        assert_eq!(ws.time_quanta_index(30_000), 3);
        assert_eq!(ws.time_quanta_index(500), 0);
        assert_eq!(ws.time_quanta_index(0), 0);
        assert_eq!(ws.time_quanta_index(40_000), 3);
        assert_eq!(ws.device().time_quanta_option(SchedBlock::Gfx), 0x280f_0a05);
    }

    #[test]
    fn test_start_stop_cycle() {
        let (hw, ws) = rig(SchedBlock::Gfx);
        ws.add_function(0).unwrap();
        ws.add_function(1).unwrap();
        ws.start().unwrap();
        assert!(ws.is_running());
        assert!(hw.auto_enabled(0));
        assert_eq!(hw.auto_mode(0), Some(SchedMode::Solid));
        assert_eq!(ws.current_function(), Ok(0));
        assert_eq!(ws.hw_current_state(0), ContextState::Loaded);

        ws.stop().unwrap();
        assert!(!ws.is_running());
        assert!(!hw.auto_enabled(0));
        assert_eq!(ws.state(), ContextState::Saved);
        hw.clear_log();
        ws.stop().unwrap();
        assert!(hw.commands().is_empty());
    }

    #[test]
    fn test_remove_withdraws() {
        let (hw, ws) = rig(SchedBlock::Gfx);
        ws.add_function(0).unwrap();
        ws.add_function(1).unwrap();
        ws.remove_function(1).unwrap();
        assert_eq!(hw.admitted(0), bit(0));
        assert!(!ws.device().functions().auto_run(1));
    }

    #[test]
    fn test_mm_update_time_slice_is_noop() {
        let (hw, ws) = rig(SchedBlock::Vcn);
        hw.clear_log();
        ws.update_time_slice(0).unwrap();
        assert!(hw.commands().is_empty());
    }

    #[test]
    fn test_abnormal_refuses_start() {
        let (_hw, ws) = rig(SchedBlock::Gfx);
        ws.set_abnormal(0);
        assert_eq!(ws.start(), Err(SchedError::Abnormal(0)));
        assert!(!ws.is_running());
    }

    #[test]
    fn test_start_failure_requests_reset() {
        let events = Arc::new(EventQueue::new());
        let (hw, ws) = rig_with_events(SchedBlock::Gfx, events.clone());
        ws.add_function(0).unwrap();
        hw.inject(FaultRule::reject(HwCommand::EnableAutoSched));
        assert!(ws.start().is_err());
        assert!(!ws.is_running());
        assert!(events
            .drain()
            .iter()
            .any(|e| e.kind == SchedEventKind::SchedResetVf));
    }

    #[test]
    fn test_self_switch_trigger_reprograms_single_function() {
        let (hw, ws) = rig(SchedBlock::Gfx);
        ws.device().set_num_vf_per_gfx(1);
        ws.add_function(0).unwrap();
        ws.start().unwrap();
        let before = hw.count(HwCommand::SetTimeQuantaIndex(0));

        hw.clear_log();
        ws.start().unwrap();
        assert!(hw.commands().is_empty());

        ws.setup_self_switch(false);
        ws.start().unwrap();
        assert!(hw.count(HwCommand::SetTimeQuantaIndex(0)) >= 1);
        assert!(before >= 1);
        assert!(ws.is_running());
    }
}
