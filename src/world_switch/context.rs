/*!
 * Context Transitions
 *
 * init/load/save/switch for the resident function of a world switch, plus the
 * recovery helpers used around function-level resets. Every transition drives all
 * engines of the group and fails closed: a hardware error leaves the switch Abnormal
 * and stops the loop.
 */

use super::{SwitchState, WorldSwitch};
use crate::core::errors::{HwResult, Result, SchedError};
use crate::core::limits::TIME_SLICE_SINGLE_FN;
use crate::core::types::{bit, fn_name, ids, ContextState, EngineId, FunctionId, FunctionMask};
use crate::hw::state_machine::{context_state_of, GpuState};
use crate::monitoring::events::SchedEventKind;
use log::{debug, error, info, warn};
use std::time::Duration;

impl WorldSwitch {
    // -- engine group ----------------------------------------------------------------

    pub(super) fn run_group(&self, f: FunctionId) -> HwResult<()> {
        for engine in self.engines() {
            engine.run(&self.dev, f)?;
        }
        Ok(())
    }

    pub(super) fn pause_group(&self, f: Option<FunctionId>) -> HwResult<()> {
        for engine in self.engines() {
            engine.pause(&self.dev, f)?;
        }
        Ok(())
    }

    /// Record a hardware failure against the resident function
    fn fail_transition(&self, st: &mut SwitchState, what: &str, err: &SchedError) {
        error!(
            "World switch {}: {} {} failed: {}",
            self.id,
            what,
            fn_name(st.curr_idx),
            err
        );
        st.curr_state = ContextState::Abnormal;
        self.set_running(false);
        self.stats.inc_failures();
        self.publish(st);
    }

    // -- transitions -------------------------------------------------------------------

    /// First load of a function context
    pub(super) fn init_locked(&self, st: &mut SwitchState, f: FunctionId) -> Result<()> {
        if !matches!(st.curr_state, ContextState::Saved | ContextState::Clear) {
            return Err(SchedError::invalid_transition(format!(
                "init {} from {}",
                fn_name(f),
                st.curr_state
            )));
        }
        st.curr_idx = f;
        self.mark_inited(f);
        st.list.start_record(f, self.dev.now_us());

        let res = self
            .run_group(f)
            .and_then(|_| self.dev.post_init_setup(f))
            .map_err(SchedError::from);
        match res {
            Ok(()) => {
                st.curr_state = ContextState::Loaded;
                self.stats.inc_switches();
                self.publish(st);
                debug!("World switch {}: init {}", self.id, fn_name(f));
                Ok(())
            }
            Err(e) => {
                self.fail_transition(st, "init", &e);
                Err(e)
            }
        }
    }

    /// Reload a previously initialized function
    pub(super) fn load_locked(&self, st: &mut SwitchState, f: FunctionId) -> Result<()> {
        if !matches!(st.curr_state, ContextState::Saved | ContextState::Clear) {
            return Err(SchedError::invalid_transition(format!(
                "load {} from {}",
                fn_name(f),
                st.curr_state
            )));
        }
        st.curr_idx = f;
        st.list.start_record(f, self.dev.now_us());

        match self.run_group(f) {
            Ok(()) => {
                st.curr_state = ContextState::Loaded;
                self.stats.inc_switches();
                self.publish(st);
                debug!("World switch {}: load {}", self.id, fn_name(f));
                Ok(())
            }
            Err(e) => {
                let e = SchedError::from(e);
                self.fail_transition(st, "load", &e);
                Err(e)
            }
        }
    }

    /// Save the resident function
    ///
    /// Accounting for the outgoing function stops whether or not the save succeeds.
    pub(super) fn save_locked(&self, st: &mut SwitchState) -> Result<()> {
        if !matches!(st.curr_state, ContextState::Loaded | ContextState::Clear) {
            return Err(SchedError::invalid_transition(format!(
                "save {} from {}",
                fn_name(st.curr_idx),
                st.curr_state
            )));
        }
        let f = st.curr_idx;
        let res = if st.curr_state == ContextState::Loaded {
            self.pause_group(Some(f)).map_err(SchedError::from)
        } else {
            Ok(())
        };
        let stop = self.stop_policy();
        st.list.stop_record(f, self.dev.now_us(), stop);

        match res {
            Ok(()) => {
                if st.curr_state == ContextState::Loaded {
                    st.curr_state = ContextState::Saved;
                    self.stats.inc_saves();
                }
                self.publish(st);
                debug!("World switch {}: save {}", self.id, fn_name(f));
                Ok(())
            }
            Err(e) => {
                self.fail_transition(st, "save", &e);
                Err(e)
            }
        }
    }

    /// Make `f` resident, saving whoever holds the engines
    pub(super) fn switch_to_locked(&self, st: &mut SwitchState, f: FunctionId) -> Result<()> {
        match st.curr_state {
            ContextState::Abnormal => return Err(SchedError::Abnormal(self.id)),
            ContextState::Loaded if st.curr_idx == f => return Ok(()),
            ContextState::Loaded => self.save_locked(st)?,
            ContextState::Saved | ContextState::Clear => {}
        }
        if self.inited_mask() & bit(f) != 0 {
            self.load_locked(st, f)
        } else {
            self.init_locked(st, f)
        }
    }

    /// Make `f` resident
    pub fn switch_to(&self, f: FunctionId) -> Result<()> {
        self.check_member(f)?;
        let mut st = self.state.lock();
        self.switch_to_locked(&mut st, f)
    }

    /// Save the resident function
    pub fn save(&self) -> Result<()> {
        let mut st = self.state.lock();
        self.save_locked(&mut st)
    }

    // -- state queries -------------------------------------------------------------------

    /// Whether the switch is usable
    pub fn is_state_ok(&self) -> bool {
        self.state() != ContextState::Abnormal
    }

    /// Resident function, from hardware when the auto scheduler owns the engines
    ///
    /// On multimedia blocks the hardware scheduler is paused first so the answer is stable.
    pub fn current_function(&self) -> Result<FunctionId> {
        let st = self.state.lock();
        if self.block.is_mm() && st.curr_state != ContextState::Abnormal {
            for engine in self.engines() {
                if engine.state() == GpuState::EnableAuto {
                    engine.pause(&self.dev, None)?;
                }
            }
        }
        if self.backend() == super::Backend::Auto && self.is_running() {
            if let Some(e) = self.first_engine() {
                return Ok(self.dev.hw().active_fn(e)?);
            }
        }
        Ok(st.curr_idx)
    }

    /// Context state as the hardware sees it for one engine
    pub fn hw_current_state(&self, engine: EngineId) -> ContextState {
        if self.backend() == super::Backend::Auto && self.is_running() {
            context_state_of(self.dev.hw().active_fn_status(engine))
        } else {
            self.state()
        }
    }

    /// Mark the group Abnormal with `f` resident
    pub fn set_abnormal(&self, f: FunctionId) {
        let mut st = self.state.lock();
        st.curr_idx = f;
        st.curr_state = ContextState::Abnormal;
        self.set_running(false);
        self.signal.cancel();
        self.publish(&st);
        warn!("World switch {}: marked abnormal on {}", self.id, fn_name(f));
    }

    /// Return to Clear after a reset
    pub fn clear_state(&self, f: FunctionId) -> Result<()> {
        if self.is_running() {
            return Err(SchedError::invalid_transition(
                "state cannot be cleared while the world switch runs",
            ));
        }
        let mut st = self.state.lock();
        st.curr_state = ContextState::Clear;
        self.clear_inited(st.curr_idx);
        let stop = self.stop_policy();
        st.list.stop_record(f, self.dev.now_us(), stop);
        self.publish(&st);
        info!("World switch {}: state cleared for {}", self.id, fn_name(f));
        Ok(())
    }

    /// Forget initialization of the functions in `mask` ahead of a whole-device reset
    pub fn clear_for_reset(&self, mask: FunctionMask) {
        let mut st = self.state.lock();
        st.curr_state = ContextState::Clear;
        for f in ids(mask) {
            self.clear_inited(f);
        }
        self.publish(&st);
    }

    // -- recovery --------------------------------------------------------------------------

    /// Settle the engines after a function-level reset of `f`
    ///
    /// The reset already destroyed the context, so the engines are told it is saved and
    /// then shut down.
    pub fn reset_function(&self, f: FunctionId) -> Result<()> {
        for engine in self.engines() {
            engine.force_saved(f)?;
            engine.shutdown(&self.dev, f)?;
        }
        self.clear_inited(f);
        info!("World switch {}: {} reset", self.id, fn_name(f));
        Ok(())
    }

    pub fn shutdown_function(&self, f: FunctionId) -> Result<()> {
        for engine in self.engines() {
            engine.shutdown(&self.dev, f)?;
        }
        self.clear_inited(f);
        Ok(())
    }

    /// Bring every engine of a multi-engine manual group onto `f`
    ///
    /// An engine found abnormal on some other function cannot be recovered by a VF reset
    /// and the device is retired.
    pub fn sync_abnormal(&self, f: FunctionId) -> Result<()> {
        if self.mode().is_hardware() || self.engine_mask.count_ones() <= 1 {
            return Ok(());
        }
        for e in ids(self.engine_mask) {
            let engine = self.dev.engine(e)?;
            let status = context_state_of(self.dev.hw().active_fn_status(e));
            let cur = self.dev.hw().active_fn(e)?;
            if status == ContextState::Abnormal && cur != f {
                error!(
                    "World switch {}: engine {} abnormal on {} while recovering {}",
                    self.id,
                    e,
                    fn_name(cur),
                    fn_name(f)
                );
                self.dev.post_event(SchedEventKind::SchedRma, f, self.block);
                return Err(SchedError::Abnormal(self.id));
            }
            if cur == f {
                continue;
            }
            if status == ContextState::Loaded {
                engine.pause(&self.dev, Some(cur))?;
            }
            engine.run(&self.dev, f)?;
        }
        Ok(())
    }

    /// Run every admitted function once for its slice
    ///
    /// Debug aid for bring-up; holds the switch for the whole pass.
    pub fn one_time_loop(&self) -> Result<()> {
        let mut st = self.state.lock();
        let cfg = self.dev.config();
        let fairness = self.is_fairness();
        let grant = self.dev.asic_gfx_time_slice(self.dev.num_vf_per_gfx());
        let members: Vec<FunctionId> = st
            .list
            .iter()
            .filter(|e| !e.is_placeholder())
            .map(|e| e.function())
            .collect();

        for f in members {
            let mut ts = if cfg.use_pf {
                cfg.default_gfx_time_slice_us
            } else {
                st.list.calculate_time_slice(f, fairness, grant)
            };
            if ts == 0 {
                ts = st.list.entry(f).map_or(0, |e| e.time_slice / 2);
            }
            if ts == TIME_SLICE_SINGLE_FN {
                ts = cfg.self_switch_time_slice_us;
            }
            self.switch_to_locked(&mut st, f)?;
            std::thread::sleep(Duration::from_micros(ts as u64));
            self.save_locked(&mut st)?;
        }
        Ok(())
    }
}
