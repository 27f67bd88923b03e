/*!
 * Manual Backend
 * Software world-switch loop: admission, start/stop and the timer-driven cycle
 */

use super::policy::{Pick, PolicyContext};
use super::{SwitchState, WorldSwitch};
use crate::core::errors::{Result, SchedError};
use crate::core::limits::TIME_SLICE_SINGLE_FN;
use crate::core::types::{bit, fn_name, vf_mask, BpMode, ContextState, FunctionId, SchedBlock, PF_IDX};
use crate::monitoring::events::SchedEventKind;
use log::{debug, error, info, trace};

/// What one loop iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The switch is stopped
    NotRunning,
    /// The forced debug target is already resident
    Forced,
    /// Nothing to schedule; the PF holds the engines
    Idle,
    /// Hybrid-liquid kept the resident function, re-armed for the remainder if any
    Held { armed_us: Option<u64> },
    Switched { function: FunctionId, time_slice: u32 },
    /// A transition failed and a reset was requested
    Failed,
}

impl WorldSwitch {
    // -- admission -------------------------------------------------------------------

    pub(super) fn manual_add(&self, f: FunctionId) -> Result<()> {
        let ts = self.dev.functions().time_slice(f, self.block);
        if ts == 0 {
            debug!(
                "World switch {}: {} has no {} time slice, not scheduled",
                self.id,
                fn_name(f),
                self.block
            );
            return Ok(());
        }

        {
            let mut st = self.state.lock();
            self.dev.functions().set_active(f, true)?;
            let fairness = self.is_fairness();
            let gfx = self.block == SchedBlock::Gfx;
            let Some(e) = st.list.entry_mut(f) else {
                return Err(SchedError::InvalidFunction(f));
            };
            e.placeholder = false;
            e.time_slice = ts;
            if fairness && f != PF_IDX {
                if !st.list.contains(f) {
                    st.list.push_back(f);
                }
            } else {
                e.assigned = true;
                if gfx && f != PF_IDX {
                    e.skip_cnt = 0;
                }
                st.list.push_back(f);
            }
            info!(
                "World switch {}: add {} ({}us), list {:?}",
                self.id,
                fn_name(f),
                ts,
                st.list.functions()
            );
        }
        self.wake();
        Ok(())
    }

    pub(super) fn manual_remove(&self, f: FunctionId) -> Result<()> {
        {
            let mut st = self.state.lock();
            if !st.list.entry(f).map_or(false, |e| e.assigned) {
                return Err(SchedError::InvalidFunction(f));
            }

            if st.curr_idx == f && st.curr_state == ContextState::Loaded {
                if let Err(e) = self.save_locked(&mut st) {
                    self.dev
                        .post_event(SchedEventKind::SchedResetVf, st.curr_idx, self.block);
                    return Err(e);
                }
            }

            if self.is_fairness() && f != PF_IDX {
                if let Some(e) = st.list.entry_mut(f) {
                    e.placeholder = true;
                }
            } else {
                st.list.remove(f);
                if f != PF_IDX {
                    if let Some(e) = st.list.entry_mut(f) {
                        e.assigned = false;
                    }
                }
            }
            self.clear_inited(f);
            info!(
                "World switch {}: remove {}, list {:?}",
                self.id,
                fn_name(f),
                st.list.functions()
            );
        }
        self.wake();
        Ok(())
    }

    pub(super) fn manual_update_time_slice(&self, f: FunctionId) -> Result<()> {
        let ts = self.dev.functions().time_slice(f, self.block);
        let mut st = self.state.lock();
        if let Some(e) = st.list.entry_mut(f) {
            if e.assigned && ts != 0 {
                e.time_slice = ts;
                debug!("World switch {}: {} slice now {}us", self.id, fn_name(f), ts);
            }
        }
        Ok(())
    }

    // -- start/stop ------------------------------------------------------------------------

    pub(super) fn manual_start(&self) -> Result<()> {
        let mut st = self.state.lock();
        if self.is_running() {
            if self.dev.num_vf_per_gfx() == 1 && st.self_switch_trigger {
                st.self_switch_trigger = false;
                drop(st);
                debug!("World switch {}: self switch re-armed", self.id);
                self.signal.wake();
            }
            return Ok(());
        }
        if st.curr_state == ContextState::Abnormal {
            return Err(SchedError::Abnormal(self.id));
        }
        self.set_running(true);
        drop(st);
        info!("World switch {}: started", self.id);
        self.signal.wake();
        Ok(())
    }

    pub(super) fn manual_stop(&self) -> Result<()> {
        if !self.is_running() && self.state() != ContextState::Loaded {
            return Ok(());
        }
        // A cycle in flight must not schedule the next one
        self.set_running(false);
        self.signal.cancel();

        let mut st = self.state.lock();
        if st.curr_state != ContextState::Loaded {
            return Ok(());
        }
        self.save_locked(&mut st)?;
        self.rotate_resident(&mut st);
        info!("World switch {}: stopped", self.id);
        Ok(())
    }

    // -- the loop -----------------------------------------------------------------------------

    /// Move the saved resident function behind everyone else
    ///
    /// The PF only rotates when it takes part in scheduling.
    fn rotate_resident(&self, st: &mut SwitchState) {
        let curr = st.curr_idx;
        let pf_rotates =
            self.dev.config().use_pf && self.dev.functions().is_active(PF_IDX);
        if curr != PF_IDX || pf_rotates {
            st.list.move_to_tail(curr);
        }
    }

    fn reset_vf(&self, st: &SwitchState, err: &SchedError) -> CycleOutcome {
        error!(
            "World switch {}: cycle failed on {}: {}",
            self.id,
            fn_name(st.curr_idx),
            err
        );
        self.dev
            .post_event(SchedEventKind::SchedResetVf, st.curr_idx, self.block);
        // Failed transitions were already counted when they went Abnormal
        if st.curr_state != ContextState::Abnormal {
            self.stats.inc_failures();
        }
        CycleOutcome::Failed
    }

    /// Record a timer expiry; hybrid-liquid marks the resident function timed out
    pub fn timer_expired(&self) {
        self.signal.expired();
        self.stats.inc_timer_expiries();
        if self.is_hybrid_liquid() {
            self.timeout.fetch_or(bit(self.curr_idx()), std::sync::atomic::Ordering::AcqRel);
        }
    }

    /// Run one loop iteration
    pub fn process(&self) -> CycleOutcome {
        let mut st = self.state.lock();
        if !self.is_running() {
            return CycleOutcome::NotRunning;
        }
        self.stats.inc_cycles();
        let cfg = self.dev.config();

        if let Some(target) = cfg.force_switch_fn {
            if st.curr_idx == target && st.curr_state == ContextState::Loaded {
                return CycleOutcome::Forced;
            }
        }

        let fairness = self.is_fairness();
        let empty = if fairness {
            st.list.is_empty_ignoring_placeholders()
        } else {
            st.list.is_empty()
        };
        if empty {
            if st.curr_state != ContextState::Loaded {
                debug!("World switch {}: nothing admitted, load PF", self.id);
                if let Err(e) = self.switch_to_locked(&mut st, PF_IDX) {
                    return self.reset_vf(&st, &e);
                }
            }
            return CycleOutcome::Idle;
        }

        let hybrid = self.is_hybrid_liquid();
        let now = self.dev.now_us();
        if hybrid {
            let loaded = st.curr_state == ContextState::Loaded;
            let inited = self.inited_mask() & vf_mask(self.dev.functions().num_vf());
            if inited.count_ones() == 1 && loaded {
                trace!("World switch {}: single function, hold", self.id);
                self.stats.inc_holds();
                return CycleOutcome::Held { armed_us: None };
            }

            let status = self.busy_status() | self.timeout_status();
            let elapsed = st
                .list
                .entry(st.curr_idx)
                .map_or(u64::MAX, |e| now.saturating_sub(e.start_ts)) as i128;
            let min_ts = self.hliquid_min_ts();
            let left = if min_ts != 0 {
                min_ts as i128 - elapsed
            } else if status == 0 {
                cfg.hliquid_idle_min_ts_us as i128 - elapsed
            } else {
                0
            };
            if left > 0 && loaded {
                let left = left as u64;
                self.signal.arm(left);
                self.stats.inc_holds();
                return CycleOutcome::Held {
                    armed_us: Some(left),
                };
            }
        }

        if st.curr_state == ContextState::Loaded {
            if let Err(e) = self.save_locked(&mut st) {
                return self.reset_vf(&st, &e);
            }
            self.rotate_resident(&mut st);
        } else if fairness {
            if let Some(tail) = st.list.tail() {
                if st.list.entry(tail).map_or(false, |e| e.placeholder) {
                    let stop = self.stop_policy();
                    st.list.stop_record(tail, now, stop);
                }
            }
        }

        let head = st.list.head();
        let forced = cfg
            .force_switch_fn
            .filter(|&t| st.list.contains(t))
            .map(|t| Pick {
                function: t,
                time_slice: self.dev.asic_gfx_time_slice(self.dev.num_vf_per_gfx()),
            });
        let pick = match forced {
            Some(p) => Some(p),
            None => {
                let SwitchState { list, policy, .. } = &mut *st;
                let mut ctx = PolicyContext {
                    list,
                    fairness,
                    pf_active: cfg.use_pf && self.dev.functions().is_active(PF_IDX),
                    status: (self.busy_status() | self.timeout_status()) & self.inited_mask(),
                    skip_bound: cfg.liquid_skip_bound,
                    single_fn_grant: self.dev.asic_gfx_time_slice(self.dev.num_vf_per_gfx()),
                };
                policy.pick(&mut ctx)
            }
        };
        let Some(pick) = pick else {
            return CycleOutcome::Idle;
        };
        if head != Some(pick.function) {
            self.stats.inc_skips();
        }
        if hybrid || forced.is_some() {
            if let Some(e) = st.list.entry_mut(pick.function) {
                e.last_time_slice = pick.time_slice;
            }
        }
        if hybrid {
            self.timeout
                .fetch_and(!bit(pick.function), std::sync::atomic::Ordering::AcqRel);
        }

        debug!(
            "World switch {}: switch to {} for {}us",
            self.id,
            fn_name(pick.function),
            pick.time_slice
        );
        if let Err(e) = self.switch_to_locked(&mut st, pick.function) {
            return self.reset_vf(&st, &e);
        }

        if cfg.bp_mode == BpMode::Mode1 && st.curr_idx == PF_IDX && self.block == SchedBlock::Gfx
        {
            info!("World switch {}: break-point mode holds the PF", self.id);
            self.set_running(false);
        }

        if pick.time_slice != TIME_SLICE_SINGLE_FN && pick.time_slice != 0 {
            self.signal.arm(pick.time_slice as u64);
        }
        CycleOutcome::Switched {
            function: pick.function,
            time_slice: pick.time_slice,
        }
    }
}
