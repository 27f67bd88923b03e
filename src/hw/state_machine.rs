/*!
 * Hardware Scheduler State Machine
 *
 * One instance per scheduling engine. A request names a target GPU state and function;
 * the machine walks the engine graph one command at a time until it gets there.
 *
 * Manual graph (software-driven engines):
 *
 * ```text
 *      IDLE -> SAVE ----\ /-- INIT --\
 *                        *            * RUN -> IDLE
 *  SAVE -> SHUTDOWN ----/ \-- LOAD --/
 * ```
 *
 * Engines owned by the hardware scheduler additionally pass through ENABLE_AUTO and
 * DISABLE_AUTO. Requests on one engine are serialized with a try-lock; a concurrent
 * request fails with `Reentrant` instead of queueing behind a possibly hung command.
 */

use super::command::{ActiveFnStatus, HwCommand};
use crate::core::errors::{HwError, HwResult};
use crate::core::limits::{MAX_FUNCTION_SLOTS, STATE_MACHINE_HOP_BUDGET};
use crate::core::types::{
    bit, fn_name, ids, is_valid_fn, ContextState, EngineId, FunctionId, SchedBlock, SchedMode,
    INVALID_FN, PF_IDX,
};
use crate::device::Device;
use crate::monitoring::diagnostics::DiagContext;
use crate::monitoring::histogram::{Histogram, HistogramSnapshot};
use crate::monitoring::trace::TraceEntry;
use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::Instant;

/// Engine-level GPU state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum GpuState {
    Idle = 0,
    Save = 1,
    Shutdown = 2,
    Init = 3,
    Load = 4,
    Run = 5,
    EnableAuto = 6,
    DisableAuto = 7,
}

impl GpuState {
    #[inline]
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => GpuState::Idle,
            1 => GpuState::Save,
            3 => GpuState::Init,
            4 => GpuState::Load,
            5 => GpuState::Run,
            6 => GpuState::EnableAuto,
            7 => GpuState::DisableAuto,
            _ => GpuState::Shutdown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GpuState::Idle => "idle",
            GpuState::Save => "save",
            GpuState::Shutdown => "shutdown",
            GpuState::Init => "init",
            GpuState::Load => "load",
            GpuState::Run => "run",
            GpuState::EnableAuto => "enable_auto",
            GpuState::DisableAuto => "disable_auto",
        }
    }

    /// Command that moves an engine into this state
    pub fn command(self) -> HwCommand {
        match self {
            GpuState::Idle => HwCommand::Idle,
            GpuState::Save => HwCommand::Save,
            GpuState::Shutdown => HwCommand::Shutdown,
            GpuState::Init => HwCommand::Init,
            GpuState::Load => HwCommand::Load,
            GpuState::Run => HwCommand::Run,
            GpuState::EnableAuto => HwCommand::EnableAutoSched,
            GpuState::DisableAuto => HwCommand::DisableAutoSched,
        }
    }
}

impl fmt::Display for GpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translate the hardware's resident-function status into a context state
pub fn context_state_of(status: HwResult<ActiveFnStatus>) -> ContextState {
    match status {
        Ok(ActiveFnStatus::Idle) | Ok(ActiveFnStatus::Idling) => ContextState::Clear,
        Ok(ActiveFnStatus::Save) => ContextState::Saved,
        Ok(ActiveFnStatus::Load) | Ok(ActiveFnStatus::Active) => ContextState::Loaded,
        Ok(ActiveFnStatus::Stalled) | Err(_) => ContextState::Abnormal,
    }
}

struct Inner {
    state: GpuState,
    curr_fn: FunctionId,
    fn_state: [GpuState; MAX_FUNCTION_SLOTS as usize],
}

impl Inner {
    #[inline]
    fn fn_state(&self, idx: FunctionId) -> GpuState {
        if is_valid_fn(idx) {
            self.fn_state[idx as usize]
        } else {
            GpuState::Shutdown
        }
    }

    #[inline]
    fn set_fn_state(&mut self, idx: FunctionId, state: GpuState) {
        if is_valid_fn(idx) {
            self.fn_state[idx as usize] = state;
        }
    }
}

/// Per-engine state machine
pub struct EngineStateMachine {
    id: EngineId,
    block: SchedBlock,
    mode: RwLock<SchedMode>,
    inner: Mutex<Inner>,
    state_mirror: AtomicU8,
    curr_fn_mirror: AtomicU32,
    latency: Histogram,
}

impl EngineStateMachine {
    pub fn new(id: EngineId, block: SchedBlock, mode: SchedMode, latency: Histogram) -> Self {
        Self {
            id,
            block,
            mode: RwLock::new(mode),
            inner: Mutex::new(Inner {
                state: GpuState::Shutdown,
                curr_fn: PF_IDX,
                fn_state: [GpuState::Shutdown; MAX_FUNCTION_SLOTS as usize],
            }),
            state_mirror: AtomicU8::new(GpuState::Shutdown as u8),
            curr_fn_mirror: AtomicU32::new(PF_IDX),
            latency,
        }
    }

    #[inline]
    pub fn id(&self) -> EngineId {
        self.id
    }

    #[inline]
    pub fn block(&self) -> SchedBlock {
        self.block
    }

    pub fn mode(&self) -> SchedMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: SchedMode) {
        *self.mode.write() = mode;
    }

    /// Whether requests walk the auto graph
    #[inline]
    pub fn is_auto(&self) -> bool {
        self.mode().is_hardware()
    }

    /// Engine state without taking the request lock
    #[inline]
    pub fn state(&self) -> GpuState {
        GpuState::from_u8(self.state_mirror.load(Ordering::Acquire))
    }

    /// Resident function without taking the request lock
    #[inline]
    pub fn current_fn(&self) -> FunctionId {
        self.curr_fn_mirror.load(Ordering::Acquire)
    }

    /// Per-engine state of one function
    pub fn fn_state(&self, idx: FunctionId) -> GpuState {
        self.inner.lock().fn_state(idx)
    }

    pub fn latency(&self) -> HistogramSnapshot {
        self.latency.snapshot()
    }

    // -- requests ----------------------------------------------------------------

    /// Drive `func` to RUN (LOAD only when the slot is flagged `skip_run`)
    ///
    /// A GFX engine already running idles first so a function can self-switch.
    pub fn run(&self, dev: &Device, func: FunctionId) -> HwResult<()> {
        let mut inner = self.lock()?;
        if self.block == SchedBlock::Gfx && inner.state == GpuState::Run {
            info!("Engine {}: already running, idle {} first", self.id, fn_name(inner.curr_fn));
            let cur = inner.curr_fn;
            if let Err(e) = self.hop(dev, &mut inner, GpuState::Idle, cur) {
                self.fail(dev, &inner, &e);
                return Err(e);
            }
        }
        let target = if dev.functions().skip_run(func) {
            GpuState::Load
        } else {
            GpuState::Run
        };
        self.drive(dev, &mut inner, target, Some(func))
    }

    /// Hand the engine to the hardware scheduler
    pub fn run_auto(&self, dev: &Device, func: Option<FunctionId>) -> HwResult<()> {
        let mut inner = self.lock()?;
        let mut target = func;
        if self.block == SchedBlock::Gfx {
            if target.is_none() {
                debug!("Engine {}: no target, looking for an auto-run function", self.id);
                target = dev.functions().first_auto_run();
            }
            if dev.functions().active_count() == 1 && self.mode() == SchedMode::Liquid {
                // A lone function in liquid mode runs without hardware switching
                let f = target.unwrap_or(PF_IDX);
                return self.drive(dev, &mut inner, GpuState::Run, Some(f));
            }
            if target.is_none() {
                debug!("Engine {}: nothing admitted, run PF", self.id);
                return self.drive(dev, &mut inner, GpuState::Run, Some(PF_IDX));
            }
        }
        self.drive(dev, &mut inner, GpuState::EnableAuto, target)
    }

    /// Save the resident context; `None` pauses whatever hardware reports
    pub fn pause(&self, dev: &Device, func: Option<FunctionId>) -> HwResult<()> {
        let mut inner = self.lock()?;
        self.drive(dev, &mut inner, GpuState::Save, func)
    }

    /// Tear a function's context down on this engine
    pub fn shutdown(&self, dev: &Device, func: FunctionId) -> HwResult<()> {
        let mut inner = self.lock()?;
        self.drive(dev, &mut inner, GpuState::Shutdown, Some(func))
    }

    /// Record that `func` is saved after an external reset; no command is issued
    pub fn force_saved(&self, func: FunctionId) -> HwResult<()> {
        let mut inner = self.lock()?;
        inner.state = GpuState::Save;
        inner.curr_fn = func;
        inner.set_fn_state(func, GpuState::Save);
        self.mirror(&inner);
        Ok(())
    }

    // -- graph walking -------------------------------------------------------------

    fn lock(&self) -> HwResult<parking_lot::MutexGuard<'_, Inner>> {
        self.inner.try_lock().ok_or(HwError::Reentrant(self.id))
    }

    fn drive(
        &self,
        dev: &Device,
        inner: &mut Inner,
        target_state: GpuState,
        target_fn: Option<FunctionId>,
    ) -> HwResult<()> {
        debug!(
            "Engine {} ({}): request {} for {}, now {}({})",
            self.id,
            self.block,
            target_state,
            target_fn.map_or_else(|| "UNKNOWN".to_string(), fn_name),
            inner.state,
            fn_name(inner.curr_fn)
        );
        let res = if self.is_auto() {
            self.walk_auto(dev, inner, target_state, target_fn)
        } else {
            let target_fn = target_fn.unwrap_or(inner.curr_fn);
            self.walk_manual(dev, inner, target_state, target_fn)
        };
        if let Err(e) = &res {
            self.fail(dev, inner, e);
        }
        res
    }

    fn walk_manual(
        &self,
        dev: &Device,
        inner: &mut Inner,
        target_state: GpuState,
        target_fn: FunctionId,
    ) -> HwResult<()> {
        let mut budget = STATE_MACHINE_HOP_BUDGET;
        while !Self::reached(inner, target_state, target_fn) {
            if budget == 0 {
                error!("Engine {}: too many hops in state machine", self.id);
                return Err(HwError::InfiniteLoop(self.id));
            }
            budget -= 1;

            let cur = inner.curr_fn;
            let (next, next_fn) = match inner.state {
                GpuState::Idle => (GpuState::Save, cur),
                GpuState::Save if target_state == GpuState::Shutdown && cur == target_fn => {
                    (GpuState::Shutdown, cur)
                }
                GpuState::Save
                    if target_state == GpuState::Shutdown
                        && dev.functions().is_suspended(target_fn) =>
                {
                    (GpuState::Shutdown, target_fn)
                }
                GpuState::Save | GpuState::Shutdown => {
                    Self::check_fn(target_fn)?;
                    let saved = inner.fn_state(target_fn) == GpuState::Save;
                    let next = if target_state == GpuState::Shutdown && cur != target_fn && saved {
                        GpuState::Shutdown
                    } else if saved {
                        GpuState::Load
                    } else {
                        GpuState::Init
                    };
                    (next, target_fn)
                }
                GpuState::Init | GpuState::Load => (GpuState::Run, cur),
                GpuState::Run => (GpuState::Idle, cur),
                GpuState::EnableAuto | GpuState::DisableAuto => {
                    return Err(HwError::UnknownState {
                        engine: self.id,
                        state: inner.state.as_str().into(),
                    });
                }
            };
            self.hop(dev, inner, next, next_fn)?;
        }
        Ok(())
    }

    fn walk_auto(
        &self,
        dev: &Device,
        inner: &mut Inner,
        mut target_state: GpuState,
        target_fn: Option<FunctionId>,
    ) -> HwResult<()> {
        let mut target_fn = match target_fn {
            Some(f) => f,
            None if inner.state != GpuState::EnableAuto => {
                let f = dev.hw().active_fn(self.id)?;
                debug!("Engine {}: target unknown, hardware reports {}", self.id, fn_name(f));
                f
            }
            None => INVALID_FN,
        };
        let single_no_self_switch = self.block == SchedBlock::Gfx
            && dev.num_vf_per_gfx() == 1
            && dev.config().disable_self_switch;

        let mut budget = STATE_MACHINE_HOP_BUDGET;
        while inner.state != target_state || inner.curr_fn != target_fn {
            if budget == 0 {
                error!("Engine {}: too many hops in state machine", self.id);
                return Err(HwError::InfiniteLoop(self.id));
            }
            budget -= 1;

            let cur = inner.curr_fn;
            match inner.state {
                GpuState::Idle => self.hop(dev, inner, GpuState::Save, cur)?,
                GpuState::Save if target_state == GpuState::Shutdown && cur == target_fn => {
                    self.hop(dev, inner, GpuState::Shutdown, cur)?
                }
                GpuState::Save | GpuState::Shutdown if target_state == GpuState::EnableAuto => {
                    if single_no_self_switch {
                        info!("Engine {}: self switch disabled, run instead of auto", self.id);
                        target_state = GpuState::Run;
                        Self::check_fn(target_fn)?;
                        self.hop(dev, inner, GpuState::Load, target_fn)?;
                    } else {
                        self.enable_auto(dev, inner, target_fn)?;
                    }
                }
                GpuState::Save | GpuState::Shutdown => {
                    Self::check_fn(target_fn)?;
                    let inited = target_fn == PF_IDX || dev.functions().is_active(target_fn);
                    if inner.fn_state(target_fn) == GpuState::Save && inited {
                        self.hop(dev, inner, GpuState::Load, target_fn)?;
                    } else {
                        self.hop(dev, inner, GpuState::Init, target_fn)?;
                    }
                }
                GpuState::Init | GpuState::Load => self.hop(dev, inner, GpuState::Run, cur)?,
                GpuState::Run => {
                    if target_state == GpuState::EnableAuto && self.block != SchedBlock::Gfx {
                        self.enable_auto(dev, inner, target_fn)?;
                    } else {
                        if single_no_self_switch && target_state == GpuState::EnableAuto {
                            target_state = GpuState::Run;
                        }
                        self.hop(dev, inner, GpuState::Idle, cur)?;
                    }
                }
                GpuState::EnableAuto => {
                    if dev.functions().auto_run_mask() != 0 {
                        if single_no_self_switch && target_state == GpuState::DisableAuto {
                            inner.state = GpuState::Run;
                            target_state = GpuState::Save;
                            self.mirror(inner);
                            continue;
                        }
                        self.hop(dev, inner, GpuState::DisableAuto, cur)?;
                        inner.curr_fn = dev.hw().active_fn(self.id)?;
                    } else {
                        inner.state = GpuState::DisableAuto;
                        inner.curr_fn = PF_IDX;
                    }
                    if target_fn == INVALID_FN {
                        target_fn = inner.curr_fn;
                    }
                    self.mirror(inner);
                }
                GpuState::DisableAuto => self.leave_auto(dev, inner)?,
            }
        }
        Ok(())
    }

    fn enable_auto(&self, dev: &Device, inner: &mut Inner, target_fn: FunctionId) -> HwResult<()> {
        let auto_mask = dev.functions().auto_run_mask();
        if auto_mask != 0 {
            self.hop(dev, inner, GpuState::EnableAuto, target_fn)?;
        }
        inner.state = GpuState::EnableAuto;
        inner.curr_fn = target_fn;
        for idx in ids(auto_mask) {
            inner.set_fn_state(idx, GpuState::Run);
        }
        self.mirror(inner);
        Ok(())
    }

    /// Settle the engine after the hardware scheduler let go of it
    fn leave_auto(&self, dev: &Device, inner: &mut Inner) -> HwResult<()> {
        let cur = inner.curr_fn;
        let hw_state = if self.block == SchedBlock::Gfx {
            ContextState::Saved
        } else {
            context_state_of(dev.hw().active_fn_status(self.id))
        };

        let needs_idle = hw_state != ContextState::Saved;
        if needs_idle {
            debug!("Engine {}: idle {} after leaving auto mode", self.id, fn_name(cur));
            if hw_state != ContextState::Clear {
                self.hop(dev, inner, GpuState::Idle, cur)?;
            }
            inner.state = GpuState::Idle;
        } else {
            inner.state = GpuState::Save;
        }

        let use_pf = dev.config().use_pf;
        let mut mask = dev.functions().auto_run_mask();
        if use_pf {
            mask |= bit(PF_IDX);
        }
        for idx in ids(mask) {
            let state = if idx == cur && needs_idle {
                GpuState::Idle
            } else {
                GpuState::Save
            };
            inner.set_fn_state(idx, state);
        }
        self.mirror(inner);
        Ok(())
    }

    #[inline]
    fn reached(inner: &Inner, target_state: GpuState, target_fn: FunctionId) -> bool {
        if inner.curr_fn != target_fn {
            return false;
        }
        // A first-time load lands in INIT, which satisfies a load-only request
        inner.state == target_state
            || (target_state == GpuState::Load && inner.state == GpuState::Init)
    }

    #[inline]
    fn check_fn(idx: FunctionId) -> HwResult<()> {
        if is_valid_fn(idx) {
            Ok(())
        } else {
            Err(HwError::InvalidFunction(idx))
        }
    }

    /// Issue one command and account for it
    fn hop(&self, dev: &Device, inner: &mut Inner, next: GpuState, next_fn: FunctionId) -> HwResult<()> {
        let from_state = inner.state;
        let from_fn = inner.curr_fn;
        let started = Instant::now();
        let res = dev.issue(self.id, next.command(), next_fn, next_fn);
        let latency_us = started.elapsed().as_micros() as u64;

        dev.trace().record(TraceEntry {
            seq: 0,
            timestamp_us: dev.now_us(),
            engine: self.id,
            from_fn,
            from_state: from_state.as_str(),
            to_fn: next_fn,
            to_state: next.as_str(),
            latency_us,
            ok: res.is_ok(),
        });
        res?;

        self.latency.record(latency_us);
        inner.state = next;
        inner.curr_fn = next_fn;
        inner.set_fn_state(next_fn, next);
        self.mirror(inner);
        Ok(())
    }

    #[inline]
    fn mirror(&self, inner: &Inner) {
        self.state_mirror.store(inner.state as u8, Ordering::Release);
        self.curr_fn_mirror.store(inner.curr_fn, Ordering::Release);
    }

    fn fail(&self, dev: &Device, inner: &Inner, err: &HwError) {
        error!(
            "Engine {} ({}): failed at {}({}): {}",
            self.id,
            self.block,
            inner.state,
            fn_name(inner.curr_fn),
            err
        );
        dev.capture_diagnostics(DiagContext::engine(
            self.id,
            self.block,
            inner.curr_fn,
            err.to_string(),
        ));
    }
}

impl fmt::Debug for EngineStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineStateMachine")
            .field("id", &self.id)
            .field("block", &self.block)
            .field("mode", &self.mode())
            .field("state", &self.state())
            .field("curr_fn", &self.current_fn())
            .finish()
    }
}
