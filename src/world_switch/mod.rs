/*!
 * World Switch
 *
 * One logical scheduler: a group of hardware engines of the same block driven in
 * lock-step, the functions allowed on it, and the backend that decides who runs.
 * Software modes run the manual driver loop on a worker thread; hardware modes hand
 * the engines to the auto scheduler.
 */

use crate::core::errors::{HwResult, Result, SchedError};
use crate::core::limits::{HLIQUID_MIN_TS_STEP, MAX_WORLD_SWITCHES};
use crate::core::types::{
    bit, fn_name, ids, is_valid_fn, ContextState, EngineId, EngineMask, FunctionId, FunctionMask,
    SchedBlock, SchedMode, WorldSwitchId, PF_IDX,
};
use crate::device::Device;
use crate::hw::state_machine::EngineStateMachine;
use crate::monitoring::events::SchedEventKind;
use crate::monitoring::span_operation;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

mod accounting;
mod auto;
mod context;
pub mod entry;
mod manual;
pub mod policy;
pub mod stats;
pub mod task;

pub use accounting::StopPolicy;
pub use entry::{ActiveEntry, ActiveList, EntrySnapshot, ListEntry};
pub use manual::CycleOutcome;
pub use policy::{DefaultPolicy, HybridLiquidPolicy, Pick, PolicyContext, PolicyKind, SchedulePolicy};
pub use stats::{AtomicSwitchStats, SwitchCounters, SwitchStats};
pub use task::{SwitchTask, TaskCommand, TaskSignal};

/// Which side drives the engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Software loop with timer-driven save/load
    Manual,
    /// Hardware auto scheduler
    Auto,
}

impl Backend {
    pub fn for_mode(mode: SchedMode) -> Self {
        if mode.is_hardware() {
            Backend::Auto
        } else {
            Backend::Manual
        }
    }
}

/// Pending single-function self-switch change for the auto backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfSwitchTrigger {
    #[default]
    None,
    Enable,
    Disable,
}

/// State guarded by the switch lock
pub(crate) struct SwitchState {
    pub curr_idx: FunctionId,
    pub curr_state: ContextState,
    pub list: ActiveList,
    pub policy: Box<dyn SchedulePolicy>,
    /// Manual backend: re-arm on the next start in single-function configurations
    pub self_switch_trigger: bool,
    pub auto_trigger: SelfSwitchTrigger,
    /// Option table last programmed into this group's engines
    pub time_quanta_option: u32,
}

/// A logical scheduler
pub struct WorldSwitch {
    id: WorldSwitchId,
    dev: Arc<Device>,
    block: SchedBlock,
    engine_mask: EngineMask,
    mode: RwLock<SchedMode>,
    allowed: AtomicU32,
    state: Mutex<SwitchState>,

    // Lock-free mirrors for monitoring
    curr_idx: AtomicU32,
    curr_state: AtomicU8,
    running: AtomicBool,

    // Written from the busy-status and timer paths without the lock
    busy: AtomicU32,
    timeout: AtomicU32,
    inited: AtomicU32,
    hliquid_min_ts: AtomicU32,

    signal: TaskSignal,
    task: Mutex<Option<SwitchTask>>,
    stats: AtomicSwitchStats,
}

impl WorldSwitch {
    pub fn builder(dev: Arc<Device>, id: WorldSwitchId, block: SchedBlock) -> WorldSwitchBuilder {
        WorldSwitchBuilder::new(dev, id, block)
    }

    // -- identity ------------------------------------------------------------------

    #[inline]
    pub fn id(&self) -> WorldSwitchId {
        self.id
    }

    #[inline]
    pub fn block(&self) -> SchedBlock {
        self.block
    }

    #[inline]
    pub fn engine_mask(&self) -> EngineMask {
        self.engine_mask
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    pub fn mode(&self) -> SchedMode {
        *self.mode.read()
    }

    pub fn backend(&self) -> Backend {
        Backend::for_mode(self.mode())
    }

    #[inline]
    fn is_fairness(&self) -> bool {
        self.mode() == SchedMode::Fairness
    }

    #[inline]
    fn is_hybrid_liquid(&self) -> bool {
        self.mode() == SchedMode::HybridLiquid
    }

    /// Functions this switch may schedule
    pub fn allowed_functions(&self) -> FunctionMask {
        self.allowed.load(Ordering::Acquire)
    }

    fn set_allowed_functions(&self, mask: FunctionMask) {
        self.allowed.store(mask, Ordering::Release);
    }

    /// The PF may always run; VFs only inside the partition
    pub fn is_allowed(&self, f: FunctionId) -> bool {
        f == PF_IDX || self.allowed_functions() & bit(f) != 0
    }

    fn check_member(&self, f: FunctionId) -> Result<()> {
        if !is_valid_fn(f) {
            return Err(SchedError::InvalidFunction(f));
        }
        if !self.is_allowed(f) {
            return Err(SchedError::OutsidePartition {
                function: f,
                world_switch: self.id,
            });
        }
        Ok(())
    }

    // -- lock-free reads ---------------------------------------------------------------

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Context state as of the last transition
    #[inline]
    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.curr_state.load(Ordering::Acquire))
    }

    /// Resident function as of the last transition
    #[inline]
    pub fn curr_idx(&self) -> FunctionId {
        self.curr_idx.load(Ordering::Acquire)
    }

    pub fn inited_mask(&self) -> FunctionMask {
        self.inited.load(Ordering::Acquire)
    }

    pub fn busy_status(&self) -> FunctionMask {
        self.busy.load(Ordering::Acquire)
    }

    /// Hardware activity report used by hybrid-liquid picks
    pub fn set_busy_status(&self, mask: FunctionMask) {
        self.busy.store(mask, Ordering::Release);
    }

    pub fn timeout_status(&self) -> FunctionMask {
        self.timeout.load(Ordering::Acquire)
    }

    /// Slice armed by the last loop iteration
    pub fn armed_time_slice(&self) -> Option<u64> {
        self.signal.armed()
    }

    /// Wakes posted to the loop so far
    pub fn wake_count(&self) -> u64 {
        self.signal.wakes()
    }

    pub fn counters(&self) -> SwitchCounters {
        self.stats.counters()
    }

    pub fn stats(&self) -> SwitchStats {
        let active = self.state.lock().list.functions();
        SwitchStats {
            id: self.id,
            block: self.block,
            mode: self.mode(),
            running: self.is_running(),
            current_function: self.curr_idx(),
            state: self.state(),
            active,
            counters: self.stats.counters(),
        }
    }

    /// Active list order, head first
    pub fn active_functions(&self) -> Vec<FunctionId> {
        self.state.lock().list.functions()
    }

    pub fn active_entries(&self) -> Vec<ListEntry> {
        self.state.lock().list.iter().collect()
    }

    pub fn entry_snapshot(&self, f: FunctionId) -> Option<EntrySnapshot> {
        self.state.lock().list.entry(f).map(|e| e.snapshot(f))
    }

    // -- hybrid-liquid minimum residency -------------------------------------------------

    pub fn hliquid_min_ts(&self) -> u32 {
        self.hliquid_min_ts.load(Ordering::Acquire)
    }

    /// Set the minimum residency, rounded down to the 100 µs step
    ///
    /// Only hybrid-liquid GFX switches take a minimum; the bound is the default GFX
    /// slice for the current function count.
    pub fn set_hliquid_min_ts(&self, us: u32) -> Result<u32> {
        if self.block != SchedBlock::Gfx || !self.is_hybrid_liquid() {
            return Err(SchedError::not_supported(
                "minimum residency applies to hybrid-liquid GFX switches",
            ));
        }
        let max = self.dev.default_gfx_time_slice(self.dev.num_vf_per_gfx());
        if us > max {
            return Err(SchedError::invalid_time_slice(format!(
                "{}us exceeds the {}us default slice",
                us, max
            )));
        }
        let rounded = us - us % HLIQUID_MIN_TS_STEP;
        self.hliquid_min_ts.store(rounded, Ordering::Release);
        info!("World switch {}: hybrid-liquid minimum slice {}us", self.id, rounded);
        Ok(rounded)
    }

    // -- mirrors and helpers ---------------------------------------------------------------

    /// Copy the guarded current function and state into the atomics
    #[inline]
    fn publish(&self, st: &SwitchState) {
        self.curr_idx.store(st.curr_idx, Ordering::Release);
        self.curr_state.store(st.curr_state.as_u8(), Ordering::Release);
    }

    #[inline]
    fn mark_inited(&self, f: FunctionId) {
        self.inited.fetch_or(bit(f), Ordering::AcqRel);
    }

    #[inline]
    fn clear_inited(&self, f: FunctionId) {
        self.inited.fetch_and(!bit(f), Ordering::AcqRel);
    }

    /// Engines of the group, lowest id first
    fn engines(&self) -> impl Iterator<Item = &EngineStateMachine> + '_ {
        ids(self.engine_mask).filter_map(move |e| self.dev.engine(e).ok())
    }

    fn first_engine(&self) -> Option<EngineId> {
        ids(self.engine_mask).next()
    }

    /// Issue a raw command on every engine of the group
    fn issue_all(&self, cmd: crate::hw::command::HwCommand, f: FunctionId) -> HwResult<()> {
        for e in ids(self.engine_mask) {
            self.dev.issue(e, cmd, f, f)?;
        }
        Ok(())
    }

    fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            record_histogram: self.block == SchedBlock::Gfx,
            forgive_overrun: self.dev.config().bp_mode != crate::core::types::BpMode::Disabled,
        }
    }

    /// Populate the list for the current mode; placeholders for every allowed VF in
    /// fairness mode
    fn populate_list(&self, st: &mut SwitchState, num_vf: u32) {
        let now = self.dev.now_us();
        st.list.clear();
        let pf_slice = if self.is_fairness() {
            let default = self.dev.default_gfx_time_slice(self.dev.num_vf_per_gfx());
            for f in ids(self.allowed_functions()).filter(|&f| f < num_vf && f != PF_IDX) {
                if let Some(e) = st.list.entry_mut(f) {
                    e.reset(default, true, now);
                }
                st.list.push_back(f);
            }
            default
        } else {
            0
        };
        // The PF entry exists but only joins the list when added
        if let Some(pf) = st.list.entry_mut(PF_IDX) {
            pf.reset(pf_slice, false, now);
        }
    }

    /// Repopulate the list for the current mode, keeping the admitted members that are
    /// still allowed
    fn rebuild_list(&self, st: &mut SwitchState, num_vf: u32) {
        let members: Vec<FunctionId> = st
            .list
            .iter()
            .filter(|e| !e.is_placeholder())
            .map(|e| e.function())
            .collect();
        self.populate_list(st, num_vf);

        let fairness = self.is_fairness();
        let gfx = self.block == SchedBlock::Gfx;
        for f in members {
            if f != PF_IDX && (f >= num_vf || !self.is_allowed(f)) {
                self.clear_inited(f);
                debug!("World switch {}: {} dropped from the list", self.id, fn_name(f));
                continue;
            }
            let ts = self.dev.functions().time_slice(f, self.block);
            if ts == 0 {
                continue;
            }
            let Some(e) = st.list.entry_mut(f) else {
                continue;
            };
            e.assigned = true;
            e.placeholder = false;
            e.time_slice = ts;
            if gfx && f != PF_IDX {
                e.skip_cnt = 0;
            }
            if !(fairness && st.list.contains(f)) {
                st.list.push_back(f);
            }
        }
    }

    /// Narrow or widen the partition of a stopped switch
    ///
    /// A resident function that falls outside `mask` is saved first. Members outside
    /// the new mask leave the list and fairness placeholders follow the new mask.
    pub(crate) fn apply_allowed_functions(&self, mask: FunctionMask) -> Result<()> {
        let mut st = self.state.lock();
        if self.is_running() {
            return Err(SchedError::invalid_transition(
                "partitions cannot change while the world switch runs",
            ));
        }
        let curr = st.curr_idx;
        let outside = curr != PF_IDX && mask & bit(curr) == 0;
        if outside && st.curr_state == ContextState::Loaded {
            if let Err(e) = self.save_locked(&mut st) {
                self.dev
                    .post_event(SchedEventKind::SchedResetVf, curr, self.block);
                return Err(e);
            }
        }
        self.set_allowed_functions(mask);
        self.rebuild_list(&mut st, self.dev.functions().num_vf());
        debug!(
            "World switch {}: allowed {:#x}, list {:?}",
            self.id,
            mask,
            st.list.functions()
        );
        Ok(())
    }

    /// Wake the loop; manual backends only
    pub fn wake(&self) {
        if self.backend() == Backend::Manual {
            self.signal.wake();
        }
    }

    /// The resident GFX function went idle: drop the pending slice and switch now
    pub fn signal_idle(&self) {
        if self.block == SchedBlock::Gfx && self.is_running() && self.backend() == Backend::Manual {
            self.signal.cancel();
            self.signal.wake();
        }
    }

    // -- backend dispatch ---------------------------------------------------------------

    /// Admit a function to scheduling
    pub fn add_function(&self, f: FunctionId) -> Result<()> {
        self.check_member(f)?;
        match self.backend() {
            Backend::Manual => self.manual_add(f),
            Backend::Auto => self.auto_add(f),
        }
    }

    /// Withdraw a function from scheduling
    pub fn remove_function(&self, f: FunctionId) -> Result<()> {
        if !is_valid_fn(f) {
            return Err(SchedError::InvalidFunction(f));
        }
        match self.backend() {
            Backend::Manual => self.manual_remove(f),
            Backend::Auto => self.auto_remove(f),
        }
    }

    pub fn start(&self) -> Result<()> {
        let span = span_operation("start", self.id);
        let result = match self.backend() {
            Backend::Manual => self.manual_start(),
            Backend::Auto => self.auto_start(),
        };
        span.finish(&result);
        result
    }

    /// Idempotent; a resident function is saved before returning
    pub fn stop(&self) -> Result<()> {
        let span = span_operation("stop", self.id);
        let result = match self.backend() {
            Backend::Manual => self.manual_stop(),
            Backend::Auto => self.auto_stop(),
        };
        span.finish(&result);
        result
    }

    /// Re-read the function's configured slice
    pub fn update_time_slice(&self, f: FunctionId) -> Result<()> {
        if !is_valid_fn(f) {
            return Err(SchedError::InvalidFunction(f));
        }
        match self.backend() {
            Backend::Manual => self.manual_update_time_slice(f),
            Backend::Auto => self.auto_update_time_slice(f),
        }
    }

    /// Rebuild fairness placeholders after the VF count changed
    pub fn set_num_vf(&self, num_vf: u32) -> Result<()> {
        let mut st = self.state.lock();
        if self.is_running() {
            return Err(SchedError::invalid_transition(
                "VF count cannot change while the world switch runs",
            ));
        }
        if self.backend() == Backend::Manual && self.is_fairness() {
            self.rebuild_list(&mut st, num_vf);
            debug!(
                "World switch {}: fairness list rebuilt for {} VFs: {:?}",
                self.id,
                num_vf,
                st.list.functions()
            );
        }
        Ok(())
    }

    /// Forget accumulated accounting of a function (GFX only)
    pub fn clear_time_slice(&self, f: FunctionId) {
        if self.block == SchedBlock::Gfx {
            self.state.lock().list.clear_time_slice(f);
        }
    }

    /// Forgive the next overrun of a function (fairness only)
    pub fn toggle_skip_next_punish(&self, f: FunctionId, enable: bool) {
        if self.is_fairness() {
            if let Some(e) = self.state.lock().list.entry_mut(f) {
                e.skip_next_punish = enable;
            }
        }
    }

    /// Request a single-function self-switch change
    pub fn setup_self_switch(&self, enable: bool) {
        let mut st = self.state.lock();
        if self.mode() == SchedMode::Solid {
            st.auto_trigger = if enable {
                SelfSwitchTrigger::Enable
            } else {
                SelfSwitchTrigger::Disable
            };
        } else {
            st.self_switch_trigger = true;
        }
    }

    /// Switch scheduling mode while stopped
    pub fn set_mode(&self, mode: SchedMode) -> Result<()> {
        let mut st = self.state.lock();
        if self.is_running() {
            return Err(SchedError::invalid_transition(
                "mode cannot change while the world switch runs",
            ));
        }
        let old = std::mem::replace(&mut *self.mode.write(), mode);
        if old == mode {
            return Ok(());
        }
        for engine in self.engines() {
            engine.set_mode(mode);
        }
        st.policy = PolicyKind::for_mode(mode).build();
        self.rebuild_list(&mut st, self.dev.functions().num_vf());
        info!("World switch {}: mode {} -> {}", self.id, old, mode);
        Ok(())
    }
}

impl std::fmt::Debug for WorldSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldSwitch")
            .field("id", &self.id)
            .field("block", &self.block)
            .field("engine_mask", &format_args!("{:#x}", self.engine_mask))
            .field("mode", &self.mode())
            .field("running", &self.is_running())
            .field("curr_idx", &self.curr_idx())
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`WorldSwitch`]
pub struct WorldSwitchBuilder {
    dev: Arc<Device>,
    id: WorldSwitchId,
    block: SchedBlock,
    engine_mask: EngineMask,
    mode: Option<SchedMode>,
    allowed: FunctionMask,
    spawn_worker: bool,
}

impl WorldSwitchBuilder {
    pub fn new(dev: Arc<Device>, id: WorldSwitchId, block: SchedBlock) -> Self {
        Self {
            dev,
            id,
            block,
            engine_mask: 0,
            mode: None,
            allowed: 0,
            spawn_worker: true,
        }
    }

    pub fn with_engine(mut self, engine: EngineId) -> Self {
        self.engine_mask |= bit(engine);
        self
    }

    pub fn with_engines(mut self, mask: EngineMask) -> Self {
        self.engine_mask |= mask;
        self
    }

    /// Override the mode the engines were created with
    pub fn with_mode(mut self, mode: SchedMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_allowed(mut self, mask: FunctionMask) -> Self {
        self.allowed = mask;
        self
    }

    /// Drive the loop from the caller instead of a worker thread
    pub fn inline(mut self) -> Self {
        self.spawn_worker = false;
        self
    }

    pub fn build(self) -> Result<Arc<WorldSwitch>> {
        if self.id >= MAX_WORLD_SWITCHES {
            return Err(SchedError::UnknownWorldSwitch(self.id));
        }
        let first = ids(self.engine_mask)
            .next()
            .ok_or_else(|| SchedError::not_supported("a world switch needs at least one engine"))?;
        for e in ids(self.engine_mask) {
            let engine = self.dev.engine(e)?;
            if engine.block() != self.block {
                return Err(SchedError::not_supported(format!(
                    "engine {} is {}, world switch {} is {}",
                    e,
                    engine.block(),
                    self.id,
                    self.block
                )));
            }
        }
        let mode = match self.mode {
            Some(m) => m,
            None => self.dev.engine(first)?.mode(),
        };
        for e in ids(self.engine_mask) {
            self.dev.engine(e)?.set_mode(mode);
        }

        let (tx, rx) = if self.spawn_worker {
            let (tx, rx) = flume::unbounded();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let config = self.dev.config();
        let list = ActiveList::new(config.histogram_start_us, config.histogram_interval_us);
        drop(config);

        let ws = Arc::new(WorldSwitch {
            id: self.id,
            block: self.block,
            engine_mask: self.engine_mask,
            mode: RwLock::new(mode),
            allowed: AtomicU32::new(self.allowed),
            state: Mutex::new(SwitchState {
                curr_idx: PF_IDX,
                curr_state: ContextState::Clear,
                list,
                policy: PolicyKind::for_mode(mode).build(),
                self_switch_trigger: false,
                auto_trigger: SelfSwitchTrigger::None,
                time_quanta_option: 0,
            }),
            curr_idx: AtomicU32::new(PF_IDX),
            curr_state: AtomicU8::new(ContextState::Clear.as_u8()),
            running: AtomicBool::new(false),
            busy: AtomicU32::new(0),
            timeout: AtomicU32::new(0),
            inited: AtomicU32::new(0),
            hliquid_min_ts: AtomicU32::new(0),
            signal: TaskSignal::new(tx.clone()),
            task: Mutex::new(None),
            stats: AtomicSwitchStats::new(),
            dev: self.dev,
        });

        {
            let mut st = ws.state.lock();
            ws.populate_list(&mut st, ws.dev.functions().num_vf());
        }

        if let (Some(tx), Some(rx)) = (tx, rx) {
            let task = SwitchTask::spawn(ws.id, Arc::downgrade(&ws), tx, rx).map_err(|e| {
                SchedError::not_supported(format!("cannot spawn world switch worker: {}", e))
            })?;
            *ws.task.lock() = Some(task);
        }

        info!(
            "Created world switch {} type={} engines={:#x} mode={} allowed={:#x}",
            ws.id, ws.block, ws.engine_mask, mode, self.allowed
        );
        Ok(ws)
    }
}
