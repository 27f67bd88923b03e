/*!
 * Simulated Hardware
 *
 * In-memory scheduling engines with instant command completion. Faults are programmed
 * per command kind: a hang leaves the command incomplete forever, a rejection fails the
 * post itself. Every accepted command is logged for assertions.
 */

use super::command::{ActiveFnStatus, HardwareInterface, HwCommand};
use crate::core::errors::{HwError, HwResult};
use crate::core::types::{bit, EngineId, FunctionId, FunctionMask, SchedMode, PF_IDX};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// How a matching command misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Accepted but never completes
    Hang,
    /// Refused by the command interface
    Reject,
}

/// Programmed misbehavior for a command kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRule {
    /// `None` matches every engine
    pub engine: Option<EngineId>,
    /// Matched by kind, payload ignored
    pub command: HwCommand,
    pub fault: Fault,
    /// Number of hits before the rule retires; `None` never retires
    pub remaining: Option<u32>,
}

impl FaultRule {
    pub fn hang(command: HwCommand) -> Self {
        Self {
            engine: None,
            command,
            fault: Fault::Hang,
            remaining: None,
        }
    }

    pub fn reject(command: HwCommand) -> Self {
        Self {
            engine: None,
            command,
            fault: Fault::Reject,
            remaining: None,
        }
    }

    pub fn on_engine(mut self, engine: EngineId) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    fn matches(&self, engine: EngineId, cmd: &HwCommand) -> bool {
        self.engine.map_or(true, |e| e == engine) && self.command.same_kind(cmd)
    }
}

/// One posted command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    pub engine: EngineId,
    pub command: HwCommand,
    pub func: FunctionId,
    pub next_func: FunctionId,
}

#[derive(Debug, Clone)]
struct SimEngine {
    status: ActiveFnStatus,
    active_fn: FunctionId,
    hung: bool,
    auto_enabled: bool,
    auto_mode: Option<SchedMode>,
    admitted: FunctionMask,
    quanta_option: u32,
    quanta_index: u8,
}

impl SimEngine {
    fn new() -> Self {
        Self {
            status: ActiveFnStatus::Idle,
            active_fn: PF_IDX,
            hung: false,
            auto_enabled: false,
            auto_mode: None,
            admitted: 0,
            quanta_option: 0,
            quanta_index: 0,
        }
    }

    fn apply(&mut self, cmd: HwCommand, func: FunctionId) {
        match cmd {
            HwCommand::Idle => self.status = ActiveFnStatus::Idle,
            HwCommand::Save => self.status = ActiveFnStatus::Save,
            HwCommand::Init | HwCommand::Load => {
                self.active_fn = func;
                self.status = ActiveFnStatus::Load;
            }
            HwCommand::Run => {
                self.active_fn = func;
                self.status = ActiveFnStatus::Active;
            }
            HwCommand::Shutdown => self.status = ActiveFnStatus::Idle,
            HwCommand::EnableAutoSched => {
                self.auto_enabled = true;
                self.status = ActiveFnStatus::Active;
                self.active_fn = if self.admitted == 0 {
                    PF_IDX
                } else {
                    self.admitted.trailing_zeros()
                };
            }
            HwCommand::DisableAutoSched => {
                self.auto_enabled = false;
                self.status = ActiveFnStatus::Save;
            }
            HwCommand::ConfigAutoMode(mode) => self.auto_mode = Some(mode),
            HwCommand::SetTimeQuantaOption(opt) => self.quanta_option = opt,
            HwCommand::SetTimeQuantaIndex(idx) => self.quanta_index = idx,
            HwCommand::AutoSchedAdd => self.admitted |= bit(func),
            HwCommand::AutoSchedRemove => self.admitted &= !bit(func),
        }
    }
}

/// Software model of the scheduling engines
pub struct SimulatedHardware {
    engines: Mutex<Vec<SimEngine>>,
    faults: Mutex<Vec<FaultRule>>,
    log: Mutex<Vec<CommandRecord>>,
    post_init_calls: AtomicU64,
    post_init_fails: AtomicBool,
}

impl SimulatedHardware {
    pub fn new(num_engines: usize) -> Self {
        Self {
            engines: Mutex::new(vec![SimEngine::new(); num_engines]),
            faults: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            post_init_calls: AtomicU64::new(0),
            post_init_fails: AtomicBool::new(false),
        }
    }

    pub fn inject(&self, rule: FaultRule) {
        self.faults.lock().push(rule);
    }

    /// Drop every fault rule and un-hang all engines
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
        for e in self.engines.lock().iter_mut() {
            e.hung = false;
        }
    }

    pub fn fail_post_init(&self, fail: bool) {
        self.post_init_fails.store(fail, Ordering::Relaxed);
    }

    pub fn post_init_calls(&self) -> u64 {
        self.post_init_calls.load(Ordering::Relaxed)
    }

    /// Override the reported status, e.g. to model a stalled engine
    pub fn set_status(&self, engine: EngineId, status: ActiveFnStatus) {
        if let Some(e) = self.engines.lock().get_mut(engine as usize) {
            e.status = status;
        }
    }

    pub fn set_active_fn(&self, engine: EngineId, func: FunctionId) {
        if let Some(e) = self.engines.lock().get_mut(engine as usize) {
            e.active_fn = func;
        }
    }

    pub fn commands(&self) -> Vec<CommandRecord> {
        self.log.lock().clone()
    }

    pub fn commands_on(&self, engine: EngineId) -> Vec<CommandRecord> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.engine == engine)
            .copied()
            .collect()
    }

    /// Number of logged commands of the given kind
    pub fn count(&self, cmd: HwCommand) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|r| r.command.same_kind(&cmd))
            .count()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    pub fn admitted(&self, engine: EngineId) -> FunctionMask {
        self.engines
            .lock()
            .get(engine as usize)
            .map_or(0, |e| e.admitted)
    }

    pub fn auto_enabled(&self, engine: EngineId) -> bool {
        self.engines
            .lock()
            .get(engine as usize)
            .map_or(false, |e| e.auto_enabled)
    }

    pub fn auto_mode(&self, engine: EngineId) -> Option<SchedMode> {
        self.engines.lock().get(engine as usize).and_then(|e| e.auto_mode)
    }

    /// Programmed (option, index) pair
    pub fn time_quanta(&self, engine: EngineId) -> (u32, u8) {
        self.engines
            .lock()
            .get(engine as usize)
            .map_or((0, 0), |e| (e.quanta_option, e.quanta_index))
    }

    fn take_fault(&self, engine: EngineId, cmd: &HwCommand) -> Option<Fault> {
        let mut faults = self.faults.lock();
        let pos = faults.iter().position(|r| r.matches(engine, cmd))?;
        let fault = faults[pos].fault;
        if let Some(n) = faults[pos].remaining.as_mut() {
            *n = n.saturating_sub(1);
            if *n == 0 {
                faults.remove(pos);
            }
        }
        Some(fault)
    }
}

impl HardwareInterface for SimulatedHardware {
    fn set_cmd(
        &self,
        engine: EngineId,
        cmd: HwCommand,
        func: FunctionId,
        next_func: FunctionId,
    ) -> HwResult<()> {
        let fault = self.take_fault(engine, &cmd);
        if fault == Some(Fault::Reject) {
            debug!("sim: engine {} rejects {}", engine, cmd);
            return Err(HwError::CommandRejected {
                engine,
                command: cmd.as_str().into(),
            });
        }

        let mut engines = self.engines.lock();
        let sim = engines
            .get_mut(engine as usize)
            .ok_or_else(|| HwError::AccessFailed(format!("no engine {}", engine).into()))?;
        self.log.lock().push(CommandRecord {
            engine,
            command: cmd,
            func,
            next_func,
        });

        if fault == Some(Fault::Hang) {
            debug!("sim: engine {} hangs on {}", engine, cmd);
            sim.hung = true;
        } else {
            sim.hung = false;
            sim.apply(cmd, func);
        }
        Ok(())
    }

    fn is_cmd_complete(&self, engine: EngineId) -> bool {
        self.engines
            .lock()
            .get(engine as usize)
            .map_or(false, |e| !e.hung)
    }

    fn active_fn_status(&self, engine: EngineId) -> HwResult<ActiveFnStatus> {
        self.engines
            .lock()
            .get(engine as usize)
            .map(|e| e.status)
            .ok_or_else(|| HwError::AccessFailed(format!("no engine {}", engine).into()))
    }

    fn active_fn(&self, engine: EngineId) -> HwResult<FunctionId> {
        self.engines
            .lock()
            .get(engine as usize)
            .map(|e| e.active_fn)
            .ok_or_else(|| HwError::AccessFailed(format!("no engine {}", engine).into()))
    }

    fn post_init_setup(&self) -> HwResult<()> {
        self.post_init_calls.fetch_add(1, Ordering::Relaxed);
        if self.post_init_fails.load(Ordering::Relaxed) {
            return Err(HwError::AccessFailed("post-init setup failed".into()));
        }
        Ok(())
    }
}
