/*!
 * Device Context
 *
 * Everything the world switches of one GPU share: the command interface, the engine
 * state machines, the function-slot table, configuration, event and diagnostics sinks,
 * the switch trace and the clock.
 */

use crate::core::config::SchedConfig;
use crate::core::errors::{ConfigError, HwError, HwResult, Result, SchedError};
use crate::core::limits::{MAX_HW_ENGINES, TIME_SLICE_SINGLE_FN};
use crate::core::time::{Clock, MonotonicClock};
use crate::core::types::{EngineId, FunctionId, SchedBlock, SchedMode, PF_IDX};
use crate::functions::FunctionTable;
use crate::hw::command::{HardwareInterface, HwCommand};
use crate::hw::state_machine::EngineStateMachine;
use crate::hw::wait::BoundedWait;
use crate::monitoring::diagnostics::{DiagContext, Diagnostics, DiagnosticsReporter};
use crate::monitoring::events::{EventQueue, EventSink, SchedEvent, SchedEventKind};
use crate::monitoring::histogram::Histogram;
use crate::monitoring::trace::SwitchTrace;
use arc_swap::{ArcSwap, Guard};
use log::{info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Static description of one scheduling engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSpec {
    pub block: SchedBlock,
    pub mode: SchedMode,
}

impl EngineSpec {
    pub fn new(block: SchedBlock, mode: SchedMode) -> Self {
        Self { block, mode }
    }
}

/// Shared per-GPU scheduler context
pub struct Device {
    hw: Arc<dyn HardwareInterface>,
    config: ArcSwap<SchedConfig>,
    functions: FunctionTable,
    engines: Vec<EngineStateMachine>,
    events: Arc<dyn EventSink>,
    diagnostics: Arc<dyn Diagnostics>,
    trace: SwitchTrace,
    clock: Arc<dyn Clock>,
    num_vf_per_gfx: AtomicU32,
    time_quanta_option: [AtomicU32; SchedBlock::COUNT],
}

impl Device {
    pub fn builder(hw: Arc<dyn HardwareInterface>) -> DeviceBuilder {
        DeviceBuilder::new(hw)
    }

    #[inline]
    pub fn hw(&self) -> &dyn HardwareInterface {
        self.hw.as_ref()
    }

    /// Current configuration snapshot
    #[inline]
    pub fn config(&self) -> Guard<Arc<SchedConfig>> {
        self.config.load()
    }

    /// Swap in a new configuration; readers pick it up on their next load
    pub fn update_config(&self, config: SchedConfig) -> std::result::Result<(), ConfigError> {
        config.validate()?;
        self.config.store(Arc::new(config));
        info!("Scheduler configuration updated");
        Ok(())
    }

    #[inline]
    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn engine(&self, id: EngineId) -> Result<&EngineStateMachine> {
        self.engines
            .get(id as usize)
            .ok_or(SchedError::UnknownEngine(id))
    }

    pub fn engines(&self) -> &[EngineStateMachine] {
        &self.engines
    }

    pub fn engine_count(&self) -> u32 {
        self.engines.len() as u32
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub fn post_event(&self, kind: SchedEventKind, function: FunctionId, block: SchedBlock) {
        self.events.post(SchedEvent::new(kind, function, block));
    }

    /// Hand a GPU state dump to the diagnostics sink along with the recent trace
    pub fn capture_diagnostics(&self, ctx: DiagContext) {
        let recent = self.trace.recent();
        self.diagnostics.capture(&ctx, &recent);
    }

    #[inline]
    pub fn trace(&self) -> &SwitchTrace {
        &self.trace
    }

    #[inline]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[inline]
    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    /// Functions sharing one GFX world switch
    #[inline]
    pub fn num_vf_per_gfx(&self) -> u32 {
        self.num_vf_per_gfx.load(Ordering::Acquire)
    }

    pub fn set_num_vf_per_gfx(&self, n: u32) {
        self.num_vf_per_gfx.store(n, Ordering::Release);
    }

    pub fn time_quanta_option(&self, block: SchedBlock) -> u32 {
        self.time_quanta_option[block.index()].load(Ordering::Acquire)
    }

    pub fn set_time_quanta_option(&self, block: SchedBlock, option: u32) {
        self.time_quanta_option[block.index()].store(option, Ordering::Release);
    }

    /// Post a command and wait for completion within the configured budget
    pub fn issue(
        &self,
        engine: EngineId,
        cmd: HwCommand,
        func: FunctionId,
        next_func: FunctionId,
    ) -> HwResult<()> {
        self.hw.set_cmd(engine, cmd, func, next_func)?;
        let wait = BoundedWait::from_config(&self.config());
        wait.until(|| self.hw.is_cmd_complete(engine)).map_err(|t| {
            warn!("Engine {}: {} did not complete in {:?}", engine, cmd, t.waited);
            timeout_error(engine, cmd)
        })
    }

    /// Apply fixed-function setup after a context starts running
    ///
    /// A failure is captured as a diagnostic dump before it is returned.
    pub fn post_init_setup(&self, func: FunctionId) -> HwResult<()> {
        self.hw.post_init_setup().map_err(|e| {
            self.capture_diagnostics(DiagContext {
                engine: None,
                function: func,
                block: SchedBlock::Gfx,
                what: format!("post-init setup failed: {}", e).into(),
            });
            e
        })
    }

    /// GFX slice the hardware should use with `num` functions sharing the engine
    pub fn asic_gfx_time_slice(&self, num: u32) -> u32 {
        let cfg = self.config();
        let pf_shares = cfg.use_pf && self.functions.is_active(PF_IDX);
        if num > 1 || pf_shares {
            cfg.default_gfx_time_slice_us
        } else if num == 1 && cfg.disable_self_switch {
            TIME_SLICE_SINGLE_FN
        } else {
            cfg.self_switch_time_slice_us
        }
    }

    /// Default GFX slice handed to a newly added function
    ///
    /// A lone function gets the single-function value so the loop never re-arms for it.
    pub fn default_gfx_time_slice(&self, num: u32) -> u32 {
        if num == 1 {
            TIME_SLICE_SINGLE_FN
        } else {
            self.asic_gfx_time_slice(num)
        }
    }

    /// Default slice for any block
    pub fn default_time_slice(&self, block: SchedBlock, num: u32) -> u32 {
        if block.is_mm() {
            self.config().default_mm_time_slice_us
        } else {
            self.default_gfx_time_slice(num)
        }
    }
}

/// Completion-timeout error for a command
pub fn timeout_error(engine: EngineId, cmd: HwCommand) -> HwError {
    match cmd {
        HwCommand::Idle => HwError::IdleTimeout(engine),
        HwCommand::Run => HwError::RunTimeout(engine),
        HwCommand::Save => HwError::SaveTimeout(engine),
        HwCommand::Init | HwCommand::Load => HwError::LoadTimeout(engine),
        HwCommand::Shutdown => HwError::ShutdownTimeout(engine),
        other => HwError::AutoSchedTimeout {
            engine,
            command: other.as_str().into(),
        },
    }
}

/// Builder for [`Device`]
pub struct DeviceBuilder {
    hw: Arc<dyn HardwareInterface>,
    engines: Vec<EngineSpec>,
    config: SchedConfig,
    events: Option<Arc<dyn EventSink>>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    clock: Option<Arc<dyn Clock>>,
    num_vf: u32,
}

impl DeviceBuilder {
    pub fn new(hw: Arc<dyn HardwareInterface>) -> Self {
        Self {
            hw,
            engines: Vec::new(),
            config: SchedConfig::new(),
            events: None,
            diagnostics: None,
            clock: None,
            num_vf: 0,
        }
    }

    /// Append an engine; engine ids follow insertion order
    pub fn with_engine(mut self, block: SchedBlock, mode: SchedMode) -> Self {
        self.engines.push(EngineSpec::new(block, mode));
        self
    }

    pub fn with_engines(mut self, specs: impl IntoIterator<Item = EngineSpec>) -> Self {
        self.engines.extend(specs);
        self
    }

    pub fn with_config(mut self, config: SchedConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_num_vf(mut self, num_vf: u32) -> Self {
        self.num_vf = num_vf;
        self
    }

    pub fn build(self) -> Result<Arc<Device>> {
        self.config.validate()?;
        if self.engines.is_empty() || self.engines.len() > MAX_HW_ENGINES as usize {
            return Err(SchedError::Config(ConfigError::invalid(
                "engines",
                format!("expected 1..={} engines, got {}", MAX_HW_ENGINES, self.engines.len()),
            )));
        }

        let events = self
            .events
            .unwrap_or_else(|| Arc::new(EventQueue::new()) as Arc<dyn EventSink>);
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(DiagnosticsReporter::new(events.clone())) as Arc<dyn Diagnostics>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()) as Arc<dyn Clock>);

        let engines = self
            .engines
            .iter()
            .enumerate()
            .map(|(id, spec)| {
                EngineStateMachine::new(
                    id as EngineId,
                    spec.block,
                    spec.mode,
                    Histogram::new(0, self.config.cmd_poll_interval_us.max(1)),
                )
            })
            .collect();

        let functions = FunctionTable::new();
        functions.set_num_vf(self.num_vf)?;

        info!(
            "Device context: {} engines, {} VFs",
            self.engines.len(),
            self.num_vf
        );

        Ok(Arc::new(Device {
            hw: self.hw,
            trace: SwitchTrace::new(self.config.trace_capacity),
            config: ArcSwap::from_pointee(self.config),
            functions,
            engines,
            events,
            diagnostics,
            clock,
            num_vf_per_gfx: AtomicU32::new(self.num_vf),
            time_quanta_option: std::array::from_fn(|_| AtomicU32::new(0)),
        }))
    }
}
