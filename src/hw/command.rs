/*!
 * Hardware Command Interface
 * Per-engine command protocol consumed by the engine state machines
 */

use crate::core::errors::HwResult;
use crate::core::types::{EngineId, FunctionId, SchedMode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Commands accepted by one hardware scheduling engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HwCommand {
    Idle,
    Save,
    Load,
    Run,
    /// First load of a function context
    Init,
    Shutdown,
    EnableAutoSched,
    DisableAutoSched,
    ConfigAutoMode(SchedMode),
    /// Packed table of four quanta in milliseconds, one per byte
    SetTimeQuantaOption(u32),
    SetTimeQuantaIndex(u8),
    AutoSchedAdd,
    AutoSchedRemove,
}

impl HwCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            HwCommand::Idle => "IDLE",
            HwCommand::Save => "SAVE",
            HwCommand::Load => "LOAD",
            HwCommand::Run => "RUN",
            HwCommand::Init => "INIT",
            HwCommand::Shutdown => "SHUTDOWN",
            HwCommand::EnableAutoSched => "ENABLE_AUTO_SCHED",
            HwCommand::DisableAutoSched => "DISABLE_AUTO_SCHED",
            HwCommand::ConfigAutoMode(_) => "CONFIG_AUTO_MODE",
            HwCommand::SetTimeQuantaOption(_) => "SET_TIME_QUANTA_OPTION",
            HwCommand::SetTimeQuantaIndex(_) => "SET_TIME_QUANTA_INDEX",
            HwCommand::AutoSchedAdd => "AUTO_SCHED_ADD",
            HwCommand::AutoSchedRemove => "AUTO_SCHED_REMOVE",
        }
    }

    /// Same command regardless of payload
    #[inline]
    pub fn same_kind(&self, other: &HwCommand) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Auto-scheduling commands share one timeout class
    pub fn is_auto(&self) -> bool {
        matches!(
            self,
            HwCommand::EnableAutoSched
                | HwCommand::DisableAutoSched
                | HwCommand::ConfigAutoMode(_)
                | HwCommand::SetTimeQuantaOption(_)
                | HwCommand::SetTimeQuantaIndex(_)
                | HwCommand::AutoSchedAdd
                | HwCommand::AutoSchedRemove
        )
    }
}

impl fmt::Display for HwCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwCommand::ConfigAutoMode(mode) => write!(f, "{}({})", self.as_str(), mode),
            HwCommand::SetTimeQuantaOption(opt) => write!(f, "{}(0x{:08x})", self.as_str(), opt),
            HwCommand::SetTimeQuantaIndex(idx) => write!(f, "{}({})", self.as_str(), idx),
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Status of the function resident on an engine, as reported by hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveFnStatus {
    Idle,
    Idling,
    Save,
    Load,
    Active,
    Stalled,
}

/// Register-level access to the scheduling engines
///
/// Implementations own the register or mailbox sequences. Every method must be safe to
/// call from any world-switch worker; engines are addressed independently.
pub trait HardwareInterface: Send + Sync {
    /// Post a command; `next_func` is meaningful for SAVE-then-LOAD capable engines
    fn set_cmd(
        &self,
        engine: EngineId,
        cmd: HwCommand,
        func: FunctionId,
        next_func: FunctionId,
    ) -> HwResult<()>;

    /// Whether the last posted command finished
    fn is_cmd_complete(&self, engine: EngineId) -> bool;

    fn active_fn_status(&self, engine: EngineId) -> HwResult<ActiveFnStatus>;

    /// Function currently resident on the engine
    fn active_fn(&self, engine: EngineId) -> HwResult<FunctionId>;

    /// Fixed-function programming applied after a function starts running
    fn post_init_setup(&self) -> HwResult<()> {
        Ok(())
    }
}
