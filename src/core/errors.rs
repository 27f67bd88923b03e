/*!
 * Error Types
 * Hardware, scheduling and configuration errors with thiserror, miette, and serde support
 */

use crate::core::types::{EngineId, FunctionId, InlineString, WorldSwitchId};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while driving an engine through its command protocol
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum HwError {
    #[error("Engine {engine} rejected command {command}")]
    #[diagnostic(
        code(hw::command_rejected),
        help("The command interface refused the request. Check engine ownership and function id.")
    )]
    CommandRejected { engine: EngineId, command: InlineString },

    #[error("Engine {0} timed out going idle")]
    #[diagnostic(code(hw::idle_timeout), help("The resident function did not drain its work in time."))]
    IdleTimeout(EngineId),

    #[error("Engine {0} timed out starting run")]
    #[diagnostic(code(hw::run_timeout))]
    RunTimeout(EngineId),

    #[error("Engine {0} timed out saving context")]
    #[diagnostic(code(hw::save_timeout), help("Context save hung. The function needs a reset."))]
    SaveTimeout(EngineId),

    #[error("Engine {0} timed out loading context")]
    #[diagnostic(code(hw::load_timeout))]
    LoadTimeout(EngineId),

    #[error("Engine {0} timed out shutting down a function")]
    #[diagnostic(code(hw::shutdown_timeout))]
    ShutdownTimeout(EngineId),

    #[error("Engine {engine} timed out on auto-scheduling command {command}")]
    #[diagnostic(code(hw::auto_sched_timeout))]
    AutoSchedTimeout { engine: EngineId, command: InlineString },

    #[error("Engine {0} state machine entered concurrently")]
    #[diagnostic(
        code(hw::reentrant),
        help("Another transition holds the engine. Requests on one engine must be serialized.")
    )]
    Reentrant(EngineId),

    #[error("Engine {0} exceeded the hop budget for one transition")]
    #[diagnostic(code(hw::infinite_loop), help("The state graph did not converge. Dump the trace ring."))]
    InfiniteLoop(EngineId),

    #[error("Engine {engine} in unexpected state {state}")]
    #[diagnostic(code(hw::unknown_state))]
    UnknownState { engine: EngineId, state: InlineString },

    #[error("Function {0} is outside the slot table")]
    #[diagnostic(code(hw::invalid_function))]
    InvalidFunction(FunctionId),

    #[error("Hardware access failed: {0}")]
    #[diagnostic(code(hw::access_failed))]
    AccessFailed(InlineString),
}

impl HwError {
    /// Engine the error was raised on, when known
    pub fn engine(&self) -> Option<EngineId> {
        match self {
            HwError::CommandRejected { engine, .. }
            | HwError::AutoSchedTimeout { engine, .. }
            | HwError::UnknownState { engine, .. } => Some(*engine),
            HwError::IdleTimeout(e)
            | HwError::RunTimeout(e)
            | HwError::SaveTimeout(e)
            | HwError::LoadTimeout(e)
            | HwError::ShutdownTimeout(e)
            | HwError::Reentrant(e)
            | HwError::InfiniteLoop(e) => Some(*e),
            HwError::InvalidFunction(_) | HwError::AccessFailed(_) => None,
        }
    }

    /// True for completion-wait exhaustion
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HwError::IdleTimeout(_)
                | HwError::RunTimeout(_)
                | HwError::SaveTimeout(_)
                | HwError::LoadTimeout(_)
                | HwError::ShutdownTimeout(_)
                | HwError::AutoSchedTimeout { .. }
        )
    }
}

/// Scheduler errors surfaced to callers
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SchedError {
    #[error("World switch {0} is abnormal")]
    #[diagnostic(
        code(sched::abnormal),
        help("The group stays abnormal until a reset clears its state.")
    )]
    Abnormal(WorldSwitchId),

    #[error("Invalid context transition: {0}")]
    #[diagnostic(
        code(sched::invalid_transition),
        help("The operation is not valid from the current context state. Nothing was changed.")
    )]
    InvalidTransition(InlineString),

    #[error("Invalid function {0}")]
    #[diagnostic(code(sched::invalid_function), help("Function slots are 0..=31, PF is 31."))]
    InvalidFunction(FunctionId),

    #[error("Function {function} is not assigned to world switch {world_switch}")]
    #[diagnostic(
        code(sched::outside_partition),
        help("Remap the VF assignment after changing the partition layout.")
    )]
    OutsidePartition {
        function: FunctionId,
        world_switch: WorldSwitchId,
    },

    #[error("Invalid time slice: {0}")]
    #[diagnostic(code(sched::invalid_time_slice))]
    InvalidTimeSlice(InlineString),

    #[error("Unknown engine {0}")]
    #[diagnostic(code(sched::unknown_engine))]
    UnknownEngine(EngineId),

    #[error("Unknown world switch {0}")]
    #[diagnostic(code(sched::unknown_world_switch))]
    UnknownWorldSwitch(WorldSwitchId),

    #[error("Not supported: {0}")]
    #[diagnostic(code(sched::not_supported))]
    NotSupported(InlineString),

    #[error("Hardware failure: {0}")]
    #[diagnostic(transparent)]
    Hardware(#[from] HwError),

    #[error("Configuration error: {0}")]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl SchedError {
    pub fn invalid_transition(msg: impl Into<InlineString>) -> Self {
        SchedError::InvalidTransition(msg.into())
    }

    pub fn invalid_time_slice(msg: impl Into<InlineString>) -> Self {
        SchedError::InvalidTimeSlice(msg.into())
    }

    pub fn not_supported(msg: impl Into<InlineString>) -> Self {
        SchedError::NotSupported(msg.into())
    }

    /// True when the failure came from the hardware path
    pub fn is_hardware(&self) -> bool {
        matches!(self, SchedError::Hardware(_) | SchedError::Abnormal(_))
    }
}

/// Configuration loading and validation errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    #[diagnostic(code(config::io))]
    Io(InlineString),

    #[error("Failed to parse config: {0}")]
    #[diagnostic(code(config::parse), help("The config file must be a JSON object of SchedConfig fields."))]
    Parse(InlineString),

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(config::invalid_value))]
    InvalidValue {
        field: InlineString,
        reason: InlineString,
    },
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<InlineString>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string().into())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string().into())
    }
}

/// Result alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedError>;

/// Result alias for hardware operations
pub type HwResult<T> = std::result::Result<T, HwError>;
