/*!
 * Scheduler Control Traits
 * Per-world-switch operations addressed by id
 */

use crate::core::errors::Result;
use crate::core::types::{ContextState, FunctionId, SchedMode, WorldSwitchId};

/// Admission and lifecycle of one world switch
pub trait SchedulerControl: Send + Sync {
    fn add_function(&self, ws: WorldSwitchId, function: FunctionId) -> Result<()>;

    fn remove_function(&self, ws: WorldSwitchId, function: FunctionId) -> Result<()>;

    fn start(&self, ws: WorldSwitchId) -> Result<()>;

    /// Idempotent
    fn stop(&self, ws: WorldSwitchId) -> Result<()>;

    /// Re-read the function's configured slice
    fn update_time_slice(&self, ws: WorldSwitchId, function: FunctionId) -> Result<()>;
}

/// Queries and mode changes
pub trait SchedulerQuery: Send + Sync {
    /// Resident function, from hardware when the auto scheduler owns the engines
    fn get_current_function(&self, ws: WorldSwitchId) -> Result<FunctionId>;

    fn get_state(&self, ws: WorldSwitchId) -> Result<ContextState>;

    /// Only while stopped
    fn set_mode(&self, ws: WorldSwitchId, mode: SchedMode) -> Result<()>;
}

/// Combined per-switch interface
pub trait WorldSwitchApi: SchedulerControl + SchedulerQuery + Send + Sync {}

impl<T> WorldSwitchApi for T where T: SchedulerControl + SchedulerQuery + Send + Sync {}
