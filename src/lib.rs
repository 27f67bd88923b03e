/*!
 * GPU Virtualization World-Switch Scheduler
 * Time-slices SR-IOV physical and virtual functions across GPU engines
 */

pub mod core;
pub mod device;
pub mod functions;
pub mod hw;
pub mod monitoring;
pub mod registry;
pub mod world_switch;

// Re-exports
pub use crate::core::{
    Clock, ConfigError, HwError, ManualClock, MonotonicClock, Result, SchedConfig, SchedError,
};
pub use crate::core::types::*;
pub use device::{Device, DeviceBuilder, EngineSpec};
pub use functions::{FunctionStatus, FunctionTable};
pub use hw::{HardwareInterface, HwCommand, SimulatedHardware};
pub use monitoring::{init_tracing, EventQueue, EventSink, SchedEvent, SchedEventKind};
pub use registry::{Partition, Registry, RegistryBuilder, SchedulerControl, SchedulerQuery};
pub use world_switch::{Backend, CycleOutcome, SwitchStats, WorldSwitch};
