/*!
 * Hardware Layer
 * Command interface, bounded completion waits, engine state machines and a simulated device
 */

pub mod command;
pub mod sim;
pub mod state_machine;
pub mod wait;

pub use command::{ActiveFnStatus, HardwareInterface, HwCommand};
pub use sim::{CommandRecord, Fault, FaultRule, SimulatedHardware};
pub use state_machine::{context_state_of, EngineStateMachine, GpuState};
pub use wait::{BoundedWait, WaitTimeout};
