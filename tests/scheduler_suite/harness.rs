/*!
 * Test Harness
 * Deterministic device + world-switch rigs over the simulated hardware
 */

use gpuv_sched::monitoring::{EventQueue, SchedEvent, SchedEventKind};
use gpuv_sched::{
    Device, FunctionId, ManualClock, SchedBlock, SchedConfig, SchedMode, SimulatedHardware,
    WorldSwitch,
};
use std::sync::Arc;

pub struct Rig {
    pub hw: Arc<SimulatedHardware>,
    pub clock: ManualClock,
    pub events: Arc<EventQueue>,
    pub dev: Arc<Device>,
    pub ws: Arc<WorldSwitch>,
}

impl Rig {
    /// Events of one kind, draining the queue
    pub fn take_events(&self, kind: SchedEventKind) -> Vec<SchedEvent> {
        self.events
            .drain()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

/// One GFX engine driven inline with `num_vf` VFs, all allowed
pub fn gfx_rig(mode: SchedMode, num_vf: u32, config: SchedConfig) -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();

    let hw = Arc::new(SimulatedHardware::new(1));
    let clock = ManualClock::new(1);
    let events = Arc::new(EventQueue::new());
    let dev = Device::builder(hw.clone())
        .with_engine(SchedBlock::Gfx, mode)
        .with_config(config)
        .with_clock(Arc::new(clock.clone()))
        .with_events(events.clone())
        .with_num_vf(num_vf)
        .build()
        .unwrap();
    let ws = WorldSwitch::builder(dev.clone(), 0, SchedBlock::Gfx)
        .with_engine(0)
        .with_allowed(gpuv_sched::vf_mask(num_vf))
        .inline()
        .build()
        .unwrap();
    Rig {
        hw,
        clock,
        events,
        dev,
        ws,
    }
}

pub fn set_gfx_slice(dev: &Device, f: FunctionId, us: u32) {
    dev.functions().set_time_slice(f, SchedBlock::Gfx, us).unwrap();
}
