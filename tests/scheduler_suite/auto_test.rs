/*!
 * Hardware Auto-Scheduler Tests
 */

use gpuv_sched::{
    bit, ContextState, Device, Partition, Registry, SchedBlock, SchedConfig, SchedMode,
    SchedulerControl, SchedulerQuery, SimulatedHardware,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Two GFX engines switched together by the hardware scheduler
fn solid_pair() -> (Arc<SimulatedHardware>, Registry) {
    let hw = Arc::new(SimulatedHardware::new(2));
    let dev = Device::builder(hw.clone())
        .with_engine(SchedBlock::Gfx, SchedMode::Solid)
        .with_engine(SchedBlock::Gfx, SchedMode::Solid)
        .with_config(SchedConfig::testing())
        .with_num_vf(2)
        .build()
        .unwrap();
    for vf in 0..2 {
        dev.functions().set_time_slice_all(vf, 6000).unwrap();
    }
    let reg = Registry::builder(dev)
        .with_partition(Partition::new(0b11, 0b11))
        .inline()
        .build()
        .unwrap();
    (hw, reg)
}

#[test]
fn test_group_runs_under_hardware_scheduler() {
    let (hw, reg) = solid_pair();
    assert_eq!(reg.len(), 1);
    reg.add_function(0).unwrap();
    reg.add_function(1).unwrap();
    for e in 0..2 {
        assert_eq!(hw.admitted(e), 0b11);
        assert_eq!(hw.time_quanta(e), (0x0600_0000, 3));
    }

    reg.start().unwrap();
    assert_eq!(reg.list_running(), 1);
    assert!(hw.auto_enabled(0) && hw.auto_enabled(1));
    assert_eq!(reg.get_current_function(0), Ok(0));
    assert_eq!(reg.get_state(0), Ok(ContextState::Loaded));

    SchedulerControl::stop(&reg, 0).unwrap();
    assert!(!hw.auto_enabled(0) && !hw.auto_enabled(1));
    assert_eq!(reg.get_state(0), Ok(ContextState::Saved));
}

#[test]
fn test_longer_slice_grows_quanta_table_live() {
    let (hw, reg) = solid_pair();
    reg.add_function(0).unwrap();
    reg.add_function(1).unwrap();
    reg.start().unwrap();

    reg.set_time_slice(1, Some(SchedBlock::Gfx), 20_000).unwrap();
    for e in 0..2 {
        assert_eq!(hw.time_quanta(e), (0x1400_0000, 3));
        assert!(hw.auto_enabled(e));
    }
    assert_eq!(reg.device().time_quanta_option(SchedBlock::Gfx), 0x1400_0000);
}

#[test]
fn test_withdrawn_function_leaves_every_engine() {
    let (hw, reg) = solid_pair();
    reg.add_function(0).unwrap();
    reg.add_function(1).unwrap();
    reg.remove_function(1).unwrap();
    for e in 0..2 {
        assert_eq!(hw.admitted(e), bit(0));
    }
    assert_eq!(reg.get(0).unwrap().inited_mask() & bit(1), 0);
}
