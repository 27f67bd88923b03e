/*!
 * World-Switch Lifecycle Tests
 * Worker-thread driving, stop semantics and bring-up helpers
 */

use crate::harness::{gfx_rig, set_gfx_slice};
use gpuv_sched::{
    ContextState, Device, HwCommand, SchedBlock, SchedConfig, SchedMode, SimulatedHardware,
    WorldSwitch, PF_IDX,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn threaded_switch(slice_us: u32) -> (Arc<SimulatedHardware>, Arc<WorldSwitch>) {
    let hw = Arc::new(SimulatedHardware::new(1));
    let dev = Device::builder(hw.clone())
        .with_engine(SchedBlock::Gfx, SchedMode::RoundRobin)
        .with_config(SchedConfig::testing())
        .with_num_vf(2)
        .build()
        .unwrap();
    for vf in 0..2 {
        set_gfx_slice(&dev, vf, slice_us);
    }
    let ws = WorldSwitch::builder(dev, 0, SchedBlock::Gfx)
        .with_engine(0)
        .with_allowed(0b11)
        .build()
        .unwrap();
    (hw, ws)
}

fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn test_worker_alternates_functions_on_timer() {
    let (hw, ws) = threaded_switch(1000);
    ws.add_function(0).unwrap();
    ws.add_function(1).unwrap();
    ws.start().unwrap();

    assert!(wait_for(Duration::from_secs(2), || ws.counters().switches >= 6));
    ws.stop().unwrap();

    assert!(!ws.is_running());
    assert_eq!(ws.state(), ContextState::Saved);
    assert!(hw.count(HwCommand::Save) >= 5);
    let mut ran: Vec<_> = hw
        .commands()
        .into_iter()
        .filter(|c| c.command == HwCommand::Run)
        .map(|c| c.func)
        .collect();
    ran.dedup();
    assert!(ran.starts_with(&[0, 1, 0]));
}

#[test]
fn test_stop_cancels_pending_timer() {
    let (hw, ws) = threaded_switch(5000);
    ws.add_function(0).unwrap();
    ws.add_function(1).unwrap();
    ws.start().unwrap();
    assert!(wait_for(Duration::from_secs(2), || ws.state() == ContextState::Loaded));
    ws.stop().unwrap();

    let cycles = ws.counters().cycles;
    hw.clear_log();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(ws.counters().cycles, cycles);
    assert!(hw.commands().is_empty());
}

#[test]
fn test_add_wakes_idle_loop() {
    let (_hw, ws) = threaded_switch(1000);
    ws.start().unwrap();
    // Nothing admitted: the PF is loaded and the loop parks
    assert!(wait_for(Duration::from_secs(2), || ws.curr_idx() == PF_IDX));
    ws.add_function(1).unwrap();
    assert!(wait_for(Duration::from_secs(2), || ws.curr_idx() == 1));
    ws.stop().unwrap();
}

#[test]
fn test_one_time_loop_visits_every_function() {
    let r = gfx_rig(SchedMode::RoundRobin, 3, SchedConfig::testing());
    for vf in 0..3 {
        set_gfx_slice(&r.dev, vf, 100);
        r.ws.add_function(vf).unwrap();
    }
    r.ws.one_time_loop().unwrap();
    assert_eq!(r.ws.state(), ContextState::Saved);
    assert_eq!(r.ws.inited_mask(), 0b111);
    assert_eq!(r.hw.count(HwCommand::Save), 3);
}

#[test]
fn test_mode_change_only_while_stopped() {
    let r = gfx_rig(SchedMode::RoundRobin, 2, SchedConfig::testing());
    r.ws.start().unwrap();
    assert!(r.ws.set_mode(SchedMode::Fairness).is_err());
    r.ws.stop().unwrap();
    r.ws.set_mode(SchedMode::Fairness).unwrap();
    assert_eq!(r.ws.mode(), SchedMode::Fairness);
    assert_eq!(r.ws.active_functions(), vec![0, 1]);
}

#[test]
fn test_reset_function_drops_its_context() {
    let r = gfx_rig(SchedMode::RoundRobin, 2, SchedConfig::testing());
    r.ws.switch_to(0).unwrap();
    r.ws.save().unwrap();
    assert_eq!(r.ws.inited_mask(), 0b1);
    r.ws.reset_function(0).unwrap();
    assert_eq!(r.ws.inited_mask(), 0);
    assert!(r.hw.count(HwCommand::Shutdown) >= 1);
}
