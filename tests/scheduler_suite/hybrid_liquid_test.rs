/*!
 * Hybrid-Liquid Scheduling Tests
 */

use crate::harness::{gfx_rig, set_gfx_slice, Rig};
use gpuv_sched::{bit, CycleOutcome, SchedConfig, SchedMode};
use pretty_assertions::assert_eq;

/// Three VFs with a context each, admitted in order and stopped
fn three_inited_vfs(config: SchedConfig) -> Rig {
    let r = gfx_rig(SchedMode::HybridLiquid, 3, config);
    for vf in 0..3 {
        set_gfx_slice(&r.dev, vf, 6000);
        r.ws.switch_to(vf).unwrap();
        r.ws.save().unwrap();
        r.ws.add_function(vf).unwrap();
    }
    assert_eq!(r.ws.inited_mask(), 0b111);
    r
}

fn run_cycles(r: &Rig, n: usize) -> Vec<u32> {
    let mut order = Vec::new();
    for _ in 0..n {
        match r.ws.process() {
            CycleOutcome::Switched { function, time_slice } => {
                order.push(function);
                r.clock.advance(time_slice as u64);
            }
            other => panic!("unexpected cycle outcome {:?}", other),
        }
    }
    order
}

#[test]
fn test_busy_vf_cannot_starve_idle_ones() {
    let r = three_inited_vfs(SchedConfig::testing());
    r.ws.set_busy_status(bit(0));
    r.ws.start().unwrap();

    let order = run_cycles(&r, 12);
    assert_eq!(order, vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 0]);
    assert_eq!(r.ws.counters().skips, 8);
}

#[test]
fn test_skip_bound_is_configurable() {
    let config = SchedConfig {
        liquid_skip_bound: 2,
        ..SchedConfig::testing()
    };
    let r = three_inited_vfs(config);
    r.ws.set_busy_status(bit(0));
    r.ws.start().unwrap();

    assert_eq!(run_cycles(&r, 5), vec![0, 0, 0, 1, 2]);
}

#[test]
fn test_idle_group_holds_for_minimum_residency() {
    let r = three_inited_vfs(SchedConfig::testing());
    r.ws.start().unwrap();

    assert!(matches!(r.ws.process(), CycleOutcome::Switched { function: 0, .. }));
    let idle_min = r.dev.config().hliquid_idle_min_ts_us as u64;
    r.clock.advance(idle_min / 2);
    assert_eq!(
        r.ws.process(),
        CycleOutcome::Held { armed_us: Some(idle_min - idle_min / 2) }
    );
    r.clock.advance(idle_min);
    assert!(matches!(r.ws.process(), CycleOutcome::Switched { function: 1, .. }));
}

#[test]
fn test_explicit_minimum_overrides_idle_residency() {
    let r = three_inited_vfs(SchedConfig::testing());
    assert_eq!(r.ws.set_hliquid_min_ts(2000).unwrap(), 2000);
    r.ws.set_busy_status(0b110);
    r.ws.start().unwrap();

    assert!(matches!(r.ws.process(), CycleOutcome::Switched { function: 1, .. }));
    r.clock.advance(500);
    assert_eq!(r.ws.process(), CycleOutcome::Held { armed_us: Some(1500) });
    r.clock.advance(1500);
    assert!(matches!(r.ws.process(), CycleOutcome::Switched { function: 2, .. }));
}

#[test]
fn test_single_inited_function_is_held() {
    let r = gfx_rig(SchedMode::HybridLiquid, 3, SchedConfig::testing());
    set_gfx_slice(&r.dev, 0, 6000);
    r.ws.add_function(0).unwrap();
    r.ws.start().unwrap();

    assert!(matches!(r.ws.process(), CycleOutcome::Switched { function: 0, .. }));
    r.clock.advance(10_000);
    assert_eq!(r.ws.process(), CycleOutcome::Held { armed_us: None });
    assert_eq!(r.ws.counters().holds, 1);
}

#[test]
fn test_timer_expiry_marks_resident_timed_out() {
    let r = three_inited_vfs(SchedConfig::testing());
    r.ws.start().unwrap();
    r.ws.process();
    assert_eq!(r.ws.curr_idx(), 0);
    r.ws.timer_expired();
    assert_eq!(r.ws.timeout_status(), bit(0));
    assert_eq!(r.ws.counters().timer_expiries, 1);
}

#[test]
fn test_mode_change_keeps_admitted_functions() {
    let r = gfx_rig(SchedMode::RoundRobin, 3, SchedConfig::testing());
    for vf in 0..2 {
        set_gfx_slice(&r.dev, vf, 6000);
        r.ws.add_function(vf).unwrap();
    }

    r.ws.set_mode(SchedMode::HybridLiquid).unwrap();
    assert_eq!(r.ws.mode(), SchedMode::HybridLiquid);
    assert_eq!(r.ws.active_functions(), vec![0, 1]);

    r.ws.start().unwrap();
    assert!(matches!(
        r.ws.process(),
        CycleOutcome::Switched { function: 0 | 1, .. }
    ));
}
