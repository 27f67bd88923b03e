/*!
 * Failure Handling Tests
 */

use crate::harness::{gfx_rig, set_gfx_slice, Rig};
use gpuv_sched::hw::FaultRule;
use gpuv_sched::monitoring::SchedEventKind;
use gpuv_sched::{ContextState, CycleOutcome, HwCommand, SchedConfig, SchedError, SchedMode};
use pretty_assertions::assert_eq;

fn running_pair(mode: SchedMode) -> Rig {
    let r = gfx_rig(mode, 2, SchedConfig::testing());
    for vf in 0..2 {
        set_gfx_slice(&r.dev, vf, 6000);
        r.ws.add_function(vf).unwrap();
    }
    r.ws.start().unwrap();
    r
}

#[test]
fn test_save_timeout_goes_abnormal_with_one_reset() {
    let r = running_pair(SchedMode::Fairness);
    assert!(matches!(r.ws.process(), CycleOutcome::Switched { function: 0, .. }));
    r.clock.advance(6000);

    r.hw.inject(FaultRule::hang(HwCommand::Save));
    assert_eq!(r.ws.process(), CycleOutcome::Failed);

    assert_eq!(r.ws.state(), ContextState::Abnormal);
    assert!(!r.ws.is_running());
    let resets = r.take_events(SchedEventKind::SchedResetVf);
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].function, 0);
    assert_eq!(r.ws.counters().failures, 1);
}

#[test]
fn test_abnormal_is_sticky() {
    let r = running_pair(SchedMode::RoundRobin);
    r.ws.process();
    r.hw.inject(FaultRule::hang(HwCommand::Save).times(1));
    assert_eq!(r.ws.process(), CycleOutcome::Failed);

    // The fault is gone but the group stays abnormal
    assert_eq!(r.ws.switch_to(1), Err(SchedError::Abnormal(0)));
    assert_eq!(r.ws.start(), Err(SchedError::Abnormal(0)));
    assert_eq!(r.ws.process(), CycleOutcome::NotRunning);
    assert!(!r.ws.is_state_ok());
}

#[test]
fn test_init_failure_resets_incoming_function() {
    let r = running_pair(SchedMode::RoundRobin);
    assert!(matches!(r.ws.process(), CycleOutcome::Switched { function: 0, .. }));
    r.clock.advance(6000);

    r.hw.fail_post_init(true);
    assert_eq!(r.ws.process(), CycleOutcome::Failed);
    assert_eq!(r.ws.state(), ContextState::Abnormal);
    assert_eq!(r.ws.curr_idx(), 1);
    let resets = r.take_events(SchedEventKind::SchedResetVf);
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].function, 1);
}

#[test]
fn test_rejected_run_fails_the_cycle() {
    let r = running_pair(SchedMode::RoundRobin);
    r.hw.inject(FaultRule::reject(HwCommand::Run));
    assert_eq!(r.ws.process(), CycleOutcome::Failed);
    assert_eq!(r.ws.state(), ContextState::Abnormal);
    assert!(!r.ws.is_running());
}

#[test]
fn test_engine_failure_requests_diagnostics() {
    let r = running_pair(SchedMode::RoundRobin);
    r.ws.process();
    r.hw.inject(FaultRule::hang(HwCommand::Save));
    r.ws.process();
    let dumps = r.take_events(SchedEventKind::CollectDiagData);
    assert!(!dumps.is_empty());
}

#[test]
fn test_stop_after_external_abnormal_mark() {
    let r = running_pair(SchedMode::RoundRobin);
    r.ws.set_abnormal(0);
    assert!(!r.ws.is_state_ok());
    r.ws.stop().unwrap();
    assert!(!r.ws.is_running());
}

#[test]
fn test_clear_state_requires_stopped_switch() {
    let r = running_pair(SchedMode::RoundRobin);
    assert!(r.ws.clear_state(0).is_err());
    r.ws.stop().unwrap();
    r.ws.clear_state(0).unwrap();
    assert_eq!(r.ws.state(), ContextState::Clear);
}

#[test]
fn test_removing_resident_with_failed_save_reports_reset() {
    let r = running_pair(SchedMode::RoundRobin);
    r.ws.process();
    r.hw.inject(FaultRule::hang(HwCommand::Save));
    assert!(r.ws.remove_function(0).is_err());
    let resets = r.take_events(SchedEventKind::SchedResetVf);
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].function, 0);
}
