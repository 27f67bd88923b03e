/*!
 * Fairness Scheduling Tests
 */

use crate::harness::{gfx_rig, set_gfx_slice};
use gpuv_sched::{CycleOutcome, SchedConfig, SchedMode, PF_IDX};
use pretty_assertions::assert_eq;

const VF_SLICE: u32 = 7000;

#[test]
fn test_three_vfs_share_gfx_evenly() {
    let r = gfx_rig(SchedMode::Fairness, 3, SchedConfig::testing());
    set_gfx_slice(&r.dev, PF_IDX, 6000);
    r.ws.add_function(PF_IDX).unwrap();
    for vf in 0..3 {
        set_gfx_slice(&r.dev, vf, VF_SLICE);
        r.ws.add_function(vf).unwrap();
    }
    r.ws.start().unwrap();

    let mut picks = [0u32; 3];
    for _ in 0..100 {
        match r.ws.process() {
            CycleOutcome::Switched { function, time_slice } => {
                assert_eq!(time_slice, VF_SLICE);
                picks[function as usize] += 1;
                r.clock.advance(time_slice as u64);
            }
            other => panic!("unexpected cycle outcome {:?}", other),
        }
    }
    r.ws.stop().unwrap();

    assert_eq!(picks, [34, 33, 33]);
    let expected = 100 * VF_SLICE as u64 / 3;
    for vf in 0..3 {
        let total = r.ws.entry_snapshot(vf).unwrap().total_time;
        assert!(
            total.abs_diff(expected) <= VF_SLICE as u64,
            "VF{} ran {}us, expected about {}us",
            vf,
            total,
            expected
        );
    }
    // The inactive PF never ran
    assert_eq!(r.ws.entry_snapshot(PF_IDX).unwrap().total_time, 0);
}

#[test]
fn test_overrun_is_charged_on_next_turn() {
    let r = gfx_rig(SchedMode::Fairness, 2, SchedConfig::testing());
    for vf in 0..2 {
        set_gfx_slice(&r.dev, vf, 6000);
        r.ws.add_function(vf).unwrap();
    }
    r.ws.start().unwrap();

    assert_eq!(
        r.ws.process(),
        CycleOutcome::Switched { function: 0, time_slice: 6000 }
    );
    // VF0 overstays its slice by 2000us
    r.clock.advance(8000);
    assert_eq!(
        r.ws.process(),
        CycleOutcome::Switched { function: 1, time_slice: 6000 }
    );
    r.clock.advance(6000);
    assert_eq!(
        r.ws.process(),
        CycleOutcome::Switched { function: 0, time_slice: 4000 }
    );
    assert_eq!(r.ws.entry_snapshot(0).unwrap().beyond, 0);
}

#[test]
fn test_forgiven_overrun_is_not_charged() {
    let r = gfx_rig(SchedMode::Fairness, 2, SchedConfig::testing());
    for vf in 0..2 {
        set_gfx_slice(&r.dev, vf, 6000);
        r.ws.add_function(vf).unwrap();
    }
    r.ws.start().unwrap();
    r.ws.process();
    r.ws.toggle_skip_next_punish(0, true);
    r.clock.advance(9000);
    r.ws.process();
    r.clock.advance(6000);
    assert_eq!(
        r.ws.process(),
        CycleOutcome::Switched { function: 0, time_slice: 6000 }
    );
}

#[test]
fn test_unadmitted_slots_lend_their_turn_to_pf() {
    let r = gfx_rig(SchedMode::Fairness, 3, SchedConfig::testing());
    set_gfx_slice(&r.dev, PF_IDX, 6000);
    r.ws.add_function(PF_IDX).unwrap();
    set_gfx_slice(&r.dev, 1, 6000);
    r.ws.add_function(1).unwrap();
    r.ws.start().unwrap();

    let mut order = Vec::new();
    for _ in 0..6 {
        if let CycleOutcome::Switched { function, .. } = r.ws.process() {
            order.push(function);
        }
        r.clock.advance(6000);
    }
    // Slots 0 and 2 are placeholders: their turns run the PF
    assert_eq!(order, vec![PF_IDX, 1, PF_IDX, PF_IDX, 1, PF_IDX]);
}
