/*!
 * Randomized Stress
 * Seeded admission churn interleaved with loop iterations
 */

use gpuv_sched::monitoring::EventQueue;
use gpuv_sched::{
    CycleOutcome, Device, FunctionId, ManualClock, SchedBlock, SchedConfig, SchedError, SchedMode,
    SimulatedHardware, WorldSwitch,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Arc;

const NUM_VF: u32 = 6;
const STEPS: usize = 2_000;

struct Churn {
    clock: ManualClock,
    events: Arc<EventQueue>,
    ws: Arc<WorldSwitch>,
}

fn churn_rig(mode: SchedMode) -> Churn {
    let clock = ManualClock::new(1);
    let events = Arc::new(EventQueue::new());
    let dev = Device::builder(Arc::new(SimulatedHardware::new(1)))
        .with_engine(SchedBlock::Gfx, mode)
        .with_config(SchedConfig::testing())
        .with_clock(Arc::new(clock.clone()))
        .with_events(events.clone())
        .with_num_vf(NUM_VF)
        .build()
        .unwrap();
    for f in 0..NUM_VF {
        dev.functions()
            .set_time_slice(f, SchedBlock::Gfx, 1000 + f * 500)
            .unwrap();
    }
    let ws = WorldSwitch::builder(dev, 0, SchedBlock::Gfx)
        .with_engine(0)
        .with_allowed(gpuv_sched::vf_mask(NUM_VF))
        .inline()
        .build()
        .unwrap();
    Churn { clock, events, ws }
}

fn sorted(mut v: Vec<FunctionId>) -> Vec<FunctionId> {
    v.sort_unstable();
    v
}

#[test]
fn test_round_robin_churn_keeps_list_consistent() {
    for seed in [7u64, 42, 1234, 0xdead_beef] {
        let mut rng = StdRng::seed_from_u64(seed);
        let rig = churn_rig(SchedMode::RoundRobin);
        let mut admitted: BTreeSet<FunctionId> = BTreeSet::new();
        rig.ws.start().unwrap();

        for step in 0..STEPS {
            let f = rng.gen_range(0..NUM_VF);
            match rng.gen_range(0..10) {
                0..=2 => {
                    rig.ws.add_function(f).unwrap();
                    admitted.insert(f);
                }
                3..=4 => match rig.ws.remove_function(f) {
                    Ok(()) => assert!(admitted.remove(&f), "seed {} step {}", seed, step),
                    Err(e) => {
                        assert_eq!(e, SchedError::InvalidFunction(f));
                        assert!(!admitted.contains(&f));
                    }
                },
                5 => {
                    rig.ws.stop().unwrap();
                    assert_eq!(rig.ws.process(), CycleOutcome::NotRunning);
                    rig.ws.start().unwrap();
                }
                _ => {
                    rig.clock.advance(rng.gen_range(100..10_000));
                    match rig.ws.process() {
                        CycleOutcome::Idle => assert!(admitted.is_empty()),
                        CycleOutcome::Switched { function, time_slice } => {
                            assert!(admitted.contains(&function), "seed {} step {}", seed, step);
                            assert!(time_slice > 0);
                            assert_eq!(rig.ws.curr_idx(), function);
                        }
                        other => panic!("seed {} step {}: unexpected {:?}", seed, step, other),
                    }
                }
            }
            assert_eq!(
                sorted(rig.ws.active_functions()),
                admitted.iter().copied().collect::<Vec<_>>()
            );
        }

        rig.ws.stop().unwrap();
        assert!(rig.ws.is_state_ok());
        assert_eq!(rig.ws.counters().failures, 0);
        assert!(rig.events.is_empty());
    }
}

#[test]
fn test_fairness_churn_never_schedules_outsiders() {
    let mut rng = StdRng::seed_from_u64(99);
    let rig = churn_rig(SchedMode::Fairness);
    let mut admitted: BTreeSet<FunctionId> = BTreeSet::new();
    rig.ws.start().unwrap();

    for _ in 0..STEPS {
        let f = rng.gen_range(0..NUM_VF);
        match rng.gen_range(0..8) {
            0..=1 => {
                rig.ws.add_function(f).unwrap();
                admitted.insert(f);
            }
            2 => {
                if rig.ws.remove_function(f).is_ok() {
                    admitted.remove(&f);
                }
            }
            _ => {
                rig.clock.advance(rng.gen_range(100..10_000));
                match rig.ws.process() {
                    CycleOutcome::Idle => assert!(admitted.is_empty()),
                    CycleOutcome::Switched { function, .. } => {
                        // Placeholders lend their turn to the PF
                        assert!(
                            admitted.contains(&function) || function == gpuv_sched::PF_IDX
                        );
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
        }
    }

    rig.ws.stop().unwrap();
    assert_eq!(rig.ws.counters().failures, 0);
}
