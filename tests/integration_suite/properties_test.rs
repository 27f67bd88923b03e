/*!
 * Property Tests
 * Active list ordering and fairness credit conservation
 */

use gpuv_sched::world_switch::{ActiveList, DefaultPolicy, PolicyContext, SchedulePolicy, StopPolicy};
use gpuv_sched::FunctionId;
use proptest::prelude::*;

const PROPTEST_CASES: u32 = 64;

const CHARGE: StopPolicy = StopPolicy {
    record_histogram: false,
    forgive_overrun: false,
};

#[derive(Debug, Clone, Copy)]
enum ListOp {
    Push(FunctionId),
    Remove(FunctionId),
    MoveToTail(FunctionId),
}

fn list_op() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        (0u32..8).prop_map(ListOp::Push),
        (0u32..8).prop_map(ListOp::Remove),
        (0u32..8).prop_map(ListOp::MoveToTail),
    ]
}

fn list_with_slice(f: FunctionId, time_slice: u32) -> ActiveList {
    let mut list = ActiveList::new(0, 1000);
    if let Some(e) = list.entry_mut(f) {
        e.reset(time_slice, false, 0);
    }
    list.push_back(f);
    list
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    /// The list behaves like an ordered set under any operation sequence
    #[test]
    fn list_matches_ordered_set(ops in prop::collection::vec(list_op(), 0..200)) {
        let mut list = ActiveList::new(0, 1000);
        let mut model: Vec<FunctionId> = Vec::new();

        for op in ops {
            match op {
                ListOp::Push(f) => {
                    list.push_back(f);
                    model.retain(|&m| m != f);
                    model.push(f);
                }
                ListOp::Remove(f) => {
                    let was = model.contains(&f);
                    prop_assert_eq!(list.remove(f), was);
                    model.retain(|&m| m != f);
                }
                ListOp::MoveToTail(f) => {
                    list.move_to_tail(f);
                    if model.contains(&f) {
                        model.retain(|&m| m != f);
                        model.push(f);
                    }
                }
            }
            prop_assert_eq!(list.functions(), model.clone());
            prop_assert_eq!(list.len(), model.len());
            prop_assert_eq!(list.head(), model.first().copied());
            prop_assert_eq!(list.tail(), model.last().copied());
        }
    }

    /// Every microsecond of overrun is either withheld from a later grant or still owed
    #[test]
    fn overrun_is_conserved(
        time_slice in 100u32..20_000,
        overruns in prop::collection::vec(0u64..40_000, 1..60),
    ) {
        let f = 0;
        let mut list = list_with_slice(f, time_slice);
        let mut now = 1u64;
        let mut charged = 0i64;
        let mut withheld = 0i64;

        for overrun in overruns {
            let grant = list.calculate_time_slice(f, true, 0);
            prop_assert!(grant == 0 || (grant >= time_slice / 2 && grant <= time_slice));
            withheld += time_slice as i64 - grant as i64;

            if grant > 0 {
                list.start_record(f, now);
                now += grant as u64 + overrun;
                list.stop_record(f, now, CHARGE);
                charged += overrun as i64;
            }

            let beyond = list.entry(f).map(|e| e.beyond).unwrap_or_default();
            prop_assert!(beyond >= 0);
            prop_assert_eq!(withheld + beyond, charged);
        }
    }

    /// Outside fairness mode the configured slice is always granted
    #[test]
    fn round_robin_ignores_debt(
        time_slice in 100u32..20_000,
        overrun in 0u64..100_000,
    ) {
        let f = 3;
        let mut list = list_with_slice(f, time_slice);
        list.calculate_time_slice(f, false, 0);
        list.start_record(f, 1);
        list.stop_record(f, 1 + time_slice as u64 + overrun, CHARGE);
        prop_assert_eq!(list.calculate_time_slice(f, false, 0), time_slice);
    }

    /// A pick always lands on a member with a usable slice, whatever debt is outstanding
    #[test]
    fn default_pick_grants_a_member(
        slices in prop::collection::vec(100u32..20_000, 1..8),
        debts in prop::collection::vec(0i64..60_000, 8),
    ) {
        let mut list = ActiveList::new(0, 1000);
        for (f, &ts) in slices.iter().enumerate() {
            let f = f as FunctionId;
            if let Some(e) = list.entry_mut(f) {
                e.reset(ts, false, 0);
                e.beyond = debts[f as usize];
            }
            list.push_back(f);
        }

        let mut ctx = PolicyContext {
            list: &mut list,
            fairness: true,
            pf_active: false,
            status: 0,
            skip_bound: 8,
            single_fn_grant: 6000,
        };
        let pick = DefaultPolicy.pick(&mut ctx);
        prop_assert!(pick.is_some());
        let pick = pick.unwrap();
        prop_assert!((pick.function as usize) < slices.len());
        prop_assert!(pick.time_slice > 0);
        prop_assert!(list.contains(pick.function));
    }
}
