/*!
 * Hardware Interface Fault Injection
 * Mocked command interface driving the transition engine
 */

use gpuv_sched::core::errors::HwResult;
use gpuv_sched::hw::ActiveFnStatus;
use gpuv_sched::{
    ContextState, Device, EngineId, FunctionId, HardwareInterface, HwCommand, HwError, SchedBlock,
    SchedConfig, SchedError, SchedMode, WorldSwitch, PF_IDX,
};
use mockall::mock;
use mockall::predicate::eq;
use std::sync::Arc;

mock! {
    pub Hw {}

    impl HardwareInterface for Hw {
        fn set_cmd(
            &self,
            engine: EngineId,
            cmd: HwCommand,
            func: FunctionId,
            next_func: FunctionId,
        ) -> HwResult<()>;
        fn is_cmd_complete(&self, engine: EngineId) -> bool;
        fn active_fn_status(&self, engine: EngineId) -> HwResult<ActiveFnStatus>;
        fn active_fn(&self, engine: EngineId) -> HwResult<FunctionId>;
        fn post_init_setup(&self) -> HwResult<()>;
    }
}

/// Status reads are incidental to these tests
fn quiet_status(hw: &mut MockHw) {
    hw.expect_active_fn_status()
        .returning(|_| Ok(ActiveFnStatus::Idle));
    hw.expect_active_fn().returning(|_| Ok(PF_IDX));
}

fn switch_over(hw: MockHw) -> Arc<WorldSwitch> {
    let dev = Device::builder(Arc::new(hw))
        .with_engine(SchedBlock::Gfx, SchedMode::RoundRobin)
        .with_config(SchedConfig::testing())
        .with_num_vf(2)
        .build()
        .unwrap();
    WorldSwitch::builder(dev, 0, SchedBlock::Gfx)
        .with_engine(0)
        .with_allowed(0b11)
        .inline()
        .build()
        .unwrap()
}

#[test]
fn test_first_switch_posts_init_then_run_and_setup() {
    let mut hw = MockHw::new();
    quiet_status(&mut hw);
    let mut seq = mockall::Sequence::new();
    hw.expect_set_cmd()
        .with(eq(0), eq(HwCommand::Init), eq(1), eq(1))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _, _| Ok(()));
    hw.expect_set_cmd()
        .with(eq(0), eq(HwCommand::Run), eq(1), eq(1))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _, _| Ok(()));
    hw.expect_post_init_setup()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));
    hw.expect_is_cmd_complete().returning(|_| true);

    let ws = switch_over(hw);
    ws.switch_to(1).unwrap();
    assert_eq!(ws.state(), ContextState::Loaded);
    assert_eq!(ws.curr_idx(), 1);
}

#[test]
fn test_command_that_never_completes_times_out() {
    let mut hw = MockHw::new();
    quiet_status(&mut hw);
    hw.expect_set_cmd().returning(|_, _, _, _| Ok(()));
    hw.expect_is_cmd_complete().returning(|_| false);

    let ws = switch_over(hw);
    let err = ws.switch_to(0).unwrap_err();
    assert_eq!(err, SchedError::Hardware(HwError::LoadTimeout(0)));
    assert_eq!(ws.state(), ContextState::Abnormal);
}

#[test]
fn test_rejected_command_is_surfaced() {
    let mut hw = MockHw::new();
    quiet_status(&mut hw);
    hw.expect_set_cmd().returning(|engine, cmd, _, _| {
        Err(HwError::CommandRejected {
            engine,
            command: cmd.as_str().into(),
        })
    });
    hw.expect_is_cmd_complete().never();

    let ws = switch_over(hw);
    let err = ws.switch_to(0).unwrap_err();
    assert!(matches!(
        err,
        SchedError::Hardware(HwError::CommandRejected { engine: 0, .. })
    ));
    assert!(!ws.is_state_ok());
}

#[test]
fn test_post_init_failure_leaves_group_abnormal() {
    let mut hw = MockHw::new();
    quiet_status(&mut hw);
    hw.expect_set_cmd().returning(|_, _, _, _| Ok(()));
    hw.expect_is_cmd_complete().returning(|_| true);
    hw.expect_post_init_setup()
        .times(1)
        .returning(|| Err(HwError::AccessFailed("mmio".into())));

    let ws = switch_over(hw);
    assert!(ws.switch_to(0).is_err());
    assert_eq!(ws.state(), ContextState::Abnormal);
    assert_eq!(ws.counters().failures, 1);
}
