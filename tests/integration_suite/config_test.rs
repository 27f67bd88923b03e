/*!
 * Configuration Loading Tests
 * Environment-dependent cases run serially
 */

use gpuv_sched::{BpMode, ConfigError, SchedConfig};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

const OVERRIDES: &[&str] = &[
    "GPUV_SCHED_CMD_TIMEOUT_MS",
    "GPUV_SCHED_LIQUID_SKIP_BOUND",
    "GPUV_SCHED_USE_PF",
    "GPUV_SCHED_FORCE_SWITCH_FN",
    "GPUV_SCHED_GFX_TIME_SLICE_US",
];

fn clear_env() {
    for key in OVERRIDES {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_partial_file_keeps_defaults() {
    clear_env();
    let file = write_config(r#"{ "liquid_skip_bound": 4, "bp_mode": "mode1" }"#);
    let config = SchedConfig::load(file.path()).unwrap();
    assert_eq!(config.liquid_skip_bound, 4);
    assert_eq!(config.bp_mode, BpMode::Mode1);
    assert_eq!(config.default_gfx_time_slice_us, SchedConfig::new().default_gfx_time_slice_us);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let file = write_config(r#"{ "liquid_skip_bound": 4 }"#);
    std::env::set_var("GPUV_SCHED_LIQUID_SKIP_BOUND", "12");
    std::env::set_var("GPUV_SCHED_USE_PF", "yes");
    std::env::set_var("GPUV_SCHED_FORCE_SWITCH_FN", "3");
    let config = SchedConfig::load(file.path());
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.liquid_skip_bound, 12);
    assert!(config.use_pf);
    assert_eq!(config.force_switch_fn, Some(3));
}

#[test]
#[serial]
fn test_unparsable_override_is_rejected() {
    clear_env();
    std::env::set_var("GPUV_SCHED_CMD_TIMEOUT_MS", "soon");
    let result = SchedConfig::from_env();
    clear_env();
    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
}

#[test]
#[serial]
fn test_invalid_file_values_fail_validation() {
    clear_env();
    let file = write_config(r#"{ "hliquid_idle_min_ts_us": 9000, "default_gfx_time_slice_us": 6000 }"#);
    assert!(matches!(
        SchedConfig::load(file.path()),
        Err(ConfigError::InvalidValue { .. })
    ));

    let file = write_config("not json");
    assert!(matches!(SchedConfig::load(file.path()), Err(ConfigError::Parse(_))));

    assert!(matches!(
        SchedConfig::load("/nonexistent/gpuv-sched.json"),
        Err(ConfigError::Io(_))
    ));
}

#[test]
#[serial]
fn test_config_round_trips_through_json() {
    clear_env();
    let config = SchedConfig {
        force_switch_fn: Some(2),
        ..SchedConfig::testing()
    };
    let file = write_config(&serde_json::to_string(&config).unwrap());
    assert_eq!(SchedConfig::load(file.path()).unwrap(), config);
}
