/*!
 * Scheduler Configuration
 *
 * Tunables for command timing, time slices and hybrid-liquid behavior.
 * Loaded from a JSON file, then overridden by `GPUV_SCHED_*` environment variables.
 */

use super::errors::ConfigError;
use super::limits::*;
use super::types::{is_valid_fn, BpMode, FunctionId};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "GPUV_SCHED_";

/// Device-wide scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedConfig {
    /// Budget for a single hardware command
    pub cmd_timeout_ms: u64,
    /// Sleep between completion polls once spinning gives up
    pub cmd_poll_interval_us: u64,
    /// Hybrid-liquid starvation bound
    pub liquid_skip_bound: u32,
    /// Hybrid-liquid residency when every function is idle
    pub hliquid_idle_min_ts_us: u32,
    pub default_gfx_time_slice_us: u32,
    pub default_mm_time_slice_us: u32,
    /// Single-function GFX slice while self-switching stays on
    pub self_switch_time_slice_us: u32,
    /// Never re-arm the timer when a single function owns GFX
    pub disable_self_switch: bool,
    /// The PF takes part in rotation like any VF
    pub use_pf: bool,
    pub bp_mode: BpMode,
    /// Debug override: always switch to this function
    pub force_switch_fn: Option<FunctionId>,
    pub histogram_start_us: u64,
    pub histogram_interval_us: u64,
    pub trace_capacity: usize,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedConfig {
    /// Production defaults
    pub fn new() -> Self {
        Self {
            cmd_timeout_ms: DEFAULT_CMD_TIMEOUT.as_millis() as u64,
            cmd_poll_interval_us: DEFAULT_CMD_POLL_INTERVAL.as_micros() as u64,
            liquid_skip_bound: DEFAULT_LIQUID_SKIP_BOUND,
            hliquid_idle_min_ts_us: DEFAULT_HLIQUID_IDLE_MIN_TS,
            default_gfx_time_slice_us: DEFAULT_GFX_TIME_SLICE,
            default_mm_time_slice_us: DEFAULT_MM_TIME_SLICE,
            self_switch_time_slice_us: DEFAULT_GFX_TIME_SLICE_SELF_SWITCH,
            disable_self_switch: false,
            use_pf: false,
            bp_mode: BpMode::Disabled,
            force_switch_fn: None,
            histogram_start_us: DEFAULT_HISTOGRAM_START_US,
            histogram_interval_us: DEFAULT_HISTOGRAM_INTERVAL_US,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }

    /// Short command budget for simulated hardware in tests
    pub fn testing() -> Self {
        Self {
            cmd_timeout_ms: 20,
            cmd_poll_interval_us: 10,
            trace_capacity: 256,
            ..Self::new()
        }
    }

    /// Slow-firmware budget used in break-point debug sessions
    pub fn relaxed() -> Self {
        Self {
            cmd_timeout_ms: RELAXED_CMD_TIMEOUT.as_millis() as u64,
            ..Self::new()
        }
    }

    #[inline]
    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_millis(self.cmd_timeout_ms)
    }

    #[inline]
    pub fn cmd_poll_interval(&self) -> Duration {
        Duration::from_micros(self.cmd_poll_interval_us)
    }

    /// Load a JSON file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config: SchedConfig = serde_json::from_str(&raw)?;
        debug!("Loaded scheduler config from {}", path.display());
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GPUV_SCHED_*` overrides in place
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse::<u64>("CMD_TIMEOUT_MS")? {
            self.cmd_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u64>("CMD_POLL_INTERVAL_US")? {
            self.cmd_poll_interval_us = v;
        }
        if let Some(v) = env_parse::<u32>("LIQUID_SKIP_BOUND")? {
            self.liquid_skip_bound = v;
        }
        if let Some(v) = env_parse::<u32>("HLIQUID_IDLE_MIN_TS_US")? {
            self.hliquid_idle_min_ts_us = v;
        }
        if let Some(v) = env_parse::<u32>("GFX_TIME_SLICE_US")? {
            self.default_gfx_time_slice_us = v;
        }
        if let Some(v) = env_parse::<u32>("MM_TIME_SLICE_US")? {
            self.default_mm_time_slice_us = v;
        }
        if let Some(v) = env_flag("DISABLE_SELF_SWITCH") {
            self.disable_self_switch = v;
        }
        if let Some(v) = env_flag("USE_PF") {
            self.use_pf = v;
        }
        if let Some(v) = env_parse::<u32>("FORCE_SWITCH_FN")? {
            self.force_switch_fn = Some(v);
        }
        if let Some(v) = env_parse::<usize>("TRACE_CAPACITY")? {
            self.trace_capacity = v;
        }
        Ok(())
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cmd_timeout_ms == 0 {
            return Err(ConfigError::invalid("cmd_timeout_ms", "must be non-zero"));
        }
        if self.cmd_poll_interval_us >= self.cmd_timeout_ms.saturating_mul(1000) {
            return Err(ConfigError::invalid(
                "cmd_poll_interval_us",
                "must be shorter than the command timeout",
            ));
        }
        if self.liquid_skip_bound == 0 {
            return Err(ConfigError::invalid("liquid_skip_bound", "must be at least 1"));
        }
        if self.default_gfx_time_slice_us == 0 {
            return Err(ConfigError::invalid("default_gfx_time_slice_us", "must be non-zero"));
        }
        if self.default_mm_time_slice_us == 0 {
            return Err(ConfigError::invalid("default_mm_time_slice_us", "must be non-zero"));
        }
        if self.hliquid_idle_min_ts_us > self.default_gfx_time_slice_us {
            return Err(ConfigError::invalid(
                "hliquid_idle_min_ts_us",
                "must not exceed the default gfx time slice",
            ));
        }
        if self.histogram_interval_us == 0 {
            return Err(ConfigError::invalid("histogram_interval_us", "must be non-zero"));
        }
        if self.trace_capacity == 0 {
            return Err(ConfigError::invalid("trace_capacity", "must be non-zero"));
        }
        if let Some(f) = self.force_switch_fn {
            if !is_valid_fn(f) {
                return Err(ConfigError::invalid(
                    "force_switch_fn",
                    format!("{} is not a function slot", f),
                ));
            }
        }
        Ok(())
    }
}

fn env_key(name: &str) -> String {
    format!("{}{}", ENV_PREFIX, name)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    let key = env_key(name);
    match std::env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid(&key, format!("cannot parse '{}'", raw))),
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let key = env_key(name);
    let raw = std::env::var(&key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!("Ignoring {}={}: expected a boolean", key, other);
            None
        }
    }
}
