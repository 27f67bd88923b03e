/*!
 * Scheduler Limits and Constants
 *
 * Slot counts, default time slices and hardware timing budgets, grouped by domain.
 * Values that callers may want to tune are also exposed through `SchedConfig`.
 */

use std::time::Duration;

// =============================================================================
// SLOT AND ENGINE LIMITS
// =============================================================================

/// Maximum number of virtual functions
pub const MAX_VF_NUM: u32 = 31;

/// Function slots including the PF slot
pub const MAX_FUNCTION_SLOTS: u32 = 32;

/// Hardware scheduling engines addressable by a mask
pub const MAX_HW_ENGINES: u32 = 32;

/// Logical schedulers per device
pub const MAX_WORLD_SWITCHES: u32 = 32;

// =============================================================================
// TIME SLICES (microseconds)
// =============================================================================

/// Default GFX slice with more than one function sharing the engine
pub const DEFAULT_GFX_TIME_SLICE: u32 = 6000;

/// Single-function slice: the loop never re-arms its timer
pub const TIME_SLICE_SINGLE_FN: u32 = u32::MAX;

/// Single-function slice when self-switching stays enabled
pub const DEFAULT_GFX_TIME_SLICE_SELF_SWITCH: u32 = 500 * 1000;

/// Default multimedia engine slice
pub const DEFAULT_MM_TIME_SLICE: u32 = 255_000;

/// Frames per second assumed by the bandwidth conversion
pub const MM_BANDWIDTH_FRAME_RATE: u64 = 30;

// =============================================================================
// HYBRID-LIQUID TUNING
// =============================================================================

/// Passes a non-busy function may be skipped before it is forced
pub const DEFAULT_LIQUID_SKIP_BOUND: u32 = 8;

/// Minimum residency when every function is idle
pub const DEFAULT_HLIQUID_IDLE_MIN_TS: u32 = 500;

/// Granularity of the configurable minimum residency
pub const HLIQUID_MIN_TS_STEP: u32 = 100;

// =============================================================================
// HARDWARE COMMAND TIMING
// =============================================================================

/// Budget for one hardware command to complete
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_millis(500);

/// Budget used when firmware runs in slow debug modes
pub const RELAXED_CMD_TIMEOUT: Duration = Duration::from_secs(4 * 60);

/// Sleep between completion polls
pub const DEFAULT_CMD_POLL_INTERVAL: Duration = Duration::from_micros(20);

/// Busy polls before the waiter starts sleeping
pub const CMD_SPIN_POLLS: u32 = 64;

/// Hops a single state request may take through the engine graph
pub const STATE_MACHINE_HOP_BUDGET: u32 = 20;

// =============================================================================
// ACCOUNTING AND DIAGNOSTICS
// =============================================================================

/// Buckets per run-length and latency histogram
pub const HISTOGRAM_SIZE: usize = 32;

/// First histogram bucket boundary
pub const DEFAULT_HISTOGRAM_START_US: u64 = 0;

/// Histogram bucket width
pub const DEFAULT_HISTOGRAM_INTERVAL_US: u64 = 1000;

/// Entries kept in the engine transition trace ring
pub const DEFAULT_TRACE_CAPACITY: usize = 1024;

/// Iterations the default policy may spend skipping before it falls back
pub const POLICY_SKIP_ROUNDS: usize = 64;
