/*!
 * gpuv-sched - Demo Entry Point
 *
 * Drives the world-switch scheduler against a simulated GPU:
 * - SPX (one partition) or DPX (two partitions sharing the multimedia engine)
 * - PF plus VFs brought up with per-block time slices
 * - Scheduler events drained asynchronously
 * - Periodic stats until Ctrl+C or the configured duration
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use gpuv_sched::{
    init_tracing, Device, EngineSpec, EventQueue, Partition, Registry, SchedBlock, SchedConfig,
    SchedMode, SimulatedHardware, PF_IDX,
};

const DEFAULT_NUM_VF: u32 = 4;
const VF_GFX_TIME_SLICE_US: u32 = 7000;
const PF_GFX_TIME_SLICE_US: u32 = 6000;

fn load_config() -> Result<SchedConfig> {
    match std::env::var("GPUV_SCHED_CONFIG") {
        Ok(path) => SchedConfig::load(&path).with_context(|| format!("loading {}", path)),
        Err(_) => SchedConfig::from_env().context("reading GPUV_SCHED_* overrides"),
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Engines 0/1 are GFX, 2 is VCN, 3 is JPEG
fn engines(gfx_mode: SchedMode) -> Vec<EngineSpec> {
    vec![
        EngineSpec::new(SchedBlock::Gfx, gfx_mode),
        EngineSpec::new(SchedBlock::Gfx, gfx_mode),
        EngineSpec::new(SchedBlock::Vcn, SchedMode::Solid),
        EngineSpec::new(SchedBlock::Jpeg, SchedMode::Solid),
    ]
}

fn partitions(layout: &str, num_vf: u32) -> Vec<Partition> {
    let all = gpuv_sched::vf_mask(num_vf);
    match layout {
        "dpx" => {
            let half = gpuv_sched::vf_mask(num_vf / 2);
            vec![
                Partition::new(half, 0b0101),
                Partition::new(all & !half, 0b1110),
            ]
        }
        _ => vec![Partition::new(all, 0b1111)],
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("gpuv-sched starting...");
    info!("================================================");

    let config = load_config()?;
    let layout = std::env::var("GPUV_DEMO_LAYOUT").unwrap_or_else(|_| "spx".to_string());
    let num_vf = env_or("GPUV_DEMO_NUM_VF", DEFAULT_NUM_VF);
    let run_secs = env_or("GPUV_DEMO_SECS", 10u64);
    let gfx_mode = std::env::var("GPUV_DEMO_GFX_MODE")
        .ok()
        .and_then(|m| SchedMode::from_str(&m))
        .unwrap_or(SchedMode::Fairness);

    info!(layout = %layout, num_vf, gfx_mode = %gfx_mode, "Building simulated device");
    let hw = Arc::new(SimulatedHardware::new(4));
    let events = Arc::new(EventQueue::new());
    let dev = Device::builder(hw)
        .with_engines(engines(gfx_mode))
        .with_config(config)
        .with_events(events.clone())
        .with_num_vf(num_vf)
        .build()?;

    let registry = Registry::builder(dev.clone())
        .with_partitions(partitions(&layout, num_vf))
        .build()?;
    registry.set_num_vf(num_vf)?;
    info!(world_switches = registry.len(), "Registry ready");

    // Drain scheduler events in the background
    let drain = events.clone();
    tokio::spawn(async move {
        while let Some(event) = drain.recv_async().await {
            warn!(event = %event, "Scheduler event");
        }
    });

    registry.set_time_slice(PF_IDX, Some(SchedBlock::Gfx), PF_GFX_TIME_SLICE_US)?;
    registry.init_pf_early()?;
    for vf in 0..num_vf {
        registry.set_time_slice(vf, Some(SchedBlock::Gfx), VF_GFX_TIME_SLICE_US)?;
        registry.add_function(vf)?;
    }
    registry.start()?;
    info!(running = %format!("{:#x}", registry.list_running()), "Scheduler running");
    info!("Press Ctrl+C to exit");

    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    let deadline = tokio::time::sleep(Duration::from_secs(run_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for stats in registry.stats() {
                    match serde_json::to_string(&stats) {
                        Ok(json) => info!(stats = %json, "World switch"),
                        Err(e) => error!(error = %e, "Failed to encode stats"),
                    }
                }
                if let Some(ws) = registry.abnormal_world_switch() {
                    error!(world_switch = ws, "World switch abnormal");
                }
            }
            _ = &mut deadline => {
                info!("Run duration elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    if let Err(e) = registry.stop() {
        error!(error = %e, "Stop failed");
    }
    for vf in 0..num_vf {
        registry.remove_function(vf)?;
    }
    info!("gpuv-sched stopped");
    Ok(())
}
