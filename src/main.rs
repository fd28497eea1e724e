use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hvps_autodrive::config::{self, GovernorFile};
use hvps_autodrive::sim::SimulatedModulator;
use hvps_autodrive::tasks::{plant_task, spawn_autodrive, LoopSettings};
use hvps_autodrive::{Actuator, CommandQueue, DeviceRegistry};

#[derive(Parser, Debug)]
#[command(version, about = "HV auto-drive governor", long_about = None)]
struct Args {
    /// TOML config file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log: Option<String>,

    /// Seconds between channel status log lines
    #[arg(long, default_value_t = 10)]
    status_interval_s: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match &args.log {
        Some(directives) => EnvFilter::try_new(directives).context("Invalid --log filter")?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("hvps_autodrive=debug,info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let file = match &args.config {
        Some(path) => config::load_from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => {
            info!("No config file given, using defaults");
            GovernorFile::default()
        }
    };

    let registry = DeviceRegistry::from_config(&file);
    let (queue, commands) = CommandQueue::new(file.governor.command_queue_capacity);

    // No hardware transports here: the simulated plant consumes the queue
    let simulation = file.simulation.clone().unwrap_or_default();
    let modulators = registry
        .devices()
        .iter()
        .map(|device| SimulatedModulator::new(Arc::clone(device), simulation.clone()).0)
        .collect();
    tokio::spawn(plant_task(modulators, commands, simulation.poll_period()));

    let actuator: Arc<dyn Actuator> = Arc::new(queue);
    spawn_autodrive(&registry, actuator, LoopSettings::from_section(&file.governor))
        .context("Failed to start auto-drive workers")?;

    let mut status_timer = tokio::time::interval(Duration::from_secs(args.status_interval_s.max(1)));
    loop {
        tokio::select! {
            _ = status_timer.tick() => log_status(&registry),
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn log_status(registry: &DeviceRegistry) {
    for device in registry.devices() {
        if let Some(t) = device.telemetry() {
            info!(
                device = %device.id(),
                state = %t.state,
                hv_read = t.hv_read,
                hv_set = t.hv_set,
                "Device status"
            );
        }
        for handle in device.channels() {
            let status = handle.status();
            if status.ticks == 0 || !handle.config().enabled {
                continue;
            }
            info!(
                channel = %handle.id(),
                band = ?status.band,
                arcing = status.arcing,
                alarming = status.alarming,
                on_mid_point = status.on_mid_point,
                hold = ?status.hold.map(|h| h.release),
                "Channel status"
            );
        }
    }
}
