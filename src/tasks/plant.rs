//! Simulated plant task
//!
//! Drains the command queue into the simulated modulators and publishes
//! their telemetry every poll period. Ends when every queue sender is gone.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::actuation::Command;
use crate::sim::SimulatedModulator;

pub async fn plant_task(
    mut modulators: Vec<SimulatedModulator>,
    mut commands: mpsc::Receiver<Command>,
    poll_period: Duration,
) {
    info!(devices = modulators.len(), "Simulated plant started");

    let mut ticker = interval(poll_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.saturating_duration_since(last);
                last = now;
                for modulator in &mut modulators {
                    modulator.step(dt);
                    modulator.publish(now);
                }
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    info!("Command queue closed, simulated plant stopping");
                    break;
                };
                match modulators.iter_mut().find(|m| m.device().id() == command.device()) {
                    Some(modulator) => modulator.apply(command),
                    None => warn!("No simulated device for command: {}", command),
                }
            }
        }
    }
}
