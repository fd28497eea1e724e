//! Auto-drive task
//!
//! Runs the governor of one channel: waits out the startup delay, then ticks
//! until the runtime shuts down.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, trace};

use crate::actuation::Actuator;
use crate::config::GovernorSection;
use crate::device::{Device, DeviceRegistry, MasterLink, RegistryError};
use crate::governor::{Governor, TickOutcome};

/// Loop timing shared by every worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub tick_period: Duration,
    pub startup_delay: Duration,
    pub stale_after: Duration,
}

impl LoopSettings {
    pub fn from_section(section: &GovernorSection) -> Self {
        Self {
            tick_period: section.tick_period(),
            startup_delay: section.startup_delay(),
            stale_after: section.telemetry_stale_after(),
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_section(&GovernorSection::default())
    }
}

pub async fn autodrive_task(
    device: Arc<Device>,
    index: usize,
    link: Option<MasterLink>,
    settings: LoopSettings,
) {
    let handle = match device.channel(index) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Auto-drive task not started: {}", e);
            return;
        }
    };
    let id = handle.id();
    info!(
        channel = %id,
        priority = ?handle.priority(),
        vacuum_index = handle.vacuum_index(),
        "Auto-drive task started"
    );

    sleep(settings.startup_delay).await;

    let mut governor = Governor::new(id, link, settings.stale_after, Instant::now());
    let mut was_idle = false;

    loop {
        let now = Instant::now();
        let config = handle.config();
        let telemetry = device.telemetry();

        let outcome = governor.tick(now, &config, handle.vacuum_index(), telemetry.as_ref());
        match outcome {
            TickOutcome::Idle if !was_idle => debug!(channel = %id, "Channel disabled"),
            TickOutcome::Held(hold) => trace!(channel = %id, release = ?hold.release, "Holding"),
            _ => {}
        }
        was_idle = outcome == TickOutcome::Idle;
        handle.publish_status(governor.status());

        // A hold that expires before the next nominal tick brings it forward
        let next = now + settings.tick_period;
        let wake = governor
            .hold_until()
            .filter(|until| *until > now && *until < next)
            .unwrap_or(next);
        sleep_until(wake).await;
    }
}

/// Claim each device's master link and spawn one worker per channel slot
pub fn spawn_autodrive(
    registry: &DeviceRegistry,
    actuator: Arc<dyn Actuator>,
    settings: LoopSettings,
) -> Result<Vec<JoinHandle<()>>, RegistryError> {
    let mut workers = Vec::new();

    for device in registry.devices() {
        let mut link = Some(device.claim_master(Arc::clone(&actuator))?);

        for index in 0..device.channels().len() {
            let channel_link = if index == device.master_channel() {
                link.take()
            } else {
                None
            };
            workers.push(tokio::spawn(autodrive_task(
                Arc::clone(device),
                index,
                channel_link,
                settings,
            )));
        }
    }

    info!(workers = workers.len(), "Auto-drive workers spawned");
    Ok(workers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::{Command, RecordingActuator};
    use crate::config::GovernorFile;
    use crate::device::{ChannelId, DeviceId};
    use crate::governor::Band;
    use crate::telemetry::{StateCode, TelemetrySnapshot};

    fn publish(device: &Device, hv: f64, vacuum: Vec<f64>) {
        device.publish_telemetry(TelemetrySnapshot::new(
            StateCode::RUNNING,
            hv,
            hv,
            vacuum,
            Instant::now(),
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_waits_startup_delay() {
        let registry = DeviceRegistry::from_config(&GovernorFile::default());
        let recorder = Arc::new(RecordingActuator::new());
        spawn_autodrive(&registry, recorder.clone(), LoopSettings::default()).unwrap();

        let device = registry.device(DeviceId(0)).unwrap();
        let master = registry.channel(ChannelId::new(0, 0)).unwrap();
        let mut status_rx = master.subscribe_status();
        publish(device, 1200.0, vec![5.3; 6]);

        sleep(Duration::from_millis(4900)).await;
        assert!(!status_rx.has_changed().unwrap());
        assert_eq!(master.status().ticks, 0);
        assert!(recorder.commands().is_empty());

        sleep(Duration::from_millis(200)).await;
        assert!(status_rx.has_changed().unwrap());
        assert_eq!(status_rx.borrow_and_update().ticks, 1);
        assert_eq!(master.status().band, Some(Band::TripHigh));
        assert_eq!(
            recorder.commands(),
            vec![Command::set_mode(DeviceId(0), StateCode::TRIP)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_claimed_once_per_device() {
        let registry = DeviceRegistry::from_config(&GovernorFile::default());
        let recorder: Arc<dyn Actuator> = Arc::new(RecordingActuator::new());
        let workers = spawn_autodrive(&registry, Arc::clone(&recorder), LoopSettings::default()).unwrap();
        assert_eq!(workers.len(), 6);

        let device = registry.device(DeviceId(0)).unwrap();
        assert_eq!(
            device.claim_master(recorder).unwrap_err(),
            RegistryError::MasterAlreadyClaimed(DeviceId(0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slave_channel_stays_silent() {
        let registry = DeviceRegistry::from_config(&GovernorFile::default());
        let recorder = Arc::new(RecordingActuator::new());
        let slave = registry.channel(ChannelId::new(0, 2)).unwrap();
        slave.update(|c| c.enabled = true).unwrap();
        spawn_autodrive(&registry, recorder.clone(), LoopSettings::default()).unwrap();

        // Master slot healthy and at its ceiling, slave slot arcing
        let device = registry.device(DeviceId(0)).unwrap();
        for _ in 0..20 {
            publish(device, 1290.0, vec![4.0, 3.0, 5.3, 3.0, 3.0, 3.0]);
            sleep(Duration::from_secs(1)).await;
        }

        assert!(slave.status().arcing);
        assert!(recorder.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_channel_reenabled_at_runtime() {
        let registry = DeviceRegistry::from_config(&GovernorFile::default());
        let recorder = Arc::new(RecordingActuator::new());
        let master = registry.channel(ChannelId::new(0, 0)).unwrap();
        master.update(|c| c.enabled = false).unwrap();
        spawn_autodrive(&registry, recorder.clone(), LoopSettings::default()).unwrap();

        let device = registry.device(DeviceId(0)).unwrap();
        publish(device, 1200.0, vec![5.3; 6]);
        sleep(Duration::from_millis(6500)).await;
        assert_eq!(master.status().last_outcome, Some(TickOutcome::Idle));
        assert!(recorder.commands().is_empty());

        master.update(|c| c.enabled = true).unwrap();
        publish(device, 1200.0, vec![5.3; 6]);
        sleep(Duration::from_secs(1)).await;
        assert!(master.status().arcing);
        assert_eq!(
            recorder.commands(),
            vec![Command::set_mode(DeviceId(0), StateCode::TRIP)]
        );
    }
}
