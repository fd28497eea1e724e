//! Device registry
//!
//! The registry owns every modulator and its channel slots. Channels refer to
//! their device and to the vacuum reading they observe by index only.
//! Write access to a device's HV actuator exists solely as a [`MasterLink`],
//! and a device hands out at most one at a time.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::actuation::{ActuationError, Actuator, Command};
use crate::config::{validate_channel, ChannelConfig, ChannelField, ConfigError, DeviceSection, GovernorFile};
use crate::state::ChannelStatus;
use crate::telemetry::{StateCode, TelemetrySnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId {
    pub device: DeviceId,
    pub index: usize,
}

impl ChannelId {
    pub fn new(device: usize, index: usize) -> Self {
        Self {
            device: DeviceId(device),
            index,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/ch{}", self.device, self.index)
    }
}

/// Arbitration role among channels sharing one HV actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Master,
    Slave,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("{0} already has a master link")]
    MasterAlreadyClaimed(DeviceId),
}

/// Initial contents of one channel slot
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSlot {
    pub config: ChannelConfig,
    pub vacuum_index: usize,
}

/// Runtime view of one channel: its config write path and published status
pub struct ChannelHandle {
    id: ChannelId,
    priority: Priority,
    vacuum_index: usize,
    config: watch::Sender<ChannelConfig>,
    status: watch::Sender<ChannelStatus>,
}

impl ChannelHandle {
    fn new(id: ChannelId, priority: Priority, slot: ChannelSlot) -> Self {
        let (config, _) = watch::channel(slot.config);
        let (status, _) = watch::channel(ChannelStatus::default());
        Self {
            id,
            priority,
            vacuum_index: slot.vacuum_index,
            config,
            status,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn vacuum_index(&self) -> usize {
        self.vacuum_index
    }

    /// Copy of the live configuration
    pub fn config(&self) -> ChannelConfig {
        self.config.borrow().clone()
    }

    pub fn subscribe_config(&self) -> watch::Receiver<ChannelConfig> {
        self.config.subscribe()
    }

    /// Apply `f` to a copy of the configuration and publish it only if the
    /// result validates. The live configuration is untouched on error.
    pub fn update<F>(&self, f: F) -> Result<ChannelConfig, ConfigError>
    where
        F: FnOnce(&mut ChannelConfig),
    {
        let mut result = Err(ConfigError::Validation(String::new()));
        let path = self.id.to_string();
        self.config.send_if_modified(|current| {
            let mut candidate = current.clone();
            f(&mut candidate);
            match validate_channel(&candidate, &path) {
                Ok(()) => {
                    let changed = *current != candidate;
                    *current = candidate.clone();
                    result = Ok(candidate);
                    changed
                }
                Err(errors) => {
                    result = Err(ConfigError::summarize(errors));
                    false
                }
            }
        });

        match &result {
            Ok(_) => info!(channel = %self.id, "Channel configuration updated"),
            Err(e) => warn!(channel = %self.id, "Rejected configuration change: {}", e),
        }
        result
    }

    /// Single-field write, as issued by the record layer
    pub fn write_field(&self, field: ChannelField, value: f64) -> Result<(), ConfigError> {
        if !value.is_finite() {
            warn!(channel = %self.id, "Rejected non-numeric write to {}", field);
            return Err(ConfigError::InvalidField {
                field: format!("{}.{}", self.id, field),
                value: value.to_string(),
                reason: "must be a finite number".to_string(),
            });
        }
        self.update(|config| config.set(field, value)).map(|_| ())
    }

    pub fn read_field(&self, field: ChannelField) -> f64 {
        self.config.borrow().get(field)
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    pub(crate) fn publish_status(&self, status: ChannelStatus) {
        self.status.send_replace(status);
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("vacuum_index", &self.vacuum_index)
            .finish()
    }
}

/// One HV modulator unit
pub struct Device {
    id: DeviceId,
    master_channel: usize,
    channels: Vec<ChannelHandle>,
    telemetry: watch::Sender<Option<TelemetrySnapshot>>,
    master_claimed: AtomicBool,
}

impl Device {
    pub fn new(id: DeviceId, master_channel: usize, slots: Vec<ChannelSlot>) -> Arc<Self> {
        let channels = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let priority = if index == master_channel {
                    Priority::Master
                } else {
                    Priority::Slave
                };
                ChannelHandle::new(ChannelId { device: id, index }, priority, slot)
            })
            .collect();
        let (telemetry, _) = watch::channel(None);

        Arc::new(Self {
            id,
            master_channel,
            channels,
            telemetry,
            master_claimed: AtomicBool::new(false),
        })
    }

    /// Build a device from a validated config section
    pub fn from_section(id: DeviceId, section: &DeviceSection) -> Arc<Self> {
        let slots = (0..section.channel_count)
            .map(|index| ChannelSlot {
                config: section.resolve_channel(index),
                vacuum_index: section.vacuum_index(index),
            })
            .collect();
        Self::new(id, section.master_channel, slots)
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn master_channel(&self) -> usize {
        self.master_channel
    }

    pub fn channels(&self) -> &[ChannelHandle] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Result<&ChannelHandle, RegistryError> {
        self.channels
            .get(index)
            .ok_or(RegistryError::UnknownChannel(ChannelId {
                device: self.id,
                index,
            }))
    }

    /// Called by the telemetry transport after each poll
    pub fn publish_telemetry(&self, snapshot: TelemetrySnapshot) {
        self.telemetry.send_replace(Some(snapshot));
    }

    /// Latest snapshot, if any has been published
    pub fn telemetry(&self) -> Option<TelemetrySnapshot> {
        self.telemetry.borrow().clone()
    }

    pub fn subscribe_telemetry(&self) -> watch::Receiver<Option<TelemetrySnapshot>> {
        self.telemetry.subscribe()
    }

    /// Take the single write handle to this device's actuator
    pub fn claim_master(
        self: &Arc<Self>,
        actuator: Arc<dyn Actuator>,
    ) -> Result<MasterLink, RegistryError> {
        self.master_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RegistryError::MasterAlreadyClaimed(self.id))?;

        info!(device = %self.id, channel = self.master_channel, "Master link claimed");
        Ok(MasterLink {
            device: Arc::clone(self),
            actuator,
        })
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("master_channel", &self.master_channel)
            .field("channels", &self.channels.len())
            .finish()
    }
}

/// Exclusive write access to one device's HV actuator. Dropping it
/// releases the claim.
pub struct MasterLink {
    device: Arc<Device>,
    actuator: Arc<dyn Actuator>,
}

impl MasterLink {
    pub fn device_id(&self) -> DeviceId {
        self.device.id
    }

    pub fn set_mode(&self, mode: StateCode) -> Result<(), ActuationError> {
        self.submit(Command::set_mode(self.device.id, mode))
    }

    pub fn set_hv_setpoint(&self, volts: f64) -> Result<(), ActuationError> {
        self.submit(Command::set_hv_setpoint(self.device.id, volts))
    }

    pub fn set_control_word(&self, word: u16) -> Result<(), ActuationError> {
        self.submit(Command::set_control_word(self.device.id, word))
    }

    fn submit(&self, command: Command) -> Result<(), ActuationError> {
        self.actuator.submit(command)
    }
}

impl Drop for MasterLink {
    fn drop(&mut self) {
        self.device.master_claimed.store(false, Ordering::Release);
    }
}

impl fmt::Debug for MasterLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterLink")
            .field("device", &self.device.id)
            .finish()
    }
}

/// Every device known to the process
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Arc<Device>>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<Arc<Device>>) -> Self {
        Self { devices }
    }

    pub fn from_config(file: &GovernorFile) -> Self {
        let devices = file
            .devices
            .iter()
            .enumerate()
            .map(|(i, section)| Device::from_section(DeviceId(i), section))
            .collect();
        Self { devices }
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn device(&self, id: DeviceId) -> Result<&Arc<Device>, RegistryError> {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .ok_or(RegistryError::UnknownDevice(id))
    }

    pub fn channel(&self, id: ChannelId) -> Result<&ChannelHandle, RegistryError> {
        self.device(id.device)?.channel(id.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::RecordingActuator;
    use crate::config::Thresholds;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::from_config(&GovernorFile::default())
    }

    #[test]
    fn test_default_registry_layout() {
        let registry = registry();
        assert_eq!(registry.devices().len(), 1);

        let device = registry.device(DeviceId(0)).unwrap();
        assert_eq!(device.channels().len(), 6);
        assert_eq!(device.channel(0).unwrap().priority(), Priority::Master);
        assert!(device.channel(0).unwrap().config().enabled);
        for handle in &device.channels()[1..] {
            assert_eq!(handle.priority(), Priority::Slave);
            assert!(!handle.config().enabled);
        }
    }

    #[test]
    fn test_unknown_lookups() {
        let registry = registry();
        assert_eq!(
            registry.device(DeviceId(3)).unwrap_err(),
            RegistryError::UnknownDevice(DeviceId(3))
        );
        assert_eq!(
            registry.channel(ChannelId::new(0, 9)).unwrap_err(),
            RegistryError::UnknownChannel(ChannelId::new(0, 9))
        );
    }

    #[test]
    fn test_single_master_claim() {
        let registry = registry();
        let device = registry.device(DeviceId(0)).unwrap();
        let actuator: Arc<dyn Actuator> = Arc::new(RecordingActuator::new());

        let link = device.claim_master(Arc::clone(&actuator)).unwrap();
        assert_eq!(
            device.claim_master(Arc::clone(&actuator)).unwrap_err(),
            RegistryError::MasterAlreadyClaimed(DeviceId(0))
        );

        drop(link);
        assert!(device.claim_master(actuator).is_ok());
    }

    #[test]
    fn test_master_link_commands() {
        let registry = registry();
        let device = registry.device(DeviceId(0)).unwrap();
        let recorder = Arc::new(RecordingActuator::new());
        let link = device.claim_master(recorder.clone()).unwrap();
        assert_eq!(link.device_id(), DeviceId(0));

        link.set_control_word(0x0001).unwrap();
        link.set_hv_setpoint(300.0).unwrap();
        link.set_mode(StateCode::RUNNING).unwrap();

        assert_eq!(
            recorder.commands(),
            vec![
                Command::set_control_word(DeviceId(0), 0x0001),
                Command::set_hv_setpoint(DeviceId(0), 300.0),
                Command::set_mode(DeviceId(0), StateCode::RUNNING),
            ]
        );
    }

    #[test]
    fn test_write_field_validates() {
        let registry = registry();
        let handle = registry.channel(ChannelId::new(0, 0)).unwrap();

        handle.write_field(ChannelField::HvMaxPoint, 1100.0).unwrap();
        assert_eq!(handle.read_field(ChannelField::HvMaxPoint), 1100.0);

        // alarm_low above alarm_high breaks ordering
        assert!(handle.write_field(ChannelField::AlarmLow, 4.9).is_err());
        assert_eq!(handle.read_field(ChannelField::AlarmLow), 3.6);

        assert!(handle.write_field(ChannelField::TripHigh, f64::NAN).is_err());
        assert_eq!(handle.read_field(ChannelField::TripHigh), 5.2);
    }

    #[test]
    fn test_update_moves_thresholds_atomically() {
        let registry = registry();
        let handle = registry.channel(ChannelId::new(0, 1)).unwrap();
        let mut rx = handle.subscribe_config();

        // One field at a time this would pass through an unordered state
        let updated = handle
            .update(|c| c.thresholds = Thresholds::new(9.0, 8.0, 7.0, 6.0))
            .unwrap();
        assert_eq!(updated.thresholds.trip_low, 6.0);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().thresholds.trip_high, 9.0);
    }

    #[test]
    fn test_enable_write() {
        let registry = registry();
        let handle = registry.channel(ChannelId::new(0, 2)).unwrap();
        handle.write_field(ChannelField::Enabled, 1.0).unwrap();
        assert!(handle.config().enabled);
        assert_eq!(handle.read_field(ChannelField::Enabled), 1.0);
    }

    #[test]
    fn test_telemetry_publish() {
        let registry = registry();
        let device = registry.device(DeviceId(0)).unwrap();
        assert!(device.telemetry().is_none());
        let mut rx = device.subscribe_telemetry();

        let snapshot = TelemetrySnapshot::new(
            StateCode::RUNNING,
            500.0,
            500.0,
            vec![3.0; 6],
            tokio::time::Instant::now(),
        );
        device.publish_telemetry(snapshot.clone());
        assert_eq!(device.telemetry(), Some(snapshot.clone()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(snapshot));
    }

    #[test]
    fn test_status_publish_notifies_subscribers() {
        let registry = registry();
        let handle = registry.channel(ChannelId::new(0, 0)).unwrap();
        let mut rx = handle.subscribe_status();
        assert!(!rx.has_changed().unwrap());

        let status = ChannelStatus {
            arcing: true,
            ticks: 3,
            ..ChannelStatus::default()
        };
        handle.publish_status(status.clone());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), status);
        assert_eq!(handle.status(), status);
    }
}
