//! Config file schema
//!
//! Every key is optional. Omitted keys take the values in `params`, and a
//! channel slot without an override entry gets the master or slave default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::channel::{ChannelConfig, ChannelField};
use super::params;

fn default_tick_period_ms() -> u64 {
    params::DEFAULT_TICK_PERIOD.as_millis() as u64
}

fn default_startup_delay_ms() -> u64 {
    params::DEFAULT_STARTUP_DELAY.as_millis() as u64
}

fn default_stale_after_ms() -> u64 {
    params::DEFAULT_TELEMETRY_STALE_AFTER.as_millis() as u64
}

fn default_queue_capacity() -> usize {
    params::DEFAULT_COMMAND_QUEUE_CAPACITY
}

fn default_channel_count() -> usize {
    params::DEFAULT_CHANNEL_COUNT
}

fn default_devices() -> Vec<DeviceSection> {
    vec![DeviceSection::default()]
}

/// Root of the TOML config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorFile {
    #[serde(default)]
    pub governor: GovernorSection,
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceSection>,
    /// Present when the binary should drive the simulated modulator
    #[serde(default)]
    pub simulation: Option<SimulationSection>,
}

impl Default for GovernorFile {
    fn default() -> Self {
        Self {
            governor: GovernorSection::default(),
            devices: default_devices(),
            simulation: None,
        }
    }
}

/// Loop timing shared by every worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorSection {
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    #[serde(default = "default_stale_after_ms")]
    pub telemetry_stale_after_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub command_queue_capacity: usize,
}

impl GovernorSection {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn telemetry_stale_after(&self) -> Duration {
        Duration::from_millis(self.telemetry_stale_after_ms)
    }
}

impl Default for GovernorSection {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period_ms(),
            startup_delay_ms: default_startup_delay_ms(),
            telemetry_stale_after_ms: default_stale_after_ms(),
            command_queue_capacity: default_queue_capacity(),
        }
    }
}

/// One modulator and its vacuum channel slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSection {
    #[serde(default = "default_channel_count")]
    pub channel_count: usize,
    #[serde(default)]
    pub master_channel: usize,
    #[serde(default)]
    pub channels: Vec<ChannelOverride>,
}

impl DeviceSection {
    /// Configuration of slot `index` after applying its override, if any
    pub fn resolve_channel(&self, index: usize) -> ChannelConfig {
        let mut config = if index == self.master_channel {
            ChannelConfig::master_default()
        } else {
            ChannelConfig::slave_default()
        };
        if let Some(entry) = self.channels.iter().find(|c| c.index == index) {
            entry.apply(&mut config);
        }
        config
    }

    /// Reading slot observed by channel `index`
    pub fn vacuum_index(&self, index: usize) -> usize {
        self.channels
            .iter()
            .find(|c| c.index == index)
            .and_then(|c| c.vacuum_index)
            .unwrap_or(index)
    }
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            channel_count: default_channel_count(),
            master_channel: params::DEFAULT_MASTER_CHANNEL,
            channels: Vec::new(),
        }
    }
}

/// Partial channel configuration keyed by slot index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelOverride {
    pub index: usize,
    pub vacuum_index: Option<usize>,
    pub enabled: Option<bool>,
    pub trip_high: Option<f64>,
    pub alarm_high: Option<f64>,
    pub alarm_low: Option<f64>,
    pub trip_low: Option<f64>,
    pub ramp_speed: Option<f64>,
    pub ramp_check_time: Option<f64>,
    pub hv_max_point: Option<f64>,
    pub trip_blocking_time: Option<f64>,
    pub alarm_blocking_time: Option<f64>,
    pub alarm_decrease_time: Option<f64>,
    pub hv_trip_gain: Option<f64>,
    pub hv_alarm_gain: Option<f64>,
}

impl ChannelOverride {
    pub fn for_index(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn apply(&self, config: &mut ChannelConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        let values = [
            (ChannelField::TripHigh, self.trip_high),
            (ChannelField::AlarmHigh, self.alarm_high),
            (ChannelField::AlarmLow, self.alarm_low),
            (ChannelField::TripLow, self.trip_low),
            (ChannelField::RampSpeed, self.ramp_speed),
            (ChannelField::RampCheckTime, self.ramp_check_time),
            (ChannelField::HvMaxPoint, self.hv_max_point),
            (ChannelField::TripBlockingTime, self.trip_blocking_time),
            (ChannelField::AlarmBlockingTime, self.alarm_blocking_time),
            (ChannelField::AlarmDecreaseTime, self.alarm_decrease_time),
            (ChannelField::HvTripGain, self.hv_trip_gain),
            (ChannelField::HvAlarmGain, self.hv_alarm_gain),
        ];
        for (field, value) in values {
            if let Some(value) = value {
                config.set(field, value);
            }
        }
    }
}

/// Simulated modulator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSection {
    /// Telemetry publish period
    #[serde(default = "default_sim_poll_ms")]
    pub poll_period_ms: u64,
    /// How fast HV read-back follows the setpoint [V/s]
    #[serde(default = "default_sim_slew")]
    pub slew_rate_v_per_s: f64,
    /// Resting vacuum reading for every slot
    #[serde(default = "default_sim_baseline")]
    pub vacuum_baseline: f64,
    /// Vacuum rise per V/s of positive HV slew
    #[serde(default = "default_sim_outgassing")]
    pub outgassing_gain: f64,
    /// HV setpoint the simulated supply starts at [V]
    #[serde(default)]
    pub initial_setpoint_v: f64,
}

fn default_sim_poll_ms() -> u64 {
    500
}

fn default_sim_slew() -> f64 {
    5.0
}

fn default_sim_baseline() -> f64 {
    3.0
}

fn default_sim_outgassing() -> f64 {
    0.1
}

impl SimulationSection {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            poll_period_ms: default_sim_poll_ms(),
            slew_rate_v_per_s: default_sim_slew(),
            vacuum_baseline: default_sim_baseline(),
            outgassing_gain: default_sim_outgassing(),
            initial_setpoint_v: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_master_and_slave_defaults() {
        let device = DeviceSection::default();
        assert!(device.resolve_channel(0).enabled);
        assert!(!device.resolve_channel(1).enabled);
        assert_eq!(device.vacuum_index(4), 4);
    }

    #[test]
    fn test_override_applies_only_given_fields() {
        let mut entry = ChannelOverride::for_index(2);
        entry.enabled = Some(true);
        entry.hv_max_point = Some(1100.0);
        entry.vacuum_index = Some(0);
        let device = DeviceSection {
            channels: vec![entry],
            ..DeviceSection::default()
        };

        let config = device.resolve_channel(2);
        assert!(config.enabled);
        assert_eq!(config.hv_max_point, 1100.0);
        assert_eq!(config.ramp_check_time, 60.0);
        assert_eq!(device.vacuum_index(2), 0);
    }

    #[test]
    fn test_moved_master_channel() {
        let device = DeviceSection {
            master_channel: 3,
            ..DeviceSection::default()
        };
        assert!(!device.resolve_channel(0).enabled);
        assert!(device.resolve_channel(3).enabled);
    }
}
