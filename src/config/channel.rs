//! Per-channel tuning: thresholds, gains, timers and ramp settings
//!
//! A `ChannelConfig` is what the field-write path mutates at runtime. The
//! governor only ever reads a validated copy of it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::params::{protection, ramp, thresholds};

/// The four vacuum thresholds of one channel.
///
/// Valid only when `trip_low < alarm_low <= alarm_high < trip_high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub trip_high: f64,
    pub alarm_high: f64,
    pub alarm_low: f64,
    pub trip_low: f64,
}

impl Thresholds {
    pub const fn new(trip_high: f64, alarm_high: f64, alarm_low: f64, trip_low: f64) -> Self {
        Self {
            trip_high,
            alarm_high,
            alarm_low,
            trip_low,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.trip_low < self.alarm_low
            && self.alarm_low <= self.alarm_high
            && self.alarm_high < self.trip_high
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(
            thresholds::DEFAULT_TRIP_HIGH,
            thresholds::DEFAULT_ALARM_HIGH,
            thresholds::DEFAULT_ALARM_LOW,
            thresholds::DEFAULT_TRIP_LOW,
        )
    }
}

/// Runtime configuration of one vacuum channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Loop idles while false
    pub enabled: bool,

    pub thresholds: Thresholds,

    // === Ramp ===
    /// Step per check in the normal regime [V]
    pub ramp_speed: f64,
    /// Minimum interval between steps in the normal regime [s]
    pub ramp_check_time: f64,
    /// HV ceiling [V]
    pub hv_max_point: f64,

    // === Gains (percent of HV read-back) ===
    pub hv_trip_gain: f64,
    pub hv_alarm_gain: f64,

    // === Timers [s] ===
    pub trip_blocking_time: f64,
    pub alarm_blocking_time: f64,
    pub alarm_decrease_time: f64,
}

impl ChannelConfig {
    /// Configuration of the slot that owns the actuator
    pub fn master_default() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Configuration of every other slot. Tuning matches the master slot so
    /// enabling a slave never exposes an unordered threshold set.
    pub fn slave_default() -> Self {
        Self::default()
    }

    pub fn trip_blocking(&self) -> Duration {
        seconds(self.trip_blocking_time)
    }

    pub fn alarm_blocking(&self) -> Duration {
        seconds(self.alarm_blocking_time)
    }

    pub fn alarm_decrease(&self) -> Duration {
        seconds(self.alarm_decrease_time)
    }

    pub fn ramp_check(&self) -> Duration {
        seconds(self.ramp_check_time)
    }

    /// Read a single field as a number (`enabled` reads as 0.0 / 1.0)
    pub fn get(&self, field: ChannelField) -> f64 {
        match field {
            ChannelField::Enabled => {
                if self.enabled {
                    1.0
                } else {
                    0.0
                }
            }
            ChannelField::TripHigh => self.thresholds.trip_high,
            ChannelField::AlarmHigh => self.thresholds.alarm_high,
            ChannelField::AlarmLow => self.thresholds.alarm_low,
            ChannelField::TripLow => self.thresholds.trip_low,
            ChannelField::RampSpeed => self.ramp_speed,
            ChannelField::RampCheckTime => self.ramp_check_time,
            ChannelField::HvMaxPoint => self.hv_max_point,
            ChannelField::TripBlockingTime => self.trip_blocking_time,
            ChannelField::AlarmBlockingTime => self.alarm_blocking_time,
            ChannelField::AlarmDecreaseTime => self.alarm_decrease_time,
            ChannelField::HvTripGain => self.hv_trip_gain,
            ChannelField::HvAlarmGain => self.hv_alarm_gain,
        }
    }

    /// Overwrite a single field. No validation happens here.
    pub fn set(&mut self, field: ChannelField, value: f64) {
        match field {
            ChannelField::Enabled => self.enabled = value != 0.0,
            ChannelField::TripHigh => self.thresholds.trip_high = value,
            ChannelField::AlarmHigh => self.thresholds.alarm_high = value,
            ChannelField::AlarmLow => self.thresholds.alarm_low = value,
            ChannelField::TripLow => self.thresholds.trip_low = value,
            ChannelField::RampSpeed => self.ramp_speed = value,
            ChannelField::RampCheckTime => self.ramp_check_time = value,
            ChannelField::HvMaxPoint => self.hv_max_point = value,
            ChannelField::TripBlockingTime => self.trip_blocking_time = value,
            ChannelField::AlarmBlockingTime => self.alarm_blocking_time = value,
            ChannelField::AlarmDecreaseTime => self.alarm_decrease_time = value,
            ChannelField::HvTripGain => self.hv_trip_gain = value,
            ChannelField::HvAlarmGain => self.hv_alarm_gain = value,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            thresholds: Thresholds::default(),
            ramp_speed: ramp::DEFAULT_SPEED_V,
            ramp_check_time: ramp::DEFAULT_CHECK_TIME_S,
            hv_max_point: ramp::DEFAULT_HV_MAX_POINT_V,
            hv_trip_gain: protection::DEFAULT_HV_TRIP_GAIN_PCT,
            hv_alarm_gain: protection::DEFAULT_HV_ALARM_GAIN_PCT,
            trip_blocking_time: protection::DEFAULT_TRIP_BLOCKING_TIME_S,
            alarm_blocking_time: protection::DEFAULT_ALARM_BLOCKING_TIME_S,
            alarm_decrease_time: protection::DEFAULT_ALARM_DECREASE_TIME_S,
        }
    }
}

/// Individually writable channel parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelField {
    Enabled,
    TripHigh,
    AlarmHigh,
    AlarmLow,
    TripLow,
    RampSpeed,
    RampCheckTime,
    HvMaxPoint,
    TripBlockingTime,
    AlarmBlockingTime,
    AlarmDecreaseTime,
    HvTripGain,
    HvAlarmGain,
}

impl ChannelField {
    pub const ALL: [ChannelField; 13] = [
        ChannelField::Enabled,
        ChannelField::TripHigh,
        ChannelField::AlarmHigh,
        ChannelField::AlarmLow,
        ChannelField::TripLow,
        ChannelField::RampSpeed,
        ChannelField::RampCheckTime,
        ChannelField::HvMaxPoint,
        ChannelField::TripBlockingTime,
        ChannelField::AlarmBlockingTime,
        ChannelField::AlarmDecreaseTime,
        ChannelField::HvTripGain,
        ChannelField::HvAlarmGain,
    ];

    /// Key used in config files and error messages
    pub fn name(self) -> &'static str {
        match self {
            ChannelField::Enabled => "enabled",
            ChannelField::TripHigh => "trip_high",
            ChannelField::AlarmHigh => "alarm_high",
            ChannelField::AlarmLow => "alarm_low",
            ChannelField::TripLow => "trip_low",
            ChannelField::RampSpeed => "ramp_speed",
            ChannelField::RampCheckTime => "ramp_check_time",
            ChannelField::HvMaxPoint => "hv_max_point",
            ChannelField::TripBlockingTime => "trip_blocking_time",
            ChannelField::AlarmBlockingTime => "alarm_blocking_time",
            ChannelField::AlarmDecreaseTime => "alarm_decrease_time",
            ChannelField::HvTripGain => "hv_trip_gain",
            ChannelField::HvAlarmGain => "hv_alarm_gain",
        }
    }
}

impl fmt::Display for ChannelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Negative and non-finite timer values collapse to zero; validation rejects
/// them before they reach a live config.
fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}
