//! Threshold band classifier
//!
//! Entering a fault band latches a flag that only the matching recovery band
//! (at a lower reading) clears, after a cooldown.

use std::fmt;

use tokio::time::Instant;
use tracing::{info, warn};

use super::{Governor, RampOutcome};
use crate::config::{ChannelConfig, Thresholds};
use crate::state::Release;
use crate::telemetry::{ChannelReading, StateCode};

/// Vacuum reading ranges, checked top to bottom; first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    /// `v >= trip_high`
    TripHigh,
    /// `alarm_high <= v < trip_high`
    AlarmHigh,
    /// `alarm_low <= v < alarm_high`
    Normal,
    /// `trip_low <= v < alarm_low`
    RecoveringLow,
    /// `v < trip_low`
    TripLow,
}

impl Band {
    pub fn classify(vacuum: f64, thresholds: &Thresholds) -> Band {
        if vacuum >= thresholds.trip_high {
            Band::TripHigh
        } else if vacuum >= thresholds.alarm_high {
            Band::AlarmHigh
        } else if vacuum >= thresholds.alarm_low {
            Band::Normal
        } else if vacuum >= thresholds.trip_low {
            Band::RecoveringLow
        } else {
            Band::TripLow
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Band::TripHigh => "trip-high",
            Band::AlarmHigh => "alarm-high",
            Band::Normal => "normal",
            Band::RecoveringLow => "recovering-low",
            Band::TripLow => "trip-low",
        };
        f.write_str(name)
    }
}

impl Governor {
    /// Run the action of `band`. Returns the ramp outcome when the ramp
    /// controller was invoked.
    pub(super) fn apply_band(
        &mut self,
        band: Band,
        now: Instant,
        config: &ChannelConfig,
        reading: &ChannelReading,
    ) -> Option<RampOutcome> {
        let entered = self.state.last_band != Some(band);
        if entered {
            info!(
                channel = %self.id,
                vacuum = reading.vacuum,
                hv_read = reading.hv_read,
                "Vacuum band {} -> {}",
                self.state
                    .last_band
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                band
            );
        }
        self.state.last_band = Some(band);

        match band {
            Band::TripHigh => {
                // Tracks the read-back while tripping, so the ceiling falls with HV
                self.state.mid_point = reading.hv_read * config.hv_trip_gain / 100.0;
                self.state.arcing = true;
                self.state.on_mid_point = true;
                // Failure is retried by the next tick in this band
                let _ = self.dispatch("set_mode TRIP", |link| link.set_mode(StateCode::TRIP));
                None
            }
            Band::AlarmHigh => {
                let target = reading.hv_read * config.hv_alarm_gain / 100.0;
                self.state.alarming = true;
                let sent = self.dispatch(&format!("set_hv_setpoint {:.1} V (alarm)", target), |link| {
                    link.set_hv_setpoint(target)
                });
                if sent.is_ok() {
                    self.state
                        .hold_until(now + config.alarm_decrease(), Release::Expire);
                } else {
                    warn!(channel = %self.id, "Alarm reduction not delivered, retrying next tick");
                }
                None
            }
            Band::Normal => {
                if !self.state.arcing && !self.state.alarming {
                    Some(self.increase_hv(now, config, reading))
                } else {
                    None
                }
            }
            Band::RecoveringLow => {
                if self.state.alarming {
                    self.state
                        .hold_until(now + config.alarm_blocking(), Release::ClearAlarm);
                    None
                } else if !self.state.arcing {
                    Some(self.increase_hv(now, config, reading))
                } else {
                    None
                }
            }
            Band::TripLow => {
                if self.state.arcing {
                    let sent = self.dispatch("set_mode RUNNING", |link| {
                        link.set_mode(StateCode::RUNNING)
                    });
                    if sent.is_err() {
                        // Stay latched so the next tick repeats the transition
                        return None;
                    }
                    self.state.arcing = false;
                }
                Some(self.increase_hv(now, config, reading))
            }
        }
    }
}
