//! HV ramp controller
//!
//! Raises the HV setpoint in small steps while vacuum is healthy. Two
//! regimes: fast recovery at low voltage, and slow approach to the ceiling.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::Governor;
use crate::config::params::ramp;
use crate::config::ChannelConfig;
use crate::state::{ChannelState, Release};
use crate::telemetry::ChannelReading;

/// Step size and minimum interval in effect for one ramp check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampRegime {
    pub interval: Duration,
    pub step: f64,
}

impl RampRegime {
    pub fn select(hv_read: f64, config: &ChannelConfig) -> Self {
        if hv_read <= ramp::FAST_RECOVERY_THRESHOLD_V {
            Self {
                interval: Duration::from_secs_f64(ramp::FAST_RECOVERY_INTERVAL_S),
                step: ramp::FAST_RECOVERY_STEP_V,
            }
        } else {
            Self {
                interval: config.ramp_check(),
                step: config.ramp_speed,
            }
        }
    }
}

/// Why a ramp check did not advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampBlock {
    /// Minimum interval since the last step has not elapsed
    Interval,
    /// Read-back has not caught up with the setpoint
    Feedback,
    /// Already at (or within tolerance of) the active ceiling
    Ceiling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RampDecision {
    Advance { setpoint: f64 },
    Blocked(RampBlock),
}

/// What the ramp controller did on one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RampOutcome {
    /// Slave channel
    Suppressed,
    Stepped { setpoint: f64 },
    Waiting(RampBlock),
    /// Could not advance under the mid-point ceiling; held until `until`,
    /// after which the full ceiling applies.
    MidPointHold { until: Instant },
    /// The setpoint command was not delivered; retried next tick
    CommandFailed,
}

/// Decide whether a step is due. Pure; does not touch `state`.
pub fn plan_step(
    state: &ChannelState,
    config: &ChannelConfig,
    reading: &ChannelReading,
    now: Instant,
) -> RampDecision {
    let regime = RampRegime::select(reading.hv_read, config);
    let ceiling = if state.on_mid_point {
        state.mid_point
    } else {
        config.hv_max_point
    };

    let elapsed = now.saturating_duration_since(state.last_increase);
    if elapsed < regime.interval {
        return RampDecision::Blocked(RampBlock::Interval);
    }
    if (reading.hv_read - reading.hv_set).abs() > ramp::FEEDBACK_TOLERANCE_V {
        return RampDecision::Blocked(RampBlock::Feedback);
    }
    if reading.hv_read >= ceiling - ramp::FEEDBACK_TOLERANCE_V {
        return RampDecision::Blocked(RampBlock::Ceiling);
    }

    let stepped = reading.hv_set + regime.step;
    let limit = config.hv_max_point.min(ceiling);
    // Commands carry 0.1 V resolution; a clamped value rounds down so the
    // issued setpoint stays under the limit
    let setpoint = if stepped > limit {
        (limit * 10.0).floor() / 10.0
    } else {
        stepped
    };
    if setpoint <= reading.hv_set {
        return RampDecision::Blocked(RampBlock::Ceiling);
    }
    RampDecision::Advance { setpoint }
}

impl Governor {
    pub(super) fn increase_hv(
        &mut self,
        now: Instant,
        config: &ChannelConfig,
        reading: &ChannelReading,
    ) -> RampOutcome {
        if self.link.is_none() {
            return RampOutcome::Suppressed;
        }

        match plan_step(&self.state, config, reading, now) {
            RampDecision::Advance { setpoint } => {
                let sent = self.dispatch(&format!("set_hv_setpoint {:.1} V (ramp)", setpoint), |link| {
                    link.set_hv_setpoint(setpoint)
                });
                match sent {
                    Ok(()) => {
                        self.state.last_increase = now;
                        RampOutcome::Stepped { setpoint }
                    }
                    Err(_) => RampOutcome::CommandFailed,
                }
            }
            RampDecision::Blocked(block) if self.state.on_mid_point => {
                let until = now + config.trip_blocking();
                debug!(
                    channel = %self.id,
                    mid_point = self.state.mid_point,
                    "Ramp blocked ({:?}) under mid-point ceiling, holding",
                    block
                );
                self.state.hold_until(until, Release::ClearMidPoint);
                RampOutcome::MidPointHold { until }
            }
            RampDecision::Blocked(block) => RampOutcome::Waiting(block),
        }
    }
}
