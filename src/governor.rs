//! Channel governor
//!
//! One `Governor` per (device, channel). A tick runs, in order: enabled
//! check, pending hold, telemetry freshness, interlock recovery, band
//! classification and the ramp controller. Ticks never block; every wait is
//! a [`Hold`](crate::state::Hold) deadline that later ticks check.

mod band;
mod interlock;
mod ramp;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use band::Band;
pub use ramp::{plan_step, RampBlock, RampDecision, RampOutcome, RampRegime};

use crate::actuation::ActuationError;
use crate::config::ChannelConfig;
use crate::device::{ChannelId, MasterLink, Priority};
use crate::state::{ChannelState, ChannelStatus, Hold, Release};
use crate::telemetry::{TelemetryFault, TelemetrySnapshot};

/// Result of one governor tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Channel disabled
    Idle,
    /// A hold is pending; nothing was evaluated
    Held(Hold),
    /// Telemetry could not be used; flags and holds are untouched
    TelemetryUnavailable(TelemetryFault),
    /// Bands were evaluated
    Evaluated {
        band: Band,
        ramp: Option<RampOutcome>,
    },
}

pub struct Governor {
    id: ChannelId,
    link: Option<MasterLink>,
    state: ChannelState,
    stale_after: Duration,
    ticks: u64,
    last_outcome: Option<TickOutcome>,
}

impl Governor {
    /// A governor with `link` is the master of its device; without one it
    /// evaluates bands and latches flags but never actuates.
    pub fn new(id: ChannelId, link: Option<MasterLink>, stale_after: Duration, now: Instant) -> Self {
        Self {
            id,
            link,
            state: ChannelState::new(now),
            stale_after,
            ticks: 0,
            last_outcome: None,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        if self.link.is_some() {
            Priority::Master
        } else {
            Priority::Slave
        }
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Deadline of the pending hold, if any
    pub fn hold_until(&self) -> Option<Instant> {
        self.state.hold.map(|h| h.until)
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            arcing: self.state.arcing,
            alarming: self.state.alarming,
            on_mid_point: self.state.on_mid_point,
            mid_point: self.state.mid_point,
            band: self.state.last_band,
            hold: self.state.hold,
            last_outcome: self.last_outcome,
            ticks: self.ticks,
        }
    }

    pub fn tick(
        &mut self,
        now: Instant,
        config: &ChannelConfig,
        vacuum_index: usize,
        telemetry: Option<&TelemetrySnapshot>,
    ) -> TickOutcome {
        self.ticks += 1;
        let outcome = self.evaluate(now, config, vacuum_index, telemetry);
        self.last_outcome = Some(outcome);
        outcome
    }

    fn evaluate(
        &mut self,
        now: Instant,
        config: &ChannelConfig,
        vacuum_index: usize,
        telemetry: Option<&TelemetrySnapshot>,
    ) -> TickOutcome {
        if !config.enabled {
            return TickOutcome::Idle;
        }

        if let Some(hold) = self.state.hold {
            if now < hold.until {
                return TickOutcome::Held(hold);
            }
        }

        let reading = match telemetry
            .ok_or(TelemetryFault::Missing)
            .and_then(|t| t.reading(vacuum_index, now, self.stale_after))
        {
            Ok(reading) => reading,
            Err(fault) => {
                // An expired hold stays queued until telemetry is usable again
                warn!(channel = %self.id, "Skipping tick: {}", fault);
                return TickOutcome::TelemetryUnavailable(fault);
            }
        };

        let mut recovery_done = false;
        if let Some(hold) = self.state.hold.take() {
            match hold.release {
                Release::Expire => {}
                Release::ClearAlarm => {
                    debug!(channel = %self.id, "Alarm blocking time elapsed");
                    self.state.alarming = false;
                }
                Release::ClearMidPoint => {
                    info!(channel = %self.id, mid_point = self.state.mid_point, "Leaving mid-point ceiling");
                    self.state.on_mid_point = false;
                }
                Release::Interlock(step) => {
                    if let Some(held) = self.advance_interlock(step, now, &reading) {
                        return TickOutcome::Held(held);
                    }
                    recovery_done = true;
                }
            }
        }

        if !recovery_done {
            if let Some(held) = self.check_interlock(now, config, &reading) {
                return TickOutcome::Held(held);
            }
        }

        let band = Band::classify(reading.vacuum, &config.thresholds);
        let ramp = self.apply_band(band, now, config, &reading);
        TickOutcome::Evaluated { band, ramp }
    }

    /// Send a command through the master link. Slaves have no link: the
    /// command is dropped and reported as delivered.
    fn dispatch<F>(&self, action: &str, send: F) -> Result<(), ActuationError>
    where
        F: FnOnce(&MasterLink) -> Result<(), ActuationError>,
    {
        let Some(link) = &self.link else {
            debug!(channel = %self.id, "Slave channel, not issuing {}", action);
            return Ok(());
        };
        let result = send(link);
        match &result {
            Ok(()) => info!(channel = %self.id, device = %link.device_id(), "Issued {}", action),
            Err(e) => warn!(
                channel = %self.id,
                device = %link.device_id(),
                "Failed to issue {}: {}",
                action,
                e
            ),
        }
        result
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("id", &self.id)
            .field("priority", &self.priority())
            .field("state", &self.state)
            .finish()
    }
}
