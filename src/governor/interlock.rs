//! Interlock recovery
//!
//! A device that is not RUNNING goes through: hold-off, reset control word,
//! settle, READY check, restart setpoint, restart delay, RUNNING. Each wait
//! is a hold, so the sequence spans several ticks.

use tokio::time::Instant;
use tracing::info;

use super::Governor;
use crate::config::params::interlock;
use crate::config::ChannelConfig;
use crate::state::{Hold, InterlockStep, Release};
use crate::telemetry::{ChannelReading, StateCode};

impl Governor {
    /// Start recovery when the device has left RUNNING
    pub(super) fn check_interlock(
        &mut self,
        now: Instant,
        config: &ChannelConfig,
        reading: &ChannelReading,
    ) -> Option<Hold> {
        if reading.state.is_running() {
            return None;
        }
        info!(
            channel = %self.id,
            state = %reading.state,
            "Device not running, interlock reset in {:.0}s",
            config.trip_blocking().as_secs_f64()
        );
        Some(self.hold(now + config.trip_blocking(), InterlockStep::Reset))
    }

    /// Run `step` of a sequence whose hold has just expired. `None` means
    /// the sequence is over and the tick may continue into bands.
    pub(super) fn advance_interlock(
        &mut self,
        step: InterlockStep,
        now: Instant,
        reading: &ChannelReading,
    ) -> Option<Hold> {
        match step {
            InterlockStep::Reset => {
                let sent = self.dispatch("interlock reset", |link| {
                    link.set_control_word(interlock::RESET_CONTROL_WORD)
                });
                Some(match sent {
                    Ok(()) => self.hold(now + interlock::SETTLE_TIME, InterlockStep::CheckReady),
                    Err(_) => self.hold(now, InterlockStep::Reset),
                })
            }
            InterlockStep::CheckReady => {
                if reading.state != StateCode::READY {
                    info!(channel = %self.id, state = %reading.state, "Device not ready after interlock reset");
                    return None;
                }
                let sent = self.dispatch(
                    &format!("restart setpoint {:.1} V", interlock::RESTART_VOLTAGE_V),
                    |link| link.set_hv_setpoint(interlock::RESTART_VOLTAGE_V),
                );
                Some(match sent {
                    Ok(()) => self.hold(now + interlock::RESTART_DELAY, InterlockStep::Restart),
                    Err(_) => self.hold(now, InterlockStep::CheckReady),
                })
            }
            InterlockStep::Restart => {
                match self.dispatch("set_mode RUNNING (restart)", |link| link.set_mode(StateCode::RUNNING)) {
                    Ok(()) => None,
                    Err(_) => Some(self.hold(now, InterlockStep::Restart)),
                }
            }
        }
    }

    fn hold(&mut self, until: Instant, step: InterlockStep) -> Hold {
        self.state.hold_until(until, Release::Interlock(step));
        Hold {
            until,
            release: Release::Interlock(step),
        }
    }
}
