//! Per-channel transient state
//!
//! Only the channel's own governor mutates this. Observers read the
//! `ChannelStatus` copy that the worker publishes after every tick.

use tokio::time::Instant;

use crate::governor::{Band, TickOutcome};

/// Step of the interlock recovery sequence that runs when a hold expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterlockStep {
    /// Hold-off elapsed: send the reset control word
    Reset,
    /// Settle time elapsed: look for the READY state
    CheckReady,
    /// Restart delay elapsed: re-enter running mode
    Restart,
}

/// What happens when a hold expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Nothing; the hold only paused the channel
    Expire,
    /// Clear the alarm latch
    ClearAlarm,
    /// Drop the mid-point ceiling
    ClearMidPoint,
    Interlock(InterlockStep),
}

/// Deadline before which the channel issues nothing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hold {
    pub until: Instant,
    pub release: Release,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    /// Latched by Trip-High, cleared by Trip-Low
    pub arcing: bool,
    /// Latched by Alarm-High, cleared after the alarm blocking time
    pub alarming: bool,
    /// Ramp ceiling is `mid_point` instead of `hv_max_point`
    pub on_mid_point: bool,
    pub mid_point: f64,
    pub last_increase: Instant,
    pub hold: Option<Hold>,
    /// Band of the previous evaluated tick
    pub last_band: Option<Band>,
}

impl ChannelState {
    pub fn new(now: Instant) -> Self {
        Self {
            arcing: false,
            alarming: false,
            on_mid_point: false,
            mid_point: 0.0,
            last_increase: now,
            hold: None,
            last_band: None,
        }
    }

    pub fn hold_until(&mut self, until: Instant, release: Release) {
        self.hold = Some(Hold { until, release });
    }
}

/// Published view of one channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelStatus {
    pub arcing: bool,
    pub alarming: bool,
    pub on_mid_point: bool,
    pub mid_point: f64,
    pub band: Option<Band>,
    pub hold: Option<Hold>,
    pub last_outcome: Option<TickOutcome>,
    pub ticks: u64,
}
