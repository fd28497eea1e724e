//! Telemetry snapshot consumed by the governor
//!
//! The telemetry transport owns polling and message parsing. It hands the
//! latest decoded values to a `Device`, which republishes them on a watch
//! channel for every channel worker of that device.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::params::interlock;

/// Modulator operating-state code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateCode(pub u32);

impl StateCode {
    pub const RUNNING: StateCode = StateCode(interlock::STATE_RUNNING);
    pub const READY: StateCode = StateCode(interlock::STATE_READY);
    pub const TRIP: StateCode = StateCode(interlock::STATE_TRIP);

    pub fn is_running(self) -> bool {
        self == Self::RUNNING
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Latest read-back values of one device
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub state: StateCode,
    /// HV read-back [V]
    pub hv_read: f64,
    /// HV setpoint as reported by the device [V]
    pub hv_set: f64,
    /// One reading per vacuum slot
    pub vacuum: Vec<f64>,
    pub captured_at: Instant,
}

/// Why a channel could not use the current telemetry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryFault {
    /// Nothing has been published yet
    Missing,
    /// Snapshot older than the configured limit
    Stale { age: Duration },
    /// HV values are not finite numbers
    InvalidHv,
    /// The observed slot has no usable reading
    InvalidVacuum { index: usize },
}

impl fmt::Display for TelemetryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryFault::Missing => write!(f, "no telemetry received yet"),
            TelemetryFault::Stale { age } => write!(f, "telemetry is {:.1}s old", age.as_secs_f64()),
            TelemetryFault::InvalidHv => write!(f, "HV read-back is not a number"),
            TelemetryFault::InvalidVacuum { index } => {
                write!(f, "vacuum reading {} is missing or not a number", index)
            }
        }
    }
}

/// The values a single channel tick works from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReading {
    pub state: StateCode,
    pub hv_read: f64,
    pub hv_set: f64,
    pub vacuum: f64,
}

impl TelemetrySnapshot {
    pub fn new(state: StateCode, hv_read: f64, hv_set: f64, vacuum: Vec<f64>, captured_at: Instant) -> Self {
        Self {
            state,
            hv_read,
            hv_set,
            vacuum,
            captured_at,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }

    /// Extract what channel `vacuum_index` needs, rejecting stale or
    /// malformed values.
    pub fn reading(
        &self,
        vacuum_index: usize,
        now: Instant,
        stale_after: Duration,
    ) -> Result<ChannelReading, TelemetryFault> {
        let age = self.age(now);
        if age > stale_after {
            return Err(TelemetryFault::Stale { age });
        }
        if !self.hv_read.is_finite() || !self.hv_set.is_finite() {
            return Err(TelemetryFault::InvalidHv);
        }
        let vacuum = self
            .vacuum
            .get(vacuum_index)
            .copied()
            .filter(|v| v.is_finite())
            .ok_or(TelemetryFault::InvalidVacuum {
                index: vacuum_index,
            })?;

        Ok(ChannelReading {
            state: self.state,
            hv_read: self.hv_read,
            hv_set: self.hv_set,
            vacuum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(now: Instant) -> TelemetrySnapshot {
        TelemetrySnapshot::new(StateCode::RUNNING, 950.0, 950.0, vec![4.0, f64::NAN], now)
    }

    #[test]
    fn test_reading_ok() {
        let now = Instant::now();
        let reading = snapshot(now)
            .reading(0, now + Duration::from_secs(1), Duration::from_secs(10))
            .unwrap();
        assert_eq!(reading.vacuum, 4.0);
        assert_eq!(reading.hv_read, 950.0);
        assert!(reading.state.is_running());
    }

    #[test]
    fn test_reading_stale() {
        let now = Instant::now();
        let fault = snapshot(now)
            .reading(0, now + Duration::from_secs(11), Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(fault, TelemetryFault::Stale { .. }));
    }

    #[test]
    fn test_reading_invalid_vacuum() {
        let now = Instant::now();
        let snap = snapshot(now);
        assert_eq!(
            snap.reading(1, now, Duration::from_secs(10)),
            Err(TelemetryFault::InvalidVacuum { index: 1 })
        );
        assert_eq!(
            snap.reading(5, now, Duration::from_secs(10)),
            Err(TelemetryFault::InvalidVacuum { index: 5 })
        );
    }

    #[test]
    fn test_reading_invalid_hv() {
        let now = Instant::now();
        let mut snap = snapshot(now);
        snap.hv_read = f64::INFINITY;
        assert_eq!(
            snap.reading(0, now, Duration::from_secs(10)),
            Err(TelemetryFault::InvalidHv)
        );
    }

    #[test]
    fn test_state_code_display() {
        assert_eq!(StateCode::RUNNING.to_string(), "0xD000");
        assert_eq!(StateCode(0x6000).to_string(), "0x6000");
    }
}
