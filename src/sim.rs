//! Simulated modulator
//!
//! Stands in for the telemetry and actuation transports: applies governor
//! commands to a crude model of the HV supply and publishes telemetry
//! snapshots for the device it simulates.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::actuation::Command;
use crate::config::params::interlock;
use crate::config::SimulationSection;
use crate::device::Device;
use crate::telemetry::{StateCode, TelemetrySnapshot};

/// Electrical state of the simulated supply
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulatorState {
    pub mode: StateCode,
    pub hv_set: f64,
    pub hv_read: f64,
    /// HV read-back rate of change over the last step [V/s]
    pub slew: f64,
}

#[derive(Debug, Default)]
struct Overrides {
    vacuum: Vec<Option<f64>>,
    forced_mode: Option<StateCode>,
}

/// Scripting handle for a running simulation
#[derive(Debug, Clone)]
pub struct SimHandle {
    overrides: Arc<Mutex<Overrides>>,
}

impl SimHandle {
    /// Pin vacuum slot `index` to `value`; `None` restores the model
    pub fn set_vacuum(&self, index: usize, value: Option<f64>) {
        let mut overrides = lock(&self.overrides);
        if overrides.vacuum.len() <= index {
            overrides.vacuum.resize(index + 1, None);
        }
        overrides.vacuum[index] = value;
    }

    /// Switch the supply into `mode` on its next step, as a hardware
    /// interlock would
    pub fn force_mode(&self, mode: StateCode) {
        lock(&self.overrides).forced_mode = Some(mode);
    }
}

pub struct SimulatedModulator {
    device: Arc<Device>,
    settings: SimulationSection,
    state: ModulatorState,
    overrides: Arc<Mutex<Overrides>>,
}

impl SimulatedModulator {
    /// The supply starts RUNNING at the configured initial setpoint
    pub fn new(device: Arc<Device>, settings: SimulationSection) -> (Self, SimHandle) {
        let overrides = Arc::new(Mutex::new(Overrides::default()));
        let state = ModulatorState {
            mode: StateCode::RUNNING,
            hv_set: settings.initial_setpoint_v,
            hv_read: settings.initial_setpoint_v,
            slew: 0.0,
        };
        let handle = SimHandle {
            overrides: Arc::clone(&overrides),
        };
        (
            Self {
                device,
                settings,
                state,
                overrides,
            },
            handle,
        )
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn state(&self) -> ModulatorState {
        self.state
    }

    pub fn apply(&mut self, command: Command) {
        match command {
            Command::SetMode { mode, .. } => {
                info!(device = %self.device.id(), "Simulated mode {} -> {}", self.state.mode, mode);
                self.state.mode = mode;
            }
            Command::SetHvSetpoint { volts, .. } => {
                debug!(device = %self.device.id(), "Simulated setpoint {:.1} V", volts);
                self.state.hv_set = volts;
            }
            Command::SetControlWord { word, .. } => {
                if word == interlock::RESET_CONTROL_WORD && !self.state.mode.is_running() {
                    info!(device = %self.device.id(), "Simulated interlock cleared");
                    self.state.mode = StateCode::READY;
                } else {
                    debug!(device = %self.device.id(), "Control word 0x{:04X} ignored", word);
                }
            }
        }
    }

    /// Advance the model by `dt`
    pub fn step(&mut self, dt: Duration) {
        if let Some(mode) = lock(&self.overrides).forced_mode.take() {
            warn!(device = %self.device.id(), "Simulated interlock forced mode {}", mode);
            self.state.mode = mode;
        }

        let secs = dt.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let max_change = self.settings.slew_rate_v_per_s * secs;
        let target = if self.state.mode.is_running() {
            self.state.hv_set
        } else {
            0.0
        };
        let previous = self.state.hv_read;
        let delta = (target - previous).clamp(-max_change, max_change);
        self.state.hv_read = previous + delta;
        self.state.slew = delta / secs;
    }

    pub fn vacuum(&self) -> Vec<f64> {
        let overrides = lock(&self.overrides);
        let modelled =
            self.settings.vacuum_baseline + self.settings.outgassing_gain * self.state.slew.max(0.0);
        (0..self.device.channels().len())
            .map(|i| overrides.vacuum.get(i).copied().flatten().unwrap_or(modelled))
            .collect()
    }

    pub fn publish(&self, now: Instant) {
        self.device.publish_telemetry(TelemetrySnapshot::new(
            self.state.mode,
            self.state.hv_read,
            self.state.hv_set,
            self.vacuum(),
            now,
        ));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
