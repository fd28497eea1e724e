//! Governor parameters and their default values

use std::time::Duration;

/// Number of vacuum channel slots per device (default)
pub const DEFAULT_CHANNEL_COUNT: usize = 6;

/// Upper bound on channel slots a device may declare
pub const MAX_CHANNEL_COUNT: usize = 16;

/// Slot that owns the HV actuator (default)
pub const DEFAULT_MASTER_CHANNEL: usize = 0;

/// Vacuum thresholds (default values)
pub mod thresholds {
    pub const DEFAULT_TRIP_HIGH: f64 = 5.2;
    pub const DEFAULT_ALARM_HIGH: f64 = 4.8;
    pub const DEFAULT_ALARM_LOW: f64 = 3.6;
    pub const DEFAULT_TRIP_LOW: f64 = 3.5;
}

/// Ramp parameters (default values)
pub mod ramp {
    /// Step per ramp check in the normal regime [V]
    pub const DEFAULT_SPEED_V: f64 = 1.0;

    /// Minimum interval between steps in the normal regime [s]
    pub const DEFAULT_CHECK_TIME_S: f64 = 60.0;

    /// HV ceiling [V]
    pub const DEFAULT_HV_MAX_POINT_V: f64 = 1290.0;

    /// Read-back at or below this uses the fast-recovery regime [V]
    pub const FAST_RECOVERY_THRESHOLD_V: f64 = 1000.0;

    /// Fast-recovery step [V]
    pub const FAST_RECOVERY_STEP_V: f64 = 10.0;

    /// Fast-recovery minimum interval [s]
    pub const FAST_RECOVERY_INTERVAL_S: f64 = 10.0;

    /// Read-back must be this close to the setpoint before the next step [V]
    pub const FEEDBACK_TOLERANCE_V: f64 = 2.0;
}

/// Protective timers and gains (default values)
pub mod protection {
    /// Hold after a trip before resuming full-range ramping [s]
    pub const DEFAULT_TRIP_BLOCKING_TIME_S: f64 = 300.0;

    /// Cooldown before an alarm latch may clear [s]
    pub const DEFAULT_ALARM_BLOCKING_TIME_S: f64 = 30.0;

    /// Hold after an alarm-driven HV reduction [s]
    pub const DEFAULT_ALARM_DECREASE_TIME_S: f64 = 300.0;

    /// Mid-point ceiling as a percentage of HV read-back at trip [%]
    pub const DEFAULT_HV_TRIP_GAIN_PCT: f64 = 90.0;

    /// Alarm setpoint as a percentage of HV read-back [%]
    pub const DEFAULT_HV_ALARM_GAIN_PCT: f64 = 100.0;
}

/// Modulator operating-state codes and interlock recovery sequence
pub mod interlock {
    use std::time::Duration;

    /// Nominal running state
    pub const STATE_RUNNING: u32 = 0xD000;

    /// Interlock cleared, ready to re-enter running
    pub const STATE_READY: u32 = 0x6000;

    /// Protective trip mode
    pub const STATE_TRIP: u32 = 0xA000;

    /// Control word that clears the hardware interlock
    pub const RESET_CONTROL_WORD: u16 = 0x0001;

    /// Wait after the reset word before checking for READY
    pub const SETTLE_TIME: Duration = Duration::from_secs(5);

    /// Setpoint applied before re-entering running mode [V]
    pub const RESTART_VOLTAGE_V: f64 = 300.0;

    /// Wait between the restart setpoint and the mode change
    pub const RESTART_DELAY: Duration = Duration::from_secs(5);
}

/// Worker loop timing (default values)
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(1000);

/// Delay before a worker's first tick
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_millis(5000);

/// Telemetry older than this is treated as unavailable
pub const DEFAULT_TELEMETRY_STALE_AFTER: Duration = Duration::from_millis(10_000);

/// Capacity of the actuation command queue
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 64;
