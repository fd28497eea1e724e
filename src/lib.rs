//! HV auto-drive governor
//!
//! Drives the high voltage of a modulator from its vacuum readings: trips on
//! arcing, backs off on alarms and ramps back up while vacuum is healthy.
//! Each (device, channel) pair runs its own worker; only the master channel
//! of a device may command the HV actuator.

pub mod actuation;
pub mod config;
pub mod device;
pub mod governor;
pub mod sim;
pub mod state;
pub mod tasks;
pub mod telemetry;

pub use actuation::{ActuationError, Actuator, Command, CommandQueue};
pub use config::{ChannelConfig, ConfigError, GovernorFile};
pub use device::{ChannelId, Device, DeviceId, DeviceRegistry, MasterLink, Priority, RegistryError};
pub use governor::{Band, Governor, TickOutcome};
pub use tasks::{spawn_autodrive, LoopSettings};
