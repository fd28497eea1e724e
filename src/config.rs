//! Configuration module
//!
//! Named defaults, the per-channel runtime configuration, and loading and
//! validation of the TOML config file.

pub mod channel;
pub mod file;
pub mod loader;
pub mod params;
pub mod validation;

pub use channel::{ChannelConfig, ChannelField, Thresholds};
pub use file::{ChannelOverride, DeviceSection, GovernorFile, GovernorSection, SimulationSection};
pub use loader::{load_from_file, load_from_str};
pub use validation::{validate_channel, ConfigError};
