//! Worker tasks
//!
//! One auto-drive task per (device, channel) pair, plus the simulated plant
//! when the binary runs without real transports.

pub mod autodrive;
pub mod plant;

pub use autodrive::{autodrive_task, spawn_autodrive, LoopSettings};
pub use plant::plant_task;
