//! Actuation gateway
//!
//! The governor expresses every change to the modulator as a [`Command`].
//! Commands reach the transport through an [`Actuator`]; only a device's
//! `MasterLink` holds one.

use std::fmt;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::device::DeviceId;
use crate::telemetry::StateCode;

/// Request to change the modulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Operating-mode transition (protective trip, running, ...)
    SetMode { device: DeviceId, mode: StateCode },
    /// HV setpoint [V], one decimal place
    SetHvSetpoint { device: DeviceId, volts: f64 },
    /// Bit-encoded hardware interlock control
    SetControlWord { device: DeviceId, word: u16 },
}

impl Command {
    pub fn set_mode(device: DeviceId, mode: StateCode) -> Self {
        Command::SetMode { device, mode }
    }

    /// Setpoints are rounded to the 0.1 V resolution the transport expects
    pub fn set_hv_setpoint(device: DeviceId, volts: f64) -> Self {
        Command::SetHvSetpoint {
            device,
            volts: (volts * 10.0).round() / 10.0,
        }
    }

    pub fn set_control_word(device: DeviceId, word: u16) -> Self {
        Command::SetControlWord { device, word }
    }

    pub fn device(&self) -> DeviceId {
        match *self {
            Command::SetMode { device, .. }
            | Command::SetHvSetpoint { device, .. }
            | Command::SetControlWord { device, .. } => device,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetMode { device, mode } => write!(f, "{} set_mode {}", device, mode),
            Command::SetHvSetpoint { device, volts } => {
                write!(f, "{} set_hv_setpoint {:.1} V", device, volts)
            }
            Command::SetControlWord { device, word } => {
                write!(f, "{} set_control_word 0x{:04X}", device, word)
            }
        }
    }
}

/// Actuation failures. None of them are fatal to a governor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActuationError {
    #[error("command queue full, dropped: {0}")]
    QueueFull(Command),

    #[error("command transport closed, dropped: {0}")]
    Closed(Command),

    #[error("transport rejected {command}: {reason}")]
    Rejected { command: Command, reason: String },
}

/// Sink for governor commands
pub trait Actuator: Send + Sync {
    fn submit(&self, command: Command) -> Result<(), ActuationError>;
}

/// Bounded queue between the governors and the actuation transport
#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: mpsc::Sender<Command>,
}

impl CommandQueue {
    /// Create a queue and the receiving half the transport drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Actuator for CommandQueue {
    fn submit(&self, command: Command) -> Result<(), ActuationError> {
        match self.tx.try_send(command) {
            Ok(()) => {
                debug!("Queued command: {}", command);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(c)) => Err(ActuationError::QueueFull(c)),
            Err(mpsc::error::TrySendError::Closed(c)) => Err(ActuationError::Closed(c)),
        }
    }
}

/// Actuator that keeps every command in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    commands: Mutex<Vec<Command>>,
    fail_next: Mutex<usize>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` submissions
    pub fn fail_next(&self, count: usize) {
        *lock(&self.fail_next) = count;
    }

    pub fn commands(&self) -> Vec<Command> {
        lock(&self.commands).clone()
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<Command> {
        std::mem::take(&mut *lock(&self.commands))
    }
}

impl Actuator for RecordingActuator {
    fn submit(&self, command: Command) -> Result<(), ActuationError> {
        {
            let mut fail_next = lock(&self.fail_next);
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(ActuationError::Rejected {
                    command,
                    reason: "injected failure".to_string(),
                });
            }
        }
        lock(&self.commands).push(command);
        Ok(())
    }
}

/// A poisoned lock only means another thread panicked mid-push; the data
/// is still a valid list.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setpoint_rounding() {
        let cmd = Command::set_hv_setpoint(DeviceId(0), 963.04);
        assert_eq!(
            cmd,
            Command::SetHvSetpoint {
                device: DeviceId(0),
                volts: 963.0
            }
        );
        assert_eq!(cmd.to_string(), "dev0 set_hv_setpoint 963.0 V");
    }

    #[test]
    fn test_command_display() {
        assert_eq!(
            Command::set_mode(DeviceId(1), StateCode::TRIP).to_string(),
            "dev1 set_mode 0xA000"
        );
        assert_eq!(
            Command::set_control_word(DeviceId(0), 1).to_string(),
            "dev0 set_control_word 0x0001"
        );
    }

    #[tokio::test]
    async fn test_command_queue_delivers() {
        let (queue, mut rx) = CommandQueue::new(4);
        let cmd = Command::set_mode(DeviceId(0), StateCode::RUNNING);
        queue.submit(cmd).unwrap();
        assert_eq!(rx.recv().await, Some(cmd));
    }

    #[test]
    fn test_command_queue_full_and_closed() {
        let (queue, rx) = CommandQueue::new(1);
        let cmd = Command::set_control_word(DeviceId(0), 1);
        queue.submit(cmd).unwrap();
        assert_eq!(queue.submit(cmd), Err(ActuationError::QueueFull(cmd)));

        drop(rx);
        assert_eq!(queue.submit(cmd), Err(ActuationError::Closed(cmd)));
    }

    #[test]
    fn test_recording_actuator_failure_injection() {
        let actuator = RecordingActuator::new();
        let cmd = Command::set_control_word(DeviceId(0), 1);
        actuator.fail_next(1);
        assert!(actuator.submit(cmd).is_err());
        assert!(actuator.submit(cmd).is_ok());
        assert_eq!(actuator.take(), vec![cmd]);
        assert!(actuator.commands().is_empty());
    }
}
