//! Virtual output devices
//!
//! The engine only talks to [`VirtualOutputSink`]. Writes must not block:
//! a failing write is reported to the caller, logged and forgotten, and the
//! next update is attempted normally.

use crate::controller::device::HatDirection;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum OutputError {
    #[error("Virtual device {0} is unavailable")]
    DeviceUnavailable(u8),

    #[error("Output channel is full")]
    Backpressure,

    #[error("Output channel closed")]
    Closed,

    #[error("Unsupported output: {0}")]
    Unsupported(String),
}

/// One write as seen by a virtual device
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCommand {
    Axis { device: u8, index: u8, value: f64 },
    Button { device: u8, index: u8, pressed: bool },
    Hat { device: u8, index: u8, direction: HatDirection },
    Key { key: String, pressed: bool },
}

impl OutputCommand {
    pub fn device(&self) -> Option<u8> {
        match self {
            OutputCommand::Axis { device, .. }
            | OutputCommand::Button { device, .. }
            | OutputCommand::Hat { device, .. } => Some(*device),
            OutputCommand::Key { .. } => None,
        }
    }
}

pub trait VirtualOutputSink: Send + Sync {
    fn set_axis(&self, device: u8, index: u8, value: f64) -> Result<(), OutputError>;

    fn set_button(&self, device: u8, index: u8, pressed: bool) -> Result<(), OutputError>;

    fn set_hat(&self, device: u8, index: u8, direction: HatDirection) -> Result<(), OutputError>;

    fn set_key(&self, key: &str, _pressed: bool) -> Result<(), OutputError> {
        Err(OutputError::Unsupported(format!("keyboard key {}", key)))
    }

    fn apply(&self, command: &OutputCommand) -> Result<(), OutputError> {
        match command {
            OutputCommand::Axis {
                device,
                index,
                value,
            } => self.set_axis(*device, *index, *value),
            OutputCommand::Button {
                device,
                index,
                pressed,
            } => self.set_button(*device, *index, *pressed),
            OutputCommand::Hat {
                device,
                index,
                direction,
            } => self.set_hat(*device, *index, *direction),
            OutputCommand::Key { key, pressed } => self.set_key(key, *pressed),
        }
    }
}

/// Forwards writes over a bounded channel to the task owning the real device
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<OutputCommand>,
}

impl ChannelSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutputCommand>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    fn send(&self, command: OutputCommand) -> Result<(), OutputError> {
        self.sender.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OutputError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => OutputError::Closed,
        })
    }
}

impl VirtualOutputSink for ChannelSink {
    fn set_axis(&self, device: u8, index: u8, value: f64) -> Result<(), OutputError> {
        self.send(OutputCommand::Axis {
            device,
            index,
            value,
        })
    }

    fn set_button(&self, device: u8, index: u8, pressed: bool) -> Result<(), OutputError> {
        self.send(OutputCommand::Button {
            device,
            index,
            pressed,
        })
    }

    fn set_hat(&self, device: u8, index: u8, direction: HatDirection) -> Result<(), OutputError> {
        self.send(OutputCommand::Hat {
            device,
            index,
            direction,
        })
    }

    fn set_key(&self, key: &str, pressed: bool) -> Result<(), OutputError> {
        self.send(OutputCommand::Key {
            key: key.to_string(),
            pressed,
        })
    }
}

/// Keeps every successful write in memory, for tests and dry runs
#[derive(Debug, Default)]
pub struct RecordingSink {
    commands: Mutex<Vec<OutputCommand>>,
    unavailable: Vec<u8>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes to these virtual devices fail with [`OutputError::DeviceUnavailable`]
    pub fn with_unavailable(devices: impl IntoIterator<Item = u8>) -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            unavailable: devices.into_iter().collect(),
        }
    }

    pub fn commands(&self) -> Vec<OutputCommand> {
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<OutputCommand> {
        std::mem::take(
            &mut *self
                .commands
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    fn record(&self, command: OutputCommand) -> Result<(), OutputError> {
        if let Some(device) = command.device().filter(|d| self.unavailable.contains(d)) {
            return Err(OutputError::DeviceUnavailable(device));
        }
        debug!("Recorded output: {:?}", command);
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command);
        Ok(())
    }
}

impl VirtualOutputSink for RecordingSink {
    fn set_axis(&self, device: u8, index: u8, value: f64) -> Result<(), OutputError> {
        self.record(OutputCommand::Axis {
            device,
            index,
            value,
        })
    }

    fn set_button(&self, device: u8, index: u8, pressed: bool) -> Result<(), OutputError> {
        self.record(OutputCommand::Button {
            device,
            index,
            pressed,
        })
    }

    fn set_hat(&self, device: u8, index: u8, direction: HatDirection) -> Result<(), OutputError> {
        self.record(OutputCommand::Hat {
            device,
            index,
            direction,
        })
    }

    fn set_key(&self, key: &str, pressed: bool) -> Result<(), OutputError> {
        self.record(OutputCommand::Key {
            key: key.to_string(),
            pressed,
        })
    }
}
