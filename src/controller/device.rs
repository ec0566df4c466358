//! Device abstraction layer
//!
//! Normalizes physical devices into a uniform capability set. Every device
//! exposes 1-based axes, buttons and hats; axis samples are always within
//! `[-1.0, 1.0]`.

use super::event_collector::CollectorError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stable identity of a physical device within one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input capability of a device, indices are 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum InputId {
    Axis(u8),
    Button(u8),
    Hat(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Axis,
    Button,
    Hat,
}

impl InputId {
    pub fn kind(&self) -> InputKind {
        match self {
            InputId::Axis(_) => InputKind::Axis,
            InputId::Button(_) => InputKind::Button,
            InputId::Hat(_) => InputKind::Hat,
        }
    }

    pub fn index(&self) -> u8 {
        match self {
            InputId::Axis(i) | InputId::Button(i) | InputId::Hat(i) => *i,
        }
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputId::Axis(i) => write!(f, "Axis{}", i),
            InputId::Button(i) => write!(f, "Button{}", i),
            InputId::Hat(i) => write!(f, "Hat{}", i),
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::Axis => write!(f, "axis"),
            InputKind::Button => write!(f, "button"),
            InputKind::Hat => write!(f, "hat"),
        }
    }
}

/// Lookup key used by the mode graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputKey {
    pub device: DeviceId,
    pub input: InputId,
}

impl InputKey {
    pub fn new(device: DeviceId, input: InputId) -> Self {
        Self { device, input }
    }
}

impl fmt::Display for InputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.input)
    }
}

/// Nine-way hat position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HatDirection {
    #[default]
    Center,
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl HatDirection {
    /// (x, y) encoding, north is +y and east is +x
    pub fn to_xy(self) -> (i8, i8) {
        match self {
            HatDirection::Center => (0, 0),
            HatDirection::North => (0, 1),
            HatDirection::NorthEast => (1, 1),
            HatDirection::East => (1, 0),
            HatDirection::SouthEast => (1, -1),
            HatDirection::South => (0, -1),
            HatDirection::SouthWest => (-1, -1),
            HatDirection::West => (-1, 0),
            HatDirection::NorthWest => (-1, 1),
        }
    }

    /// Only the sign of each component is used
    pub fn from_xy(x: i8, y: i8) -> Self {
        match (x.signum(), y.signum()) {
            (0, 1) => HatDirection::North,
            (1, 1) => HatDirection::NorthEast,
            (1, 0) => HatDirection::East,
            (1, -1) => HatDirection::SouthEast,
            (0, -1) => HatDirection::South,
            (-1, -1) => HatDirection::SouthWest,
            (-1, 0) => HatDirection::West,
            (-1, 1) => HatDirection::NorthWest,
            _ => HatDirection::Center,
        }
    }
}

/// Normalized sample of one input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue {
    Axis(f64),
    Button(bool),
    Hat(HatDirection),
}

impl InputValue {
    pub fn kind(&self) -> InputKind {
        match self {
            InputValue::Axis(_) => InputKind::Axis,
            InputValue::Button(_) => InputKind::Button,
            InputValue::Hat(_) => InputKind::Hat,
        }
    }
}

/// Clamps an axis sample into the canonical range; non-finite samples read as rest
pub fn normalize_axis(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub axis_count: u8,
    pub button_count: u8,
    pub hat_count: u8,
}

impl Device {
    /// Ordered capabilities: axes, then buttons, then hats
    pub fn inputs(&self) -> impl Iterator<Item = InputId> + '_ {
        (1..=self.axis_count)
            .map(InputId::Axis)
            .chain((1..=self.button_count).map(InputId::Button))
            .chain((1..=self.hat_count).map(InputId::Hat))
    }

    pub fn has_input(&self, input: InputId) -> bool {
        let count = match input.kind() {
            InputKind::Axis => self.axis_count,
            InputKind::Button => self.button_count,
            InputKind::Hat => self.hat_count,
        };
        input.index() >= 1 && input.index() <= count
    }
}

/// Raw sample with a wall-clock timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct RawInputEvent {
    pub device: DeviceId,
    pub input: InputId,
    pub value: InputValue,
    pub timestamp: DateTime<Local>,
}

impl RawInputEvent {
    pub fn now(device: DeviceId, input: InputId, value: InputValue) -> Self {
        let value = match value {
            InputValue::Axis(v) => InputValue::Axis(normalize_axis(v)),
            other => other,
        };
        Self {
            device,
            input,
            value,
            timestamp: Local::now(),
        }
    }

    pub fn key(&self) -> InputKey {
        InputKey::new(self.device, self.input)
    }
}

/// Everything that travels through the event queue
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Input(RawInputEvent),
    Connected(Device),
    Disconnected(DeviceId),
}

impl ControllerEvent {
    pub fn axis(device: DeviceId, index: u8, value: f64) -> Self {
        ControllerEvent::Input(RawInputEvent::now(
            device,
            InputId::Axis(index),
            InputValue::Axis(value),
        ))
    }

    pub fn button(device: DeviceId, index: u8, pressed: bool) -> Self {
        ControllerEvent::Input(RawInputEvent::now(
            device,
            InputId::Button(index),
            InputValue::Button(pressed),
        ))
    }

    pub fn hat(device: DeviceId, index: u8, direction: HatDirection) -> Self {
        ControllerEvent::Input(RawInputEvent::now(
            device,
            InputId::Hat(index),
            InputValue::Hat(direction),
        ))
    }

    pub fn device(&self) -> DeviceId {
        match self {
            ControllerEvent::Input(raw) => raw.device,
            ControllerEvent::Connected(device) => device.id,
            ControllerEvent::Disconnected(id) => *id,
        }
    }
}

/// Read access to physical devices
///
/// Identity returned by [`DeviceProvider::list_devices`] stays stable across
/// polls within one session.
pub trait DeviceProvider {
    fn list_devices(&self) -> Vec<Device>;

    fn poll_axis(&self, device: DeviceId, axis: u8) -> Result<f64, CollectorError>;

    fn poll_button(&self, device: DeviceId, button: u8) -> Result<bool, CollectorError>;

    fn poll_hat(&self, device: DeviceId, hat: u8) -> Result<HatDirection, CollectorError>;
}

#[derive(Debug, Default)]
struct DeviceState {
    device: Option<Device>,
    values: HashMap<InputId, InputValue>,
}

/// Last known value of every input, rebuilt from the event stream
///
/// Devices that announced a disconnect stay known but are reported as
/// disabled until they connect again.
#[derive(Debug, Default)]
pub struct DeviceSnapshot {
    devices: HashMap<DeviceId, DeviceState>,
    disabled: HashSet<DeviceId>,
}

impl DeviceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when a previously disabled device came back
    pub fn connect(&mut self, device: Device) -> bool {
        let id = device.id;
        info!("Device connected: {} ({})", device.name, id);
        self.devices.entry(id).or_default().device = Some(device);
        self.disabled.remove(&id)
    }

    pub fn disconnect(&mut self, id: DeviceId) {
        warn!("Device {} disconnected, disabling its bindings", id);
        if let Some(state) = self.devices.get_mut(&id) {
            state.values.clear();
        }
        self.disabled.insert(id);
    }

    pub fn record(&mut self, event: &RawInputEvent) {
        self.devices
            .entry(event.device)
            .or_default()
            .values
            .insert(event.input, event.value);
    }

    /// Applies any queue event, returns true if the device was re-enabled
    pub fn apply(&mut self, event: &ControllerEvent) -> bool {
        match event {
            ControllerEvent::Input(raw) => {
                self.record(raw);
                false
            }
            ControllerEvent::Connected(device) => self.connect(device.clone()),
            ControllerEvent::Disconnected(id) => {
                self.disconnect(*id);
                false
            }
        }
    }

    pub fn is_disabled(&self, id: DeviceId) -> bool {
        self.disabled.contains(&id)
    }

    fn value(&self, device: DeviceId, input: InputId) -> Result<Option<InputValue>, CollectorError> {
        if self.is_disabled(device) {
            return Err(CollectorError::DeviceUnavailable(device));
        }
        let state = self
            .devices
            .get(&device)
            .ok_or(CollectorError::DeviceUnavailable(device))?;
        if let Some(known) = &state.device {
            if !known.has_input(input) {
                return Err(CollectorError::UnknownInput { device, input });
            }
        }
        Ok(state.values.get(&input).copied())
    }
}

impl DeviceProvider for DeviceSnapshot {
    fn list_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|(id, _)| !self.disabled.contains(id))
            .filter_map(|(_, state)| state.device.clone())
            .collect();
        devices.sort_by_key(|d| d.id);
        devices
    }

    fn poll_axis(&self, device: DeviceId, axis: u8) -> Result<f64, CollectorError> {
        match self.value(device, InputId::Axis(axis))? {
            Some(InputValue::Axis(v)) => Ok(v),
            _ => {
                debug!("No sample yet for {}/Axis{}", device, axis);
                Ok(0.0)
            }
        }
    }

    fn poll_button(&self, device: DeviceId, button: u8) -> Result<bool, CollectorError> {
        match self.value(device, InputId::Button(button))? {
            Some(InputValue::Button(pressed)) => Ok(pressed),
            _ => Ok(false),
        }
    }

    fn poll_hat(&self, device: DeviceId, hat: u8) -> Result<HatDirection, CollectorError> {
        match self.value(device, InputId::Hat(hat))? {
            Some(InputValue::Hat(direction)) => Ok(direction),
            _ => Ok(HatDirection::Center),
        }
    }
}
