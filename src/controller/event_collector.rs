use super::device::{
    normalize_axis, ControllerEvent, Device, DeviceId, DeviceProvider, HatDirection, InputId,
    InputValue, RawInputEvent,
};
use super::event_queue::{EventProducer, QueueError};
use chrono::Local;
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};
use statum::{machine, state};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// Axis order defines the 1-based axis index exposed to bindings
const AXES: [Axis; 6] = [
    Axis::LeftStickX,
    Axis::LeftStickY,
    Axis::LeftZ,
    Axis::RightStickX,
    Axis::RightStickY,
    Axis::RightZ,
];

// DPad buttons are folded into hat 1
const BUTTONS: [Button; 15] = [
    Button::South,
    Button::East,
    Button::North,
    Button::West,
    Button::LeftTrigger,
    Button::RightTrigger,
    Button::LeftTrigger2,
    Button::RightTrigger2,
    Button::Select,
    Button::Start,
    Button::Mode,
    Button::LeftThumb,
    Button::RightThumb,
    Button::C,
    Button::Z,
];

const DPAD_HAT: u8 = 1;

// Collector settings
#[derive(Clone, Debug)]
pub struct CollectorSettings {
    pub poll_interval: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(100),
        }
    }
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to send event: {0}")]
    EventSendError(#[from] QueueError),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(DeviceId),

    #[error("Device {device} has no input {input}")]
    UnknownInput { device: DeviceId, input: InputId },
}

/// gilrs backed [`DeviceProvider`]
///
/// gilrs reports a model UUID that identical gamepads share, so ids are
/// assigned on first sight and disambiguated when two pads collide.
pub struct GilrsProvider {
    gilrs: Gilrs,
    ids: HashMap<GamepadId, DeviceId>,
}

impl GilrsProvider {
    pub fn new() -> Result<Self, CollectorError> {
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(CollectorError::InitializationError(e.to_string()));
            }
        };

        let mut provider = Self {
            gilrs,
            ids: HashMap::new(),
        };
        let known: Vec<GamepadId> = provider.gilrs.gamepads().map(|(id, _)| id).collect();
        for id in known {
            provider.register(id);
        }
        Ok(provider)
    }

    fn register(&mut self, id: GamepadId) -> DeviceId {
        if let Some(existing) = self.ids.get(&id) {
            return *existing;
        }
        let index = usize::from(id) as u128;
        let model = Uuid::from_bytes(self.gilrs.gamepad(id).uuid());
        let mut candidate = if model.is_nil() {
            Uuid::from_u128(index + 1)
        } else {
            model
        };
        if self.ids.values().any(|d| d.0 == candidate) {
            candidate = Uuid::from_u128(candidate.as_u128() ^ (index + 1));
        }
        let device_id = DeviceId(candidate);
        self.ids.insert(id, device_id);
        device_id
    }

    fn gamepad_id(&self, device: DeviceId) -> Result<GamepadId, CollectorError> {
        self.ids
            .iter()
            .find(|(_, d)| **d == device)
            .map(|(g, _)| *g)
            .ok_or(CollectorError::DeviceUnavailable(device))
    }

    fn describe(&self, id: GamepadId) -> Option<Device> {
        let device_id = *self.ids.get(&id)?;
        let gamepad = self.gilrs.connected_gamepad(id)?;
        Some(Device {
            id: device_id,
            name: gamepad.name().to_string(),
            axis_count: AXES.len() as u8,
            button_count: BUTTONS.len() as u8,
            hat_count: 1,
        })
    }

    fn dpad(&self, id: GamepadId) -> HatDirection {
        let Some(gamepad) = self.gilrs.connected_gamepad(id) else {
            return HatDirection::Center;
        };
        let x = axis_sign(gamepad.value(Axis::DPadX))
            + i8::from(gamepad.is_pressed(Button::DPadRight))
            - i8::from(gamepad.is_pressed(Button::DPadLeft));
        let y = axis_sign(gamepad.value(Axis::DPadY))
            + i8::from(gamepad.is_pressed(Button::DPadUp))
            - i8::from(gamepad.is_pressed(Button::DPadDown));
        HatDirection::from_xy(x, y)
    }
}

impl DeviceProvider for GilrsProvider {
    fn list_devices(&self) -> Vec<Device> {
        self.gilrs
            .gamepads()
            .filter_map(|(id, _)| self.describe(id))
            .collect()
    }

    fn poll_axis(&self, device: DeviceId, axis: u8) -> Result<f64, CollectorError> {
        let id = self.gamepad_id(device)?;
        let gilrs_axis = axis_at(axis).ok_or(CollectorError::UnknownInput {
            device,
            input: InputId::Axis(axis),
        })?;
        let gamepad = self
            .gilrs
            .connected_gamepad(id)
            .ok_or(CollectorError::DeviceUnavailable(device))?;
        Ok(normalize_axis(gamepad.value(gilrs_axis) as f64))
    }

    fn poll_button(&self, device: DeviceId, button: u8) -> Result<bool, CollectorError> {
        let id = self.gamepad_id(device)?;
        let gilrs_button = button_at(button).ok_or(CollectorError::UnknownInput {
            device,
            input: InputId::Button(button),
        })?;
        let gamepad = self
            .gilrs
            .connected_gamepad(id)
            .ok_or(CollectorError::DeviceUnavailable(device))?;
        Ok(gamepad.is_pressed(gilrs_button))
    }

    fn poll_hat(&self, device: DeviceId, hat: u8) -> Result<HatDirection, CollectorError> {
        let id = self.gamepad_id(device)?;
        if hat != DPAD_HAT {
            return Err(CollectorError::UnknownInput {
                device,
                input: InputId::Hat(hat),
            });
        }
        if self.gilrs.connected_gamepad(id).is_none() {
            return Err(CollectorError::DeviceUnavailable(device));
        }
        Ok(self.dpad(id))
    }
}

// Define collector states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
pub struct EventCollector<S: CollectionState> {
    provider: GilrsProvider,

    settings: CollectorSettings,

    // Merged queue shared with every other producer
    producer: EventProducer,

    // Last reported hat per pad, DPad buttons and axes both feed it
    last_hat: HashMap<GamepadId, HatDirection>,
}

impl<S: CollectionState> EventCollector<S> {
    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }
}

impl EventCollector<Initializing> {
    pub fn create(
        settings: Option<CollectorSettings>,
        producer: EventProducer,
    ) -> Result<Self, CollectorError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating Event Collector with settings: {:?}", settings);

        let provider = GilrsProvider::new()?;

        Ok(Self::new(provider, settings, producer, HashMap::new()))
    }

    /// Announces every already connected pad, then starts collecting
    pub fn initialize(self) -> Result<EventCollector<Collecting>, CollectorError> {
        let devices = self.provider.list_devices();

        if devices.is_empty() {
            warn!("No gamepad connected, waiting for devices");
        } else {
            info!("Found {} gamepads:", devices.len());
            for (idx, device) in devices.iter().enumerate() {
                info!("  [{}] ID: {}, Name: {}", idx, device.id, device.name);
            }
        }

        for device in devices {
            self.producer
                .blocking_push(ControllerEvent::Connected(device))?;
        }

        info!("Event Collector initialized, transitioning to Collecting state");
        Ok(self.transition())
    }
}

impl EventCollector<Collecting> {
    /// Returns false when gilrs had nothing pending
    pub fn collect_next_event(&mut self) -> Result<bool, CollectorError> {
        let Some(Event { id, event, time, .. }) = self.provider.gilrs.next_event() else {
            return Ok(false);
        };
        debug!("Processing gilrs event: {:?} at time: {:?}", event, time);

        if let Some(converted) = self.convert_gilrs_event(id, event) {
            if let ControllerEvent::Input(RawInputEvent {
                input: InputId::Button(_),
                value,
                timestamp,
                ..
            }) = &converted
            {
                debug!("Button {:?} at {}", value, timestamp.format("%H:%M:%S.%3f"));
            }
            self.producer.blocking_push(converted)?;
        }
        Ok(true)
    }

    /// Runs until `stop` is raised or the queue is closed
    pub fn run_collection_loop(&mut self, stop: &AtomicBool) -> Result<(), CollectorError> {
        info!("Starting Event Collector loop");

        let mut event_count: u64 = 0;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(10);

        while !stop.load(Ordering::Relaxed) {
            match self.collect_next_event() {
                Ok(true) => event_count += 1,
                Ok(false) => std::thread::sleep(self.settings.poll_interval),
                Err(CollectorError::EventSendError(e)) => {
                    error!("Event queue rejected event: {}", e);
                    return Err(CollectorError::EventSendError(e));
                }
                Err(e) => {
                    // Weitermachen trotz Fehler
                    error!("Error collecting event: {}", e);
                }
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                debug!(
                    "Event Collector stats: {} events in last {} seconds",
                    event_count,
                    log_interval.num_seconds()
                );
                event_count = 0;
                last_log_time = now;
            }
        }

        info!("Event Collector loop stopped");
        Ok(())
    }

    fn convert_gilrs_event(&mut self, id: GamepadId, event: EventType) -> Option<ControllerEvent> {
        match event {
            EventType::AxisChanged(Axis::DPadX | Axis::DPadY, _, _) => self.hat_event(id),
            EventType::AxisChanged(axis, value, _) => {
                let Some(index) = axis_index(axis) else {
                    debug!("Ignoring unsupported axis: {:?}", axis);
                    return None;
                };
                let device = self.provider.register(id);
                Some(ControllerEvent::axis(device, index, value as f64))
            }
            EventType::ButtonPressed(button, _) | EventType::ButtonReleased(button, _)
                if is_dpad(button) =>
            {
                self.hat_event(id)
            }
            EventType::ButtonPressed(button, _) => self.button_event(id, button, true),
            EventType::ButtonReleased(button, _) => self.button_event(id, button, false),
            EventType::Connected => {
                self.provider.register(id);
                self.last_hat.remove(&id);
                let device = self.provider.describe(id)?;
                info!("Controller connected: {} ({})", device.name, device.id);
                Some(ControllerEvent::Connected(device))
            }
            EventType::Disconnected => {
                let device = self.provider.register(id);
                warn!("Controller disconnected: {}", device);
                self.last_hat.remove(&id);
                Some(ControllerEvent::Disconnected(device))
            }
            _ => {
                debug!("Unhandled event type: {:?}", event);
                None
            }
        }
    }

    fn button_event(&mut self, id: GamepadId, button: Button, pressed: bool) -> Option<ControllerEvent> {
        let Some(index) = button_index(button) else {
            debug!("Ignoring unmapped button: {:?}", button);
            return None;
        };
        let device = self.provider.register(id);
        Some(ControllerEvent::Input(RawInputEvent::now(
            device,
            InputId::Button(index),
            InputValue::Button(pressed),
        )))
    }

    fn hat_event(&mut self, id: GamepadId) -> Option<ControllerEvent> {
        let direction = self.provider.dpad(id);
        let previous = self.last_hat.insert(id, direction).unwrap_or_default();
        if previous == direction {
            return None;
        }
        let device = self.provider.register(id);
        Some(ControllerEvent::hat(device, DPAD_HAT, direction))
    }
}

/// Owns the collector thread
///
/// gilrs polling is blocking, so the collector runs on a dedicated OS thread
/// and pushes into the queue with `blocking_push`.
pub struct CollectorHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CollectorHandle {
    /// Spawns the collector thread and waits until gilrs is ready
    pub async fn spawn(
        settings: Option<CollectorSettings>,
        producer: EventProducer,
    ) -> Result<Self, CollectorError> {
        info!("Spawning Event Collector with settings: {:?}", settings);

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("gilrs-collector".to_string())
            .spawn(move || {
                let collector = match EventCollector::create(settings, producer)
                    .and_then(|c| c.initialize())
                {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let mut collecting = collector;
                if let Err(e) = collecting.run_collection_loop(&thread_stop) {
                    error!("Collector thread terminated with error: {}", e);
                }
            })
            .map_err(|e| CollectorError::InitializationError(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Event Collector successfully started");
                Ok(Self {
                    stop,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                error!("Failed to initialize Event Collector: {}", e);
                Err(e)
            }
            Err(_) => Err(CollectorError::InitializationError(
                "Collector thread exited during startup".to_string(),
            )),
        }
    }

    /// Stops the collector and joins its thread
    pub async fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => debug!("Collector thread joined"),
                Ok(Err(_)) => error!("Collector thread panicked"),
                Err(e) => error!("Failed to join collector thread: {}", e),
            }
        }
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn axis_index(axis: Axis) -> Option<u8> {
    AXES.iter().position(|a| *a == axis).map(|i| i as u8 + 1)
}

fn axis_at(index: u8) -> Option<Axis> {
    AXES.get(usize::from(index).checked_sub(1)?).copied()
}

fn button_index(button: Button) -> Option<u8> {
    BUTTONS.iter().position(|b| *b == button).map(|i| i as u8 + 1)
}

fn button_at(index: u8) -> Option<Button> {
    BUTTONS.get(usize::from(index).checked_sub(1)?).copied()
}

fn is_dpad(button: Button) -> bool {
    matches!(
        button,
        Button::DPadUp | Button::DPadDown | Button::DPadLeft | Button::DPadRight
    )
}

fn axis_sign(value: f32) -> i8 {
    if value > 0.5 {
        1
    } else if value < -0.5 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_indices_are_one_based_and_reversible() {
        assert_eq!(axis_index(Axis::LeftStickX), Some(1));
        assert_eq!(axis_index(Axis::RightZ), Some(6));
        assert_eq!(axis_index(Axis::DPadX), None);
        for index in 1..=AXES.len() as u8 {
            assert_eq!(axis_at(index).and_then(axis_index), Some(index));
        }
        assert_eq!(axis_at(0), None);
        assert_eq!(axis_at(7), None);
    }

    #[test]
    fn buttons_exclude_dpad() {
        assert_eq!(button_index(Button::South), Some(1));
        assert_eq!(button_index(Button::DPadUp), None);
        assert!(BUTTONS.iter().all(|b| !is_dpad(*b)));
        assert_eq!(button_at(15), Some(Button::Z));
        assert_eq!(button_at(16), None);
    }

    #[test]
    fn dpad_axis_threshold() {
        assert_eq!(axis_sign(1.0), 1);
        assert_eq!(axis_sign(-0.9), -1);
        assert_eq!(axis_sign(0.2), 0);
    }
}
