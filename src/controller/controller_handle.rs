//! Controller Handle - Unified API for physical input collection
//!
//! Owns the gilrs collector thread and connects it to the merged event
//! queue. Everything downstream only sees [`ControllerEvent`]s.
//!

use super::event_queue::EventProducer;
use std::time::Duration;
use tracing::{debug, info};

pub use super::device::{
    ControllerEvent, Device, DeviceId, DeviceProvider, DeviceSnapshot, HatDirection, InputId,
    InputKey, InputValue, RawInputEvent,
};
pub use super::event_collector::{CollectorError, CollectorHandle, CollectorSettings, GilrsProvider};

/// Configuration settings for the controller subsystem
///
/// # Performance Impact
///
/// - `poll_interval`: idle sleep between gilrs polls. Lower values shave
///   latency off the first event after a quiet period but cost CPU.
///
/// # Examples
///
/// ```rust
/// use openremap::controller::ControllerSettings;
/// use std::time::Duration;
///
/// let settings = ControllerSettings {
///     poll_interval: Duration::from_micros(250),
/// };
/// assert!(settings.poll_interval > ControllerSettings::default().poll_interval);
/// ```
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Sleep between polls when no event is pending
    ///
    /// Events that are already pending are drained without sleeping, so this
    /// only bounds the latency of the first event after an idle period.
    pub poll_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(100),
        }
    }
}

/// Errors that can occur during controller initialization or operation
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Error from the event collection subsystem
    ///
    /// Typically indicates gamepad detection issues, driver problems,
    /// or a closed event queue.
    #[error("Collector error: {0}")]
    CollectorError(#[from] CollectorError),

    /// General initialization error
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

/// Handle for managing the controller subsystem lifecycle
///
/// # Threading Model
///
/// Spawns one OS thread that polls gilrs and pushes into the shared
/// [`EventProducer`]. Additional producers (tests, network bridges) may push
/// into clones of the same producer; the queue keeps their arrival order.
///
/// # Resource Management
///
/// [`ControllerHandle::shutdown`] stops and joins the thread. Dropping the
/// handle only raises the stop flag.
pub struct ControllerHandle {
    collector: CollectorHandle,
}

impl ControllerHandle {
    /// Spawns the collector with the given settings
    ///
    /// # Arguments
    ///
    /// * `settings` - Optional configuration; uses defaults if None
    /// * `producer` - Producer side of the merged event queue
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::CollectorError`] if gilrs cannot be
    /// initialized or the queue is already closed.
    pub async fn spawn(
        settings: Option<ControllerSettings>,
        producer: EventProducer,
    ) -> Result<Self, ControllerError> {
        info!(
            "Initializing Controller system with settings: {:?}",
            settings
        );

        let settings = settings.unwrap_or_default();
        if settings.poll_interval.is_zero() {
            return Err(ControllerError::InitializationError(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        let collector_settings = CollectorSettings {
            poll_interval: settings.poll_interval,
        };
        debug!("Collector settings: {:?}", collector_settings);

        let collector = CollectorHandle::spawn(Some(collector_settings), producer).await?;

        info!("Controller system initialized successfully");
        Ok(Self { collector })
    }

    pub async fn shutdown(&mut self) {
        info!("Shutting down controller system");
        self.collector.shutdown().await;
    }
}
