//! Controller subsystem for physical input handling
//!
//! 1. [`device`] - Device abstraction: ids, inputs, normalized values
//! 2. [`event_collector`] - gilrs polling on a dedicated thread
//! 3. [`event_queue`] - Single ordered queue merging every device
//! 4. [`controller_handle`] - Unified API and lifecycle management
//!
//! # Architecture
//!
//! ```text
//! Gamepads ──► Collector ──► EventQueue ──► MappingEngine
//!              (gilrs)       (sequenced)
//! ```

pub mod controller_handle;
pub mod device;
pub mod event_collector;
pub mod event_queue;

pub use controller_handle::{ControllerError, ControllerHandle, ControllerSettings};
pub use device::{
    ControllerEvent, Device, DeviceId, DeviceProvider, DeviceSnapshot, HatDirection, InputId,
    InputKey, InputKind, InputValue, RawInputEvent,
};
pub use event_queue::{EventProducer, EventStream, QueueError, QueuedEvent};
