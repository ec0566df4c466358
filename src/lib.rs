//! openremap - joystick remapping with hierarchical modes
//!
//! Physical devices are polled through gilrs, merged into one ordered event
//! queue and dispatched by a mapping engine that resolves bindings through an
//! inheriting mode graph before writing to virtual output devices.
//!
//! ```text
//! gilrs ──► Collector ──► EventQueue ──► MappingEngine ──► VirtualOutputSink
//!                                          │
//!                          ModeGraph + ModeSwitcher + Pipelines + MergeAxis
//! ```

pub mod config;
pub mod controller;
pub mod mapping;
pub mod persistence;
