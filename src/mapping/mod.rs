//! Turns controller events into virtual output writes
//!
//! A profile is compiled once into a [`CompiledProfile`]: an arena of
//! inheriting modes with their bindings, the processing pipelines, merge
//! axes and macros. The [`MappingEngine`] owns the compiled profile and runs
//! every queued event through the [`Dispatcher`].
//!
//! 1. [`mode_graph`] - Mode arena and inherited binding lookup
//! 2. [`mode_switcher`] - Active mode, previous mode and temporary stack
//! 3. [`transform`] / [`curve`] - Dead zones and response curves
//! 4. [`merge_axis`] - Two physical axes combined into one output
//! 5. [`macros`] - Timed output sequences
//! 6. [`relative`] - Axes driven by rate instead of position
//! 7. [`sink`] - Virtual output device interface
//! 8. [`engine`] - Lifecycle and task management

pub mod binding;
pub mod curve;
pub mod custom;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod macros;
pub mod merge_axis;
pub mod mode_graph;
pub mod mode_switcher;
pub mod profile;
pub mod relative;
pub mod sink;
pub mod transform;

pub use binding::{
    Binding, BindingSlot, MergeRole, ModeId, OutputTarget, RemapMode, VirtualButton,
};
pub use curve::{Interpolation, ResponseCurve};
pub use custom::{CustomHandler, CustomHandlers};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use engine::{MappingEngine, MappingEngineHandle, MappingEngineState};
pub use error::{ConfigError, MappingError};
pub use macros::{MacroDefinition, MacroPlayer, MacroPolicy, MacroStep};
pub use merge_axis::{MergeAxis, MergeOperation};
pub use mode_graph::ModeGraph;
pub use mode_switcher::{ModeSwitcher, ModeTransition};
pub use profile::CompiledProfile;
pub use relative::RelativeAxes;
pub use sink::{ChannelSink, OutputCommand, OutputError, RecordingSink, VirtualOutputSink};
pub use transform::{DeadZone, Operator, Pipeline};
