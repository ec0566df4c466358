//! Error definitions for the mapping module

use super::sink::OutputError;
use thiserror::Error;

/// Problems found while compiling a profile, always fatal to the load
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Profile defines no modes")]
    NoModes,

    #[error("Duplicate mode name: {0}")]
    DuplicateMode(String),

    #[error("Mode {mode} inherits from unknown mode {parent}")]
    UnknownParent { mode: String, parent: String },

    #[error("Cyclic mode inheritance: {}", .0.join(" -> "))]
    CyclicInheritance(Vec<String>),

    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Duplicate binding in mode {mode} for {device}/{input}")]
    DuplicateBinding {
        mode: String,
        device: String,
        input: String,
    },

    #[error("Response curve needs at least two control points, got {0}")]
    TooFewControlPoints(usize),

    #[error("Control point {0} is not finite")]
    NonFiniteControlPoint(usize),

    #[error("Control point {index} ({x}, {y}) lies outside [-1, 1]")]
    ControlPointOutOfRange { index: usize, x: f64, y: f64 },

    #[error("Control point {0} does not increase strictly in x")]
    NonIncreasingControlPoints(usize),

    #[error("Invalid dead zone: {0}")]
    InvalidDeadZone(String),

    #[error("Initial value {value} for {name} lies outside [-1, 1]")]
    InitialValueOutOfRange { name: String, value: f64 },

    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("Unknown merge axis: {0}")]
    UnknownMergeAxis(String),

    #[error("Unknown macro: {0}")]
    UnknownMacro(String),

    #[error("Unknown custom handler: {0}")]
    UnknownHandler(String),

    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Merge axis {merge} expects {expected} as its {role} input")]
    MergeRoleMismatch {
        merge: String,
        role: String,
        expected: String,
    },

    #[error("Input {input} cannot drive {action}")]
    InputKindMismatch { input: String, action: String },

    #[error("Index 0 is not a valid {0}, indices start at 1")]
    ZeroIndex(String),

    #[error("Relative axis scaling must be positive and finite, got {0}")]
    InvalidAxisScaling(f64),

    #[error("Temporary mode depth must be at least 1")]
    InvalidTemporaryDepth,
}

/// Error types for the mapping engine
#[derive(Debug, Error)]
pub enum MappingError {
    /// Profile could not be compiled
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Temporary mode switch exceeded the configured nesting depth
    #[error("Temporary mode stack overflow at depth {depth}")]
    ModeStackOverflow { depth: usize },

    /// Virtual output rejected a write
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// Channel communication failure
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Thread error: {0}")]
    ThreadError(String),
}
