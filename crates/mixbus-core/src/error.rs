//! Engine error types

use thiserror::Error;

use crate::types::ChannelId;

/// Errors returned by engine operations
///
/// Variants raised on the audio thread only carry `Copy` data so that
/// building an error never allocates there.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed buffer description
    #[error("Invalid buffer format: {0}")]
    InvalidFormat(&'static str),

    /// Operation between incompatible buffers
    #[error("Format mismatch: expected {expected_channels}ch x {expected_frames} frames, got {actual_channels}ch x {actual_frames} frames")]
    FormatMismatch {
        expected_channels: usize,
        expected_frames: usize,
        actual_channels: usize,
        actual_frames: usize,
    },

    /// Effect parameter setter rejected the value
    #[error("Parameter {index} out of range: {value} not in [{min}, {max}]")]
    ParameterOutOfRange {
        index: usize,
        value: f32,
        min: f32,
        max: f32,
    },

    /// Channel routing would create a cycle
    #[error("Routing {from} -> {to} would create a cycle")]
    RoutingCycle { from: ChannelId, to: ChannelId },

    /// Channel creation would exceed the mixer's capacity
    #[error("Channel capacity exceeded (max {max})")]
    ChannelCapacityExceeded { max: usize },

    /// The processor is already running
    #[error("Audio processor already initialized")]
    AlreadyInitialized,

    /// Format changes need a full shutdown/initialize cycle
    #[error("Output format change requires shutdown and re-initialization")]
    ReinitializationRequired,

    /// The processor has not been initialized (or was shut down)
    #[error("Audio processor not initialized")]
    NotInitialized,

    /// Lookup by name or index failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// A channel with this name already exists (or the name is reserved)
    #[error("Duplicate channel name: {0}")]
    DuplicateName(String),

    /// Effect chain already holds the maximum number of effects
    #[error("Effect chain full (max {max})")]
    ChainCapacityExceeded { max: usize },

    /// Control command could not be queued for the audio thread
    #[error("Command queue full")]
    QueueFull,
}

impl EngineError {
    /// Shorthand for a format mismatch between an expected and an actual shape
    pub fn mismatch(expected: (usize, usize), actual: (usize, usize)) -> Self {
        EngineError::FormatMismatch {
            expected_channels: expected.0,
            expected_frames: expected.1,
            actual_channels: actual.0,
            actual_frames: actual.1,
        }
    }

    /// Lookup failure for a named thing
    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
