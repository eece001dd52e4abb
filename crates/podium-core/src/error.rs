//! Error and status types
//!
//! Non-RT operations report failures through these enums; nothing in the
//! engine panics or throws across the API boundary. Real-time anomalies are
//! logged and counted instead of returned.

use thiserror::Error;

/// Errors produced by engine-level operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No plugin factory registered under the given uid
    #[error("unknown plugin uid: {0}")]
    InvalidPluginUid(String),

    /// A plugin factory or its init call failed
    #[error("plugin failed to load: {0}")]
    PluginLoadError(String),

    /// Unknown processor id or name
    #[error("invalid processor")]
    InvalidProcessor,

    /// Unknown track id or name, or a name collision on creation
    #[error("invalid track")]
    InvalidTrack,

    /// Unknown parameter id or name
    #[error("invalid parameter")]
    InvalidParameter,

    /// Channel index or count outside the supported range
    #[error("invalid channel configuration")]
    InvalidChannel,

    /// A real-time event queue was full; the event was not delivered
    #[error("real-time event queue full")]
    QueueFull,

    /// The operation requires realtime mode to be enabled
    #[error("realtime mode not enabled")]
    NotEnabled,

    /// Realtime mode was already enabled
    #[error("realtime mode already enabled")]
    AlreadyEnabled,

    /// The operation is only allowed while the realtime part is stopped
    #[error("operation not allowed while realtime processing is active")]
    RealtimeActive,
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by processor-level operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// No parameter registered with the given id
    #[error("parameter not found")]
    ParameterNotFound,

    /// A parameter with the same name was already registered
    #[error("duplicate parameter name: {0}")]
    DuplicateParameter(String),

    /// No property registered with the given id
    #[error("property not found")]
    PropertyNotFound,

    /// One-shot initialisation failed; the processor must not be used
    #[error("processor initialisation failed: {0}")]
    InitFailed(String),

    /// The requested channel count exceeds the processor's maximum
    #[error("unsupported channel count: {0}")]
    UnsupportedChannelCount(usize),
}

/// Result alias for processor operations.
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Status codes returned by dispatcher registration calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherStatus {
    Ok,
    AlreadySubscribed,
    UnknownPoster,
}
