//! Error types for meridian-routing.

use thiserror::Error;

/// Result type for meridian-routing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the routing substrate.
///
/// Network conditions never appear here: an unreachable peer is a liveness
/// flip, not an error.
#[derive(Debug, Error)]
pub enum Error {
    /// Node configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A frame could not be encoded or decoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// An introspection call was given an out-of-range argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The reactor task is gone.
    #[error("reactor has shut down")]
    ReactorClosed,
}

/// Configuration validation and parsing failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value parsed but is outside its legal range.
    #[error("{name} = {value}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    /// An environment variable could not be parsed.
    #[error("failed to parse {name}={value}")]
    Parse { name: &'static str, value: String },
}

/// Failure to turn bytes into a [`WireMessage`](crate::wire::WireMessage).
///
/// Fatal to the single frame only; the node drops it and carries on.
#[derive(Debug, Error)]
pub enum WireError {
    /// Zero-length frame.
    #[error("empty frame")]
    Empty,

    /// Version byte this build does not understand.
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    /// Body failed to (de)serialize.
    #[error("malformed frame: {0}")]
    Malformed(#[from] bincode::Error),

    /// Body decoded but violates a structural invariant.
    #[error("invalid message: {0}")]
    Invalid(&'static str),
}
