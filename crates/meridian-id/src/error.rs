//! Error types for meridian-id.

use thiserror::Error;

/// Failure to parse an identifier from text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseIdError {
    /// Input was not valid hex.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// A character outside `[0-9a-fA-F]`.
    #[error("invalid hex digit")]
    InvalidDigit,

    /// Wrong number of bytes or digits.
    #[error("invalid identifier length: {0}")]
    Length(usize),
}
