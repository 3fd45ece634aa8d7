//! Error handling primitives shared across the bridge.
//!
//! Recoverable failures are [`TrainError`]. Caller misuse (null handles,
//! calling `run` after `end`, ...) is not an error value: it goes through
//! [`contract_violation`] and panics.

use std::fmt;

use thiserror::Error;

/// Stable error codes, usable across the C boundary.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TrainCode {
    /// Success code used as a sentinel.
    Ok = 0,
    /// A foreign call reported a failure status.
    Boundary = 1,
    /// The engine returned a value outside the known enumeration or schema.
    Protocol = 2,
    /// Shape or element type mismatch while encoding or decoding a value.
    Codec = 3,
    /// Input failed validation before reaching the engine.
    InvalidInput = 4,
}

/// Canonical error type for the bridge.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("{op} failed at the boundary (status {code}): {message}")]
    Boundary {
        op: &'static str,
        code: i32,
        message: String,
    },

    #[error("engine reported unrecognised {what} value `{value}`")]
    Protocol { what: &'static str, value: String },

    #[error("codec: {0}")]
    Codec(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result alias used throughout the crate.
pub type TrainResult<T> = Result<T, TrainError>;

impl TrainError {
    /// Machine parsable code for this error.
    pub fn code(&self) -> TrainCode {
        match self {
            TrainError::Boundary { .. } => TrainCode::Boundary,
            TrainError::Protocol { .. } => TrainCode::Protocol,
            TrainError::Codec(_) => TrainCode::Codec,
            TrainError::InvalidInput(_) => TrainCode::InvalidInput,
        }
    }

    /// Failure status returned by the engine for `op`.
    pub fn boundary(op: &'static str, code: i32, message: impl Into<String>) -> Self {
        TrainError::Boundary {
            op,
            code,
            message: message.into(),
        }
    }

    /// Engine returned a value outside the agreed protocol.
    pub fn protocol(what: &'static str, value: impl fmt::Display) -> Self {
        TrainError::Protocol {
            what,
            value: value.to_string(),
        }
    }

    /// Value could not be converted across the boundary.
    pub fn codec(msg: impl Into<String>) -> Self {
        TrainError::Codec(msg.into())
    }

    /// Caller-supplied input rejected before reaching the engine.
    pub fn invalid(msg: impl Into<String>) -> Self {
        TrainError::InvalidInput(msg.into())
    }
}

/// Abort the current operation because the caller broke the API contract.
#[track_caller]
pub fn contract_violation(what: impl fmt::Display) -> ! {
    panic!("contract violation: {what}")
}
