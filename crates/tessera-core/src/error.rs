//! Error type for block operations and the shared data model.
//!
//! Every variant is a contract violation: an unknown operator or distribution
//! name, mismatched operand shapes, or a malformed argument. None of them are
//! retryable; backends surface them unchanged to the caller.

use thiserror::Error;

use crate::dtype::DType;

/// Result alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by block operations and value decoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Unsupported {kind} operation '{name}'")]
    UnsupportedOperation { kind: &'static str, name: String },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Unsupported dtype {dtype} for operation '{op}'")]
    UnsupportedDType { dtype: DType, op: &'static str },

    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument { arg: &'static str, reason: String },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Index {index} out of bounds for axis of length {len}")]
    IndexOutOfBounds { index: isize, len: usize },

    #[error("Linear algebra error: {0}")]
    LinAlg(String),
}

impl Error {
    /// Create an unsupported-operation error for the given operation family.
    pub fn unsupported(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            kind,
            name: name.into(),
        }
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }
}
