//! Errors raised while dispatching work to a backend.

use thiserror::Error;

/// Result alias using [`ComputeError`].
pub type Result<T> = std::result::Result<T, ComputeError>;

/// Errors originating from execution backends.
///
/// Nothing in this layer retries. A failure inside a remote function is
/// wrapped in [`ComputeError::Remote`] and surfaces when its handle is
/// resolved.
#[derive(Debug, Clone, Error)]
pub enum ComputeError {
    #[error(transparent)]
    Kernel(#[from] tessera_core::Error),

    #[error("No function or actor registered under '{0}'")]
    Unregistered(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Placement conflict: caller options already request resource '{key}'")]
    PlacementConflict { key: String },

    #[error("Cannot schedule task: {0}")]
    Unschedulable(String),

    #[error("Communication failure: {0}")]
    Communication(String),

    #[error("Remote task '{task}' failed: {source}")]
    Remote {
        task: String,
        source: Box<ComputeError>,
    },

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Backend not initialized")]
    NotInitialized,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ComputeError {
    /// Wrap an error raised by the remote function `task`.
    pub fn remote(task: impl Into<String>, source: ComputeError) -> Self {
        Self::Remote {
            task: task.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, with every [`ComputeError::Remote`] layer removed.
    pub fn root_cause(&self) -> &ComputeError {
        match self {
            Self::Remote { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested_remote_errors() {
        let inner = ComputeError::from(tessera_core::Error::unsupported("binary", "spaceship"));
        let err = ComputeError::remote("outer", ComputeError::remote("bop", inner.clone()));
        assert!(matches!(err.root_cause(), ComputeError::Kernel(_)));
        assert_eq!(
            err.to_string(),
            "Remote task 'outer' failed: Remote task 'bop' failed: Unsupported binary operation 'spaceship'"
        );
    }
}
