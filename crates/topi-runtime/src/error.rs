//! Error types for the host runtime

use std::path::PathBuf;

use thiserror::Error;
use topi_bytecode::FormatError;
use topi_value::{DecodeError, ValueError};
use topi_vm::{TopiError, VmHandle};

/// Errors that can occur in host-side operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// VM operation failed
    #[error(transparent)]
    Vm(#[from] TopiError),

    /// Asset is not compiled bytecode
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Value rejected by a variable store
    #[error("Invalid value for `{name}`: {source}")]
    Value {
        /// Variable name
        name: String,
        /// Rejection reason
        #[source]
        source: ValueError,
    },

    /// A handed-off value buffer did not decode
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Asset key did not resolve
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Asset bytes are not a usable container
    #[error("Asset `{0}` is not compiled dialogue")]
    NotCompiled(String),

    /// Bough could not be started
    #[error("Could not start bough `{0}`")]
    StartFailed(String),

    /// Conversation already destroyed
    #[error("Conversation for {0} was destroyed")]
    Destroyed(VmHandle),

    /// The VM refused an operation; the reason went to the log channel
    #[error("VM rejected `{0}`")]
    Rejected(&'static str),

    /// The VM faulted during a run
    #[error("Conversation for {0} faulted")]
    Faulted(VmHandle),

    /// `play` used up its slice budget
    #[error("Conversation did not finish within {0} slices")]
    SliceBudgetExhausted(usize),

    /// Configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON text could not be parsed
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
