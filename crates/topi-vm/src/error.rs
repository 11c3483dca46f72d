//! Error types for VM operations

use thiserror::Error;
use topi_bytecode::FormatError;
use topi_value::ValueError;

use crate::handle::VmHandle;
use crate::log::Severity;
use crate::vm::VmState;

/// Errors produced by VM operations
#[derive(Debug, Error)]
pub enum TopiError {
    /// Container failed to parse
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Handle was destroyed or never created
    #[error("Invalid handle {0}")]
    InvalidHandle(VmHandle),

    /// Name is not a global of the container
    #[error("Unknown variable `{0}`")]
    UnknownVariable(String),

    /// Name is a global but not declared extern
    #[error("Variable `{0}` is not extern")]
    NotExtern(String),

    /// Global holds a host function
    #[error("Variable `{0}` is bound to a function and cannot be observed")]
    NotObservable(String),

    /// Host function called with the wrong number of arguments
    #[error("Function `{name}` expects {expected} arguments, got {actual}")]
    ArityMismatch {
        /// Function name
        name: String,
        /// Declared arity
        expected: usize,
        /// Arguments supplied
        actual: usize,
    },

    /// Script called an extern that has no function bound
    #[error("Function `{0}` is not bound")]
    UnboundFunction(String),

    /// Choice selection past the end of the choice set
    #[error("Choice index {index} out of range ({count} options)")]
    ChoiceIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Options available
        count: usize,
    },

    /// Bough name not in the container
    #[error("Unknown bough `{0}`")]
    UnknownBough(String),

    /// Operation not valid in the current state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// State at the time
        state: VmState,
    },

    /// `start` or `run` called from inside a callback for the same handle
    #[error("Cannot {0} from inside a callback")]
    Reentrant(&'static str),

    /// VM already borrowed further up this thread's stack
    #[error("{0} is busy")]
    Busy(VmHandle),

    /// Value rejected for a variable
    #[error("Invalid value for `{name}`: {source}")]
    Value {
        /// Variable name
        name: String,
        /// Rejection reason
        #[source]
        source: ValueError,
    },

    /// Snapshot entry that could not be applied
    #[error("Skipped snapshot entry `{name}`: {source}")]
    SnapshotEntry {
        /// Variable name
        name: String,
        /// Rejection reason
        #[source]
        source: ValueError,
    },

    /// Snapshot text is not a JSON object
    #[error("Invalid snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Execution fault; the VM stops being runnable
    #[error("Runtime fault at {ip}: {message}")]
    RuntimeFault {
        /// Instruction pointer
        ip: u32,
        /// Description
        message: String,
    },
}

impl TopiError {
    /// Severity used when the error is reported through the log channel
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnknownVariable(_) | Self::NotObservable(_) | Self::SnapshotEntry { .. } => {
                Severity::Warn
            }
            _ => Severity::Error,
        }
    }

    /// Check whether the error stopped execution
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::RuntimeFault { .. })
    }
}

/// Result type for VM operations
pub type TopiResult<T> = std::result::Result<T, TopiError>;
