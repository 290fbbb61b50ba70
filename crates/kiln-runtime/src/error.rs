//! Error types for the runtime crate.
//!
//! Messages start with a status code name so they read the same in logs
//! regardless of which layer reports them.

use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A driver, function or file does not exist.
    #[error("NOT_FOUND; {0}")]
    NotFound(String),

    #[error("INVALID_ARGUMENT; {0}")]
    InvalidArgument(String),

    /// The device or its queue cannot service requests.
    #[error("UNAVAILABLE; {0}")]
    Unavailable(String),

    /// The call was made in the wrong state, e.g. reading a register that
    /// was never written.
    #[error("FAILED_PRECONDITION; {0}")]
    FailedPrecondition(String),

    /// Memory was accessed in a way its allocation does not permit.
    #[error("PERMISSION_DENIED; {0}")]
    PermissionDenied(String),

    #[error("UNIMPLEMENTED; {0}")]
    Unimplemented(String),

    #[error("ALREADY_EXISTS; {0}")]
    AlreadyExists(String),

    #[error("OUT_OF_RANGE; {0}")]
    OutOfRange(String),

    #[error("DEADLINE_EXCEEDED; {0}")]
    DeadlineExceeded(String),

    #[error("DATA_LOSS; {0}")]
    DataLoss(String),

    #[error("INTERNAL; I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("INVALID_ARGUMENT; bytecode: {0}")]
    Bytecode(#[from] kiln_bytecode::BytecodeError),
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
