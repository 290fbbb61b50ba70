//! Error types for compiler operations.

use thiserror::Error;

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, CompilerError>;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("Compiler is not initialized: call kiln_compiler::global_initialize() first")]
    NotInitialized,

    #[error("Unknown flag: {0}")]
    UnknownFlag(String),

    #[error("Invalid value for flag {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("Invalid invocation state: {0}")]
    InvalidState(String),

    /// A pass failed after reporting its own diagnostics.
    #[error("Pass '{0}' failed")]
    PassFailed(String),

    #[error("Output is not a memory buffer")]
    NotAMembuffer,

    #[error("IR error: {0}")]
    Ir(#[from] kiln_ir::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
