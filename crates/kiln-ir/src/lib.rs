//! Tensor intermediate representation for Kiln.
//!
//! This crate provides the IR that imported ONNX graphs are lowered through:
//! - Value types (`TensorType`, `ElementType`, `Type`)
//! - Single-block functions of SSA operations grouped into a `Module`
//! - A `Context` holding loaded dialects and routing diagnostics
//! - Structural verification and a textual printer

pub mod attributes;
pub mod context;
pub mod ops;
pub mod print;
pub mod types;
pub mod verify;

pub use attributes::{Attribute, DenseElements};
pub use context::{
    Arity, Context, Diagnostic, Dialect, DialectRegistry, HandlerId, OpDef, Severity,
};
pub use ops::{Function, Location, Module, Operation, OperationState, Value};
pub use print::{PrintingFlags, print_function, print_module};
pub use types::{Dim, ElementType, TensorType, Type};
pub use verify::{verify_function, verify_module};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or checking IR.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Symbol '{0}' is already defined")]
    DuplicateSymbol(String),

    #[error("Unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Dialect '{0}' is not registered")]
    UnregisteredDialect(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}
