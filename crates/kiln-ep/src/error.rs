//! Error types for the execution provider.

use kiln_onnx::DataType;
use thiserror::Error;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, EpError>;

#[derive(Debug, Error)]
pub enum EpError {
    /// The linked compiler or runtime lacks something the provider needs,
    /// such as a dialect.
    #[error("{0}")]
    CapabilityMismatch(String),

    /// Import or verification of a subgraph failed.
    #[error("{0}")]
    InvalidGraph(String),

    /// The compiler pipeline rejected the module.
    #[error("{0}")]
    Compilation(String),

    #[error("{context}{source}")]
    Compiler {
        context: &'static str,
        #[source]
        source: kiln_compiler::CompilerError,
    },

    #[error("Runtime Error: {0}")]
    Runtime(#[from] kiln_runtime::RuntimeError),

    /// A host value at the call boundary is not usable.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported element type: {0}")]
    UnsupportedElementType(DataType),

    #[error("Invalid provider option '{key}': {message}")]
    InvalidOption { key: String, message: String },

    #[error("ONNX error: {0}")]
    Onnx(#[from] kiln_onnx::OnnxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EpError {
    pub(crate) fn compiler(context: &'static str, source: kiln_compiler::CompilerError) -> Self {
        EpError::Compiler { context, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_errors_are_prefixed() {
        let err = EpError::from(kiln_runtime::RuntimeError::NotFound(
            "function 'kiln.x' not found".to_string(),
        ));
        assert_eq!(
            err.to_string(),
            "Runtime Error: NOT_FOUND; function 'kiln.x' not found"
        );
    }

    #[test]
    fn test_compiler_error_context() {
        let err = EpError::compiler(
            "Error setting compiler flag: ",
            kiln_compiler::CompilerError::UnknownFlag("--bogus".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Error setting compiler flag: Unknown flag: --bogus"
        );
    }
}
