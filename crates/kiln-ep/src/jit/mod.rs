//! Compile side of the provider: ONNX import and the compiler session.

mod compiler;
mod importer;

pub use compiler::{CompilerInvocation, CompilerOutput, CompilerSession, DiagnosticRecord};
pub use importer::{ContextCache, GraphInfo, ImportError, ModelInfo, NodeImporter, import_subgraph};
