//! ONNX model front end for kiln.
//!
//! This crate decodes ONNX protobuf models, provides a structured graph
//! representation independent of the underlying protobuf schema, and exposes
//! the filtered [`GraphView`]s that partitioning hands to a backend.
//!
//! # Example
//!
//! ```no_run
//! use kiln_onnx::{GraphView, load_model, parse_model};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load raw protobuf
//! let model = load_model("model.onnx")?;
//!
//! // Parse into structured graph
//! let graph = parse_model(&model, None)?;
//! let view = GraphView::full(&graph)?;
//!
//! println!("Model: {}", graph.metadata.name);
//! println!("Nodes: {}", view.node_ids().len());
//! # Ok(())
//! # }
//! ```

use prost::Message;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Protobuf types of the ONNX schema.
pub mod onnx;

pub mod graph;
pub mod parser;
pub mod serialize;
pub mod view;

pub use graph::{
    AttributeValue, DataType, Dimension, Graph, GraphMetadata, Node, NodeId, TensorId, TensorInfo,
    TensorKind, TensorShape,
};
pub use onnx::ModelProto;
pub use parser::{parse_model, tensor_raw_data};
pub use serialize::{graph_view_to_proto, tensor_info_to_proto, tensor_info_to_value_info};
pub use view::{GraphView, IndexedSubGraph, MetaDef};

/// Errors that can occur when loading or processing ONNX models.
#[derive(Debug, Error)]
pub enum OnnxError {
    #[error("Failed to read ONNX file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse ONNX protobuf: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Invalid ONNX model: {0}")]
    InvalidModel(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Missing tensor: {0}")]
    MissingTensor(String),

    #[error("Missing attribute: {0}")]
    MissingAttribute(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),
}

/// Result type for ONNX operations.
pub type Result<T> = std::result::Result<T, OnnxError>;

/// Load an ONNX model from a file.
///
/// # Example
///
/// ```no_run
/// use kiln_onnx::load_model;
///
/// let model = load_model("path/to/model.onnx")?;
/// # Ok::<(), kiln_onnx::OnnxError>(())
/// ```
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<ModelProto> {
    let bytes = fs::read(path)?;
    let model = ModelProto::decode(&bytes[..])?;
    Ok(model)
}

/// Load a model and parse it, resolving external data next to the file.
pub fn load_and_parse_model<P: AsRef<Path>>(path: P) -> Result<Graph> {
    let path = path.as_ref();
    let model = load_model(path)?;
    parse_model(&model, path.parent())
}

/// Encode a model and write it to a file.
pub fn save_model<P: AsRef<Path>>(path: P, model: &ModelProto) -> Result<()> {
    fs::write(path, model.encode_to_vec())?;
    Ok(())
}
