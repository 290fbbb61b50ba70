//! Parsed ONNX graphs.
//!
//! A [`Graph`] is the decoded form of a `GraphProto`: tensors are interned by
//! name, nodes keep their file order, and every element type ONNX can put on
//! a tensor boundary has a [`DataType`].

use crate::{OnnxError, Result};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Unique identifier for a node in the graph.
pub type NodeId = usize;

/// Unique identifier for a tensor in the graph.
pub type TensorId = usize;

/// Internal graph representation of an ONNX model.
#[derive(Debug, Clone)]
pub struct Graph {
    /// All nodes (operations) in the graph.
    pub nodes: Vec<Node>,

    /// All tensors in the graph, indexed by name.
    pub tensors: HashMap<String, TensorId>,

    /// Tensor metadata.
    pub tensor_info: Vec<TensorInfo>,

    /// Names of input tensors (initializers excluded).
    pub inputs: Vec<String>,

    /// Names of output tensors.
    pub outputs: Vec<String>,

    /// Graph metadata.
    pub metadata: GraphMetadata,
}

/// Metadata about the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphMetadata {
    /// Graph name (from ONNX).
    pub name: String,

    /// IR version.
    pub ir_version: i64,

    /// Producer name.
    pub producer_name: String,

    /// Model version.
    pub model_version: i64,

    /// Operator set versions keyed by domain. The default ONNX domain is
    /// stored under the empty string.
    pub opset_imports: BTreeMap<String, i64>,

    /// True for graphs nested inside a node attribute (`If`/`Loop` bodies).
    pub is_subgraph: bool,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            tensors: HashMap::new(),
            tensor_info: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            metadata: GraphMetadata::default(),
        }
    }

    /// Get tensor ID by name.
    pub fn tensor_id(&self, name: &str) -> Result<TensorId> {
        self.tensors
            .get(name)
            .copied()
            .ok_or_else(|| OnnxError::MissingTensor(name.to_string()))
    }

    /// Get tensor info by ID.
    pub fn tensor(&self, id: TensorId) -> Result<&TensorInfo> {
        self.tensor_info
            .get(id)
            .ok_or_else(|| OnnxError::InvalidGraph(format!("Invalid tensor ID: {}", id)))
    }

    /// Get tensor info by name.
    pub fn tensor_by_name(&self, name: &str) -> Result<&TensorInfo> {
        let id = self.tensor_id(name)?;
        self.tensor(id)
    }

    /// Get a node by ID.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| OnnxError::InvalidGraph(format!("Invalid node ID: {}", id)))
    }

    /// Add a tensor to the graph.
    ///
    /// Re-adding a name replaces the earlier entry's lookup.
    pub fn add_tensor(&mut self, info: TensorInfo) -> TensorId {
        let id = self.tensor_info.len();
        let name = info.name.clone();
        self.tensor_info.push(info);
        self.tensors.insert(name, id);
        id
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    /// Whether `name` refers to a tensor with initializer data.
    pub fn is_initializer(&self, name: &str) -> bool {
        self.tensor_by_name(name)
            .map(|info| info.kind == TensorKind::Weight && info.initializer.is_some())
            .unwrap_or(false)
    }

    /// Opset version of the default ONNX domain, if imported.
    pub fn default_opset_version(&self) -> Option<i64> {
        self.metadata.opset_imports.get("").copied()
    }

    /// Node IDs in a topological order (producers before consumers).
    ///
    /// Ties keep the original node order, so already-sorted graphs come back
    /// unchanged.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        self.topological_order_of(&(0..self.nodes.len()).collect::<Vec<_>>())
    }

    /// Topological order restricted to a subset of nodes.
    ///
    /// Edges leaving the subset are ignored.
    pub fn topological_order_of(&self, subset: &[NodeId]) -> Result<Vec<NodeId>> {
        let mut dag: DiGraph<NodeId, ()> = DiGraph::new();
        let mut producers: HashMap<&str, petgraph::graph::NodeIndex> = HashMap::new();
        let mut indices = Vec::with_capacity(subset.len());

        for &id in subset {
            let node = self.node(id)?;
            let index = dag.add_node(id);
            indices.push(index);
            for output in node.outputs.iter().filter(|o| !o.is_empty()) {
                producers.insert(output.as_str(), index);
            }
        }

        for (&id, &index) in subset.iter().zip(&indices) {
            for input in self.nodes[id].inputs.iter().filter(|i| !i.is_empty()) {
                if let Some(&producer) = producers.get(input.as_str()) {
                    dag.add_edge(producer, index, ());
                }
            }
        }

        // petgraph's toposort is a DFS; re-rank so independent nodes keep
        // their input order.
        let sorted = toposort(&dag, None).map_err(|cycle| {
            let node = &self.nodes[dag[cycle.node_id()]];
            OnnxError::InvalidGraph(format!(
                "Graph contains a cycle through node '{}' ({})",
                node.name, node.op_type
            ))
        })?;

        let mut remaining_deps: Vec<usize> = indices
            .iter()
            .map(|&index| {
                dag.neighbors_directed(index, petgraph::Direction::Incoming)
                    .count()
            })
            .collect();
        let position: HashMap<petgraph::graph::NodeIndex, usize> =
            indices.iter().enumerate().map(|(i, &ix)| (ix, i)).collect();
        let mut order = Vec::with_capacity(sorted.len());
        let mut done = vec![false; indices.len()];
        while order.len() < indices.len() {
            let Some(next) = (0..indices.len()).find(|&i| !done[i] && remaining_deps[i] == 0)
            else {
                break;
            };
            done[next] = true;
            order.push(subset[next]);
            for consumer in dag.neighbors_directed(indices[next], petgraph::Direction::Outgoing) {
                remaining_deps[position[&consumer]] -= 1;
            }
        }

        Ok(order)
    }

    /// Check that every name on the boundary and on a node refers to a
    /// registered tensor. Empty names are absent optional values.
    pub fn validate(&self) -> Result<()> {
        let boundary = self.inputs.iter().chain(&self.outputs);
        let node_values = self
            .nodes
            .iter()
            .flat_map(|node| node.inputs.iter().chain(&node.outputs))
            .filter(|name| !name.is_empty());
        for name in boundary.chain(node_values) {
            self.tensor_id(name)?;
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// A node (operation) in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Node name (from ONNX, may be empty).
    pub name: String,

    /// Operation type (e.g., "MatMul", "Add", "Conv").
    pub op_type: String,

    /// Input tensor names.
    pub inputs: Vec<String>,

    /// Output tensor names.
    pub outputs: Vec<String>,

    /// Node attributes.
    pub attributes: HashMap<String, AttributeValue>,

    /// Domain (for custom operators).
    pub domain: String,
}

impl Node {
    /// Create a new node.
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: HashMap::new(),
            domain: String::new(),
        }
    }

    /// Builder-style helper used by tests and graph rewrites.
    pub fn with_io(
        mut self,
        name: impl Into<String>,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Self {
        self.name = name.into();
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Get an attribute value.
    pub fn attr<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<AttributeValue>,
        T::Error: std::fmt::Display,
    {
        let value = self
            .attributes
            .get(name)
            .ok_or_else(|| OnnxError::MissingAttribute(name.to_string()))?;

        T::try_from(value.clone()).map_err(|e| OnnxError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            actual: format!("{}", e),
        })
    }

    /// Check if an attribute exists.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

/// Attribute value types.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(TensorInfo),
    Graph(Box<Graph>),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

impl TryFrom<AttributeValue> for f32 {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Float(v) => Ok(v),
            _ => Err("Not a float".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for i64 {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Int(v) => Ok(v),
            _ => Err("Not an int".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for String {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::String(v) => Ok(v),
            _ => Err("Not a string".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for Vec<i64> {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Ints(v) => Ok(v),
            _ => Err("Not an int array".to_string()),
        }
    }
}

/// Information about a tensor.
#[derive(Debug, Clone)]
pub struct TensorInfo {
    /// Tensor name.
    pub name: String,

    /// Data type.
    pub dtype: DataType,

    /// Tensor shape.
    pub shape: TensorShape,

    /// Role of the tensor in the graph.
    pub kind: TensorKind,

    /// Initializer data (for weights), little-endian and densely packed.
    pub initializer: Option<Vec<u8>>,
}

/// Element types of ONNX tensors.
///
/// `String` tensors are not representable; the parser rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    F32,
    U8,
    I8,
    U16,
    I16,
    I32,
    I64,
    Bool,
    F16,
    F64,
    U32,
    U64,
    Complex64,
    Complex128,
    BF16,
    Float8E4M3FN,
    Float8E4M3FNUZ,
    Float8E5M2,
    Float8E5M2FNUZ,
}

impl DataType {
    /// Every data type, in ONNX enumeration order.
    pub const ALL: [DataType; 19] = [
        DataType::F32,
        DataType::U8,
        DataType::I8,
        DataType::U16,
        DataType::I16,
        DataType::I32,
        DataType::I64,
        DataType::Bool,
        DataType::F16,
        DataType::F64,
        DataType::U32,
        DataType::U64,
        DataType::Complex64,
        DataType::Complex128,
        DataType::BF16,
        DataType::Float8E4M3FN,
        DataType::Float8E4M3FNUZ,
        DataType::Float8E5M2,
        DataType::Float8E5M2FNUZ,
    ];

    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::U8
            | DataType::I8
            | DataType::Bool
            | DataType::Float8E4M3FN
            | DataType::Float8E4M3FNUZ
            | DataType::Float8E5M2
            | DataType::Float8E5M2FNUZ => 1,
            DataType::U16 | DataType::I16 | DataType::F16 | DataType::BF16 => 2,
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 | DataType::Complex64 => 8,
            DataType::Complex128 => 16,
        }
    }

    /// True for the four 8-bit floating point variants.
    pub fn is_float8(&self) -> bool {
        matches!(
            self,
            DataType::Float8E4M3FN
                | DataType::Float8E4M3FNUZ
                | DataType::Float8E5M2
                | DataType::Float8E5M2FNUZ
        )
    }

    /// Convert from the `TensorProto.DataType` enumeration value.
    pub fn from_onnx(value: i32) -> Result<Self> {
        use crate::onnx::tensor_proto::DataType as OnnxDataType;
        let onnx = OnnxDataType::try_from(value)
            .map_err(|_| OnnxError::UnsupportedDataType(format!("unknown data type {}", value)))?;
        Ok(match onnx {
            OnnxDataType::Float => DataType::F32,
            OnnxDataType::Uint8 => DataType::U8,
            OnnxDataType::Int8 => DataType::I8,
            OnnxDataType::Uint16 => DataType::U16,
            OnnxDataType::Int16 => DataType::I16,
            OnnxDataType::Int32 => DataType::I32,
            OnnxDataType::Int64 => DataType::I64,
            OnnxDataType::Bool => DataType::Bool,
            OnnxDataType::Float16 => DataType::F16,
            OnnxDataType::Double => DataType::F64,
            OnnxDataType::Uint32 => DataType::U32,
            OnnxDataType::Uint64 => DataType::U64,
            OnnxDataType::Complex64 => DataType::Complex64,
            OnnxDataType::Complex128 => DataType::Complex128,
            OnnxDataType::Bfloat16 => DataType::BF16,
            OnnxDataType::Float8e4m3fn => DataType::Float8E4M3FN,
            OnnxDataType::Float8e4m3fnuz => DataType::Float8E4M3FNUZ,
            OnnxDataType::Float8e5m2 => DataType::Float8E5M2,
            OnnxDataType::Float8e5m2fnuz => DataType::Float8E5M2FNUZ,
            OnnxDataType::Undefined | OnnxDataType::String => {
                return Err(OnnxError::UnsupportedDataType(format!("{:?}", onnx)));
            }
        })
    }

    /// The `TensorProto.DataType` enumeration value.
    pub fn to_onnx(&self) -> i32 {
        use crate::onnx::tensor_proto::DataType as OnnxDataType;
        let onnx = match self {
            DataType::F32 => OnnxDataType::Float,
            DataType::U8 => OnnxDataType::Uint8,
            DataType::I8 => OnnxDataType::Int8,
            DataType::U16 => OnnxDataType::Uint16,
            DataType::I16 => OnnxDataType::Int16,
            DataType::I32 => OnnxDataType::Int32,
            DataType::I64 => OnnxDataType::Int64,
            DataType::Bool => OnnxDataType::Bool,
            DataType::F16 => OnnxDataType::Float16,
            DataType::F64 => OnnxDataType::Double,
            DataType::U32 => OnnxDataType::Uint32,
            DataType::U64 => OnnxDataType::Uint64,
            DataType::Complex64 => OnnxDataType::Complex64,
            DataType::Complex128 => OnnxDataType::Complex128,
            DataType::BF16 => OnnxDataType::Bfloat16,
            DataType::Float8E4M3FN => OnnxDataType::Float8e4m3fn,
            DataType::Float8E4M3FNUZ => OnnxDataType::Float8e4m3fnuz,
            DataType::Float8E5M2 => OnnxDataType::Float8e5m2,
            DataType::Float8E5M2FNUZ => OnnxDataType::Float8e5m2fnuz,
        };
        onnx as i32
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::F32 => "float32",
            DataType::U8 => "uint8",
            DataType::I8 => "int8",
            DataType::U16 => "uint16",
            DataType::I16 => "int16",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::Bool => "bool",
            DataType::F16 => "float16",
            DataType::F64 => "float64",
            DataType::U32 => "uint32",
            DataType::U64 => "uint64",
            DataType::Complex64 => "complex64",
            DataType::Complex128 => "complex128",
            DataType::BF16 => "bfloat16",
            DataType::Float8E4M3FN => "float8e4m3fn",
            DataType::Float8E4M3FNUZ => "float8e4m3fnuz",
            DataType::Float8E5M2 => "float8e5m2",
            DataType::Float8E5M2FNUZ => "float8e5m2fnuz",
        };
        f.write_str(name)
    }
}

/// Tensor shape representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorShape {
    /// Static shape (all dimensions known).
    Static(Vec<usize>),

    /// Dynamic shape with symbolic dimensions.
    Dynamic(Vec<Dimension>),

    /// Unknown/unspecified shape (not yet inferred).
    Unknown,

    /// Optional input that is absent (ONNX empty string).
    Absent,
}

impl TensorShape {
    /// Check if the shape is fully static.
    pub fn is_static(&self) -> bool {
        matches!(self, TensorShape::Static(_))
    }

    /// Get static dimensions if available.
    pub fn as_static(&self) -> Option<&[usize]> {
        match self {
            TensorShape::Static(dims) => Some(dims),
            _ => None,
        }
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> Option<usize> {
        match self {
            TensorShape::Static(dims) => Some(dims.len()),
            TensorShape::Dynamic(dims) => Some(dims.len()),
            TensorShape::Unknown | TensorShape::Absent => None,
        }
    }

    /// Number of elements when the shape is static.
    pub fn element_count(&self) -> Option<usize> {
        self.as_static().map(|dims| dims.iter().product())
    }
}

/// A single dimension in a tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Static dimension with known size.
    Static(usize),

    /// Symbolic dimension such as `batch`, resolved by the caller.
    Named(String),
}

/// Where a tensor's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
    /// Graph input, supplied per call.
    Input,

    /// Graph output.
    Output,

    /// Initializer stored in the model.
    Weight,

    /// Produced and consumed inside the graph.
    Intermediate,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(name: &str, kind: TensorKind) -> TensorInfo {
        TensorInfo {
            name: name.to_string(),
            dtype: DataType::F32,
            shape: TensorShape::Static(vec![2]),
            kind,
            initializer: None,
        }
    }

    #[test]
    fn test_add_and_validate() {
        let mut graph = Graph::new();
        assert_eq!(graph.add_tensor(tensor("x", TensorKind::Input)), 0);
        assert_eq!(graph.add_tensor(tensor("y", TensorKind::Output)), 1);
        graph.inputs.push("x".to_string());
        graph.outputs.push("y".to_string());
        graph.add_node(Node::new("Relu").with_io("relu", &["x", ""], &["y"]));
        assert_eq!(graph.tensor_id("y").unwrap(), 1);
        graph.validate().unwrap();

        graph.add_node(Node::new("Neg").with_io("neg", &["missing"], &["y"]));
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_node_attributes() {
        let mut node = Node::new("Conv");
        node.attributes
            .insert("kernel_shape".to_string(), AttributeValue::Ints(vec![3, 3]));

        let kernel: Vec<i64> = node.attr("kernel_shape").unwrap();
        assert_eq!(kernel, vec![3, 3]);
        assert!(node.attr::<f32>("kernel_shape").is_err());
    }

    #[test]
    fn test_tensor_shape() {
        let static_shape = TensorShape::Static(vec![1, 2, 3]);
        assert!(static_shape.is_static());
        assert_eq!(static_shape.ndim(), Some(3));
        assert_eq!(static_shape.element_count(), Some(6));

        let dynamic_shape = TensorShape::Dynamic(vec![
            Dimension::Named("batch".to_string()),
            Dimension::Static(512),
        ]);
        assert!(!dynamic_shape.is_static());
        assert_eq!(dynamic_shape.ndim(), Some(2));
    }

    #[test]
    fn test_data_type_onnx_round_trip() {
        for dtype in DataType::ALL {
            assert_eq!(DataType::from_onnx(dtype.to_onnx()).unwrap(), dtype);
        }
        assert!(DataType::from_onnx(8).is_err()); // STRING
        assert!(DataType::from_onnx(0).is_err());
        assert!(DataType::from_onnx(99).is_err());
    }

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::Bool.size(), 1);
        assert_eq!(DataType::BF16.size(), 2);
        assert_eq!(DataType::Complex64.size(), 8);
        assert_eq!(DataType::Complex128.size(), 16);
        assert!(DataType::Float8E5M2.is_float8());
        assert!(!DataType::U8.is_float8());
    }

    #[test]
    fn test_topological_order_reorders_nodes() {
        let mut graph = Graph::new();
        for name in ["x", "a", "b"] {
            graph.add_tensor(tensor(name, TensorKind::Intermediate));
        }
        graph.add_node(Node::new("Relu").with_io("second", &["a"], &["b"]));
        graph.add_node(Node::new("Neg").with_io("first", &["x"], &["a"]));

        assert_eq!(graph.topological_order().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_topological_order_keeps_independent_nodes_in_order() {
        let mut graph = Graph::new();
        for name in ["x", "a", "b"] {
            graph.add_tensor(tensor(name, TensorKind::Intermediate));
        }
        graph.add_node(Node::new("Neg").with_io("n0", &["x"], &["a"]));
        graph.add_node(Node::new("Abs").with_io("n1", &["x"], &["b"]));

        assert_eq!(graph.topological_order().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_topological_order_detects_cycle() {
        let mut graph = Graph::new();
        for name in ["a", "b"] {
            graph.add_tensor(tensor(name, TensorKind::Intermediate));
        }
        graph.add_node(Node::new("Neg").with_io("n0", &["b"], &["a"]));
        graph.add_node(Node::new("Neg").with_io("n1", &["a"], &["b"]));

        let err = graph.topological_order().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_is_initializer() {
        let mut graph = Graph::new();
        let mut weight = tensor("w", TensorKind::Weight);
        weight.initializer = Some(vec![0; 8]);
        graph.add_tensor(weight);
        graph.add_tensor(tensor("x", TensorKind::Input));

        assert!(graph.is_initializer("w"));
        assert!(!graph.is_initializer("x"));
        assert!(!graph.is_initializer("missing"));
    }
}
