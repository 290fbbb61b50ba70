//! Import of ONNX subgraphs into kiln IR.
//!
//! A subgraph view is serialized to a `GraphProto` whose boundary is replaced
//! with the view's own inputs and outputs. [`GraphInfo`] validates that
//! restricted graph, and [`NodeImporter`] builds one function from it: graph
//! inputs become arguments, every node becomes an `onnx.<OpType>` operation
//! and graph outputs are returned. The function is only added to the module
//! once it verifies.

use kiln_ir::{
    Attribute, Context, DenseElements, Dim, ElementType, Function, Location, Module,
    OperationState, TensorType, Type, Value,
};
use kiln_onnx::onnx::attribute_proto::AttributeType;
use kiln_onnx::onnx::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    TypeProto, ValueInfoProto, tensor_shape_proto, type_proto,
};
use kiln_onnx::{DataType, GraphView};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Why an import failed. Verification failures carry the unverified function
/// so it can be printed.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{0}")]
    Model(String),

    #[error("{0}")]
    DefineFunction(String),

    #[error("{0}")]
    ImportNodes(String),

    #[error("function @{} failed to verify", .0.name())]
    Verification(Box<Function>),
}

type ImportResult<T> = std::result::Result<T, ImportError>;

/// Import `view` into `module` as the function `func_name`.
pub fn import_subgraph(
    context: &Context,
    module: &mut Module,
    view: &GraphView<'_>,
    func_name: &str,
) -> ImportResult<()> {
    let model_info = ModelInfo::from_domain_versions(view.domain_to_version());

    let graph_proto = kiln_onnx::graph_view_to_proto(view, true)
        .map_err(|e| ImportError::Model(e.to_string()))?;
    let mut graph_info = GraphInfo::new(&graph_proto);

    // The serialized boundary describes the whole host graph; only the
    // view's own boundary may reach the function signature.
    let boundary = |names: &[String]| -> ImportResult<Vec<ValueInfoProto>> {
        names
            .iter()
            .map(|name| {
                view.tensor(name)
                    .map(kiln_onnx::tensor_info_to_value_info)
                    .map_err(|e| ImportError::Model(e.to_string()))
            })
            .collect()
    };
    *graph_info.inputs_mut() = boundary(view.inputs())?;
    *graph_info.outputs_mut() = boundary(view.outputs())?;
    graph_info.initialize()?;

    let mut cache = ContextCache::new(&model_info);
    let mut importer = NodeImporter::new(&graph_info, &mut cache);
    importer.define_function(func_name, module)?;
    importer.import_all()?;
    let function = importer.into_function()?;

    // Verify here rather than in the pipeline: diagnostics still point at
    // the subgraph that produced them.
    if kiln_ir::verify_function(context, &function).is_err() {
        return Err(ImportError::Verification(Box::new(function)));
    }
    module
        .add_function(function)
        .map_err(|e| ImportError::DefineFunction(e.to_string()))?;
    tracing::debug!(
        function = func_name,
        nodes = graph_proto.node.len(),
        "imported subgraph"
    );
    Ok(())
}

// ──────────────────────────────── Model ────────────────────────────────

/// A synthetic model carrying only the operator set imports of a view.
#[derive(Debug, Clone, Default)]
pub struct ModelInfo {
    model_proto: ModelProto,
}

impl ModelInfo {
    pub fn from_domain_versions(domain_to_version: &BTreeMap<String, i64>) -> Self {
        let opset_import = domain_to_version
            .iter()
            .map(|(domain, &version)| OperatorSetIdProto {
                domain: domain.clone(),
                version,
            })
            .collect();
        Self {
            model_proto: ModelProto {
                opset_import,
                ..Default::default()
            },
        }
    }

    pub fn model_proto(&self) -> &ModelProto {
        &self.model_proto
    }

    /// Operator set version of `domain`. `ai.onnx` and the empty domain are
    /// the same.
    pub fn opset_version(&self, domain: &str) -> Option<i64> {
        let domain = if domain == "ai.onnx" { "" } else { domain };
        self.model_proto
            .opset_import
            .iter()
            .find(|o| o.domain == domain)
            .map(|o| o.version)
    }
}

// ──────────────────────────────── Graph ────────────────────────────────

/// Indexed view of a `GraphProto` with an overridable boundary.
#[derive(Debug)]
pub struct GraphInfo<'a> {
    graph_proto: &'a GraphProto,
    inputs: Vec<ValueInfoProto>,
    outputs: Vec<ValueInfoProto>,
    value_info: HashMap<&'a str, &'a ValueInfoProto>,
    initializers: HashMap<&'a str, &'a TensorProto>,
}

impl<'a> GraphInfo<'a> {
    pub fn new(graph_proto: &'a GraphProto) -> Self {
        Self {
            graph_proto,
            inputs: graph_proto.input.clone(),
            outputs: graph_proto.output.clone(),
            value_info: HashMap::new(),
            initializers: HashMap::new(),
        }
    }

    pub fn graph_proto(&self) -> &'a GraphProto {
        self.graph_proto
    }

    pub fn inputs(&self) -> &[ValueInfoProto] {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut Vec<ValueInfoProto> {
        &mut self.inputs
    }

    pub fn outputs(&self) -> &[ValueInfoProto] {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut Vec<ValueInfoProto> {
        &mut self.outputs
    }

    /// An initializer that is not shadowed by a boundary input.
    pub fn initializer(&self, name: &str) -> Option<&'a TensorProto> {
        if self.inputs.iter().any(|i| i.name == name) {
            return None;
        }
        self.initializers.get(name).copied()
    }

    /// Declared type of a value: boundary declarations first, then
    /// intermediate value infos.
    pub fn value_type(&self, name: &str) -> Option<&TypeProto> {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .find(|v| v.name == name)
            .or_else(|| self.value_info.get(name).copied())
            .and_then(|v| v.r#type.as_ref())
    }

    /// Index the graph and check that it is a well-formed dataflow graph
    /// over the current boundary.
    pub fn initialize(&mut self) -> ImportResult<()> {
        let proto = self.graph_proto;
        self.value_info = proto
            .value_info
            .iter()
            .map(|v| (v.name.as_str(), v))
            .collect();
        self.initializers = proto
            .initializer
            .iter()
            .map(|t| (t.name.as_str(), t))
            .collect();

        let inputs: HashSet<&str> = self.inputs.iter().map(|v| v.name.as_str()).collect();
        for input in &self.inputs {
            if !matches!(
                input.r#type.as_ref().and_then(|t| t.value.as_ref()),
                Some(type_proto::Value::TensorType(_))
            ) {
                return Err(model_error(format!(
                    "Graph input '{}' does not have a tensor type",
                    input.name
                )));
            }
        }

        let mut producers: HashMap<&str, usize> = HashMap::new();
        for (index, node) in proto.node.iter().enumerate() {
            for output in node.output.iter().filter(|o| !o.is_empty()) {
                if inputs.contains(output.as_str()) {
                    return Err(model_error(format!(
                        "Value '{}' is a graph input but is also produced by node {}",
                        output,
                        describe(node)
                    )));
                }
                if let Some(&previous) = producers.get(output.as_str()) {
                    return Err(model_error(format!(
                        "Value '{}' is produced by both node {} and node {}",
                        output,
                        describe(&proto.node[previous]),
                        describe(node)
                    )));
                }
                producers.insert(output.as_str(), index);
            }
        }

        let mut dag: DiGraph<usize, ()> = DiGraph::new();
        let indices: Vec<NodeIndex> = (0..proto.node.len()).map(|i| dag.add_node(i)).collect();
        for (index, node) in proto.node.iter().enumerate() {
            for input in node.input.iter().filter(|i| !i.is_empty()) {
                if let Some(&producer) = producers.get(input.as_str()) {
                    dag.add_edge(indices[producer], indices[index], ());
                }
            }
        }
        if let Err(cycle) = toposort(&dag, None) {
            return Err(model_error(format!(
                "Graph contains a cycle through node {}",
                describe(&proto.node[dag[cycle.node_id()]])
            )));
        }

        for (index, node) in proto.node.iter().enumerate() {
            for input in node.input.iter().filter(|i| !i.is_empty()) {
                if inputs.contains(input.as_str()) || self.initializers.contains_key(input.as_str())
                {
                    continue;
                }
                match producers.get(input.as_str()) {
                    Some(&producer) if producer < index => {}
                    Some(_) => {
                        return Err(model_error(format!(
                            "Node {} uses value '{}' before it is produced",
                            describe(node),
                            input
                        )));
                    }
                    None => {
                        return Err(model_error(format!(
                            "Node {} has dangling input '{}': it is not a graph input, \
                             an initializer or produced by any node",
                            describe(node),
                            input
                        )));
                    }
                }
            }
        }

        for output in &self.outputs {
            let name = output.name.as_str();
            if !producers.contains_key(name)
                && !inputs.contains(name)
                && !self.initializers.contains_key(name)
            {
                return Err(model_error(format!(
                    "Graph output '{}' is not produced by any node",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn model_error(message: String) -> ImportError {
    tracing::debug!("invalid subgraph: {}", message);
    ImportError::Model(message)
}

fn describe(node: &NodeProto) -> String {
    format!("'{}' ({})", node.name, node.op_type)
}

// ──────────────────────────────── Context cache ────────────────────────────────

/// Shape key for tensor types: `None` for unranked, `None` dims for dynamic.
type ShapeKey = Option<Vec<Option<i64>>>;

/// Memoized conversions from ONNX types and names to IR types and symbols.
#[derive(Debug)]
pub struct ContextCache<'m> {
    model_info: &'m ModelInfo,
    element_types: HashMap<i32, ElementType>,
    tensor_types: HashMap<(i32, ShapeKey), Type>,
    op_names: HashMap<(String, String), String>,
}

impl<'m> ContextCache<'m> {
    pub fn new(model_info: &'m ModelInfo) -> Self {
        Self {
            model_info,
            element_types: HashMap::new(),
            tensor_types: HashMap::new(),
            op_names: HashMap::new(),
        }
    }

    pub fn model_info(&self) -> &'m ModelInfo {
        self.model_info
    }

    pub fn convert_element_type(&mut self, elem_type: i32) -> Result<ElementType, String> {
        if let Some(&element) = self.element_types.get(&elem_type) {
            return Ok(element);
        }
        let dtype = DataType::from_onnx(elem_type).map_err(|e| e.to_string())?;
        let element = match dtype {
            DataType::F32 => ElementType::F32,
            DataType::U8 => ElementType::UI8,
            DataType::I8 => ElementType::SI8,
            DataType::U16 => ElementType::UI16,
            DataType::I16 => ElementType::SI16,
            DataType::I32 => ElementType::SI32,
            DataType::I64 => ElementType::SI64,
            DataType::Bool => ElementType::I1,
            DataType::F16 => ElementType::F16,
            DataType::F64 => ElementType::F64,
            DataType::U32 => ElementType::UI32,
            DataType::U64 => ElementType::UI64,
            DataType::Complex64 => ElementType::Complex64,
            DataType::Complex128 => ElementType::Complex128,
            DataType::BF16 => ElementType::BF16,
            DataType::Float8E4M3FN => ElementType::F8E4M3FN,
            DataType::Float8E4M3FNUZ => ElementType::F8E4M3FNUZ,
            DataType::Float8E5M2 => ElementType::F8E5M2,
            DataType::Float8E5M2FNUZ => ElementType::F8E5M2FNUZ,
        };
        self.element_types.insert(elem_type, element);
        Ok(element)
    }

    /// IR type of a value. Values without a declared type are unranked
    /// tensors of unknown element type.
    pub fn convert_type_proto(&mut self, type_proto: Option<&TypeProto>) -> Result<Type, String> {
        let Some(value) = type_proto.and_then(|t| t.value.as_ref()) else {
            return Ok(TensorType::unranked(None).into());
        };
        let type_proto::Value::TensorType(tensor) = value;

        let shape: ShapeKey = tensor.shape.as_ref().map(|shape| {
            shape
                .dim
                .iter()
                .map(|d| match d.value {
                    Some(tensor_shape_proto::dimension::Value::DimValue(v)) if v >= 0 => Some(v),
                    _ => None,
                })
                .collect()
        });
        let key = (tensor.elem_type, shape);
        if let Some(ty) = self.tensor_types.get(&key) {
            return Ok(ty.clone());
        }

        let element = self.convert_element_type(tensor.elem_type)?;
        let ty: Type = match &key.1 {
            None => TensorType::unranked(Some(element)).into(),
            Some(dims) => TensorType::ranked(
                dims.iter()
                    .map(|d| d.map_or(Dim::Dynamic, |v| Dim::Static(v as u64)))
                    .collect(),
                element,
            )
            .into(),
        };
        self.tensor_types.insert(key, ty.clone());
        Ok(ty)
    }

    /// Dense literal holding a tensor's data.
    pub fn convert_tensor_proto(&mut self, tensor: &TensorProto) -> Result<DenseElements, String> {
        let element = self.convert_element_type(tensor.data_type)?;
        if tensor.dims.iter().any(|&d| d < 0) {
            return Err(format!("tensor '{}' has a negative dimension", tensor.name));
        }
        let dims: Vec<u64> = tensor.dims.iter().map(|&d| d as u64).collect();
        let data = kiln_onnx::tensor_raw_data(tensor)
            .ok_or_else(|| format!("tensor '{}' has no data", tensor.name))?;
        let dense = DenseElements {
            ty: TensorType::static_shape(&dims, element),
            data,
        };
        if dense.expected_len() != Some(dense.data.len()) {
            return Err(format!(
                "tensor '{}' holds {} bytes but its type {} needs {:?}",
                tensor.name,
                dense.data.len(),
                dense.ty,
                dense.expected_len()
            ));
        }
        Ok(dense)
    }

    /// IR operation name of an ONNX operator.
    pub fn op_name(&mut self, domain: &str, op_type: &str) -> &str {
        self.op_names
            .entry((domain.to_string(), op_type.to_string()))
            .or_insert_with(|| match domain {
                "" | "ai.onnx" => format!("onnx.{}", op_type),
                other => format!("onnx.{}.{}", other, op_type),
            })
    }
}

// ──────────────────────────────── Node importer ────────────────────────────────

/// Builds one function from a [`GraphInfo`].
pub struct NodeImporter<'g, 'c, 'm> {
    graph_info: &'g GraphInfo<'g>,
    cache: &'c mut ContextCache<'m>,
    function: Option<Function>,
    values: HashMap<String, Value>,
    none: Option<Value>,
}

impl<'g, 'c, 'm> NodeImporter<'g, 'c, 'm> {
    pub fn new(graph_info: &'g GraphInfo<'g>, cache: &'c mut ContextCache<'m>) -> Self {
        Self {
            graph_info,
            cache,
            function: None,
            values: HashMap::new(),
            none: None,
        }
    }

    /// Create the function signature from the graph boundary.
    pub fn define_function(&mut self, name: &str, module: &Module) -> ImportResult<()> {
        if name.is_empty() {
            return Err(ImportError::DefineFunction(
                "function name must not be empty".to_string(),
            ));
        }
        if module.contains_symbol(name) {
            return Err(ImportError::DefineFunction(format!(
                "symbol '{}' is already defined in the module",
                name
            )));
        }

        let mut boundary_types = |infos: &[ValueInfoProto]| -> ImportResult<Vec<Type>> {
            infos
                .iter()
                .map(|info| {
                    self.cache
                        .convert_type_proto(info.r#type.as_ref())
                        .map_err(|e| {
                            ImportError::DefineFunction(format!("value '{}': {}", info.name, e))
                        })
                })
                .collect()
        };
        let argument_types = boundary_types(self.graph_info.inputs())?;
        let result_types = boundary_types(self.graph_info.outputs())?;

        let mut function = Function::new(name, argument_types, result_types, Location::name(name));
        if let Some(version) = self.cache.model_info().opset_version("") {
            function.set_attribute("onnx_meta.opset_version", Attribute::Int(version));
        }
        for (info, &argument) in self.graph_info.inputs().iter().zip(function.arguments()) {
            self.values.insert(info.name.clone(), argument);
        }
        self.function = Some(function);
        Ok(())
    }

    /// Import every node in graph order and return the graph outputs.
    pub fn import_all(&mut self) -> ImportResult<()> {
        if self.function.is_none() {
            return Err(ImportError::ImportNodes(
                "no function has been defined".to_string(),
            ));
        }
        for node in &self.graph_info.graph_proto().node {
            self.import_node(node)?;
        }

        let mut returned = Vec::with_capacity(self.graph_info.outputs().len());
        for output in self.graph_info.outputs() {
            let value = self.lookup_value(&output.name).map_err(|_| {
                ImportError::ImportNodes(format!("graph output '{}' is not defined", output.name))
            })?;
            returned.push(value);
        }
        self.function_mut()?
            .append(OperationState::new("func.return", Location::Unknown).add_operands(&returned));
        Ok(())
    }

    pub fn into_function(self) -> ImportResult<Function> {
        self.function
            .ok_or_else(|| ImportError::DefineFunction("no function has been defined".to_string()))
    }

    fn function_mut(&mut self) -> ImportResult<&mut Function> {
        self.function
            .as_mut()
            .ok_or_else(|| ImportError::ImportNodes("no function has been defined".to_string()))
    }

    fn import_node(&mut self, node: &NodeProto) -> ImportResult<()> {
        let node_error = |message: String| {
            ImportError::ImportNodes(format!("node {}: {}", describe(node), message))
        };

        let mut operands = Vec::with_capacity(node.input.len());
        for input in &node.input {
            let value = if input.is_empty() {
                self.none_value()?
            } else {
                self.lookup_value(input).map_err(node_error)?
            };
            operands.push(value);
        }

        let mut result_types = Vec::with_capacity(node.output.len());
        for output in &node.output {
            let ty = self
                .cache
                .convert_type_proto(self.graph_info.value_type(output))
                .map_err(|e| node_error(format!("output '{}': {}", output, e)))?;
            result_types.push(ty);
        }

        let location = if node.name.is_empty() {
            node.output
                .first()
                .map_or(Location::Unknown, |o| Location::name(o.clone()))
        } else {
            Location::name(node.name.clone())
        };
        let name = self.cache.op_name(&node.domain, &node.op_type).to_string();
        let mut state = OperationState::new(name, location)
            .add_operands(&operands)
            .add_results(result_types);
        for attribute in &node.attribute {
            let value = self.convert_attribute(attribute).map_err(node_error)?;
            state = state.add_attribute(attribute.name.clone(), value);
        }

        let results = self.function_mut()?.append(state);
        for (output, value) in node.output.iter().zip(results) {
            if !output.is_empty() {
                self.values.insert(output.clone(), value);
            }
        }
        Ok(())
    }

    /// SSA value for a name: an argument, an earlier result or an
    /// initializer materialized as a constant on first use.
    fn lookup_value(&mut self, name: &str) -> Result<Value, String> {
        if let Some(&value) = self.values.get(name) {
            return Ok(value);
        }
        let tensor = self
            .graph_info
            .initializer(name)
            .ok_or_else(|| format!("value '{}' is not defined", name))?;
        let dense = self.cache.convert_tensor_proto(tensor)?;
        let ty = Type::Tensor(dense.ty.clone());
        let function = self
            .function
            .as_mut()
            .ok_or_else(|| "no function has been defined".to_string())?;
        let results = function.append(
            OperationState::new("onnx.Constant", Location::name(name))
                .add_attribute("value", Attribute::DenseElements(dense))
                .add_results([ty]),
        );
        let value = results[0];
        self.values.insert(name.to_string(), value);
        Ok(value)
    }

    fn none_value(&mut self) -> ImportResult<Value> {
        if let Some(value) = self.none {
            return Ok(value);
        }
        let results = self
            .function_mut()?
            .append(OperationState::new("onnx.None", Location::Unknown).add_results([Type::None]));
        self.none = Some(results[0]);
        Ok(results[0])
    }

    fn convert_attribute(&mut self, attribute: &AttributeProto) -> Result<Attribute, String> {
        let kind = AttributeType::try_from(attribute.r#type)
            .map_err(|_| format!("attribute '{}' has an unknown type", attribute.name))?;
        Ok(match kind {
            AttributeType::Float => Attribute::Float(attribute.f as f64),
            AttributeType::Int => Attribute::Int(attribute.i),
            AttributeType::String => {
                Attribute::String(String::from_utf8_lossy(&attribute.s).into_owned())
            }
            AttributeType::Floats => {
                Attribute::Floats(attribute.floats.iter().map(|&f| f as f64).collect())
            }
            AttributeType::Ints => Attribute::Ints(attribute.ints.clone()),
            AttributeType::Strings => Attribute::Strings(
                attribute
                    .strings
                    .iter()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .collect(),
            ),
            AttributeType::Tensor => {
                let tensor = attribute
                    .t
                    .as_ref()
                    .ok_or_else(|| format!("attribute '{}' has no tensor", attribute.name))?;
                Attribute::DenseElements(self.cache.convert_tensor_proto(tensor)?)
            }
            other => {
                return Err(format!(
                    "attribute '{}' of type {:?} is not supported",
                    attribute.name, other
                ));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_ir::DialectRegistry;
    use kiln_onnx::{Graph, Node, TensorInfo, TensorKind, TensorShape};

    fn context() -> Context {
        let context = Context::new(kiln_compiler::default_registry());
        for ns in ["builtin", "func", "onnx"] {
            context.get_or_load_dialect(ns);
        }
        context
    }

    fn tensor(name: &str, kind: TensorKind, initializer: Option<Vec<u8>>) -> TensorInfo {
        TensorInfo {
            name: name.to_string(),
            dtype: DataType::F32,
            shape: TensorShape::Static(vec![2]),
            kind,
            initializer,
        }
    }

    /// `y = relu(x + w)` with `w` an initializer.
    fn graph() -> Graph {
        let mut graph = Graph::new();
        graph.metadata.opset_imports.insert(String::new(), 17);
        graph.add_tensor(tensor("x", TensorKind::Input, None));
        graph.add_tensor(tensor(
            "w",
            TensorKind::Weight,
            Some(bytemuck::cast_slice(&[1.0f32, 2.0]).to_vec()),
        ));
        graph.add_tensor(tensor("a", TensorKind::Intermediate, None));
        graph.add_tensor(tensor("y", TensorKind::Output, None));
        graph.inputs.push("x".to_string());
        graph.outputs.push("y".to_string());
        graph.add_node(Node::new("Add").with_io("add", &["x", "w"], &["a"]));
        graph.add_node(Node::new("Relu").with_io("relu", &["a"], &["y"]));
        graph
    }

    #[test]
    fn test_import_full_graph() {
        let graph = graph();
        let view = GraphView::full(&graph).unwrap();
        let context = context();
        let mut module = Module::new(Location::Unknown);

        import_subgraph(&context, &mut module, &view, "main").unwrap();

        let function = module.function("main").unwrap();
        let names: Vec<&str> = function.operations().iter().map(|op| op.name()).collect();
        assert_eq!(
            names,
            vec!["onnx.Constant", "onnx.Add", "onnx.Relu", "func.return"]
        );
        assert_eq!(function.arguments().len(), 1);
        assert_eq!(
            function.attributes().get("onnx_meta.opset_version"),
            Some(&Attribute::Int(17))
        );
        assert_eq!(
            function.operations()[1].location(),
            &Location::name("add")
        );
    }

    #[test]
    fn test_boundary_initializer_becomes_argument() {
        let graph = graph();
        let sub_graph = kiln_onnx::IndexedSubGraph {
            nodes: vec![0, 1],
            meta_def: Some(kiln_onnx::MetaDef {
                name: "fused".to_string(),
                inputs: vec!["x".to_string(), "w".to_string()],
                outputs: vec!["y".to_string()],
                ..Default::default()
            }),
        };
        let view = GraphView::from_indexed(&graph, &sub_graph).unwrap();
        let context = context();
        let mut module = Module::new(Location::Unknown);

        import_subgraph(&context, &mut module, &view, "fused").unwrap();
        let function = module.function("fused").unwrap();
        assert_eq!(function.arguments().len(), 2);
        assert!(
            function
                .operations()
                .iter()
                .all(|op| op.name() != "onnx.Constant")
        );
    }

    #[test]
    fn test_dangling_reference_fails_fast() {
        let graph = graph();
        // Only the Relu node, but its input is not part of the boundary.
        let sub_graph = kiln_onnx::IndexedSubGraph {
            nodes: vec![1],
            meta_def: Some(kiln_onnx::MetaDef {
                name: "tail".to_string(),
                inputs: vec![],
                outputs: vec!["y".to_string()],
                ..Default::default()
            }),
        };
        let view = GraphView::from_indexed(&graph, &sub_graph).unwrap();
        let mut module = Module::new(Location::Unknown);

        let err = import_subgraph(&context(), &mut module, &view, "tail").unwrap_err();
        assert!(matches!(err, ImportError::Model(_)));
        assert!(err.to_string().contains("dangling input 'a'"), "{}", err);
        assert!(module.functions().is_empty());
    }

    #[test]
    fn test_duplicate_function_name() {
        let graph = graph();
        let view = GraphView::full(&graph).unwrap();
        let context = context();
        let mut module = Module::new(Location::Unknown);
        import_subgraph(&context, &mut module, &view, "main").unwrap();

        let err = import_subgraph(&context, &mut module, &view, "main").unwrap_err();
        assert!(matches!(err, ImportError::DefineFunction(_)));
        assert_eq!(module.functions().len(), 1);
    }

    #[test]
    fn test_empty_function_name() {
        let graph = graph();
        let view = GraphView::full(&graph).unwrap();
        let mut module = Module::new(Location::Unknown);

        let err = import_subgraph(&context(), &mut module, &view, "").unwrap_err();
        assert!(matches!(err, ImportError::DefineFunction(_)));
        assert!(err.to_string().contains("must not be empty"), "{}", err);
        assert!(module.functions().is_empty());
    }

    #[test]
    fn test_verification_failure_keeps_module_clean() {
        let mut graph = graph();
        // Relu takes exactly one operand.
        graph.nodes[1].inputs.push("x".to_string());
        let view = GraphView::full(&graph).unwrap();
        let mut module = Module::new(Location::Unknown);

        let err = import_subgraph(&context(), &mut module, &view, "main").unwrap_err();
        let ImportError::Verification(function) = err else {
            panic!("expected a verification failure");
        };
        assert_eq!(function.name(), "main");
        assert!(module.functions().is_empty());
    }

    #[test]
    fn test_graph_info_rejects_double_producer() {
        let proto = GraphProto {
            node: vec![
                NodeProto {
                    name: "a".to_string(),
                    op_type: "Neg".to_string(),
                    input: vec!["x".to_string()],
                    output: vec!["y".to_string()],
                    ..Default::default()
                },
                NodeProto {
                    name: "b".to_string(),
                    op_type: "Abs".to_string(),
                    input: vec!["x".to_string()],
                    output: vec!["y".to_string()],
                    ..Default::default()
                },
            ],
            input: vec![kiln_onnx::tensor_info_to_value_info(&tensor(
                "x",
                TensorKind::Input,
                None,
            ))],
            ..Default::default()
        };
        let mut info = GraphInfo::new(&proto);
        let err = info.initialize().unwrap_err();
        assert!(err.to_string().contains("produced by both node 'a' (Neg) and node 'b' (Abs)"));
    }

    #[test]
    fn test_graph_info_rejects_cycle() {
        let node = |name: &str, input: &str, output: &str| NodeProto {
            name: name.to_string(),
            op_type: "Neg".to_string(),
            input: vec![input.to_string()],
            output: vec![output.to_string()],
            ..Default::default()
        };
        let proto = GraphProto {
            node: vec![node("a", "q", "p"), node("b", "p", "q")],
            ..Default::default()
        };
        let mut info = GraphInfo::new(&proto);
        let err = info.initialize().unwrap_err();
        assert!(err.to_string().contains("cycle"), "{}", err);
    }

    #[test]
    fn test_context_cache_memoizes() {
        let model_info = ModelInfo::from_domain_versions(&BTreeMap::from([
            (String::new(), 17),
            ("com.microsoft".to_string(), 1),
        ]));
        assert_eq!(model_info.opset_version("ai.onnx"), Some(17));
        assert_eq!(model_info.model_proto().opset_import.len(), 2);

        let mut cache = ContextCache::new(&model_info);
        let value_info = kiln_onnx::tensor_info_to_value_info(&tensor("x", TensorKind::Input, None));
        let first = cache.convert_type_proto(value_info.r#type.as_ref()).unwrap();
        let second = cache.convert_type_proto(value_info.r#type.as_ref()).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.tensor_types.len(), 1);
        assert_eq!(
            first,
            Type::Tensor(TensorType::static_shape(&[2], ElementType::F32))
        );

        assert_eq!(cache.op_name("", "Add"), "onnx.Add");
        assert_eq!(cache.op_name("com.microsoft", "Gelu"), "onnx.com.microsoft.Gelu");
        assert_eq!(
            cache.convert_type_proto(None).unwrap(),
            Type::Tensor(TensorType::unranked(None))
        );
    }

    #[test]
    fn test_unregistered_dialect_is_reported() {
        let graph = graph();
        let view = GraphView::full(&graph).unwrap();
        let context = Context::new(DialectRegistry::new());
        context.get_or_load_dialect("func");
        let mut module = Module::new(Location::Unknown);
        assert!(matches!(
            import_subgraph(&context, &mut module, &view, "main"),
            Err(ImportError::Verification(_))
        ));
    }
}
