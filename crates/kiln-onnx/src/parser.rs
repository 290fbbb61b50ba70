//! Decoding of `ModelProto` messages into [`Graph`]s.

use crate::graph::*;
use crate::onnx::{
    AttributeProto, GraphProto, ModelProto, NodeProto, TensorProto, TensorShapeProto,
    ValueInfoProto, tensor_proto,
};
use crate::{OnnxError, Result};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Parse a decoded model.
///
/// External tensor data is resolved relative to `base_dir`, usually the
/// directory holding the model file.
pub fn parse_model(model: &ModelProto, base_dir: Option<&Path>) -> Result<Graph> {
    let graph_proto = model
        .graph
        .as_ref()
        .ok_or_else(|| OnnxError::InvalidGraph("Model has no graph".to_string()))?;

    let opset_imports: BTreeMap<String, i64> = model
        .opset_import
        .iter()
        .map(|opset| (opset.domain.clone(), opset.version))
        .collect();

    let mut graph = parse_graph(graph_proto, &opset_imports, base_dir, false)?;
    graph.metadata.ir_version = model.ir_version;
    graph.metadata.producer_name = model.producer_name.clone();
    graph.metadata.model_version = model.model_version;

    tracing::debug!(
        name = %graph.metadata.name,
        nodes = graph.nodes.len(),
        tensors = graph.tensor_info.len(),
        "parsed ONNX model"
    );

    Ok(graph)
}

/// Parse a GraphProto. Nested graphs (control-flow bodies) inherit the
/// model's operator sets and are marked as subgraphs.
fn parse_graph(
    graph_proto: &GraphProto,
    opset_imports: &BTreeMap<String, i64>,
    base_dir: Option<&Path>,
    is_subgraph: bool,
) -> Result<Graph> {
    let mut graph = Graph::new();
    graph.metadata = GraphMetadata {
        name: graph_proto.name.clone(),
        opset_imports: opset_imports.clone(),
        is_subgraph,
        ..GraphMetadata::default()
    };

    // Initializers may also be listed as graph inputs (IR < 4); they are
    // weights, not call arguments.
    let weights: HashSet<&str> = graph_proto
        .initializer
        .iter()
        .map(|tensor| tensor.name.as_str())
        .collect();

    for value in graph_proto
        .input
        .iter()
        .filter(|value| !weights.contains(value.name.as_str()))
    {
        graph.add_tensor(parse_value_info(value, TensorKind::Input)?);
        graph.inputs.push(value.name.clone());
    }
    for value in &graph_proto.output {
        graph.add_tensor(parse_value_info(value, TensorKind::Output)?);
        graph.outputs.push(value.name.clone());
    }
    for tensor in &graph_proto.initializer {
        graph.add_tensor(parse_initializer(tensor, TensorKind::Weight, base_dir)?);
    }
    for value in &graph_proto.value_info {
        if graph.tensors.contains_key(&value.name) {
            continue;
        }
        graph.add_tensor(parse_value_info(value, TensorKind::Intermediate)?);
    }

    for node_proto in &graph_proto.node {
        let node = parse_node(node_proto, opset_imports, base_dir)?;
        let is_constant = node.op_type == "Constant";

        for output in node.outputs.iter().filter(|o| !o.is_empty()) {
            match graph.tensors.get(output).copied() {
                None => {
                    let info = if is_constant {
                        extract_constant_tensor_info(node_proto, output, base_dir)?
                    } else {
                        unknown_intermediate(output)
                    };
                    graph.add_tensor(info);
                }
                // value_info declared it; the data still lives on the node
                Some(id) if is_constant => {
                    let constant = extract_constant_tensor_info(node_proto, output, base_dir)?;
                    let declared = &mut graph.tensor_info[id];
                    declared.dtype = constant.dtype;
                    declared.shape = constant.shape;
                    declared.initializer = constant.initializer;
                }
                Some(_) => {}
            }
        }

        graph.add_node(node);
    }

    graph.validate()?;

    Ok(graph)
}

/// Parse a ValueInfoProto into TensorInfo.
fn parse_value_info(value_info: &ValueInfoProto, kind: TensorKind) -> Result<TensorInfo> {
    let name = value_info.name.clone();

    let (dtype, shape) = match value_info.r#type.as_ref().and_then(|t| t.value.as_ref()) {
        Some(crate::onnx::type_proto::Value::TensorType(tensor_type)) => {
            let dtype = if tensor_type.elem_type == 0 {
                DataType::F32
            } else {
                DataType::from_onnx(tensor_type.elem_type)?
            };
            (dtype, parse_shape(&tensor_type.shape))
        }
        None => (DataType::F32, TensorShape::Unknown),
    };

    Ok(TensorInfo {
        name,
        dtype,
        shape,
        kind,
        initializer: None,
    })
}

/// Convert an optional TensorShapeProto to a TensorShape.
fn parse_shape(shape: &Option<TensorShapeProto>) -> TensorShape {
    use crate::onnx::tensor_shape_proto::dimension::Value;

    let Some(shape) = shape else {
        return TensorShape::Unknown;
    };

    let dims: Vec<Dimension> = shape
        .dim
        .iter()
        .map(|dim| match &dim.value {
            Some(Value::DimValue(v)) if *v >= 0 => Dimension::Static(*v as usize),
            Some(Value::DimParam(param)) => Dimension::Named(param.clone()),
            // Unnamed unknown dims are given a placeholder symbol.
            _ => Dimension::Named(String::from("?")),
        })
        .collect();

    if dims.iter().all(|d| matches!(d, Dimension::Static(_))) {
        TensorShape::Static(
            dims.into_iter()
                .map(|d| match d {
                    Dimension::Static(v) => v,
                    Dimension::Named(_) => 0,
                })
                .collect(),
        )
    } else {
        TensorShape::Dynamic(dims)
    }
}

/// Parse a TensorProto (initializer) into TensorInfo.
fn parse_initializer(
    tensor: &TensorProto,
    kind: TensorKind,
    base_dir: Option<&Path>,
) -> Result<TensorInfo> {
    let name = tensor.name.clone();
    let dtype = DataType::from_onnx(tensor.data_type)?;
    let shape = TensorShape::Static(tensor.dims.iter().map(|&d| d as usize).collect());

    let initializer = if tensor.data_location == tensor_proto::DataLocation::External as i32 {
        load_external_data(tensor, base_dir)?
    } else {
        tensor_raw_data(tensor)
    };

    Ok(TensorInfo {
        name,
        dtype,
        shape,
        kind,
        initializer,
    })
}

/// Read the bytes of a tensor stored outside the model file.
///
/// Recognized `external_data` keys are `location`, `offset` and `length`;
/// others (such as `checksum`) are ignored.
fn load_external_data(tensor: &TensorProto, base_dir: Option<&Path>) -> Result<Option<Vec<u8>>> {
    let parse_number = |key: &str| -> Result<Option<u64>> {
        external_entry(tensor, key)
            .map(|value| {
                value.parse::<u64>().map_err(|e| {
                    OnnxError::InvalidModel(format!(
                        "Tensor '{}' has a bad external_data {}: {}",
                        tensor.name, key, e
                    ))
                })
            })
            .transpose()
    };

    let location = external_entry(tensor, "location").ok_or_else(|| {
        OnnxError::InvalidModel(format!(
            "Tensor '{}' is stored externally but has no location",
            tensor.name
        ))
    })?;
    let offset = parse_number("offset")?.unwrap_or(0);
    let length = parse_number("length")?;

    let path = base_dir.map_or_else(|| PathBuf::from(location), |dir| dir.join(location));
    let mut file = File::open(&path).map_err(|e| {
        OnnxError::InvalidModel(format!(
            "Cannot open external data '{}' of tensor '{}': {}",
            path.display(),
            tensor.name,
            e
        ))
    })?;
    file.seek(SeekFrom::Start(offset))?;

    let mut data = Vec::new();
    match length {
        Some(len) => {
            data.resize(len as usize, 0);
            file.read_exact(&mut data)?;
        }
        None => {
            file.read_to_end(&mut data)?;
        }
    }
    Ok(Some(data))
}

fn external_entry<'t>(tensor: &'t TensorProto, key: &str) -> Option<&'t str> {
    tensor
        .external_data
        .iter()
        .find(|e| e.key == key)
        .map(|e| e.value.as_str())
}

fn unknown_intermediate(name: &str) -> TensorInfo {
    TensorInfo {
        name: name.to_string(),
        dtype: DataType::F32,
        shape: TensorShape::Unknown,
        kind: TensorKind::Intermediate,
        initializer: None,
    }
}

/// Tensor produced by a `Constant` node, taken from its `value` attribute.
fn extract_constant_tensor_info(
    node: &NodeProto,
    name: &str,
    base_dir: Option<&Path>,
) -> Result<TensorInfo> {
    for attr in &node.attribute {
        if attr.name == "value"
            && let Some(ref tensor) = attr.t
        {
            let mut info = parse_initializer(tensor, TensorKind::Intermediate, base_dir)?;
            info.name = name.to_string();
            return Ok(info);
        }
    }

    // value_float, value_ints and friends carry no tensor
    Ok(unknown_intermediate(name))
}

/// Densely packed little-endian bytes of an embedded TensorProto.
///
/// `raw_data` wins when present; otherwise the typed repeated field that
/// matches the tensor's data type is narrowed to the element width.
pub fn tensor_raw_data(tensor: &TensorProto) -> Option<Vec<u8>> {
    use tensor_proto::DataType as OnnxDataType;

    if !tensor.raw_data.is_empty() {
        return Some(tensor.raw_data.clone());
    }

    let data_type = OnnxDataType::try_from(tensor.data_type).ok()?;
    let bytes: Vec<u8> = match data_type {
        OnnxDataType::Float | OnnxDataType::Complex64 => tensor
            .float_data
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        OnnxDataType::Double | OnnxDataType::Complex128 => tensor
            .double_data
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        OnnxDataType::Int64 => tensor
            .int64_data
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        OnnxDataType::Uint64 => tensor
            .uint64_data
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        OnnxDataType::Uint32 => tensor
            .uint64_data
            .iter()
            .flat_map(|&v| (v as u32).to_le_bytes())
            .collect(),
        OnnxDataType::Int32 => tensor
            .int32_data
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        // int32_data carries every narrower type, one element per entry
        OnnxDataType::Int16
        | OnnxDataType::Uint16
        | OnnxDataType::Float16
        | OnnxDataType::Bfloat16 => tensor
            .int32_data
            .iter()
            .flat_map(|&v| (v as u16).to_le_bytes())
            .collect(),
        OnnxDataType::Int8
        | OnnxDataType::Uint8
        | OnnxDataType::Bool
        | OnnxDataType::Float8e4m3fn
        | OnnxDataType::Float8e4m3fnuz
        | OnnxDataType::Float8e5m2
        | OnnxDataType::Float8e5m2fnuz => {
            tensor.int32_data.iter().map(|&v| v as u8).collect()
        }
        OnnxDataType::String | OnnxDataType::Undefined => return None,
    };

    let element_count: i64 = tensor.dims.iter().product();
    if bytes.is_empty() && element_count != 0 {
        return None;
    }
    Some(bytes)
}

/// Parse a NodeProto into a Node.
fn parse_node(
    node: &NodeProto,
    opset_imports: &BTreeMap<String, i64>,
    base_dir: Option<&Path>,
) -> Result<Node> {
    let mut parsed_node = Node::new(node.op_type.clone());
    parsed_node.name = node.name.clone();
    parsed_node.domain = node.domain.clone();
    parsed_node.inputs = node.input.clone();
    parsed_node.outputs = node.output.clone();

    for attr in &node.attribute {
        if let Some(value) = parse_attribute(attr, opset_imports, base_dir)? {
            parsed_node.attributes.insert(attr.name.clone(), value);
        }
    }

    Ok(parsed_node)
}

/// Parse an AttributeProto into an AttributeValue.
///
/// Attribute kinds kiln does not model (sparse tensors, type protos, lists of
/// graphs or tensors) are skipped.
fn parse_attribute(
    attr: &AttributeProto,
    opset_imports: &BTreeMap<String, i64>,
    base_dir: Option<&Path>,
) -> Result<Option<AttributeValue>> {
    use crate::onnx::attribute_proto::AttributeType;

    let attr_type = AttributeType::try_from(attr.r#type)
        .map_err(|_| OnnxError::InvalidGraph(format!("Invalid attribute type: {}", attr.r#type)))?;

    let value = match attr_type {
        AttributeType::Float => AttributeValue::Float(attr.f),
        AttributeType::Int => AttributeValue::Int(attr.i),
        AttributeType::String => AttributeValue::String(decode_utf8(&attr.name, &attr.s)?),
        AttributeType::Tensor => {
            let tensor = attr.t.as_ref().ok_or_else(|| {
                OnnxError::InvalidGraph(format!("Tensor attribute '{}' has no value", attr.name))
            })?;
            AttributeValue::Tensor(parse_initializer(
                tensor,
                TensorKind::Intermediate,
                base_dir,
            )?)
        }
        AttributeType::Graph => {
            let body = attr.g.as_ref().ok_or_else(|| {
                OnnxError::InvalidGraph(format!("Graph attribute '{}' has no value", attr.name))
            })?;
            AttributeValue::Graph(Box::new(parse_graph(body, opset_imports, base_dir, true)?))
        }
        AttributeType::Floats => AttributeValue::Floats(attr.floats.clone()),
        AttributeType::Ints => AttributeValue::Ints(attr.ints.clone()),
        AttributeType::Strings => AttributeValue::Strings(
            attr.strings
                .iter()
                .map(|s| decode_utf8(&attr.name, s))
                .collect::<Result<Vec<_>>>()?,
        ),
        AttributeType::Undefined
        | AttributeType::SparseTensor
        | AttributeType::TypeProto
        | AttributeType::Tensors
        | AttributeType::Graphs
        | AttributeType::SparseTensors
        | AttributeType::TypeProtos => {
            tracing::debug!(attribute = %attr.name, kind = ?attr_type, "skipping attribute");
            return Ok(None);
        }
    };

    Ok(Some(value))
}

fn decode_utf8(attr_name: &str, bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| {
        OnnxError::InvalidGraph(format!(
            "Attribute '{}' is not valid UTF-8: {}",
            attr_name, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::{
        GraphProto, OperatorSetIdProto, TypeProto, tensor_shape_proto, type_proto,
    };

    fn value_info(name: &str, elem_type: i32, dims: &[i64]) -> ValueInfoProto {
        ValueInfoProto {
            name: name.to_string(),
            r#type: Some(TypeProto {
                denotation: String::new(),
                value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                    elem_type,
                    shape: Some(TensorShapeProto {
                        dim: dims
                            .iter()
                            .map(|&d| tensor_shape_proto::Dimension {
                                denotation: String::new(),
                                value: Some(tensor_shape_proto::dimension::Value::DimValue(d)),
                            })
                            .collect(),
                    }),
                })),
            }),
            doc_string: String::new(),
        }
    }

    fn simple_model() -> ModelProto {
        let weight = TensorProto {
            name: "w".to_string(),
            dims: vec![2],
            data_type: tensor_proto::DataType::Float as i32,
            float_data: vec![1.0, 2.0],
            ..Default::default()
        };
        ModelProto {
            ir_version: 8,
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: 17,
            }],
            graph: Some(GraphProto {
                name: "add".to_string(),
                node: vec![NodeProto {
                    input: vec!["x".to_string(), "w".to_string()],
                    output: vec!["y".to_string()],
                    name: "add0".to_string(),
                    op_type: "Add".to_string(),
                    ..Default::default()
                }],
                initializer: vec![weight],
                input: vec![value_info("x", 1, &[2]), value_info("w", 1, &[2])],
                output: vec![value_info("y", 1, &[2])],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_model_separates_initializers() {
        let graph = parse_model(&simple_model(), None).unwrap();

        assert_eq!(graph.inputs, vec!["x".to_string()]);
        assert_eq!(graph.outputs, vec!["y".to_string()]);
        assert!(graph.is_initializer("w"));
        assert_eq!(graph.default_opset_version(), Some(17));

        let w = graph.tensor_by_name("w").unwrap();
        assert_eq!(
            w.initializer.as_deref(),
            Some(&[1.0f32.to_le_bytes(), 2.0f32.to_le_bytes()].concat()[..])
        );
    }

    #[test]
    fn test_parse_model_without_graph() {
        let err = parse_model(&ModelProto::default(), None).unwrap_err();
        assert!(matches!(err, OnnxError::InvalidGraph(_)));
    }

    #[test]
    fn test_parse_dynamic_shape() {
        let mut info = value_info("x", 1, &[4]);
        if let Some(type_proto::Value::TensorType(t)) =
            info.r#type.as_mut().and_then(|t| t.value.as_mut())
            && let Some(shape) = t.shape.as_mut()
        {
            shape.dim.insert(
                0,
                tensor_shape_proto::Dimension {
                    denotation: String::new(),
                    value: Some(tensor_shape_proto::dimension::Value::DimParam(
                        "batch".to_string(),
                    )),
                },
            );
        }

        let parsed = parse_value_info(&info, TensorKind::Input).unwrap();
        assert_eq!(
            parsed.shape,
            TensorShape::Dynamic(vec![
                Dimension::Named("batch".to_string()),
                Dimension::Static(4)
            ])
        );
    }

    #[test]
    fn test_tensor_raw_data_narrows_int32_storage() {
        let tensor = TensorProto {
            dims: vec![3],
            data_type: tensor_proto::DataType::Uint8 as i32,
            int32_data: vec![1, 2, 255],
            ..Default::default()
        };
        assert_eq!(tensor_raw_data(&tensor), Some(vec![1, 2, 255]));
    }

    #[test]
    fn test_external_data() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<u8> = [0.0f32, 1.5, -2.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut file = vec![0xAA; 4];
        file.extend_from_slice(&values);
        std::fs::write(dir.path().join("weights.bin"), &file).unwrap();

        let entry = |key: &str, value: &str| crate::onnx::StringStringEntryProto {
            key: key.to_string(),
            value: value.to_string(),
        };
        let mut tensor = TensorProto {
            name: "w".to_string(),
            dims: vec![3],
            data_type: tensor_proto::DataType::Float as i32,
            data_location: tensor_proto::DataLocation::External as i32,
            external_data: vec![
                entry("location", "weights.bin"),
                entry("offset", "4"),
                entry("length", "12"),
            ],
            ..Default::default()
        };

        let info = parse_initializer(&tensor, TensorKind::Weight, Some(dir.path())).unwrap();
        assert_eq!(info.initializer, Some(values));

        tensor.external_data.retain(|e| e.key != "location");
        assert!(matches!(
            parse_initializer(&tensor, TensorKind::Weight, Some(dir.path())),
            Err(OnnxError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_string_tensor_rejected() {
        let tensor = TensorProto {
            name: "s".to_string(),
            data_type: tensor_proto::DataType::String as i32,
            ..Default::default()
        };
        assert!(matches!(
            parse_initializer(&tensor, TensorKind::Weight, None),
            Err(OnnxError::UnsupportedDataType(_))
        ));
    }

    #[test]
    fn test_graph_attribute_parsed_as_subgraph() {
        let mut model = simple_model();
        let body = GraphProto {
            name: "body".to_string(),
            ..Default::default()
        };
        if let Some(graph) = model.graph.as_mut() {
            graph.node[0].attribute.push(AttributeProto {
                name: "then_branch".to_string(),
                r#type: crate::onnx::attribute_proto::AttributeType::Graph as i32,
                g: Some(body),
                ..Default::default()
            });
        }

        let graph = parse_model(&model, None).unwrap();
        match graph.nodes[0].attributes.get("then_branch") {
            Some(AttributeValue::Graph(body)) => {
                assert!(body.metadata.is_subgraph);
                assert_eq!(body.default_opset_version(), Some(17));
            }
            other => panic!("expected graph attribute, got {:?}", other),
        }
        assert!(!graph.metadata.is_subgraph);
    }
}
