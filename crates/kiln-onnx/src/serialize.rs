//! Serialization of graph views back to ONNX protobuf messages.

use crate::graph::{AttributeValue, Dimension, Graph, Node, TensorInfo, TensorKind, TensorShape};
use crate::onnx::attribute_proto::AttributeType;
use crate::onnx::{
    AttributeProto, GraphProto, NodeProto, TensorProto, TensorShapeProto, TypeProto,
    ValueInfoProto, tensor_shape_proto, type_proto,
};
use crate::view::GraphView;
use crate::Result;
use std::collections::HashSet;

/// Serialize a graph view into a `GraphProto`.
///
/// Nodes are written in view order. The input and output lists describe the
/// *whole* underlying graph; consumers that need the view's own boundary
/// replace them. Every intermediate with a known shape gets a `value_info`
/// entry. Initializers consumed by the view are embedded when
/// `include_initializers` is set.
pub fn graph_view_to_proto(view: &GraphView<'_>, include_initializers: bool) -> Result<GraphProto> {
    let graph = view.graph();
    let mut proto = GraphProto {
        name: view.name().to_string(),
        ..Default::default()
    };

    for node in view.nodes() {
        proto.node.push(node_to_proto(node)?);
    }

    for name in &graph.inputs {
        proto.input.push(tensor_info_to_value_info(graph.tensor_by_name(name)?));
    }
    for name in &graph.outputs {
        proto.output.push(tensor_info_to_value_info(graph.tensor_by_name(name)?));
    }

    let boundary: HashSet<&str> = graph
        .inputs
        .iter()
        .chain(&graph.outputs)
        .map(String::as_str)
        .collect();
    let mut written = HashSet::new();
    for node in view.nodes() {
        for name in node.inputs.iter().chain(&node.outputs) {
            if name.is_empty() || boundary.contains(name.as_str()) || !written.insert(name) {
                continue;
            }
            let Ok(info) = graph.tensor_by_name(name) else {
                continue;
            };
            if info.kind == TensorKind::Weight || info.shape == TensorShape::Unknown {
                continue;
            }
            proto.value_info.push(tensor_info_to_value_info(info));
        }
    }

    if include_initializers {
        for info in view.initializers() {
            proto.initializer.push(tensor_info_to_proto(info));
        }
    }

    Ok(proto)
}

/// Serialize a whole graph, used for nested graph attributes.
pub fn graph_to_proto(graph: &Graph) -> Result<GraphProto> {
    let view = GraphView::full(graph)?;
    let mut proto = graph_view_to_proto(&view, true)?;
    // Weights of nested graphs are not part of any view boundary.
    let embedded: HashSet<String> = proto.initializer.iter().map(|t| t.name.clone()).collect();
    for info in &graph.tensor_info {
        if info.kind == TensorKind::Weight
            && info.initializer.is_some()
            && !embedded.contains(&info.name)
        {
            proto.initializer.push(tensor_info_to_proto(info));
        }
    }
    Ok(proto)
}

/// Build the `ValueInfoProto` describing a tensor.
pub fn tensor_info_to_value_info(info: &TensorInfo) -> ValueInfoProto {
    let shape = match &info.shape {
        TensorShape::Static(dims) => Some(TensorShapeProto {
            dim: dims
                .iter()
                .map(|&d| dimension(Some(tensor_shape_proto::dimension::Value::DimValue(d as i64))))
                .collect(),
        }),
        TensorShape::Dynamic(dims) => Some(TensorShapeProto {
            dim: dims
                .iter()
                .map(|d| match d {
                    Dimension::Static(v) => dimension(Some(
                        tensor_shape_proto::dimension::Value::DimValue(*v as i64),
                    )),
                    Dimension::Named(name) if name == "?" => dimension(None),
                    Dimension::Named(name) => dimension(Some(
                        tensor_shape_proto::dimension::Value::DimParam(name.clone()),
                    )),
                })
                .collect(),
        }),
        TensorShape::Unknown | TensorShape::Absent => None,
    };

    ValueInfoProto {
        name: info.name.clone(),
        r#type: Some(TypeProto {
            denotation: String::new(),
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: info.dtype.to_onnx(),
                shape,
            })),
        }),
        doc_string: String::new(),
    }
}

fn dimension(value: Option<tensor_shape_proto::dimension::Value>) -> tensor_shape_proto::Dimension {
    tensor_shape_proto::Dimension {
        denotation: String::new(),
        value,
    }
}

/// Build a `TensorProto` carrying the tensor's initializer as raw data.
pub fn tensor_info_to_proto(info: &TensorInfo) -> TensorProto {
    TensorProto {
        name: info.name.clone(),
        dims: info
            .shape
            .as_static()
            .map(|dims| dims.iter().map(|&d| d as i64).collect())
            .unwrap_or_default(),
        data_type: info.dtype.to_onnx(),
        raw_data: info.initializer.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn node_to_proto(node: &Node) -> Result<NodeProto> {
    // Sorted so serialization is deterministic.
    let mut names: Vec<&String> = node.attributes.keys().collect();
    names.sort();

    let mut attribute = Vec::with_capacity(names.len());
    for name in names {
        attribute.push(attribute_to_proto(name, &node.attributes[name])?);
    }

    Ok(NodeProto {
        input: node.inputs.clone(),
        output: node.outputs.clone(),
        name: node.name.clone(),
        op_type: node.op_type.clone(),
        domain: node.domain.clone(),
        attribute,
        doc_string: String::new(),
    })
}

fn attribute_to_proto(name: &str, value: &AttributeValue) -> Result<AttributeProto> {
    let mut proto = AttributeProto {
        name: name.to_string(),
        ..Default::default()
    };
    let kind = match value {
        AttributeValue::Float(v) => {
            proto.f = *v;
            AttributeType::Float
        }
        AttributeValue::Int(v) => {
            proto.i = *v;
            AttributeType::Int
        }
        AttributeValue::String(v) => {
            proto.s = v.as_bytes().to_vec();
            AttributeType::String
        }
        AttributeValue::Tensor(info) => {
            proto.t = Some(tensor_info_to_proto(info));
            AttributeType::Tensor
        }
        AttributeValue::Graph(graph) => {
            proto.g = Some(graph_to_proto(graph)?);
            AttributeType::Graph
        }
        AttributeValue::Floats(v) => {
            proto.floats = v.clone();
            AttributeType::Floats
        }
        AttributeValue::Ints(v) => {
            proto.ints = v.clone();
            AttributeType::Ints
        }
        AttributeValue::Strings(v) => {
            proto.strings = v.iter().map(|s| s.as_bytes().to_vec()).collect();
            AttributeType::Strings
        }
    };
    proto.r#type = kind as i32;
    Ok(proto)
}
