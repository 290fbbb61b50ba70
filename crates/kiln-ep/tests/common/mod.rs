//! Shared helpers for the provider integration tests.
#![allow(dead_code)]

use kiln_ep::{ExecutionProvider, FusedNodeAndGraph, NodeComputeInfo, ProviderOptions};
use kiln_onnx::{DataType, Graph, GraphView, Node, TensorInfo, TensorKind, TensorShape};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn tensor(name: &str, dtype: DataType, shape: &[usize], kind: TensorKind) -> TensorInfo {
    TensorInfo {
        name: name.to_string(),
        dtype,
        shape: TensorShape::Static(shape.to_vec()),
        kind,
        initializer: None,
    }
}

/// A graph with the given boundary and nodes. Values that are neither
/// inputs nor outputs are registered as intermediates without a shape.
pub fn make_graph(
    inputs: &[TensorInfo],
    outputs: &[TensorInfo],
    intermediates: &[TensorInfo],
    nodes: Vec<Node>,
) -> Graph {
    let mut graph = Graph::new();
    graph.metadata.name = "test".to_string();
    graph.metadata.opset_imports.insert(String::new(), 17);
    for info in inputs.iter().chain(outputs).chain(intermediates) {
        graph.add_tensor(info.clone());
    }
    graph.inputs = inputs.iter().map(|i| i.name.clone()).collect();
    graph.outputs = outputs.iter().map(|o| o.name.clone()).collect();
    for node in nodes {
        graph.add_node(node);
    }
    graph
}

/// `y = Identity(Identity(x))`.
///
/// Graph structure:
/// - Input: x:[dtype;shape]
/// - Node "id0": Identity(x) -> t
/// - Node "id1": Identity(t) -> y
/// - Output: y:[dtype;shape]
pub fn make_identity_graph(dtype: DataType, shape: &[usize]) -> Graph {
    make_graph(
        &[tensor("x", dtype, shape, TensorKind::Input)],
        &[tensor("y", dtype, shape, TensorKind::Output)],
        &[tensor("t", dtype, shape, TensorKind::Intermediate)],
        vec![
            Node::new("Identity").with_io("id0", &["x"], &["t"]),
            Node::new("Identity").with_io("id1", &["t"], &["y"]),
        ],
    )
}

/// `y = Identity(x)` and `z = Identity(x)`: one input, two outputs.
pub fn make_two_output_graph(shape: &[usize]) -> Graph {
    make_graph(
        &[tensor("x", DataType::F32, shape, TensorKind::Input)],
        &[
            tensor("y", DataType::F32, shape, TensorKind::Output),
            tensor("z", DataType::F32, shape, TensorKind::Output),
        ],
        &[],
        vec![
            Node::new("Identity").with_io("id0", &["x"], &["y"]),
            Node::new("Identity").with_io("id1", &["x"], &["z"]),
        ],
    )
}

pub fn provider(pairs: &[(&str, &str)]) -> ExecutionProvider {
    let options: ProviderOptions = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ExecutionProvider::new(options).unwrap()
}

/// Claim the whole graph and compile it as the fused node `name`.
pub fn compile_whole_graph(
    provider: &ExecutionProvider,
    graph: &Graph,
    name: &str,
) -> kiln_ep::Result<NodeComputeInfo> {
    let capability = provider.get_capability(graph).remove(0);
    let fused = FusedNodeAndGraph {
        fused_node_name: name.to_string(),
        view: GraphView::from_indexed(graph, &capability.sub_graph)?,
    };
    Ok(provider.compile(&[fused])?.remove(0))
}
