//! End-to-end tests: import, compile, load and invoke.

mod common;

use common::*;
use kiln_ep::{
    EpError, ExecutionProvider, FusedNodeAndGraph, HostTensor, KernelContext, ModuleLoading,
};
use kiln_onnx::{
    AttributeValue, DataType, GraphView, IndexedSubGraph, MetaDef, Node, TensorKind,
};

fn run(compute: &kiln_ep::NodeComputeInfo, inputs: Vec<HostTensor>, outputs: usize) -> Vec<HostTensor> {
    let mut cx = KernelContext::new(inputs.into_iter().map(Into::into).collect(), outputs);
    compute.compute(&mut cx).unwrap();
    cx.take_outputs().unwrap()
}

fn sub_graph(nodes: Vec<usize>, name: &str, inputs: &[&str], outputs: &[&str]) -> IndexedSubGraph {
    IndexedSubGraph {
        nodes,
        meta_def: Some(MetaDef {
            name: name.to_string(),
            domain: "KILN".to_string(),
            since_version: 1,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

#[test]
fn test_identity_round_trip() {
    init_tracing();
    let graph = make_identity_graph(DataType::F32, &[2, 3]);

    for loading in ["file", "memory"] {
        let artifacts = tempfile::tempdir().unwrap();
        let dir = artifacts.path().to_str().unwrap();
        let provider = provider(&[("module_loading", loading), ("artifact_dir", dir)]);
        let compute = compile_whole_graph(&provider, &graph, "identity").unwrap();
        assert_eq!(compute.entry_point, "kiln.identity");

        let values = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let input = HostTensor::from_slice(DataType::F32, &[2, 3], &values);
        let outputs = run(&compute, vec![input.clone()], 1);

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0], input);
        assert_eq!(outputs[0].to_vec::<f32>(), values);
    }
}

#[test]
fn test_file_artifact_lives_as_long_as_the_module() {
    init_tracing();
    let graph = make_identity_graph(DataType::I32, &[4]);
    let artifacts = tempfile::tempdir().unwrap();
    let provider = provider(&[("artifact_dir", artifacts.path().to_str().unwrap())]);
    assert_eq!(provider.config().module_loading, ModuleLoading::File);

    let compute = compile_whole_graph(&provider, &graph, "keep").unwrap();
    let written = std::fs::read_dir(artifacts.path()).unwrap().count();
    assert_eq!(written, 1);

    drop(compute);
    assert_eq!(std::fs::read_dir(artifacts.path()).unwrap().count(), 0);
}

#[test]
fn test_providers_sharing_artifact_dir() {
    init_tracing();
    let graph = make_identity_graph(DataType::F32, &[3]);
    let artifacts = tempfile::tempdir().unwrap();
    let dir = artifacts.path().to_str().unwrap();
    let first = provider(&[("artifact_dir", dir)]);
    let second = provider(&[("artifact_dir", dir)]);

    let computes: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let owner = if i % 2 == 0 { &first } else { &second };
                let graph = &graph;
                scope.spawn(move || compile_whole_graph(owner, graph, "shared").unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(std::fs::read_dir(artifacts.path()).unwrap().count(), 4);

    let mut computes = computes.into_iter();
    let dropped = computes.next().unwrap();
    drop(dropped);
    assert_eq!(std::fs::read_dir(artifacts.path()).unwrap().count(), 3);

    for compute in computes {
        let out = run(
            &compute,
            vec![HostTensor::from_slice(DataType::F32, &[3], &[1.0f32, 2.0, 3.0])],
            1,
        );
        assert_eq!(out[0].to_vec::<f32>(), vec![1.0, 2.0, 3.0]);
    }
    assert_eq!(std::fs::read_dir(artifacts.path()).unwrap().count(), 0);
}

#[test]
fn test_output_takes_produced_shape() {
    init_tracing();
    let mut transpose = Node::new("Transpose").with_io("t0", &["x"], &["y"]);
    transpose
        .attributes
        .insert("perm".to_string(), AttributeValue::Ints(vec![1, 0]));
    let graph = make_graph(
        &[tensor("x", DataType::F32, &[2, 3], TensorKind::Input)],
        &[tensor("y", DataType::F32, &[3, 2], TensorKind::Output)],
        &[],
        vec![transpose],
    );
    let provider = provider(&[]);
    let compute = compile_whole_graph(&provider, &graph, "transpose").unwrap();

    let input = HostTensor::from_slice(DataType::F32, &[2, 3], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let outputs = run(&compute, vec![input], 1);
    assert_eq!(outputs[0].shape, vec![3, 2]);
    assert_eq!(outputs[0].to_vec::<f32>(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
}

#[test]
fn test_initializer_becomes_constant() {
    init_tracing();
    let mut weight = tensor("w", DataType::F32, &[3], TensorKind::Weight);
    weight.initializer = Some(bytemuck::cast_slice(&[10.0f32, 20.0, 30.0]).to_vec());
    let graph = make_graph(
        &[tensor("x", DataType::F32, &[3], TensorKind::Input)],
        &[tensor("y", DataType::F32, &[3], TensorKind::Output)],
        &[weight],
        vec![Node::new("Add").with_io("add0", &["x", "w"], &["y"])],
    );
    let provider = provider(&[]);

    // The whole-graph view keeps the weight out of the boundary.
    let fused = FusedNodeAndGraph {
        fused_node_name: "bias".to_string(),
        view: GraphView::full(&graph).unwrap(),
    };
    let compute = provider.compile(&[fused]).unwrap().remove(0);

    let input = HostTensor::from_slice(DataType::F32, &[3], &[1.0f32, 2.0, 3.0]);
    let outputs = run(&compute, vec![input], 1);
    assert_eq!(outputs[0].to_vec::<f32>(), vec![11.0, 22.0, 33.0]);
}

#[test]
fn test_claimed_initializers_are_passed_as_inputs() {
    init_tracing();
    let mut weight = tensor("w", DataType::F32, &[2], TensorKind::Weight);
    weight.initializer = Some(bytemuck::cast_slice(&[2.0f32, 3.0]).to_vec());
    let graph = make_graph(
        &[tensor("x", DataType::F32, &[2], TensorKind::Input)],
        &[tensor("y", DataType::F32, &[2], TensorKind::Output)],
        &[weight],
        vec![Node::new("Mul").with_io("mul0", &["x", "w"], &["y"])],
    );
    let provider = provider(&[]);
    let compute = compile_whole_graph(&provider, &graph, "scale").unwrap();

    let x = HostTensor::from_slice(DataType::F32, &[2], &[4.0f32, 5.0]);
    let w = HostTensor::from_slice(DataType::F32, &[2], &[2.0f32, 3.0]);
    let outputs = run(&compute, vec![x, w], 1);
    assert_eq!(outputs[0].to_vec::<f32>(), vec![8.0, 15.0]);
}

fn two_chain_graph() -> kiln_onnx::Graph {
    make_graph(
        &[
            tensor("x", DataType::F32, &[2], TensorKind::Input),
            tensor("u", DataType::F32, &[2], TensorKind::Input),
        ],
        &[
            tensor("y", DataType::F32, &[2], TensorKind::Output),
            tensor("v", DataType::F32, &[2], TensorKind::Output),
        ],
        &[],
        vec![
            Node::new("Neg").with_io("neg0", &["x"], &["y"]),
            Node::new("Abs").with_io("abs0", &["u"], &["v"]),
        ],
    )
}

#[test]
fn test_batch_compiles_one_module() {
    init_tracing();
    let graph = two_chain_graph();
    let first = sub_graph(vec![0], "negate", &["x"], &["y"]);
    let second = sub_graph(vec![1], "magnitude", &["u"], &["v"]);
    let fused = vec![
        FusedNodeAndGraph {
            fused_node_name: "negate".to_string(),
            view: GraphView::from_indexed(&graph, &first).unwrap(),
        },
        FusedNodeAndGraph {
            fused_node_name: "magnitude".to_string(),
            view: GraphView::from_indexed(&graph, &second).unwrap(),
        },
    ];

    let provider = provider(&[("module_loading", "memory")]);
    let infos = provider.compile(&fused).unwrap();
    let names: Vec<&str> = infos.iter().map(|i| i.entry_point.as_str()).collect();
    assert_eq!(names, vec!["kiln.negate", "kiln.magnitude"]);

    let input = HostTensor::from_slice(DataType::F32, &[2], &[-1.5f32, 2.5]);
    let negated = run(&infos[0], vec![input.clone()], 1);
    assert_eq!(negated[0].to_vec::<f32>(), vec![1.5, -2.5]);
    let magnitude = run(&infos[1], vec![input], 1);
    assert_eq!(magnitude[0].to_vec::<f32>(), vec![1.5, 2.5]);
}

#[test]
fn test_failed_import_fails_whole_batch() {
    init_tracing();
    let graph = two_chain_graph();
    let good = sub_graph(vec![0], "negate", &["x"], &["y"]);
    // `u` is consumed but not declared as a boundary input.
    let dangling = sub_graph(vec![1], "magnitude", &[], &["v"]);
    let fused = vec![
        FusedNodeAndGraph {
            fused_node_name: "negate".to_string(),
            view: GraphView::from_indexed(&graph, &good).unwrap(),
        },
        FusedNodeAndGraph {
            fused_node_name: "magnitude".to_string(),
            view: GraphView::from_indexed(&graph, &dangling).unwrap(),
        },
    ];

    let provider = provider(&[]);
    let err = provider.compile(&fused).unwrap_err();
    assert!(matches!(err, EpError::InvalidGraph(_)));
    assert!(err.to_string().contains("dangling input 'u'"), "{}", err);
}

#[test]
fn test_duplicate_fused_node_name() {
    init_tracing();
    let graph = make_identity_graph(DataType::F32, &[1]);
    let view = GraphView::full(&graph).unwrap();
    let fused = vec![
        FusedNodeAndGraph {
            fused_node_name: "same".to_string(),
            view: view.clone(),
        },
        FusedNodeAndGraph {
            fused_node_name: "same".to_string(),
            view,
        },
    ];
    let err = provider(&[]).compile(&fused).unwrap_err();
    assert!(
        err.to_string()
            .starts_with("Failed to define entry function for graph: "),
        "{}",
        err
    );
}

#[test]
fn test_unsupported_operator_fails_compilation() {
    init_tracing();
    let graph = make_graph(
        &[tensor("x", DataType::F32, &[4], TensorKind::Input)],
        &[tensor("y", DataType::F32, &[4], TensorKind::Output)],
        &[],
        vec![Node::new("Gelu").with_io("gelu0", &["x"], &["y"])],
    );
    let err = compile_whole_graph(&provider(&[]), &graph, "gelu").unwrap_err();
    assert!(matches!(err, EpError::Compilation(_)));
    let message = err.to_string();
    assert!(message.starts_with("compilation error.\nDiagnostics:"), "{}", message);
    assert!(
        message.contains("failed to legalize operation 'onnx.Gelu'"),
        "{}",
        message
    );
}

#[test]
fn test_compute_infos_outlive_provider() {
    init_tracing();
    let graph = make_identity_graph(DataType::F32, &[2]);
    let compute = {
        let provider: ExecutionProvider = provider(&[("module_loading", "memory")]);
        compile_whole_graph(&provider, &graph, "orphan").unwrap()
    };
    let input = HostTensor::from_slice(DataType::F32, &[2], &[7.0f32, 8.0]);
    assert_eq!(run(&compute, vec![input.clone()], 1)[0], input);
}
