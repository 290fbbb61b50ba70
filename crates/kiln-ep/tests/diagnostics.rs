//! Diagnostic collection, verification failures and dialect checks.

mod common;

use common::*;
use kiln_ep::EpError;
use kiln_ep::jit::{CompilerInvocation, CompilerSession};
use kiln_ir::{DialectRegistry, Location};
use kiln_onnx::{DataType, Graph, GraphView, Node, TensorKind};

fn session() -> CompilerSession {
    let mut session = CompilerSession::new().unwrap();
    session
        .set_flag("--kiln-hal-target-backends=llvm-cpu")
        .unwrap();
    session.initialize().unwrap();
    session
}

/// A Relu fed two operands: well-formed ONNX structure, invalid IR.
fn bad_arity_graph() -> Graph {
    make_graph(
        &[tensor("x", DataType::F32, &[2], TensorKind::Input)],
        &[tensor("y", DataType::F32, &[2], TensorKind::Output)],
        &[],
        vec![Node::new("Relu").with_io("relu0", &["x", "x"], &["y"])],
    )
}

#[test]
fn test_verification_failure_dumps_unverified_ir() {
    init_tracing();
    let session = session();
    let mut inv = CompilerInvocation::new(&session, "kiln").unwrap();
    let graph = bad_arity_graph();
    let view = GraphView::full(&graph).unwrap();

    let err = inv.import_subgraph(&view, "relu").unwrap_err();
    assert!(matches!(err, EpError::InvalidGraph(_)));
    let message = err.to_string();

    let (head, dump) = message.split_once("\nUnverified IR:\n").unwrap();
    assert_eq!(
        head,
        "Imported ONNX IR failed to verify.\nDiagnostics:\n  \
         error: loc(\"relu0\"): 'onnx.Relu' op requires 1 operands, but found 2"
    );
    assert!(dump.starts_with("func.func @relu("), "{}", dump);
    assert!(dump.contains("\"onnx.Relu\"(%arg0, %arg0)"), "{}", dump);
    assert!(dump.contains("\"func.return\"(%0)"), "{}", dump);

    // The failed function never reached the module.
    assert_eq!(inv.module_ir().unwrap(), "module @kiln {\n}\n");
    // Diagnostics were drained into the error.
    assert_eq!(inv.consume_diagnostics(), "");
}

#[test]
fn test_consume_diagnostics_is_idempotent() {
    init_tracing();
    let session = session();
    let inv = CompilerInvocation::new(&session, "kiln").unwrap();

    session
        .context()
        .emit_error(Location::name("a"), "first");
    session.context().emit_error(Location::Unknown, "second");

    assert_eq!(
        inv.consume_diagnostics(),
        "\nDiagnostics:\n  error: loc(\"a\"): first\n  error: second"
    );
    assert_eq!(inv.consume_diagnostics(), "");
    assert_eq!(inv.consume_diagnostics(), "");
}

#[test]
fn test_invocations_do_not_share_diagnostics() {
    init_tracing();
    let session = session();
    let graph = bad_arity_graph();
    let view = GraphView::full(&graph).unwrap();

    {
        let mut first = CompilerInvocation::new(&session, "kiln").unwrap();
        assert!(first.import_subgraph(&view, "relu").is_err());
    }

    let second = CompilerInvocation::new(&session, "kiln").unwrap();
    assert_eq!(second.consume_diagnostics(), "");

    // The session is still usable for a good import.
    let mut third = CompilerInvocation::new(&session, "kiln").unwrap();
    let good = make_identity_graph(DataType::F32, &[2]);
    third
        .import_subgraph(&GraphView::full(&good).unwrap(), "identity")
        .unwrap();
    assert!(third.module_ir().unwrap().contains("func.func @identity("));
}

#[test]
fn test_missing_onnx_dialect_is_a_capability_mismatch() {
    init_tracing();
    let mut session = CompilerSession::with_dialects(DialectRegistry::new()).unwrap();
    let err = session.initialize().unwrap_err();
    assert!(matches!(err, EpError::CapabilityMismatch(_)));
    assert_eq!(
        err.to_string(),
        "Dialect 'onnx' not registered in the kiln compiler \
         (this could mean that kiln was not built with ONNX input support)"
    );
    assert!(
        !session
            .flags()
            .contains(&"--kiln-input-type=onnx".to_string())
    );
}

#[test]
fn test_invalid_target_backend() {
    init_tracing();
    let mut session = CompilerSession::new().unwrap();
    let err = session
        .set_flag("--kiln-hal-target-backends=quantum")
        .unwrap_err();
    assert!(
        err.to_string().starts_with("Error setting compiler flag: "),
        "{}",
        err
    );
}
