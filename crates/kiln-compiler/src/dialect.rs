//! The `onnx` input dialect.
//!
//! The dialect is open: any ONNX operator imports as `onnx.<OpType>`.
//! Operators with a fixed signature are registered so the verifier can check
//! their arity; only the ones listed in the lowering pass compile further.

use kiln_ir::{Arity, Dialect, OpDef};

pub const ONNX_NAMESPACE: &str = "onnx";

pub fn onnx_dialect() -> Dialect {
    let unary = [
        "Abs", "Cast", "Exp", "Identity", "Log", "Neg", "Relu", "Sigmoid", "Softmax", "Sqrt",
        "Tanh", "Transpose",
    ];
    let binary = ["Add", "Div", "MatMul", "Mul", "Pow", "Sub"];

    let mut dialect = Dialect::new(ONNX_NAMESPACE)
        .open()
        .with_op(OpDef::new("Constant", Arity::Exactly(0), Arity::Exactly(1)))
        .with_op(OpDef::new("None", Arity::Exactly(0), Arity::Exactly(1)))
        .with_op(OpDef::new("Reshape", Arity::AtLeast(1), Arity::Exactly(1)));
    for name in unary {
        dialect = dialect.with_op(OpDef::new(name, Arity::Exactly(1), Arity::Exactly(1)));
    }
    for name in binary {
        dialect = dialect.with_op(OpDef::new(name, Arity::Exactly(2), Arity::Exactly(1)));
    }
    dialect
}
