//! Structural verification.
//!
//! Every problem found is reported as an error diagnostic through the
//! context, so callers that installed a handler see the full list; the
//! returned error only summarizes.

use crate::context::Context;
use crate::ops::{Function, Module};
use crate::types::Type;
use crate::{Error, Result};
use std::collections::HashSet;

/// Verify a single function.
///
/// Checks that every operation belongs to a loaded dialect and is known to
/// it, that operand and result counts match the operation definition, that
/// values are defined exactly once and before use, and that the body ends in
/// exactly one `func.return` whose operands match the declared result types.
pub fn verify_function(ctx: &Context, function: &Function) -> Result<()> {
    let mut errors = 0usize;
    let mut error = |location: &crate::ops::Location, message: String| {
        ctx.emit_error(location.clone(), message);
        errors += 1;
    };

    let mut defined: HashSet<crate::ops::Value> = function.arguments().iter().copied().collect();
    let operations = function.operations();

    for (index, op) in operations.iter().enumerate() {
        let location = op.location();

        let Some(dialect) = ctx.loaded_dialect(op.dialect()) else {
            error(
                location,
                format!(
                    "operation '{}' created with unregistered dialect '{}'",
                    op.name(),
                    op.dialect()
                ),
            );
            continue;
        };

        let def = dialect.op(op.op_name());
        if def.is_none() && !dialect.is_open() {
            error(
                location,
                format!("operation '{}' is not registered", op.name()),
            );
        }

        if let Some(def) = def {
            if !def.operands.accepts(op.operands().len()) {
                error(
                    location,
                    format!(
                        "'{}' op requires {} operands, but found {}",
                        op.name(),
                        def.operands,
                        op.operands().len()
                    ),
                );
            }
            if !def.results.accepts(op.results().len()) {
                error(
                    location,
                    format!(
                        "'{}' op requires {} results, but found {}",
                        op.name(),
                        def.results,
                        op.results().len()
                    ),
                );
            }
            if def.terminator && index + 1 != operations.len() {
                error(
                    location,
                    format!("'{}' op must be the last operation in the body", op.name()),
                );
            }
        }

        for (i, operand) in op.operands().iter().enumerate() {
            if function.value_type(*operand).is_none() {
                error(
                    location,
                    format!("operand #{} of '{}' does not belong to this function", i, op.name()),
                );
            } else if !defined.contains(operand) {
                error(
                    location,
                    format!(
                        "operand #{} of '{}' does not dominate this use",
                        i,
                        op.name()
                    ),
                );
            }
        }

        for result in op.results() {
            if !defined.insert(*result) {
                error(
                    location,
                    format!("result of '{}' is defined more than once", op.name()),
                );
            }
        }
    }

    match operations.last() {
        Some(terminator) if terminator.name() == "func.return" => {
            let operand_types: Vec<Option<&Type>> = terminator
                .operands()
                .iter()
                .map(|&v| function.value_type(v))
                .collect();
            if operand_types.len() != function.result_types().len() {
                error(
                    terminator.location(),
                    format!(
                        "'func.return' has {} operands, but enclosing function (@{}) returns {}",
                        operand_types.len(),
                        function.name(),
                        function.result_types().len()
                    ),
                );
            } else {
                for (i, (actual, expected)) in
                    operand_types.iter().zip(function.result_types()).enumerate()
                {
                    if let Some(actual) = actual
                        && !actual.is_compatible_with(expected)
                    {
                        error(
                            terminator.location(),
                            format!(
                                "type of return operand {} ({}) doesn't match function result type ({}) in function @{}",
                                i,
                                actual,
                                expected,
                                function.name()
                            ),
                        );
                    }
                }
            }
        }
        _ => error(
            function.location(),
            format!("function @{} body must end with 'func.return'", function.name()),
        ),
    }

    if errors > 0 {
        return Err(Error::Verification(format!(
            "function @{} failed verification with {} error(s)",
            function.name(),
            errors
        )));
    }
    Ok(())
}

/// Verify every function of a module.
pub fn verify_module(ctx: &Context, module: &Module) -> Result<()> {
    let mut failed = Vec::new();
    for function in module.functions() {
        if verify_function(ctx, function).is_err() {
            failed.push(function.name().to_string());
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::Verification(format!(
            "module failed verification in: {}",
            failed.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Arity, Dialect, DialectRegistry, OpDef};
    use crate::ops::{Location, OperationState};
    use crate::types::{ElementType, TensorType};
    use std::sync::{Arc, Mutex};

    fn context() -> (Context, Arc<Mutex<Vec<String>>>) {
        let registry = DialectRegistry::new().with(
            Dialect::new("test")
                .open()
                .with_op(OpDef::new("Const", Arity::Exactly(0), Arity::Exactly(1))),
        );
        let ctx = Context::new(registry);
        for ns in ["builtin", "func", "test"] {
            ctx.get_or_load_dialect(ns);
        }
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        ctx.attach_diagnostic_handler(move |d| sink.lock().unwrap().push(d.message.clone()));
        (ctx, log)
    }

    fn f32_type(dims: &[u64]) -> Type {
        TensorType::static_shape(dims, ElementType::F32).into()
    }

    #[test]
    fn test_valid_function() {
        let (ctx, log) = context();
        let mut f = Function::new("f", vec![f32_type(&[2])], vec![f32_type(&[2])], Location::Unknown);
        let arg = f.arguments()[0];
        let neg = f.append(
            OperationState::new("test.Neg", Location::Unknown)
                .add_operands(&[arg])
                .add_results([f32_type(&[2])]),
        );
        f.append(OperationState::new("func.return", Location::Unknown).add_operands(&neg));

        verify_function(&ctx, &f).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_terminator() {
        let (ctx, log) = context();
        let f = Function::new("f", vec![], vec![], Location::Unknown);
        assert!(verify_function(&ctx, &f).is_err());
        assert!(log.lock().unwrap()[0].contains("must end with 'func.return'"));
    }

    #[test]
    fn test_return_type_mismatch() {
        let (ctx, log) = context();
        let mut f = Function::new("f", vec![f32_type(&[2])], vec![f32_type(&[3])], Location::Unknown);
        let arg = f.arguments()[0];
        f.append(OperationState::new("func.return", Location::Unknown).add_operands(&[arg]));

        assert!(verify_function(&ctx, &f).is_err());
        assert!(log.lock().unwrap()[0].contains("doesn't match function result type"));
    }

    #[test]
    fn test_unloaded_dialect_and_arity() {
        let (ctx, log) = context();
        let mut f = Function::new("f", vec![f32_type(&[2])], vec![], Location::Unknown);
        let arg = f.arguments()[0];
        f.append(
            OperationState::new("other.Op", Location::Unknown).add_results([f32_type(&[2])]),
        );
        f.append(
            OperationState::new("test.Const", Location::Unknown)
                .add_operands(&[arg])
                .add_results([f32_type(&[2])]),
        );
        f.append(OperationState::new("func.return", Location::Unknown));

        assert!(verify_function(&ctx, &f).is_err());
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].contains("unregistered dialect 'other'"));
        assert!(log[1].contains("requires 0 operands"));
    }

    #[test]
    fn test_use_of_foreign_value() {
        let (ctx, _log) = context();
        let mut other = Function::new("g", vec![], vec![], Location::Unknown);
        let foreign = other.append(
            OperationState::new("test.Const", Location::Unknown).add_results([f32_type(&[1])]),
        );

        let mut f = Function::new("f", vec![], vec![], Location::Unknown);
        f.append(OperationState::new("test.Use", Location::Unknown).add_operands(&foreign));
        f.append(OperationState::new("func.return", Location::Unknown));

        let err = verify_function(&ctx, &f).unwrap_err();
        assert!(matches!(err, Error::Verification(_)));
    }

    #[test]
    fn test_verify_module_names_failing_functions() {
        let (ctx, _log) = context();
        let mut module = Module::new(Location::Unknown);
        let mut good = Function::new("good", vec![], vec![], Location::Unknown);
        good.append(OperationState::new("func.return", Location::Unknown));
        module.add_function(good).unwrap();
        module
            .add_function(Function::new("bad", vec![], vec![], Location::Unknown))
            .unwrap();

        let err = verify_module(&ctx, &module).unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert!(!err.to_string().contains("good"));
    }
}
