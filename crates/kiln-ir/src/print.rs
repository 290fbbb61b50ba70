//! Textual IR printer.
//!
//! The pretty form is meant for humans. The generic form quotes every
//! operation name and spells out its full function type, so it stays
//! printable even when the IR fails verification.

use crate::ops::{Function, Module, Operation, Value};
use crate::types::Type;
use std::fmt::Write;

/// Options controlling [`print_function`] and [`print_module`].
#[derive(Debug, Clone, Default)]
pub struct PrintingFlags {
    /// Print operations in generic form.
    pub generic: bool,
    /// Append source locations to operations.
    pub debug_info: bool,
    /// Elide dense attribute payloads longer than this many bytes.
    pub elide_elements_above: Option<usize>,
}

impl PrintingFlags {
    pub fn generic() -> Self {
        Self {
            generic: true,
            ..Self::default()
        }
    }
}

fn value_name(function: &Function, value: Value) -> String {
    match function.arguments().iter().position(|&a| a == value) {
        Some(i) => format!("%arg{}", i),
        None => format!("%{}", value.index() - function.arguments().len()),
    }
}

fn type_name(function: &Function, value: Value) -> String {
    function
        .value_type(value)
        .map_or_else(|| "<<invalid>>".to_string(), Type::to_string)
}

fn join<I: IntoIterator<Item = String>>(items: I) -> String {
    items.into_iter().collect::<Vec<_>>().join(", ")
}

fn print_operation(out: &mut String, function: &Function, op: &Operation, flags: &PrintingFlags) {
    out.push_str("    ");
    if !op.results().is_empty() {
        let results = join(op.results().iter().map(|&v| value_name(function, v)));
        let _ = write!(out, "{} = ", results);
    }

    let operands = join(op.operands().iter().map(|&v| value_name(function, v)));
    let attributes = join(op.attributes().iter().map(|(name, attr)| {
        format!("{} = {}", name, attr.display(flags.elide_elements_above))
    }));

    if flags.generic || op.name() != "func.return" {
        let _ = write!(out, "\"{}\"({})", op.name(), operands);
        if !attributes.is_empty() {
            let _ = write!(out, " {{{}}}", attributes);
        }
        let operand_types = join(op.operands().iter().map(|&v| type_name(function, v)));
        let result_types = join(op.results().iter().map(|&v| type_name(function, v)));
        let _ = write!(out, " : ({}) -> ", operand_types);
        if op.results().len() == 1 {
            out.push_str(&result_types);
        } else {
            let _ = write!(out, "({})", result_types);
        }
    } else {
        out.push_str("return");
        if !op.operands().is_empty() {
            let operand_types = join(op.operands().iter().map(|&v| type_name(function, v)));
            let _ = write!(out, " {} : {}", operands, operand_types);
        }
    }

    if flags.debug_info {
        let _ = write!(out, " {}", op.location());
    }
    out.push('\n');
}

fn write_function(out: &mut String, function: &Function, flags: &PrintingFlags, indent: &str) {
    let arguments = join(
        function
            .arguments()
            .iter()
            .map(|&v| format!("{}: {}", value_name(function, v), type_name(function, v))),
    );
    let results = join(function.result_types().iter().map(Type::to_string));

    let _ = write!(
        out,
        "{}func.func @{}({}) -> ({})",
        indent,
        function.name(),
        arguments,
        results
    );
    if !function.attributes().is_empty() {
        let attributes = join(function.attributes().iter().map(|(name, attr)| {
            format!("{} = {}", name, attr.display(flags.elide_elements_above))
        }));
        let _ = write!(out, " attributes {{{}}}", attributes);
    }
    out.push_str(" {\n");
    for op in function.operations() {
        out.push_str(indent);
        print_operation(out, function, op, flags);
    }
    let _ = writeln!(out, "{}}}", indent);
}

/// Print a single function.
pub fn print_function(function: &Function, flags: &PrintingFlags) -> String {
    let mut out = String::new();
    write_function(&mut out, function, flags, "");
    out
}

/// Print a module and every function in it.
pub fn print_module(module: &Module, flags: &PrintingFlags) -> String {
    let mut out = String::from("module");
    if let Some(name) = module.sym_name() {
        let _ = write!(out, " @{}", name);
    }
    out.push_str(" {\n");
    for function in module.functions() {
        write_function(&mut out, function, flags, "  ");
    }
    out.push('}');
    if flags.debug_info {
        let _ = write!(out, " {}", module.location());
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attribute;
    use crate::ops::{Location, OperationState};
    use crate::types::{ElementType, TensorType};

    fn sample() -> Function {
        let ty: Type = TensorType::static_shape(&[2], ElementType::F32).into();
        let mut f = Function::new("add", vec![ty.clone(), ty.clone()], vec![ty.clone()], Location::Unknown);
        let args = f.arguments().to_vec();
        let sum = f.append(
            OperationState::new("onnx.Add", Location::name("add_node"))
                .add_operands(&args)
                .add_results([ty])
                .add_attribute("axis", Attribute::Int(0)),
        );
        f.append(OperationState::new("func.return", Location::Unknown).add_operands(&sum));
        f
    }

    #[test]
    fn test_pretty_function() {
        let text = print_function(&sample(), &PrintingFlags::default());
        assert!(text.starts_with(
            "func.func @add(%arg0: tensor<2xf32>, %arg1: tensor<2xf32>) -> (tensor<2xf32>) {"
        ));
        assert!(text.contains(
            "%0 = \"onnx.Add\"(%arg0, %arg1) {axis = 0 : si64} : (tensor<2xf32>, tensor<2xf32>) -> tensor<2xf32>"
        ));
        assert!(text.contains("return %0 : tensor<2xf32>"));
    }

    #[test]
    fn test_generic_module_with_locations() {
        let mut module = Module::new(Location::Unknown);
        module.set_sym_name("kiln");
        module.add_function(sample()).unwrap();

        let flags = PrintingFlags {
            debug_info: true,
            ..PrintingFlags::generic()
        };
        let text = print_module(&module, &flags);
        assert!(text.starts_with("module @kiln {\n"));
        assert!(text.contains("\"func.return\"(%0) : (tensor<2xf32>) -> ()"));
        assert!(text.contains("loc(\"add_node\")"));
    }
}
