//! Lowering of `onnx` operations to VM instructions.
//!
//! Every SSA value maps to the register with the same index. Values of type
//! `none` never receive a register write; an instruction reading one is a
//! legalization failure.

use crate::pass::{Pass, PassContext, Stage};
use crate::{CompilerError, Result};
use kiln_bytecode::{
    ConstantDef, ElementType as VmElementType, FunctionDef, Instruction, ModuleDef, Opcode,
    TensorSignature,
};
use kiln_ir::{Attribute, Context, Dim, ElementType, Function, Module, Operation, Type};

/// Translates every function into a [`FunctionDef`].
pub struct LowerToVmPass;

/// VM element type for an IR element type. 8-bit float formats have no
/// runtime representation.
pub fn vm_element_type(element: ElementType) -> Option<VmElementType> {
    Some(match element {
        ElementType::I1 => VmElementType::Bool8,
        ElementType::SI8 => VmElementType::Sint8,
        ElementType::SI16 => VmElementType::Sint16,
        ElementType::SI32 => VmElementType::Sint32,
        ElementType::SI64 => VmElementType::Sint64,
        ElementType::UI8 => VmElementType::Uint8,
        ElementType::UI16 => VmElementType::Uint16,
        ElementType::UI32 => VmElementType::Uint32,
        ElementType::UI64 => VmElementType::Uint64,
        ElementType::F16 => VmElementType::Float16,
        ElementType::BF16 => VmElementType::BFloat16,
        ElementType::F32 => VmElementType::Float32,
        ElementType::F64 => VmElementType::Float64,
        ElementType::Complex64 => VmElementType::ComplexFloat64,
        ElementType::Complex128 => VmElementType::ComplexFloat128,
        ElementType::F8E4M3FN
        | ElementType::F8E4M3FNUZ
        | ElementType::F8E5M2
        | ElementType::F8E5M2FNUZ => return None,
    })
}

/// Collects lowering failures as diagnostics.
struct Lowering<'a> {
    context: &'a Context,
    failed: bool,
}

impl Lowering<'_> {
    fn fail(&mut self, op: &Operation, reason: impl std::fmt::Display) {
        self.context.emit_error(
            op.location().clone(),
            format!("failed to legalize operation '{}': {}", op.name(), reason),
        );
        self.failed = true;
    }

    fn signature(&mut self, function: &Function, ty: &Type) -> Option<TensorSignature> {
        let reason = match ty.as_tensor() {
            None => "function boundary values must be tensors".to_string(),
            Some(tensor) => match tensor.element.map(|e| (e, vm_element_type(e))) {
                Some((_, Some(vm))) => {
                    let dims = tensor.shape.as_ref().map(|shape| {
                        shape
                            .iter()
                            .map(|d| match d {
                                Dim::Static(v) => *v as i64,
                                Dim::Dynamic => -1,
                            })
                            .collect()
                    });
                    return Some(TensorSignature {
                        element_type: vm.code(),
                        ranked: dims.is_some(),
                        dims: dims.unwrap_or_default(),
                    });
                }
                Some((element, None)) => format!("unsupported element type {}", element),
                None => "unknown element type at function boundary".to_string(),
            },
        };
        self.context.emit_error(
            function.location().clone(),
            format!("failed to lower function @{}: {}", function.name(), reason),
        );
        self.failed = true;
        None
    }

    fn lower_op(
        &mut self,
        function: &Function,
        op: &Operation,
        constants: &mut Vec<ConstantDef>,
    ) -> Option<Instruction> {
        let operands: Vec<u32> = op.operands().iter().map(|v| v.index() as u32).collect();
        let results: Vec<u32> = op.results().iter().map(|v| v.index() as u32).collect();

        for &operand in op.operands() {
            if matches!(function.value_type(operand), Some(Type::None)) {
                self.fail(op, "absent optional operands are not supported");
                return None;
            }
        }
        for &result in op.results() {
            if let Some(element) = function
                .value_type(result)
                .and_then(Type::as_tensor)
                .and_then(|t| t.element)
                && vm_element_type(element).is_none()
            {
                self.fail(op, format!("unsupported element type {}", element));
                return None;
            }
        }

        let opcode = match op.op_name() {
            "Identity" => Opcode::Copy,
            "Neg" => Opcode::Neg,
            "Abs" => Opcode::Abs,
            "Relu" => Opcode::Relu,
            "Sigmoid" => Opcode::Sigmoid,
            "Tanh" => Opcode::Tanh,
            "Exp" => Opcode::Exp,
            "Log" => Opcode::Log,
            "Sqrt" => Opcode::Sqrt,
            "Add" => Opcode::Add,
            "Sub" => Opcode::Sub,
            "Mul" => Opcode::Mul,
            "Div" => Opcode::Div,
            "Pow" => Opcode::Pow,
            "Max" => Opcode::Max,
            "Min" => Opcode::Min,
            "MatMul" => Opcode::MatMul,
            "Reshape" => Opcode::Reshape,
            "Transpose" => Opcode::Transpose,
            "Cast" => Opcode::Cast,
            "Softmax" => Opcode::Softmax,
            "Constant" => Opcode::Constant,
            _ => {
                self.fail(op, "no lowering for this operation");
                return None;
            }
        };

        if results.len() != 1 {
            self.fail(op, format!("expected one result, found {}", results.len()));
            return None;
        }
        let expected_operands = match opcode {
            Opcode::Constant => 0,
            code if code.is_binary() || code == Opcode::MatMul => 2,
            _ => 1,
        };
        let operands = if opcode == Opcode::Reshape && !operands.is_empty() {
            // The shape operand is folded into the instruction.
            operands[..1].to_vec()
        } else {
            operands
        };
        if operands.len() != expected_operands {
            self.fail(
                op,
                format!(
                    "expected {} operands, found {}",
                    expected_operands,
                    operands.len()
                ),
            );
            return None;
        }

        let result_type = function.value_type(op.results()[0]).and_then(Type::as_tensor);
        let mut instruction = Instruction::new(opcode, operands, results);

        match opcode {
            Opcode::Constant => {
                let Some(dense) = op.attribute("value").and_then(Attribute::as_dense) else {
                    self.fail(op, "missing dense 'value' attribute");
                    return None;
                };
                let (Some(dims), Some(element)) = (dense.ty.static_dims(), dense.ty.element)
                else {
                    self.fail(op, "constant must have a static shape and known element type");
                    return None;
                };
                let Some(vm) = vm_element_type(element) else {
                    self.fail(op, format!("unsupported element type {}", element));
                    return None;
                };
                if dense.expected_len() != Some(dense.data.len()) {
                    self.fail(op, "constant payload does not match its type");
                    return None;
                }
                instruction.constant = constants.len() as u32;
                constants.push(ConstantDef {
                    element_type: vm.code(),
                    dims: dims.iter().map(|&d| d as i64).collect(),
                    data: dense.data.clone(),
                });
            }
            Opcode::Reshape => {
                let Some(dims) = result_type.and_then(|t| t.static_dims()) else {
                    self.fail(op, "result shape must be static");
                    return None;
                };
                instruction.int_attrs = dims.iter().map(|&d| d as i64).collect();
            }
            Opcode::Transpose => {
                let perm = match op.attribute("perm").and_then(Attribute::as_ints) {
                    Some(perm) => perm.to_vec(),
                    None => {
                        let rank = function
                            .value_type(op.operands()[0])
                            .and_then(Type::as_tensor)
                            .and_then(|t| t.rank());
                        let Some(rank) = rank else {
                            self.fail(op, "transpose of an unranked tensor needs 'perm'");
                            return None;
                        };
                        (0..rank as i64).rev().collect()
                    }
                };
                instruction.int_attrs = perm;
            }
            Opcode::Cast => {
                let Some(vm) = result_type.and_then(|t| t.element).and_then(vm_element_type)
                else {
                    self.fail(op, "cast target element type is unknown");
                    return None;
                };
                instruction.element_type = vm.code();
            }
            Opcode::Softmax => {
                let axis = op.attribute("axis").and_then(Attribute::as_int).unwrap_or(-1);
                instruction.int_attrs = vec![axis];
            }
            _ => {}
        }
        Some(instruction)
    }

    fn lower_function(
        &mut self,
        function: &Function,
        constants: &mut Vec<ConstantDef>,
    ) -> FunctionDef {
        let inputs: Vec<_> = function
            .argument_types()
            .into_iter()
            .filter_map(|ty| self.signature(function, ty))
            .collect();
        let outputs: Vec<_> = function
            .result_types()
            .iter()
            .filter_map(|ty| self.signature(function, ty))
            .collect();

        let mut instructions = Vec::new();
        let mut output_registers = Vec::new();
        for op in function.operations() {
            if op.name() == "func.return" {
                output_registers = op.operands().iter().map(|v| v.index() as u32).collect();
                continue;
            }
            if op.name() == "onnx.None" {
                continue;
            }
            if let Some(instruction) = self.lower_op(function, op, constants) {
                instructions.push(instruction);
            }
        }

        FunctionDef {
            name: function.name().to_string(),
            inputs,
            outputs,
            register_count: function.value_count() as u32,
            instructions,
            input_registers: function.arguments().iter().map(|v| v.index() as u32).collect(),
            output_registers,
        }
    }
}

impl Pass for LowerToVmPass {
    fn name(&self) -> &str {
        "lower-to-vm"
    }

    fn stage(&self) -> Stage {
        Stage::Lowering
    }

    fn run(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool> {
        if cx.options.target_backends.is_empty() {
            cx.context
                .emit_error(module.location().clone(), "no target backends specified");
            return Err(CompilerError::PassFailed(self.name().to_string()));
        }

        let mut lowering = Lowering {
            context: cx.context,
            failed: false,
        };
        let mut constants = Vec::new();
        let functions: Vec<FunctionDef> = module
            .functions()
            .iter()
            .map(|f| lowering.lower_function(f, &mut constants))
            .collect();

        if lowering.failed {
            return Err(CompilerError::PassFailed(self.name().to_string()));
        }

        let lowered = ModuleDef {
            name: module.sym_name().unwrap_or("module").to_string(),
            version: 1,
            functions,
            constants,
            target_formats: cx.options.target_backends.clone(),
        };
        tracing::debug!(
            module = %lowered.name,
            functions = lowered.functions.len(),
            constants = lowered.constants.len(),
            "lowered module"
        );
        cx.lowered = Some(lowered);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use kiln_ir::{DenseElements, DialectRegistry, Location, OperationState, TensorType};
    use std::sync::{Arc, Mutex};

    fn run(module: &mut Module) -> (Result<bool>, Option<ModuleDef>, Vec<String>) {
        let ctx = Context::new(DialectRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        ctx.attach_diagnostic_handler(move |d| sink.lock().unwrap().push(d.message.clone()));
        let options = CompilerOptions {
            target_backends: vec!["llvm-cpu".to_string()],
            ..Default::default()
        };
        let mut cx = PassContext {
            context: &ctx,
            options: &options,
            lowered: None,
            artifact: None,
        };
        let result = LowerToVmPass.run(module, &mut cx);
        let messages = log.lock().unwrap().clone();
        (result, cx.lowered, messages)
    }

    fn tensor(dims: &[u64], element: ElementType) -> Type {
        TensorType::static_shape(dims, element).into()
    }

    #[test]
    fn test_lower_add_with_constant() {
        let ty = tensor(&[2], ElementType::F32);
        let mut f = Function::new("main", vec![ty.clone()], vec![ty.clone()], Location::Unknown);
        let arg = f.arguments()[0];
        let bias = f.append(
            OperationState::new("onnx.Constant", Location::Unknown)
                .add_attribute(
                    "value",
                    Attribute::DenseElements(DenseElements {
                        ty: TensorType::static_shape(&[2], ElementType::F32),
                        data: vec![0; 8],
                    }),
                )
                .add_results([ty.clone()]),
        );
        let sum = f.append(
            OperationState::new("onnx.Add", Location::Unknown)
                .add_operands(&[arg, bias[0]])
                .add_results([ty]),
        );
        f.append(OperationState::new("func.return", Location::Unknown).add_operands(&sum));

        let mut module = Module::new(Location::Unknown);
        module.set_sym_name("kiln");
        module.add_function(f).unwrap();

        let (result, lowered, messages) = run(&mut module);
        assert!(result.unwrap(), "{:?}", messages);
        let lowered = lowered.unwrap();
        assert_eq!(lowered.name, "kiln");
        assert_eq!(lowered.constants.len(), 1);

        let main = lowered.function("main").unwrap();
        assert_eq!(main.input_registers, vec![0]);
        assert_eq!(main.output_registers, vec![2]);
        assert_eq!(main.register_count, 3);
        assert_eq!(main.instructions[1].opcode, Opcode::Add as i32);
        assert_eq!(main.inputs[0].element_type, VmElementType::Float32.code());
        assert_eq!(main.inputs[0].dims, vec![2]);
    }

    #[test]
    fn test_unsupported_op_fails_to_legalize() {
        let ty = tensor(&[2], ElementType::F32);
        let mut f = Function::new("main", vec![ty.clone()], vec![ty.clone()], Location::Unknown);
        let arg = f.arguments()[0];
        let out = f.append(
            OperationState::new("onnx.Gelu", Location::name("gelu"))
                .add_operands(&[arg])
                .add_results([ty]),
        );
        f.append(OperationState::new("func.return", Location::Unknown).add_operands(&out));
        let mut module = Module::default();
        module.add_function(f).unwrap();

        let (result, lowered, messages) = run(&mut module);
        assert!(matches!(result, Err(CompilerError::PassFailed(_))));
        assert!(lowered.is_none());
        assert!(messages[0].contains("failed to legalize operation 'onnx.Gelu'"));
    }

    #[test]
    fn test_float8_boundary_rejected() {
        let ty = tensor(&[2], ElementType::F8E5M2);
        let mut f = Function::new("main", vec![ty.clone()], vec![ty], Location::Unknown);
        let arg = f.arguments()[0];
        f.append(OperationState::new("func.return", Location::Unknown).add_operands(&[arg]));
        let mut module = Module::default();
        module.add_function(f).unwrap();

        let (result, _, messages) = run(&mut module);
        assert!(result.is_err());
        assert!(messages.iter().all(|m| m.contains("unsupported element type f8E5M2")));
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_transpose_default_perm() {
        let mut f = Function::new(
            "main",
            vec![tensor(&[2, 3], ElementType::SI32)],
            vec![tensor(&[3, 2], ElementType::SI32)],
            Location::Unknown,
        );
        let arg = f.arguments()[0];
        let out = f.append(
            OperationState::new("onnx.Transpose", Location::Unknown)
                .add_operands(&[arg])
                .add_results([tensor(&[3, 2], ElementType::SI32)]),
        );
        f.append(OperationState::new("func.return", Location::Unknown).add_operands(&out));
        let mut module = Module::default();
        module.add_function(f).unwrap();

        let (_, lowered, _) = run(&mut module);
        let lowered = lowered.unwrap();
        assert_eq!(lowered.functions[0].instructions[0].int_attrs, vec![1, 0]);
    }
}
