//! Register-based interpreter for bytecode functions.

pub mod broadcast;
mod kernels;
mod tensor;

pub use tensor::{Lanes, Tensor};

use crate::{Result, RuntimeError};
use kiln_bytecode::{ElementType, FunctionDef, Instruction, ModuleDef, Opcode};

struct Registers {
    slots: Vec<Option<Tensor>>,
}

impl Registers {
    fn new(count: u32) -> Self {
        Self {
            slots: vec![None; count as usize],
        }
    }

    fn read(&self, register: u32) -> Result<&Tensor> {
        match self.slots.get(register as usize) {
            Some(Some(tensor)) => Ok(tensor),
            Some(None) => Err(RuntimeError::FailedPrecondition(format!(
                "register r{} read before it was written",
                register
            ))),
            None => Err(out_of_bounds(register)),
        }
    }

    fn write(&mut self, register: u32, tensor: Tensor) -> Result<()> {
        let slot = self
            .slots
            .get_mut(register as usize)
            .ok_or_else(|| out_of_bounds(register))?;
        *slot = Some(tensor);
        Ok(())
    }
}

fn out_of_bounds(register: u32) -> RuntimeError {
    RuntimeError::DataLoss(format!("register r{} is out of bounds", register))
}

fn operands<'r, const N: usize>(
    registers: &'r Registers,
    instruction: &Instruction,
) -> Result<[&'r Tensor; N]> {
    let found = instruction.operands.len();
    let tensors = instruction
        .operands
        .iter()
        .map(|&r| registers.read(r))
        .collect::<Result<Vec<_>>>()?;
    tensors.try_into().map_err(|_| {
        RuntimeError::DataLoss(format!(
            "instruction expects {} operands, found {}",
            N, found
        ))
    })
}

fn load_constant(module: &ModuleDef, index: u32) -> Result<Tensor> {
    let constant = module
        .constants
        .get(index as usize)
        .ok_or_else(|| RuntimeError::DataLoss(format!("constant #{} does not exist", index)))?;
    let element_type = ElementType::from_code(constant.element_type).ok_or_else(|| {
        RuntimeError::DataLoss(format!(
            "constant #{} has unknown element type 0x{:08x}",
            index, constant.element_type
        ))
    })?;
    let shape = constant
        .dims
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| RuntimeError::DataLoss(format!("constant #{} has a dynamic shape", index)))?;
    Tensor::new(element_type, shape, constant.data.clone())
}

fn step(module: &ModuleDef, registers: &Registers, instruction: &Instruction) -> Result<Tensor> {
    let opcode = Opcode::try_from(instruction.opcode).map_err(|_| {
        RuntimeError::DataLoss(format!("unknown opcode {}", instruction.opcode))
    })?;
    match opcode {
        Opcode::Constant => load_constant(module, instruction.constant),
        Opcode::Copy => {
            let [x] = operands(registers, instruction)?;
            Ok(x.clone())
        }
        op if op.is_unary() => {
            let [x] = operands(registers, instruction)?;
            kernels::unary(op, x)
        }
        op if op.is_binary() => {
            let [a, b] = operands(registers, instruction)?;
            kernels::binary(op, a, b)
        }
        Opcode::MatMul => {
            let [a, b] = operands(registers, instruction)?;
            kernels::matmul(a, b)
        }
        Opcode::Reshape => {
            let [x] = operands(registers, instruction)?;
            kernels::reshape(x, &instruction.int_attrs)
        }
        Opcode::Transpose => {
            let [x] = operands(registers, instruction)?;
            kernels::transpose(x, &instruction.int_attrs)
        }
        Opcode::Cast => {
            let [x] = operands(registers, instruction)?;
            let target = ElementType::from_code(instruction.element_type).ok_or_else(|| {
                RuntimeError::DataLoss(format!(
                    "cast to unknown element type 0x{:08x}",
                    instruction.element_type
                ))
            })?;
            kernels::cast(x, target)
        }
        Opcode::Softmax => {
            let [x] = operands(registers, instruction)?;
            let axis = instruction.int_attrs.first().copied().unwrap_or(-1);
            kernels::softmax(x, axis)
        }
        other => Err(RuntimeError::Unimplemented(format!("opcode {:?}", other))),
    }
}

/// Run `function` on `args`, returning its results in order.
#[tracing::instrument(skip_all, fields(function = %function.name))]
pub fn execute(module: &ModuleDef, function: &FunctionDef, args: Vec<Tensor>) -> Result<Vec<Tensor>> {
    if args.len() != function.input_registers.len() {
        return Err(RuntimeError::InvalidArgument(format!(
            "function {} takes {} arguments, got {}",
            function.name,
            function.input_registers.len(),
            args.len()
        )));
    }

    let mut registers = Registers::new(function.register_count);
    for (&register, arg) in function.input_registers.iter().zip(args) {
        registers.write(register, arg)?;
    }

    for (pc, instruction) in function.instructions.iter().enumerate() {
        let result = step(module, &registers, instruction).inspect_err(|e| {
            tracing::debug!(pc, opcode = instruction.opcode, error = %e, "instruction failed");
        })?;
        let &[target] = instruction.results.as_slice() else {
            return Err(RuntimeError::DataLoss(format!(
                "instruction {} writes {} registers, expected 1",
                pc,
                instruction.results.len()
            )));
        };
        tracing::trace!(pc, register = target, shape = ?result.shape, "write");
        registers.write(target, result)?;
    }

    function
        .output_registers
        .iter()
        .map(|&r| registers.read(r).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bytecode::{ConstantDef, TensorSignature};

    fn f32s(shape: &[usize], values: &[f32]) -> Tensor {
        Tensor::new(
            ElementType::Float32,
            shape.to_vec(),
            bytemuck::cast_slice(values).to_vec(),
        )
        .unwrap()
    }

    fn function(instructions: Vec<Instruction>, outputs: Vec<u32>) -> FunctionDef {
        FunctionDef {
            name: "main".to_string(),
            inputs: vec![TensorSignature::default()],
            outputs: vec![],
            register_count: 4,
            instructions,
            input_registers: vec![0],
            output_registers: outputs,
        }
    }

    #[test]
    fn test_execute_add_constant() {
        let module = ModuleDef {
            name: "m".to_string(),
            constants: vec![ConstantDef {
                element_type: ElementType::Float32.code(),
                dims: vec![2],
                data: bytemuck::cast_slice(&[1.0f32, 2.0]).to_vec(),
            }],
            ..Default::default()
        };
        let f = function(
            vec![
                Instruction {
                    constant: 0,
                    ..Instruction::new(Opcode::Constant, vec![], vec![1])
                },
                Instruction::new(Opcode::Add, vec![0, 1], vec![2]),
                Instruction::new(Opcode::Relu, vec![2], vec![3]),
            ],
            vec![3],
        );

        let out = execute(&module, &f, vec![f32s(&[2], &[-5.0, 1.0])]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            bytemuck::pod_collect_to_vec::<u8, f32>(&out[0].data),
            vec![0.0, 3.0]
        );
    }

    #[test]
    fn test_read_before_write() {
        let f = function(vec![Instruction::new(Opcode::Copy, vec![2], vec![3])], vec![3]);
        let result = execute(&ModuleDef::default(), &f, vec![f32s(&[1], &[0.0])]);
        assert!(matches!(result, Err(RuntimeError::FailedPrecondition(_))));
    }

    #[test]
    fn test_malformed_instructions() {
        let unknown = Instruction {
            opcode: 999,
            ..Instruction::new(Opcode::Copy, vec![0], vec![1])
        };
        let f = function(vec![unknown], vec![1]);
        let result = execute(&ModuleDef::default(), &f, vec![f32s(&[1], &[0.0])]);
        assert!(matches!(result, Err(RuntimeError::DataLoss(_))));

        let wrong_arity = Instruction::new(Opcode::Add, vec![0], vec![1]);
        let f = function(vec![wrong_arity], vec![1]);
        let result = execute(&ModuleDef::default(), &f, vec![f32s(&[1], &[0.0])]);
        assert!(matches!(result, Err(RuntimeError::DataLoss(_))));
    }

    #[test]
    fn test_argument_count() {
        let f = function(vec![], vec![0]);
        let result = execute(&ModuleDef::default(), &f, vec![]);
        assert!(matches!(result, Err(RuntimeError::InvalidArgument(_))));
    }
}
