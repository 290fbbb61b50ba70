//! Module schema.
//!
//! A module is a set of functions over virtual tensor registers plus a pool
//! of constants. Every instruction reads whole tensors from registers and
//! writes whole tensors to registers; shapes are computed at run time.

/// A compiled module.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModuleDef {
    /// Symbol name; entry points are looked up as `<name>.<function>`.
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub version: u32,
    #[prost(message, repeated, tag = "3")]
    pub functions: Vec<FunctionDef>,
    #[prost(message, repeated, tag = "4")]
    pub constants: Vec<ConstantDef>,
    /// Executable formats the module was compiled for, e.g. `llvm-cpu`.
    #[prost(string, repeated, tag = "5")]
    pub target_formats: Vec<String>,
}

impl ModuleDef {
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Expected type of a function argument or result.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorSignature {
    /// Packed [`crate::ElementType`] code.
    #[prost(uint32, tag = "1")]
    pub element_type: u32,
    /// Dimensions; `-1` marks a dynamic dimension.
    #[prost(int64, repeated, tag = "2")]
    pub dims: Vec<i64>,
    /// When false, `dims` is empty and any rank is accepted.
    #[prost(bool, tag = "3")]
    pub ranked: bool,
}

impl TensorSignature {
    /// Whether a concrete shape satisfies this signature.
    pub fn accepts_shape(&self, shape: &[usize]) -> bool {
        if !self.ranked {
            return true;
        }
        self.dims.len() == shape.len()
            && self
                .dims
                .iter()
                .zip(shape)
                .all(|(&d, &s)| d < 0 || d as usize == s)
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionDef {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub inputs: Vec<TensorSignature>,
    #[prost(message, repeated, tag = "3")]
    pub outputs: Vec<TensorSignature>,
    #[prost(uint32, tag = "4")]
    pub register_count: u32,
    #[prost(message, repeated, tag = "5")]
    pub instructions: Vec<Instruction>,
    /// Register receiving each argument, in argument order.
    #[prost(uint32, repeated, tag = "6")]
    pub input_registers: Vec<u32>,
    /// Register holding each result, in result order.
    #[prost(uint32, repeated, tag = "7")]
    pub output_registers: Vec<u32>,
}

/// A dense constant tensor.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConstantDef {
    #[prost(uint32, tag = "1")]
    pub element_type: u32,
    #[prost(int64, repeated, tag = "2")]
    pub dims: Vec<i64>,
    /// Row-major little-endian element bytes.
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Instruction {
    #[prost(enumeration = "Opcode", tag = "1")]
    pub opcode: i32,
    #[prost(uint32, repeated, tag = "2")]
    pub operands: Vec<u32>,
    #[prost(uint32, repeated, tag = "3")]
    pub results: Vec<u32>,
    /// Opcode-specific integers: target shape, permutation or axis.
    #[prost(int64, repeated, tag = "4")]
    pub int_attrs: Vec<i64>,
    /// Constant pool index for [`Opcode::Constant`].
    #[prost(uint32, tag = "5")]
    pub constant: u32,
    /// Target element type code for [`Opcode::Cast`].
    #[prost(uint32, tag = "6")]
    pub element_type: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<u32>, results: Vec<u32>) -> Self {
        Self {
            opcode: opcode as i32,
            operands,
            results,
            ..Default::default()
        }
    }

    pub fn with_int_attrs(mut self, attrs: Vec<i64>) -> Self {
        self.int_attrs = attrs;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Opcode {
    Copy = 0,
    Constant = 1,
    Neg = 10,
    Abs = 11,
    Relu = 12,
    Sigmoid = 13,
    Tanh = 14,
    Exp = 15,
    Log = 16,
    Sqrt = 17,
    Add = 30,
    Sub = 31,
    Mul = 32,
    Div = 33,
    Pow = 34,
    Max = 35,
    Min = 36,
    MatMul = 50,
    Reshape = 60,
    Transpose = 61,
    Cast = 62,
    Softmax = 70,
}

impl Opcode {
    pub fn is_unary(self) -> bool {
        (10..30).contains(&(self as i32))
    }

    pub fn is_binary(self) -> bool {
        (30..50).contains(&(self as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_accepts_shape() {
        let sig = TensorSignature {
            element_type: 0,
            dims: vec![-1, 3],
            ranked: true,
        };
        assert!(sig.accepts_shape(&[7, 3]));
        assert!(!sig.accepts_shape(&[7, 4]));
        assert!(!sig.accepts_shape(&[3]));

        let unranked = TensorSignature {
            ranked: false,
            ..sig
        };
        assert!(unranked.accepts_shape(&[1, 2, 3]));
    }

    #[test]
    fn test_opcode_classes() {
        assert!(Opcode::Relu.is_unary());
        assert!(!Opcode::Relu.is_binary());
        assert!(Opcode::Min.is_binary());
        assert!(!Opcode::MatMul.is_binary());
        assert_eq!(Opcode::try_from(32), Ok(Opcode::Mul));
    }
}
