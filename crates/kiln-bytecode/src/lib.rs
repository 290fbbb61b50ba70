//! Binary module format shared by the kiln compiler and runtime.
//!
//! A serialized module is a small header (`KVMB` magic followed by a
//! little-endian format version) and a protobuf-encoded [`ModuleDef`].
//!
//! # Example
//!
//! ```
//! use kiln_bytecode::{ModuleDef, decode, encode};
//!
//! let module = ModuleDef {
//!     name: "kiln".to_string(),
//!     ..Default::default()
//! };
//! let bytes = encode(&module);
//! assert_eq!(decode(&bytes).unwrap(), module);
//! ```

pub mod element;
pub mod format;

pub use element::{ElementType, NumericalType};
pub use format::{ConstantDef, FunctionDef, Instruction, ModuleDef, Opcode, TensorSignature};

use prost::Message;

/// Magic bytes at the start of every serialized module.
pub const MAGIC: &[u8; 4] = b"KVMB";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

/// Result type for bytecode operations.
pub type Result<T> = std::result::Result<T, BytecodeError>;

#[derive(Debug, thiserror::Error)]
pub enum BytecodeError {
    #[error("Module is too short ({0} bytes)")]
    TooShort(usize),

    #[error("Bad magic: not a kiln bytecode module")]
    BadMagic,

    #[error("Unsupported bytecode version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Failed to decode module: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Serialize a module with its header.
pub fn encode(module: &ModuleDef) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + module.encoded_len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&module.encode_to_vec());
    bytes
}

/// Parse a serialized module, checking the header first.
pub fn decode(bytes: &[u8]) -> Result<ModuleDef> {
    if bytes.len() < HEADER_LEN {
        return Err(BytecodeError::TooShort(bytes.len()));
    }
    if &bytes[..4] != MAGIC {
        return Err(BytecodeError::BadMagic);
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(BytecodeError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    let module = ModuleDef::decode(&bytes[HEADER_LEN..])?;
    tracing::trace!(
        module = %module.name,
        functions = module.functions.len(),
        "decoded bytecode module"
    );
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModuleDef {
        ModuleDef {
            name: "kiln".to_string(),
            version: 1,
            functions: vec![FunctionDef {
                name: "main".to_string(),
                register_count: 2,
                instructions: vec![Instruction::new(Opcode::Neg, vec![0], vec![1])],
                input_registers: vec![0],
                output_registers: vec![1],
                ..Default::default()
            }],
            constants: vec![],
            target_formats: vec!["llvm-cpu".to_string()],
        }
    }

    #[test]
    fn test_header() {
        let bytes = encode(&sample());
        assert_eq!(&bytes[..4], b"KVMB");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(decode(&bytes).unwrap().function("main").unwrap().register_count, 2);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(decode(b"KVM"), Err(BytecodeError::TooShort(3))));
        assert!(matches!(
            decode(b"MLIR\x01\0\0\0"),
            Err(BytecodeError::BadMagic)
        ));

        let mut bytes = encode(&sample());
        bytes[4] = 9;
        assert!(matches!(
            decode(&bytes),
            Err(BytecodeError::UnsupportedVersion { found: 9, .. })
        ));

        let mut bytes = encode(&ModuleDef::default());
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        assert!(matches!(decode(&bytes), Err(BytecodeError::Decode(_))));
    }
}
