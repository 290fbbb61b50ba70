//! Element type encoding.
//!
//! An element type packs a numerical class in the high byte and the storage
//! width in bits in the low bits, so widths and classes can be queried
//! without a lookup table.

use std::fmt;

/// Numerical class of an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NumericalType {
    Unknown = 0x00,
    Integer = 0x10,
    IntegerSigned = 0x11,
    IntegerUnsigned = 0x12,
    Boolean = 0x13,
    FloatIeee = 0x21,
    FloatBrain = 0x22,
    FloatComplex = 0x23,
}

const fn pack(numerical: NumericalType, bits: u32) -> u32 {
    ((numerical as u32) << 24) | bits
}

/// Element type of a buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ElementType {
    None = 0,
    Bool8 = pack(NumericalType::Boolean, 8),
    Sint4 = pack(NumericalType::IntegerSigned, 4),
    Uint4 = pack(NumericalType::IntegerUnsigned, 4),
    Sint8 = pack(NumericalType::IntegerSigned, 8),
    Uint8 = pack(NumericalType::IntegerUnsigned, 8),
    Sint16 = pack(NumericalType::IntegerSigned, 16),
    Uint16 = pack(NumericalType::IntegerUnsigned, 16),
    Sint32 = pack(NumericalType::IntegerSigned, 32),
    Uint32 = pack(NumericalType::IntegerUnsigned, 32),
    Sint64 = pack(NumericalType::IntegerSigned, 64),
    Uint64 = pack(NumericalType::IntegerUnsigned, 64),
    Float16 = pack(NumericalType::FloatIeee, 16),
    Float32 = pack(NumericalType::FloatIeee, 32),
    Float64 = pack(NumericalType::FloatIeee, 64),
    BFloat16 = pack(NumericalType::FloatBrain, 16),
    ComplexFloat64 = pack(NumericalType::FloatComplex, 64),
    ComplexFloat128 = pack(NumericalType::FloatComplex, 128),
}

impl ElementType {
    pub const ALL: [ElementType; 18] = [
        ElementType::None,
        ElementType::Bool8,
        ElementType::Sint4,
        ElementType::Uint4,
        ElementType::Sint8,
        ElementType::Uint8,
        ElementType::Sint16,
        ElementType::Uint16,
        ElementType::Sint32,
        ElementType::Uint32,
        ElementType::Sint64,
        ElementType::Uint64,
        ElementType::Float16,
        ElementType::Float32,
        ElementType::Float64,
        ElementType::BFloat16,
        ElementType::ComplexFloat64,
        ElementType::ComplexFloat128,
    ];

    /// Packed 32-bit code as stored in bytecode.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn numerical_type(self) -> NumericalType {
        match self.code() >> 24 {
            0x10 => NumericalType::Integer,
            0x11 => NumericalType::IntegerSigned,
            0x12 => NumericalType::IntegerUnsigned,
            0x13 => NumericalType::Boolean,
            0x21 => NumericalType::FloatIeee,
            0x22 => NumericalType::FloatBrain,
            0x23 => NumericalType::FloatComplex,
            _ => NumericalType::Unknown,
        }
    }

    pub fn bit_count(self) -> u32 {
        self.code() & 0xFF_FFFF
    }

    /// Whether every element occupies a whole number of bytes.
    pub fn is_byte_aligned(self) -> bool {
        self.bit_count() > 0 && self.bit_count() % 8 == 0
    }

    /// Bytes per element, rounding sub-byte types up.
    pub fn dense_byte_count(self) -> usize {
        self.bit_count().div_ceil(8) as usize
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementType::None => "none",
            ElementType::Bool8 => "i1",
            ElementType::Sint4 => "si4",
            ElementType::Uint4 => "ui4",
            ElementType::Sint8 => "si8",
            ElementType::Uint8 => "ui8",
            ElementType::Sint16 => "si16",
            ElementType::Uint16 => "ui16",
            ElementType::Sint32 => "si32",
            ElementType::Uint32 => "ui32",
            ElementType::Sint64 => "si64",
            ElementType::Uint64 => "ui64",
            ElementType::Float16 => "f16",
            ElementType::Float32 => "f32",
            ElementType::Float64 => "f64",
            ElementType::BFloat16 => "bf16",
            ElementType::ComplexFloat64 => "complex<f32>",
            ElementType::ComplexFloat128 => "complex<f64>",
        };
        f.write_str(s)
    }
}
