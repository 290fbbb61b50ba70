//! Value types.

use std::fmt;

/// Scalar element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    /// Boolean, one bit of information stored in a byte.
    I1,
    SI8,
    SI16,
    SI32,
    SI64,
    UI8,
    UI16,
    UI32,
    UI64,
    F16,
    BF16,
    F32,
    F64,
    /// Complex number with two `f32` parts.
    Complex64,
    /// Complex number with two `f64` parts.
    Complex128,
    F8E4M3FN,
    F8E4M3FNUZ,
    F8E5M2,
    F8E5M2FNUZ,
}

impl ElementType {
    /// Storage width in bits.
    pub fn bit_width(&self) -> usize {
        match self {
            ElementType::I1
            | ElementType::SI8
            | ElementType::UI8
            | ElementType::F8E4M3FN
            | ElementType::F8E4M3FNUZ
            | ElementType::F8E5M2
            | ElementType::F8E5M2FNUZ => 8,
            ElementType::SI16 | ElementType::UI16 | ElementType::F16 | ElementType::BF16 => 16,
            ElementType::SI32 | ElementType::UI32 | ElementType::F32 => 32,
            ElementType::SI64 | ElementType::UI64 | ElementType::F64 | ElementType::Complex64 => {
                64
            }
            ElementType::Complex128 => 128,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            ElementType::F16
                | ElementType::BF16
                | ElementType::F32
                | ElementType::F64
                | ElementType::F8E4M3FN
                | ElementType::F8E4M3FNUZ
                | ElementType::F8E5M2
                | ElementType::F8E5M2FNUZ
        )
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, ElementType::Complex64 | ElementType::Complex128)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementType::I1 => "i1",
            ElementType::SI8 => "si8",
            ElementType::SI16 => "si16",
            ElementType::SI32 => "si32",
            ElementType::SI64 => "si64",
            ElementType::UI8 => "ui8",
            ElementType::UI16 => "ui16",
            ElementType::UI32 => "ui32",
            ElementType::UI64 => "ui64",
            ElementType::F16 => "f16",
            ElementType::BF16 => "bf16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::Complex64 => "complex<f32>",
            ElementType::Complex128 => "complex<f64>",
            ElementType::F8E4M3FN => "f8E4M3FN",
            ElementType::F8E4M3FNUZ => "f8E4M3FNUZ",
            ElementType::F8E5M2 => "f8E5M2",
            ElementType::F8E5M2FNUZ => "f8E5M2FNUZ",
        };
        f.write_str(s)
    }
}

/// One tensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(u64),
    Dynamic,
}

impl Dim {
    /// Whether two dimensions can describe the same runtime extent.
    pub fn is_compatible_with(&self, other: &Dim) -> bool {
        match (self, other) {
            (Dim::Static(a), Dim::Static(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(v) => write!(f, "{}", v),
            Dim::Dynamic => f.write_str("?"),
        }
    }
}

/// A tensor type. Both the shape and the element type may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    /// `None` for an unranked tensor.
    pub shape: Option<Vec<Dim>>,
    /// `None` when the element type is not known.
    pub element: Option<ElementType>,
}

impl TensorType {
    pub fn ranked(shape: Vec<Dim>, element: ElementType) -> Self {
        Self {
            shape: Some(shape),
            element: Some(element),
        }
    }

    /// Ranked tensor with all dimensions static.
    pub fn static_shape(dims: &[u64], element: ElementType) -> Self {
        Self::ranked(dims.iter().map(|&d| Dim::Static(d)).collect(), element)
    }

    pub fn unranked(element: Option<ElementType>) -> Self {
        Self {
            shape: None,
            element,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(Vec::len)
    }

    /// Static dimensions, if the tensor is ranked and fully static.
    pub fn static_dims(&self) -> Option<Vec<u64>> {
        self.shape.as_ref()?.iter().map(|d| match d {
            Dim::Static(v) => Some(*v),
            Dim::Dynamic => None,
        }).collect()
    }

    /// Number of elements when the shape is fully static.
    pub fn element_count(&self) -> Option<u64> {
        self.static_dims().map(|dims| dims.iter().product())
    }

    /// Unknown parts are compatible with anything; known parts must agree.
    pub fn is_compatible_with(&self, other: &TensorType) -> bool {
        let elements = match (self.element, other.element) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        let shapes = match (&self.shape, &other.shape) {
            (Some(a), Some(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_compatible_with(y))
            }
            _ => true,
        };
        elements && shapes
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("tensor<")?;
        match &self.shape {
            Some(dims) => {
                for dim in dims {
                    write!(f, "{}x", dim)?;
                }
            }
            None => f.write_str("*x")?,
        }
        match self.element {
            Some(element) => write!(f, "{}>", element),
            None => f.write_str("!unknown>"),
        }
    }
}

/// Type of an SSA value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Tensor(TensorType),
    /// Marker type for absent optional operands.
    None,
}

impl Type {
    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            Type::None => None,
        }
    }

    pub fn is_compatible_with(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Tensor(a), Type::Tensor(b)) => a.is_compatible_with(b),
            (Type::None, Type::None) => true,
            _ => false,
        }
    }
}

impl From<TensorType> for Type {
    fn from(t: TensorType) -> Self {
        Type::Tensor(t)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(t) => t.fmt(f),
            Type::None => f.write_str("none"),
        }
    }
}
