//! Operation attributes.

use crate::types::{TensorType, Type};
use std::fmt;

/// Compile-time constant attached to an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Float(f64),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Strings(Vec<String>),
    Type(Type),
    /// Reference to a symbol such as a function name.
    Symbol(String),
    /// Dense tensor literal: row-major little-endian bytes of a statically
    /// shaped tensor.
    DenseElements(DenseElements),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseElements {
    pub ty: TensorType,
    pub data: Vec<u8>,
}

impl DenseElements {
    /// Byte length implied by the type, when known.
    pub fn expected_len(&self) -> Option<usize> {
        let count = self.ty.element_count()? as usize;
        let width = self.ty.element?.bit_width() / 8;
        Some(count * width)
    }
}

impl Attribute {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Attribute::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dense(&self) -> Option<&DenseElements> {
        match self {
            Attribute::DenseElements(d) => Some(d),
            _ => None,
        }
    }

    /// Render the attribute, eliding dense payloads longer than `elide_above`
    /// bytes.
    pub fn display(&self, elide_above: Option<usize>) -> AttributeDisplay<'_> {
        AttributeDisplay {
            attribute: self,
            elide_above,
        }
    }
}

/// Formatting adapter returned by [`Attribute::display`].
pub struct AttributeDisplay<'a> {
    attribute: &'a Attribute,
    elide_above: Option<usize>,
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str("]")
}

impl fmt::Display for AttributeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.attribute {
            Attribute::Int(v) => write!(f, "{} : si64", v),
            Attribute::Float(v) => write!(f, "{:?} : f64", v),
            Attribute::String(s) => write!(f, "{:?}", s),
            Attribute::Ints(v) => write_list(f, v),
            Attribute::Floats(v) => write_list(f, v),
            Attribute::Strings(v) => {
                let quoted: Vec<String> = v.iter().map(|s| format!("{:?}", s)).collect();
                write_list(f, &quoted)
            }
            Attribute::Type(t) => write!(f, "{}", t),
            Attribute::Symbol(s) => write!(f, "@{}", s),
            Attribute::DenseElements(dense) => {
                if self.elide_above.is_some_and(|limit| dense.data.len() > limit) {
                    return write!(f, "dense_resource<__elided__> : {}", dense.ty);
                }
                f.write_str("dense<\"0x")?;
                for byte in &dense.data {
                    write!(f, "{:02X}", byte)?;
                }
                write!(f, "\"> : {}", dense.ty)
            }
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.display(None).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ElementType;

    #[test]
    fn test_dense_display_and_elision() {
        let dense = Attribute::DenseElements(DenseElements {
            ty: TensorType::static_shape(&[2], ElementType::UI8),
            data: vec![0x01, 0xAB],
        });
        assert_eq!(dense.to_string(), "dense<\"0x01AB\"> : tensor<2xui8>");
        assert_eq!(
            dense.display(Some(1)).to_string(),
            "dense_resource<__elided__> : tensor<2xui8>"
        );
    }

    #[test]
    fn test_expected_len() {
        let dense = DenseElements {
            ty: TensorType::static_shape(&[2, 2], ElementType::F32),
            data: vec![],
        };
        assert_eq!(dense.expected_len(), Some(16));
    }

    #[test]
    fn test_list_display() {
        assert_eq!(Attribute::Ints(vec![1, -1]).to_string(), "[1, -1]");
        assert_eq!(
            Attribute::Strings(vec!["a".to_string()]).to_string(),
            "[\"a\"]"
        );
    }
}
