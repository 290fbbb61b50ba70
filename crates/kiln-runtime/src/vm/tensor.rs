//! Host tensors held in VM registers.

use crate::hal::dense_byte_length;
use crate::{Result, RuntimeError};
use half::{bf16, f16};
use kiln_bytecode::{ElementType, NumericalType};

/// A dense row-major tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub element_type: ElementType,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl Tensor {
    pub fn new(element_type: ElementType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        let expected = dense_byte_length(&shape, element_type).ok_or_else(|| {
            RuntimeError::Unimplemented(format!("element type {} in VM tensors", element_type))
        })?;
        if data.len() != expected {
            return Err(RuntimeError::InvalidArgument(format!(
                "tensor data is {} bytes, expected {} for shape {:?} of {}",
                data.len(),
                expected,
                shape,
                element_type
            )));
        }
        Ok(Self {
            element_type,
            shape,
            data,
        })
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Widen every element into a computation lane.
    pub fn lanes(&self) -> Result<Lanes> {
        let d = &self.data;
        Ok(match self.element_type {
            ElementType::Bool8 => Lanes::Bool(d.iter().map(|&b| b != 0).collect()),
            ElementType::Sint8 => Lanes::Signed(d.iter().map(|&b| b as i8 as i64).collect()),
            ElementType::Uint8 => Lanes::Unsigned(d.iter().map(|&b| b as u64).collect()),
            ElementType::Sint16 => Lanes::Signed(widen::<i16, _>(d, |v| v as i64)),
            ElementType::Uint16 => Lanes::Unsigned(widen::<u16, _>(d, |v| v as u64)),
            ElementType::Sint32 => Lanes::Signed(widen::<i32, _>(d, |v| v as i64)),
            ElementType::Uint32 => Lanes::Unsigned(widen::<u32, _>(d, |v| v as u64)),
            ElementType::Sint64 => Lanes::Signed(bytemuck::pod_collect_to_vec(d)),
            ElementType::Uint64 => Lanes::Unsigned(bytemuck::pod_collect_to_vec(d)),
            ElementType::Float16 => Lanes::Float(widen::<f16, _>(d, f16::to_f64)),
            ElementType::BFloat16 => Lanes::Float(widen::<bf16, _>(d, bf16::to_f64)),
            ElementType::Float32 => Lanes::Float(widen::<f32, _>(d, |v| v as f64)),
            ElementType::Float64 => Lanes::Float(bytemuck::pod_collect_to_vec(d)),
            ElementType::ComplexFloat64 => {
                let parts = widen::<f32, _>(d, |v| v as f64);
                Lanes::Complex(parts.chunks_exact(2).map(|c| (c[0], c[1])).collect())
            }
            ElementType::ComplexFloat128 => {
                let parts: Vec<f64> = bytemuck::pod_collect_to_vec(d);
                Lanes::Complex(parts.chunks_exact(2).map(|c| (c[0], c[1])).collect())
            }
            other @ (ElementType::None | ElementType::Sint4 | ElementType::Uint4) => {
                return Err(RuntimeError::Unimplemented(format!(
                    "element type {} in VM kernels",
                    other
                )));
            }
        })
    }

    /// Narrow lanes back into a tensor of `element_type`.
    ///
    /// Floats are truncated toward zero and integers wrap to the target
    /// width.
    pub fn from_lanes(element_type: ElementType, shape: Vec<usize>, lanes: &Lanes) -> Result<Self> {
        let data = match element_type {
            ElementType::Bool8 => lanes.to_bools().into_iter().map(u8::from).collect(),
            ElementType::Sint8 => narrow(lanes.to_signed(), |v| v as i8),
            ElementType::Uint8 => lanes.to_unsigned().into_iter().map(|v| v as u8).collect(),
            ElementType::Sint16 => narrow(lanes.to_signed(), |v| v as i16),
            ElementType::Uint16 => narrow(lanes.to_unsigned(), |v| v as u16),
            ElementType::Sint32 => narrow(lanes.to_signed(), |v| v as i32),
            ElementType::Uint32 => narrow(lanes.to_unsigned(), |v| v as u32),
            ElementType::Sint64 => narrow(lanes.to_signed(), |v| v),
            ElementType::Uint64 => narrow(lanes.to_unsigned(), |v| v),
            ElementType::Float16 => narrow(lanes.to_floats(), f16::from_f64),
            ElementType::BFloat16 => narrow(lanes.to_floats(), bf16::from_f64),
            ElementType::Float32 => narrow(lanes.to_floats(), |v| v as f32),
            ElementType::Float64 => narrow(lanes.to_floats(), |v| v),
            ElementType::ComplexFloat64 => {
                let parts: Vec<f32> = lanes
                    .to_complex()
                    .into_iter()
                    .flat_map(|(re, im)| [re as f32, im as f32])
                    .collect();
                bytemuck::cast_slice(&parts).to_vec()
            }
            ElementType::ComplexFloat128 => {
                let parts: Vec<f64> = lanes
                    .to_complex()
                    .into_iter()
                    .flat_map(|(re, im)| [re, im])
                    .collect();
                bytemuck::cast_slice(&parts).to_vec()
            }
            other @ (ElementType::None | ElementType::Sint4 | ElementType::Uint4) => {
                return Err(RuntimeError::Unimplemented(format!(
                    "element type {} in VM kernels",
                    other
                )));
            }
        };
        Self::new(element_type, shape, data)
    }
}

fn widen<T: bytemuck::Pod, W>(bytes: &[u8], f: impl Fn(T) -> W) -> Vec<W> {
    bytemuck::pod_collect_to_vec::<u8, T>(bytes)
        .into_iter()
        .map(f)
        .collect()
}

fn narrow<W, T: bytemuck::Pod>(values: Vec<W>, f: impl Fn(W) -> T) -> Vec<u8> {
    let narrowed: Vec<T> = values.into_iter().map(f).collect();
    bytemuck::cast_slice(&narrowed).to_vec()
}

/// Elements widened to the largest type of their numerical class.
#[derive(Debug, Clone, PartialEq)]
pub enum Lanes {
    Bool(Vec<bool>),
    Signed(Vec<i64>),
    Unsigned(Vec<u64>),
    Float(Vec<f64>),
    Complex(Vec<(f64, f64)>),
}

impl Lanes {
    pub fn len(&self) -> usize {
        match self {
            Lanes::Bool(v) => v.len(),
            Lanes::Signed(v) => v.len(),
            Lanes::Unsigned(v) => v.len(),
            Lanes::Float(v) => v.len(),
            Lanes::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gather elements by index.
    pub fn gather(&self, indices: &[usize]) -> Lanes {
        fn pick<T: Copy>(v: &[T], indices: &[usize]) -> Vec<T> {
            indices.iter().map(|&i| v[i]).collect()
        }
        match self {
            Lanes::Bool(v) => Lanes::Bool(pick(v, indices)),
            Lanes::Signed(v) => Lanes::Signed(pick(v, indices)),
            Lanes::Unsigned(v) => Lanes::Unsigned(pick(v, indices)),
            Lanes::Float(v) => Lanes::Float(pick(v, indices)),
            Lanes::Complex(v) => Lanes::Complex(pick(v, indices)),
        }
    }

    fn to_floats(&self) -> Vec<f64> {
        match self {
            Lanes::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            Lanes::Signed(v) => v.iter().map(|&x| x as f64).collect(),
            Lanes::Unsigned(v) => v.iter().map(|&x| x as f64).collect(),
            Lanes::Float(v) => v.clone(),
            Lanes::Complex(v) => v.iter().map(|&(re, _)| re).collect(),
        }
    }

    fn to_signed(&self) -> Vec<i64> {
        match self {
            Lanes::Bool(v) => v.iter().map(|&b| b as i64).collect(),
            Lanes::Signed(v) => v.clone(),
            Lanes::Unsigned(v) => v.iter().map(|&x| x as i64).collect(),
            Lanes::Float(v) => v.iter().map(|&x| x as i64).collect(),
            Lanes::Complex(v) => v.iter().map(|&(re, _)| re as i64).collect(),
        }
    }

    fn to_unsigned(&self) -> Vec<u64> {
        match self {
            Lanes::Bool(v) => v.iter().map(|&b| b as u64).collect(),
            Lanes::Signed(v) => v.iter().map(|&x| x as u64).collect(),
            Lanes::Unsigned(v) => v.clone(),
            Lanes::Float(v) => v.iter().map(|&x| x as u64).collect(),
            Lanes::Complex(v) => v.iter().map(|&(re, _)| re as u64).collect(),
        }
    }

    fn to_bools(&self) -> Vec<bool> {
        match self {
            Lanes::Bool(v) => v.clone(),
            Lanes::Signed(v) => v.iter().map(|&x| x != 0).collect(),
            Lanes::Unsigned(v) => v.iter().map(|&x| x != 0).collect(),
            Lanes::Float(v) => v.iter().map(|&x| x != 0.0).collect(),
            Lanes::Complex(v) => v.iter().map(|&(re, im)| re != 0.0 || im != 0.0).collect(),
        }
    }

    fn to_complex(&self) -> Vec<(f64, f64)> {
        match self {
            Lanes::Complex(v) => v.clone(),
            other => other.to_floats().into_iter().map(|re| (re, 0.0)).collect(),
        }
    }
}

/// Whether kernels compute `element_type` in floating point.
pub fn is_float(element_type: ElementType) -> bool {
    matches!(
        element_type.numerical_type(),
        NumericalType::FloatIeee | NumericalType::FloatBrain
    )
}
