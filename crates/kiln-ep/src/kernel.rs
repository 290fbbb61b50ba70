//! Host side of the call boundary: tensors and the per-call kernel context.

use crate::{EpError, Result};
use kiln_onnx::DataType;

/// Where a host value's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryDevice {
    #[default]
    Cpu,
    Gpu,
    Fpga,
}

/// A dense row-major tensor owned by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub dtype: DataType,
    pub shape: Vec<i64>,
    /// Little-endian element bytes.
    pub data: Vec<u8>,
    pub device: MemoryDevice,
}

impl HostTensor {
    pub fn new(dtype: DataType, shape: Vec<i64>, data: Vec<u8>) -> Self {
        Self {
            dtype,
            shape,
            data,
            device: MemoryDevice::Cpu,
        }
    }

    /// Build a tensor from typed values.
    pub fn from_slice<T: bytemuck::Pod>(dtype: DataType, shape: &[i64], values: &[T]) -> Self {
        Self::new(dtype, shape.to_vec(), bytemuck::cast_slice(values).to_vec())
    }

    /// A zero-filled tensor, or `None` if a dimension is negative.
    pub fn zeros(dtype: DataType, shape: &[i64]) -> Option<Self> {
        let count = element_count(shape)?;
        Some(Self::new(dtype, shape.to_vec(), vec![0; count * dtype.size()]))
    }

    pub fn on_device(mut self, device: MemoryDevice) -> Self {
        self.device = device;
        self
    }

    /// Number of elements, or `None` if a dimension is negative.
    pub fn element_count(&self) -> Option<usize> {
        element_count(&self.shape)
    }

    /// Copy the contents out as typed values.
    pub fn to_vec<T: bytemuck::Pod>(&self) -> Vec<T> {
        bytemuck::pod_collect_to_vec(&self.data)
    }
}

fn element_count(shape: &[i64]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(usize::try_from(d).ok()?))
}

/// A value bound to a kernel input.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(HostTensor),
    Sequence(Vec<HostTensor>),
}

impl Value {
    pub fn as_tensor(&self) -> Option<&HostTensor> {
        match self {
            Value::Tensor(t) => Some(t),
            Value::Sequence(_) => None,
        }
    }
}

impl From<HostTensor> for Value {
    fn from(tensor: HostTensor) -> Self {
        Value::Tensor(tensor)
    }
}

/// Inputs of one kernel invocation and the slots for its outputs.
#[derive(Debug, Clone)]
pub struct KernelContext {
    inputs: Vec<Value>,
    output_count: usize,
    outputs: Option<Vec<HostTensor>>,
}

impl KernelContext {
    pub fn new(inputs: Vec<Value>, output_count: usize) -> Self {
        Self {
            inputs,
            output_count,
            outputs: None,
        }
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input(&self, index: usize) -> Option<&Value> {
        self.inputs.get(index)
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    /// Store every output at once. Either all outputs are set or none.
    pub fn commit_outputs(&mut self, outputs: Vec<HostTensor>) -> Result<()> {
        if outputs.len() != self.output_count {
            return Err(EpError::InvalidArgument(format!(
                "kernel expects {} outputs, got {}",
                self.output_count,
                outputs.len()
            )));
        }
        self.outputs = Some(outputs);
        Ok(())
    }

    /// Outputs, once committed.
    pub fn outputs(&self) -> Option<&[HostTensor]> {
        self.outputs.as_deref()
    }

    pub fn take_outputs(&mut self) -> Option<Vec<HostTensor>> {
        self.outputs.take()
    }
}
