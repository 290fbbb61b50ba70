//! Shaped, typed views over buffers.

use crate::hal::buffer::{Buffer, BufferParams};
use crate::hal::device::Device;
use crate::{Result, RuntimeError};
use kiln_bytecode::ElementType;

/// Memory layout of view contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingType {
    #[default]
    DenseRowMajor,
}

/// A buffer interpreted as a dense tensor.
#[derive(Debug, Clone)]
pub struct BufferView {
    buffer: Buffer,
    shape: Vec<usize>,
    element_type: ElementType,
    encoding: EncodingType,
}

/// Dense byte length of a tensor, or `None` on overflow or for element
/// types that are not byte aligned.
pub fn dense_byte_length(shape: &[usize], element_type: ElementType) -> Option<usize> {
    if !element_type.is_byte_aligned() {
        return None;
    }
    shape
        .iter()
        .try_fold(element_type.dense_byte_count(), |acc, &d| acc.checked_mul(d))
}

impl BufferView {
    pub fn create(
        buffer: Buffer,
        shape: &[usize],
        element_type: ElementType,
        encoding: EncodingType,
    ) -> Result<Self> {
        let required = dense_byte_length(shape, element_type).ok_or_else(|| {
            RuntimeError::InvalidArgument(format!(
                "element type {} with shape {:?} has no dense byte length",
                element_type, shape
            ))
        })?;
        if buffer.byte_length() < required {
            return Err(RuntimeError::OutOfRange(format!(
                "buffer of {} bytes is too small for shape {:?} of {} ({} bytes)",
                buffer.byte_length(),
                shape,
                element_type,
                required
            )));
        }
        Ok(Self {
            buffer,
            shape: shape.to_vec(),
            element_type,
            encoding,
        })
    }

    /// Allocate a device buffer and copy `data` into it.
    ///
    /// `data` must hold exactly the dense contents of `shape`.
    pub fn allocate_buffer_copy(
        device: &dyn Device,
        shape: &[usize],
        element_type: ElementType,
        encoding: EncodingType,
        params: BufferParams,
        data: &[u8],
    ) -> Result<Self> {
        let required = dense_byte_length(shape, element_type).ok_or_else(|| {
            RuntimeError::InvalidArgument(format!(
                "element type {} is not byte aligned or shape {:?} overflows",
                element_type, shape
            ))
        })?;
        if data.len() != required {
            return Err(RuntimeError::InvalidArgument(format!(
                "host data is {} bytes but shape {:?} of {} needs {}",
                data.len(),
                shape,
                element_type,
                required
            )));
        }
        let buffer = device.allocator().allocate_buffer(params, required)?;
        device.transfer_h2d(data, &buffer, 0)?;
        Self::create(buffer, shape, element_type, encoding)
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn shape_rank(&self) -> usize {
        self.shape.len()
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn encoding_type(&self) -> EncodingType {
        self.encoding
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Dense byte length of the view's contents.
    pub fn byte_length(&self) -> usize {
        self.element_count() * self.element_type.dense_byte_count()
    }
}
