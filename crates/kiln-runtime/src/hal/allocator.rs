//! Device memory allocator.

use crate::hal::buffer::{Buffer, BufferParams, BufferUsage, MemoryType};
use crate::{Result, RuntimeError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub(crate) struct AllocatorState {
    live_buffers: AtomicUsize,
    total_allocations: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl AllocatorState {
    fn acquire(&self, bytes: usize) {
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn release(&self, bytes: usize) {
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// Snapshot of allocator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocatorStatistics {
    pub live_buffers: usize,
    pub total_allocations: usize,
    pub live_bytes: usize,
}

/// Allocates buffers in the memory a device provides.
#[derive(Debug)]
pub struct Allocator {
    supported: MemoryType,
    unified: bool,
    state: Arc<AllocatorState>,
}

impl Allocator {
    /// `supported` lists the memory types the device can provide. A unified
    /// allocator backs device-local memory with host-visible memory.
    pub fn new(supported: MemoryType, unified: bool) -> Self {
        Self {
            supported,
            unified,
            state: Arc::new(AllocatorState::default()),
        }
    }

    pub fn supported_memory_types(&self) -> MemoryType {
        self.supported
    }

    pub fn allocate_buffer(&self, params: BufferParams, byte_length: usize) -> Result<Buffer> {
        if !self.supported.contains(params.memory_type) {
            return Err(RuntimeError::InvalidArgument(format!(
                "memory type {:#b} is not supported by this allocator",
                params.memory_type.bits()
            )));
        }
        let memory_type = if self.unified && params.memory_type.contains(MemoryType::DEVICE_LOCAL)
        {
            params.memory_type | MemoryType::HOST_VISIBLE | MemoryType::HOST_COHERENT
        } else {
            params.memory_type
        };
        let usage = if memory_type.contains(MemoryType::HOST_VISIBLE) {
            params.usage | BufferUsage::MAPPING
        } else {
            params.usage
        };

        self.state.acquire(byte_length);
        tracing::trace!(byte_length, memory_type = memory_type.bits(), "allocated buffer");
        Ok(Buffer::new(
            byte_length,
            memory_type,
            params.access,
            usage,
            self.state.clone(),
        ))
    }

    pub fn statistics(&self) -> AllocatorStatistics {
        AllocatorStatistics {
            live_buffers: self.state.live_buffers.load(Ordering::Relaxed),
            total_allocations: self.state.total_allocations.load(Ordering::Relaxed),
            live_bytes: self.state.live_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::buffer::MemoryAccess;

    fn params(memory_type: MemoryType) -> BufferParams {
        BufferParams {
            memory_type,
            access: MemoryAccess::ALL,
            usage: BufferUsage::DEFAULT,
        }
    }

    #[test]
    fn test_statistics_track_live_buffers() {
        let allocator = Allocator::new(MemoryType::DEVICE_LOCAL, false);
        let a = allocator
            .allocate_buffer(params(MemoryType::DEVICE_LOCAL), 16)
            .unwrap();
        let b = a.clone();
        let stats = allocator.statistics();
        assert_eq!(stats.live_buffers, 1);
        assert_eq!(stats.live_bytes, 16);

        drop(a);
        assert_eq!(allocator.statistics().live_buffers, 1);
        drop(b);
        assert_eq!(
            allocator.statistics(),
            AllocatorStatistics {
                live_buffers: 0,
                total_allocations: 1,
                live_bytes: 0,
            }
        );
    }

    #[test]
    fn test_unsupported_memory_type() {
        let allocator = Allocator::new(MemoryType::DEVICE_LOCAL, false);
        assert!(
            allocator
                .allocate_buffer(params(MemoryType::HOST_VISIBLE), 4)
                .is_err()
        );
        assert_eq!(allocator.statistics().total_allocations, 0);
    }

    #[test]
    fn test_unified_memory_is_host_visible() {
        let allocator = Allocator::new(
            MemoryType::DEVICE_LOCAL | MemoryType::HOST_VISIBLE | MemoryType::HOST_COHERENT,
            true,
        );
        let buffer = allocator
            .allocate_buffer(params(MemoryType::DEVICE_LOCAL), 4)
            .unwrap();
        assert!(buffer.memory_type().contains(MemoryType::HOST_VISIBLE));
        assert!(buffer.allowed_usage().contains(BufferUsage::MAPPING));
    }
}
