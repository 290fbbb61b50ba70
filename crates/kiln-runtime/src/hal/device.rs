//! Device abstraction.

use crate::Result;
use crate::hal::allocator::Allocator;
use crate::hal::buffer::{Buffer, BufferParams, BufferUsage, MemoryAccess, MemoryType, Timeout};
use std::fmt;

/// Work submitted to a device.
pub type DeviceWork = Box<dyn FnOnce() + Send + 'static>;

/// Static properties of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Executable formats modules must target to load on this device.
    pub executable_formats: Vec<String>,
    /// Whether device memory can be mapped and read by the host.
    pub host_mappable_memory: bool,
    /// Whether work runs on a separate queue instead of inline.
    pub queued_execution: bool,
}

impl DeviceCapabilities {
    pub fn supports_format(&self, format: &str) -> bool {
        self.executable_formats.iter().any(|f| f == format)
    }

    /// Parameters for buffers the device allocates to hold results.
    pub fn result_buffer_params(&self) -> BufferParams {
        if self.host_mappable_memory {
            BufferParams {
                memory_type: MemoryType::DEVICE_LOCAL | MemoryType::HOST_VISIBLE,
                access: MemoryAccess::ALL,
                usage: BufferUsage::DEFAULT | BufferUsage::MAPPING,
            }
        } else {
            BufferParams {
                memory_type: MemoryType::DEVICE_LOCAL,
                access: MemoryAccess::ALL,
                usage: BufferUsage::DEFAULT,
            }
        }
    }
}

/// A compute device with its own memory.
pub trait Device: Send + Sync + fmt::Debug {
    /// Driver identifier, e.g. `local-sync`.
    fn id(&self) -> &str;

    fn capabilities(&self) -> &DeviceCapabilities;

    fn allocator(&self) -> &Allocator;

    /// Copy host bytes into a device buffer.
    fn transfer_h2d(&self, source: &[u8], target: &Buffer, target_offset: usize) -> Result<()>;

    /// Copy device buffer contents to host memory, waiting up to `timeout`.
    fn transfer_d2h(
        &self,
        source: &Buffer,
        source_offset: usize,
        target: &mut [u8],
        timeout: Timeout,
    ) -> Result<()>;

    /// Run `work` on the device and wait up to `timeout` for it to finish.
    fn submit_and_wait(&self, work: DeviceWork, timeout: Timeout) -> Result<()>;
}
