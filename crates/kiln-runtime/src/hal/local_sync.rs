//! Synchronous host device: work runs inline on the calling thread and all
//! memory is host visible.

use crate::Result;
use crate::hal::allocator::Allocator;
use crate::hal::buffer::{Buffer, MemoryType, Timeout};
use crate::hal::device::{Device, DeviceCapabilities, DeviceWork};

pub const LOCAL_SYNC_DRIVER: &str = "local-sync";

#[derive(Debug)]
pub struct LocalSyncDevice {
    capabilities: DeviceCapabilities,
    allocator: Allocator,
}

impl LocalSyncDevice {
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                executable_formats: vec!["llvm-cpu".to_string(), "vmvx".to_string()],
                host_mappable_memory: true,
                queued_execution: false,
            },
            allocator: Allocator::new(
                MemoryType::DEVICE_LOCAL | MemoryType::HOST_VISIBLE | MemoryType::HOST_COHERENT,
                true,
            ),
        }
    }
}

impl Default for LocalSyncDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for LocalSyncDevice {
    fn id(&self) -> &str {
        LOCAL_SYNC_DRIVER
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    fn transfer_h2d(&self, source: &[u8], target: &Buffer, target_offset: usize) -> Result<()> {
        target.write_device(target_offset, source)
    }

    fn transfer_d2h(
        &self,
        source: &Buffer,
        source_offset: usize,
        target: &mut [u8],
        _timeout: Timeout,
    ) -> Result<()> {
        source.read_device(source_offset, target)
    }

    fn submit_and_wait(&self, work: DeviceWork, _timeout: Timeout) -> Result<()> {
        work();
        Ok(())
    }
}
