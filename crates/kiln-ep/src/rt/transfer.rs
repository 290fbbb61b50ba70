//! Read-back of call results into host memory.

use kiln_runtime::hal::{BufferView, Device, Timeout};
use std::fmt;

/// How result bytes move from a device buffer to the host.
pub trait TransferStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Fill `target` with the dense contents of `view`.
    fn read(
        &self,
        device: &dyn Device,
        view: &BufferView,
        target: &mut [u8],
    ) -> kiln_runtime::Result<()>;
}

/// Map the result buffer and copy from the mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappedRead;

impl TransferStrategy for MappedRead {
    fn name(&self) -> &'static str {
        "mapped-read"
    }

    fn read(
        &self,
        _device: &dyn Device,
        view: &BufferView,
        target: &mut [u8],
    ) -> kiln_runtime::Result<()> {
        view.buffer().map_read(0, target)
    }
}

/// Ask the device to copy the result to the host and block until it is done.
#[derive(Debug, Clone, Copy)]
pub struct DeviceToHostTransfer {
    pub timeout: Timeout,
}

impl Default for DeviceToHostTransfer {
    fn default() -> Self {
        Self {
            timeout: Timeout::Infinite,
        }
    }
}

impl TransferStrategy for DeviceToHostTransfer {
    fn name(&self) -> &'static str {
        "device-to-host"
    }

    fn read(
        &self,
        device: &dyn Device,
        view: &BufferView,
        target: &mut [u8],
    ) -> kiln_runtime::Result<()> {
        device.transfer_d2h(view.buffer(), 0, target, self.timeout)
    }
}

/// Pick the read-back strategy a device supports: mapping when its memory is
/// host mappable, an explicit transfer otherwise.
pub fn select_transfer_strategy(device: &dyn Device) -> Box<dyn TransferStrategy> {
    if device.capabilities().host_mappable_memory {
        Box::new(MappedRead)
    } else {
        Box::new(DeviceToHostTransfer::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_runtime::hal::{
        BufferParams, BufferUsage, ElementType, EncodingType, LocalQueuedDevice,
        LocalSyncDevice, MemoryAccess, MemoryType,
    };

    fn view(device: &dyn Device, bytes: &[u8]) -> BufferView {
        BufferView::allocate_buffer_copy(
            device,
            &[bytes.len()],
            ElementType::Uint8,
            EncodingType::DenseRowMajor,
            device.capabilities().result_buffer_params(),
            bytes,
        )
        .unwrap()
    }

    #[test]
    fn test_selection_follows_capabilities() {
        let sync = LocalSyncDevice::new();
        assert_eq!(select_transfer_strategy(&sync).name(), "mapped-read");
        let queued = LocalQueuedDevice::new().unwrap();
        assert_eq!(select_transfer_strategy(&queued).name(), "device-to-host");
    }

    #[test]
    fn test_selected_strategy_reads_back() {
        let queued = LocalQueuedDevice::new().unwrap();
        let result = view(&queued, &[1, 2, 3]);
        let mut target = [0u8; 3];
        select_transfer_strategy(&queued)
            .read(&queued, &result, &mut target)
            .unwrap();
        assert_eq!(target, [1, 2, 3]);

        // Device-local memory cannot be mapped.
        assert!(MappedRead.read(&queued, &result, &mut target).is_err());
    }

    #[test]
    fn test_mapped_read() {
        let sync = LocalSyncDevice::new();
        let params = BufferParams {
            memory_type: MemoryType::DEVICE_LOCAL | MemoryType::HOST_VISIBLE,
            access: MemoryAccess::ALL,
            usage: BufferUsage::DEFAULT | BufferUsage::MAPPING,
        };
        let result = BufferView::allocate_buffer_copy(
            &sync,
            &[2],
            ElementType::Uint8,
            EncodingType::DenseRowMajor,
            params,
            &[7, 9],
        )
        .unwrap();
        let mut target = [0u8; 2];
        MappedRead.read(&sync, &result, &mut target).unwrap();
        assert_eq!(target, [7, 9]);
    }
}
