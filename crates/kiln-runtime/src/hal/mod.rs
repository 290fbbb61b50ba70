//! Hardware abstraction layer: devices, memory and buffer views.

pub mod allocator;
pub mod buffer;
pub mod buffer_view;
pub mod device;
pub mod local_queued;
pub mod local_sync;

pub use allocator::{Allocator, AllocatorStatistics};
pub use buffer::{Buffer, BufferParams, BufferUsage, MemoryAccess, MemoryType, Timeout};
pub use buffer_view::{BufferView, EncodingType, dense_byte_length};
pub use device::{Device, DeviceCapabilities, DeviceWork};
pub use kiln_bytecode::ElementType;
pub use local_queued::{LOCAL_QUEUED_DRIVER, LocalQueuedDevice};
pub use local_sync::{LOCAL_SYNC_DRIVER, LocalSyncDevice};
