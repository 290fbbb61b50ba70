//! Device buffers and their memory properties.

use crate::hal::allocator::AllocatorState;
use crate::{Result, RuntimeError};
use std::fmt;
use std::ops::BitOr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

macro_rules! bitset {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $flag:ident = $value:expr),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            pub const NONE: $name = $name(0);
            $($(#[$cmeta])* pub const $flag: $name = $name($value);)*

            pub fn bits(self) -> u32 {
                self.0
            }

            /// Whether every bit of `other` is set.
            pub fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

bitset!(
    /// Where memory lives and who can see it.
    MemoryType {
        DEVICE_LOCAL = 1 << 0,
        HOST_VISIBLE = 1 << 1,
        HOST_COHERENT = 1 << 2,
        HOST_LOCAL = 1 << 3,
    }
);

bitset!(
    /// Access allowed on a buffer.
    MemoryAccess {
        READ = 1 << 0,
        WRITE = 1 << 1,
        DISCARD = 1 << 2,
        ALL = 0b111,
    }
);

bitset!(
    /// Operations a buffer may be used for.
    BufferUsage {
        TRANSFER = 1 << 0,
        DISPATCH_STORAGE = 1 << 1,
        /// Host mapping through [`Buffer::map_read`] / [`Buffer::map_write`].
        MAPPING = 1 << 2,
        DEFAULT = 0b011,
    }
);

/// Requested properties of a new buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferParams {
    pub memory_type: MemoryType,
    pub access: MemoryAccess,
    pub usage: BufferUsage,
}

/// How long a blocking device operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Infinite,
    After(Duration),
}

struct BufferInner {
    data: Mutex<Vec<u8>>,
    memory_type: MemoryType,
    access: MemoryAccess,
    usage: BufferUsage,
    stats: Arc<AllocatorState>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        let len = self.data.get_mut().map_or(0, |d| d.len());
        self.stats.release(len);
    }
}

/// A reference-counted device allocation.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    pub(crate) fn new(
        byte_length: usize,
        memory_type: MemoryType,
        access: MemoryAccess,
        usage: BufferUsage,
        stats: Arc<AllocatorState>,
    ) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                data: Mutex::new(vec![0; byte_length]),
                memory_type,
                access,
                usage,
                stats,
            }),
        }
    }

    pub fn byte_length(&self) -> usize {
        self.lock().len()
    }

    pub fn memory_type(&self) -> MemoryType {
        self.inner.memory_type
    }

    pub fn allowed_access(&self) -> MemoryAccess {
        self.inner.access
    }

    pub fn allowed_usage(&self) -> BufferUsage {
        self.inner.usage
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.inner.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_mappable(&self, access: MemoryAccess) -> Result<()> {
        if !self.inner.memory_type.contains(MemoryType::HOST_VISIBLE) {
            return Err(RuntimeError::PermissionDenied(
                "buffer memory is not host visible and cannot be mapped".to_string(),
            ));
        }
        if !self.inner.usage.contains(BufferUsage::MAPPING) {
            return Err(RuntimeError::PermissionDenied(
                "buffer was not allocated with mapping usage".to_string(),
            ));
        }
        if !self.inner.access.contains(access) {
            return Err(RuntimeError::PermissionDenied(format!(
                "buffer does not allow access {:#b}",
                access.bits()
            )));
        }
        Ok(())
    }

    fn check_range(len: usize, offset: usize, count: usize) -> Result<()> {
        if offset.checked_add(count).is_none_or(|end| end > len) {
            return Err(RuntimeError::OutOfRange(format!(
                "range [{}, {}) exceeds buffer length {}",
                offset,
                offset.saturating_add(count),
                len
            )));
        }
        Ok(())
    }

    /// Copy `target.len()` bytes starting at `offset` through a host mapping.
    pub fn map_read(&self, offset: usize, target: &mut [u8]) -> Result<()> {
        self.check_mappable(MemoryAccess::READ)?;
        self.read_device(offset, target)
    }

    /// Copy `source` to `offset` through a host mapping.
    pub fn map_write(&self, offset: usize, source: &[u8]) -> Result<()> {
        self.check_mappable(MemoryAccess::WRITE)?;
        self.write_device(offset, source)
    }

    /// Device-side read; bypasses host mapping rules.
    pub(crate) fn read_device(&self, offset: usize, target: &mut [u8]) -> Result<()> {
        let data = self.lock();
        Self::check_range(data.len(), offset, target.len())?;
        target.copy_from_slice(&data[offset..offset + target.len()]);
        Ok(())
    }

    /// Device-side write; bypasses host mapping rules.
    pub(crate) fn write_device(&self, offset: usize, source: &[u8]) -> Result<()> {
        let mut data = self.lock();
        Self::check_range(data.len(), offset, source.len())?;
        data[offset..offset + source.len()].copy_from_slice(source);
        Ok(())
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("byte_length", &self.byte_length())
            .field("memory_type", &self.inner.memory_type)
            .field("usage", &self.inner.usage)
            .finish()
    }
}
