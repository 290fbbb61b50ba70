//! Queued device: work and transfers run in order on a dedicated queue
//! thread, and device memory cannot be mapped by the host.

use crate::hal::allocator::Allocator;
use crate::hal::buffer::{Buffer, MemoryType, Timeout};
use crate::hal::device::{Device, DeviceCapabilities, DeviceWork};
use crate::{Result, RuntimeError};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub const LOCAL_QUEUED_DRIVER: &str = "local-queued";

#[derive(Debug)]
pub struct LocalQueuedDevice {
    capabilities: DeviceCapabilities,
    allocator: Allocator,
    queue: Mutex<Option<mpsc::Sender<DeviceWork>>>,
    worker: Option<JoinHandle<()>>,
}

impl LocalQueuedDevice {
    pub fn new() -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<DeviceWork>();
        let worker = std::thread::Builder::new()
            .name("kiln-device-queue".to_string())
            .spawn(move || {
                for work in receiver {
                    work();
                }
                tracing::trace!("device queue drained");
            })?;

        Ok(Self {
            capabilities: DeviceCapabilities {
                executable_formats: vec!["llvm-cpu".to_string()],
                host_mappable_memory: false,
                queued_execution: true,
            },
            allocator: Allocator::new(MemoryType::DEVICE_LOCAL, false),
            queue: Mutex::new(Some(sender)),
            worker: Some(worker),
        })
    }

    fn enqueue(&self, work: DeviceWork) -> Result<()> {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let sender = queue
            .as_ref()
            .ok_or_else(|| RuntimeError::Unavailable("device queue is shut down".to_string()))?;
        sender
            .send(work)
            .map_err(|_| RuntimeError::Unavailable("device queue is not running".to_string()))
    }
}

impl Device for LocalQueuedDevice {
    fn id(&self) -> &str {
        LOCAL_QUEUED_DRIVER
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    fn transfer_h2d(&self, source: &[u8], target: &Buffer, target_offset: usize) -> Result<()> {
        let data = source.to_vec();
        let target = target.clone();
        let status = Arc::new(Mutex::new(None));
        let slot = status.clone();
        self.submit_and_wait(
            Box::new(move || {
                let result = target.write_device(target_offset, &data);
                *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
            }),
            Timeout::Infinite,
        )?;
        take_status(&status)
    }

    fn transfer_d2h(
        &self,
        source: &Buffer,
        source_offset: usize,
        target: &mut [u8],
        timeout: Timeout,
    ) -> Result<()> {
        let len = target.len();
        let source = source.clone();
        let staging = Arc::new(Mutex::new(None));
        let slot = staging.clone();
        self.submit_and_wait(
            Box::new(move || {
                let mut bytes = vec![0u8; len];
                let result = source.read_device(source_offset, &mut bytes).map(|()| bytes);
                *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
            }),
            timeout,
        )?;
        let bytes = take_status(&staging)?;
        target.copy_from_slice(&bytes);
        Ok(())
    }

    fn submit_and_wait(&self, work: DeviceWork, timeout: Timeout) -> Result<()> {
        let (done, completed) = mpsc::sync_channel::<()>(1);
        self.enqueue(Box::new(move || {
            work();
            let _ = done.send(());
        }))?;

        let lost = || RuntimeError::Unavailable("device queue dropped submitted work".to_string());
        match timeout {
            Timeout::Infinite => completed.recv().map_err(|_| lost()),
            Timeout::After(duration) => completed.recv_timeout(duration).map_err(|e| match e {
                RecvTimeoutError::Timeout => RuntimeError::DeadlineExceeded(format!(
                    "device work did not complete within {:?}",
                    duration
                )),
                RecvTimeoutError::Disconnected => lost(),
            }),
        }
    }
}

fn take_status<T>(slot: &Mutex<Option<Result<T>>>) -> Result<T> {
    slot.lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
        .unwrap_or_else(|| {
            Err(RuntimeError::Unavailable(
                "device work completed without a result".to_string(),
            ))
        })
}

impl Drop for LocalQueuedDevice {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("device queue thread panicked");
        }
    }
}
