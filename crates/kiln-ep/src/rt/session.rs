use super::instance::Instance;
use super::marshal::{from_hal_element_type, to_hal_element_type};
use super::transfer::{TransferStrategy, select_transfer_strategy};
use super::DisposeCallback;
use crate::kernel::{HostTensor, KernelContext, MemoryDevice, Value};
use crate::{EpError, Result};
use kiln_runtime::hal::{
    BufferParams, BufferUsage, BufferView, Device, ElementType, EncodingType, MemoryAccess,
    MemoryType,
};
use kiln_runtime::{Call, RuntimeError, SessionOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Where a compiled module is loaded from.
#[derive(Debug, Clone, Copy)]
pub enum ModuleSource<'a> {
    File(&'a Path),
    Memory(&'a [u8]),
}

/// A runtime session holding the modules of one compilation.
///
/// Dispose callbacks registered with [`Session::append_module`] run exactly
/// once, in registration order, after the runtime session is gone.
pub struct Session {
    instance: Arc<Instance>,
    session: Mutex<Option<kiln_runtime::Session>>,
    dispose_callbacks: Mutex<Vec<DisposeCallback>>,
}

impl Session {
    pub fn new(instance: Arc<Instance>) -> Self {
        Self {
            instance,
            session: Mutex::new(None),
            dispose_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Create the runtime session on the instance's device.
    pub fn initialize(&mut self) -> Result<()> {
        let device = self.instance.device().cloned().ok_or_else(|| {
            RuntimeError::FailedPrecondition("runtime instance has no device".to_string())
        })?;
        let session = kiln_runtime::Session::create_with_device(
            self.instance.runtime(),
            SessionOptions::default(),
            device,
        )?;
        *self.session.get_mut().unwrap_or_else(|e| e.into_inner()) = Some(session);
        Ok(())
    }

    /// Load a module. `dispose` is registered before loading, so it runs at
    /// teardown even if loading fails.
    pub fn append_module(&mut self, source: ModuleSource<'_>, dispose: DisposeCallback) -> Result<()> {
        self.dispose_callbacks
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .push(dispose);

        let session = self
            .session
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
            .ok_or_else(not_initialized)?;
        match source {
            ModuleSource::File(path) => {
                tracing::debug!(path = %path.display(), "loading module from file");
                session.append_bytecode_module_from_file(path)?;
            }
            ModuleSource::Memory(bytes) => {
                tracing::debug!(bytes = bytes.len(), "loading module from memory");
                session.append_bytecode_module_from_memory(bytes)?;
            }
        }
        Ok(())
    }

    /// Invoke `entry_point` with the context's inputs and commit its outputs.
    ///
    /// Outputs are committed only if every one of them was read back.
    #[tracing::instrument(skip_all, fields(entry_point = %entry_point))]
    pub fn call(&self, entry_point: &str, cx: &mut KernelContext) -> Result<()> {
        let guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let session = guard.as_ref().ok_or_else(not_initialized)?;
        let device = session.device().clone();

        let mut call = Call::initialize_by_name(session, entry_point)?;

        // Check every input before allocating any device memory.
        let mut staged = Vec::with_capacity(cx.input_count());
        for index in 0..cx.input_count() {
            staged.push(stage_input(index, cx.input(index))?);
        }
        for input in staged {
            let view = BufferView::allocate_buffer_copy(
                device.as_ref(),
                &input.shape,
                input.element_type,
                EncodingType::DenseRowMajor,
                BufferParams {
                    memory_type: MemoryType::DEVICE_LOCAL,
                    access: MemoryAccess::ALL,
                    usage: BufferUsage::DEFAULT,
                },
                input.data,
            )?;
            call.inputs_push_back_buffer_view(view)?;
        }

        call.invoke()?;

        let strategy = select_transfer_strategy(device.as_ref());
        let mut outputs = Vec::with_capacity(cx.output_count());
        for index in 0..cx.output_count() {
            let view = call.outputs_pop_front_buffer_view()?;
            outputs.push(read_output(device.as_ref(), strategy.as_ref(), index, &view)?);
        }
        tracing::debug!(
            outputs = outputs.len(),
            transfer = strategy.name(),
            "call completed"
        );
        cx.commit_outputs(outputs)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Modules go first; they may still reference what the callbacks free.
        drop(self.session.get_mut().unwrap_or_else(|e| e.into_inner()).take());
        let callbacks =
            std::mem::take(self.dispose_callbacks.get_mut().unwrap_or_else(|e| e.into_inner()));
        for dispose in callbacks {
            dispose();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let initialized = self
            .session
            .lock()
            .map(|s| s.is_some())
            .unwrap_or_default();
        f.debug_struct("Session")
            .field("initialized", &initialized)
            .finish_non_exhaustive()
    }
}

fn not_initialized() -> EpError {
    RuntimeError::FailedPrecondition("runtime session is not initialized".to_string()).into()
}

struct StagedInput<'a> {
    shape: Vec<usize>,
    element_type: ElementType,
    data: &'a [u8],
}

fn stage_input(index: usize, value: Option<&Value>) -> Result<StagedInput<'_>> {
    let tensor = value.and_then(Value::as_tensor).ok_or_else(|| {
        EpError::InvalidArgument(format!("input {} is not a tensor", index))
    })?;
    if tensor.device != MemoryDevice::Cpu {
        return Err(EpError::InvalidArgument(format!(
            "input {} lives in {:?} memory; only CPU tensors are supported",
            index, tensor.device
        )));
    }
    let element_type =
        to_hal_element_type(tensor.dtype).ok_or(EpError::UnsupportedElementType(tensor.dtype))?;
    if !element_type.is_byte_aligned() {
        return Err(EpError::InvalidArgument(format!(
            "input {}: only byte-aligned element types are supported, got {}",
            index, element_type
        )));
    }
    let shape = tensor
        .shape
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| {
            EpError::InvalidArgument(format!(
                "input {} has a negative dimension in shape {:?}",
                index, tensor.shape
            ))
        })?;
    Ok(StagedInput {
        shape,
        element_type,
        data: &tensor.data,
    })
}

fn read_output(
    device: &dyn Device,
    strategy: &dyn TransferStrategy,
    index: usize,
    view: &BufferView,
) -> Result<HostTensor> {
    let dtype = from_hal_element_type(view.element_type()).ok_or_else(|| {
        EpError::InvalidArgument(format!(
            "output {} has element type {} with no host equivalent",
            index,
            view.element_type()
        ))
    })?;
    let shape = view
        .shape()
        .iter()
        .map(|&d| i64::try_from(d))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| {
            EpError::InvalidArgument(format!("output {} shape {:?} overflows", index, view.shape()))
        })?;
    let mut data = vec![0u8; view.byte_length()];
    strategy.read(device, view, &mut data)?;
    Ok(HostTensor::new(dtype, shape, data))
}
