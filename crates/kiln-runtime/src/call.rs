//! Function calls: stage inputs, invoke synchronously, collect outputs.

use crate::hal::{Buffer, BufferView, Device, ElementType, EncodingType, Timeout};
use crate::session::{FunctionRef, Session};
use crate::vm::{self, Tensor};
use crate::{Result, RuntimeError};
use kiln_bytecode::{FunctionDef, TensorSignature};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A single call of one function in a session.
pub struct Call<'s> {
    session: &'s Session,
    function: FunctionRef,
    inputs: Vec<BufferView>,
    outputs: VecDeque<BufferView>,
}

/// Input contents captured for execution on the device.
struct StagedInput {
    buffer: Buffer,
    shape: Vec<usize>,
    element_type: ElementType,
    byte_length: usize,
}

type CallSlot = Arc<Mutex<Option<Result<Vec<BufferView>>>>>;

impl<'s> Call<'s> {
    /// Prepare a call of `qualified_name` (`module.function`).
    pub fn initialize_by_name(session: &'s Session, qualified_name: &str) -> Result<Self> {
        let function = session.lookup_function(qualified_name)?;
        Ok(Self {
            session,
            function,
            inputs: Vec::new(),
            outputs: VecDeque::new(),
        })
    }

    fn def(&self) -> &FunctionDef {
        &self.function.module.functions[self.function.index]
    }

    pub fn inputs_push_back_buffer_view(&mut self, view: BufferView) -> Result<()> {
        if view.encoding_type() != EncodingType::DenseRowMajor {
            return Err(RuntimeError::Unimplemented(
                "only dense row-major inputs are supported".to_string(),
            ));
        }
        self.inputs.push(view);
        Ok(())
    }

    pub fn inputs_size(&self) -> usize {
        self.inputs.len()
    }

    pub fn outputs_size(&self) -> usize {
        self.outputs.len()
    }

    fn validate(&self) -> Result<()> {
        let def = self.def();
        if self.inputs.len() != def.inputs.len() {
            return Err(RuntimeError::InvalidArgument(format!(
                "function '{}' expects {} arguments, got {}",
                def.name,
                def.inputs.len(),
                self.inputs.len()
            )));
        }
        for (i, (view, signature)) in self.inputs.iter().zip(&def.inputs).enumerate() {
            check_signature(i, view.element_type(), view.shape(), signature)?;
        }
        Ok(())
    }

    /// Run the function on the session's device and wait for it.
    #[tracing::instrument(skip_all, fields(function = %self.def().name))]
    pub fn invoke(&mut self) -> Result<()> {
        if self.session.options().validate_arguments {
            self.validate()?;
        }

        let staged: Vec<StagedInput> = self
            .inputs
            .iter()
            .map(|v| StagedInput {
                buffer: v.buffer().clone(),
                shape: v.shape().to_vec(),
                element_type: v.element_type(),
                byte_length: v.byte_length(),
            })
            .collect();
        let device = self.session.device().clone();
        let function = self.function.clone();
        let slot: CallSlot = Arc::new(Mutex::new(None));
        let result_slot = slot.clone();

        self.session.device().submit_and_wait(
            Box::new(move || {
                let result = run_on_device(device.as_ref(), &function, staged);
                *result_slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
            }),
            Timeout::Infinite,
        )?;

        let results = slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_else(|| {
                Err(RuntimeError::Unavailable(
                    "device did not report call completion".to_string(),
                ))
            })?;
        tracing::debug!(outputs = results.len(), "call completed");
        self.outputs = results.into();
        Ok(())
    }

    /// Take the next output in result order.
    pub fn outputs_pop_front_buffer_view(&mut self) -> Result<BufferView> {
        self.outputs
            .pop_front()
            .ok_or_else(|| RuntimeError::OutOfRange("no more call outputs".to_string()))
    }
}

fn check_signature(
    index: usize,
    element_type: ElementType,
    shape: &[usize],
    signature: &TensorSignature,
) -> Result<()> {
    if element_type.code() != signature.element_type {
        let expected = ElementType::from_code(signature.element_type)
            .map_or_else(|| format!("0x{:08x}", signature.element_type), |e| e.to_string());
        return Err(RuntimeError::InvalidArgument(format!(
            "argument {} has element type {}, expected {}",
            index, element_type, expected
        )));
    }
    if !signature.accepts_shape(shape) {
        return Err(RuntimeError::InvalidArgument(format!(
            "argument {} has shape {:?}, expected {:?}",
            index, shape, signature.dims
        )));
    }
    Ok(())
}

fn run_on_device(
    device: &dyn Device,
    function: &FunctionRef,
    inputs: Vec<StagedInput>,
) -> Result<Vec<BufferView>> {
    let args = inputs
        .into_iter()
        .map(|input| {
            let mut data = input.buffer.contents();
            data.truncate(input.byte_length);
            Tensor::new(input.element_type, input.shape, data)
        })
        .collect::<Result<Vec<_>>>()?;

    let module = &function.module;
    let results = vm::execute(module, &module.functions[function.index], args)?;

    let params = device.capabilities().result_buffer_params();
    results
        .into_iter()
        .map(|tensor| {
            let buffer = device.allocator().allocate_buffer(params, tensor.data.len())?;
            buffer.write_device(0, &tensor.data)?;
            BufferView::create(
                buffer,
                &tensor.shape,
                tensor.element_type,
                EncodingType::DenseRowMajor,
            )
        })
        .collect()
}
