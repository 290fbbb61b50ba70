//! Runtime for kiln bytecode modules.
//!
//! An [`Instance`] knows which drivers exist and creates devices. A
//! [`Session`] binds loaded modules to one device, and a [`Call`] runs a
//! function by its qualified `module.function` name:
//!
//! ```no_run
//! use kiln_runtime::hal::{BufferParams, BufferUsage, BufferView, ElementType, EncodingType,
//!     MemoryAccess, MemoryType};
//! use kiln_runtime::{Call, Instance, InstanceOptions, Session, SessionOptions};
//!
//! # fn main() -> kiln_runtime::Result<()> {
//! let mut options = InstanceOptions::new();
//! options.use_all_available_drivers();
//! let instance = Instance::create(options)?;
//! let device = instance.try_create_default_device("local-sync")?;
//!
//! let mut session = Session::create_with_device(&instance, SessionOptions::default(), device)?;
//! session.append_bytecode_module_from_file("model.kvmb")?;
//!
//! let input = BufferView::allocate_buffer_copy(
//!     session.device().as_ref(),
//!     &[2],
//!     ElementType::Float32,
//!     EncodingType::DenseRowMajor,
//!     BufferParams {
//!         memory_type: MemoryType::DEVICE_LOCAL,
//!         access: MemoryAccess::ALL,
//!         usage: BufferUsage::DEFAULT,
//!     },
//!     bytemuck::cast_slice(&[1.0f32, 2.0]),
//! )?;
//!
//! let mut call = Call::initialize_by_name(&session, "kiln.main")?;
//! call.inputs_push_back_buffer_view(input)?;
//! call.invoke()?;
//! let output = call.outputs_pop_front_buffer_view()?;
//! println!("{:?}", output.shape());
//! # Ok(())
//! # }
//! ```

mod call;
mod error;
pub mod hal;
mod instance;
mod session;
pub mod vm;

pub use call::Call;
pub use error::{Result, RuntimeError};
pub use instance::{AVAILABLE_DRIVERS, Instance, InstanceOptions};
pub use session::{Session, SessionOptions};
