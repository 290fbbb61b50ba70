//! Runtime side of the provider: one shared instance, one session per
//! compiled module, and marshaling of host tensors across the call boundary.

mod instance;
mod marshal;
mod session;
mod transfer;

pub use instance::Instance;
pub use marshal::{from_hal_element_type, to_hal_element_type};
pub use session::{ModuleSource, Session};
pub use transfer::{DeviceToHostTransfer, MappedRead, TransferStrategy, select_transfer_strategy};

/// Releases a resource a loaded module depends on. Runs once, after the
/// owning session has dropped its modules.
pub type DisposeCallback = Box<dyn FnOnce() + Send>;
