//! Built-in compiler passes.

mod canonicalize;
mod legalize;
mod lower;
mod serialize;
mod verify;

pub use canonicalize::CanonicalizePass;
pub use legalize::LegalizeInputPass;
pub use lower::LowerToVmPass;
pub use serialize::SerializePass;
pub use verify::VerifyPass;
