//! Compiler engine for kiln.
//!
//! This crate takes kiln IR modules and compiles them to VM bytecode that
//! `kiln-runtime` can load. It is driven through a small embedding API:
//!
//! 1. [`global_initialize`] once per process
//! 2. a [`Session`] holding the IR context and compiler flags
//! 3. an [`Invocation`] per module: diagnostics, crash handler, import,
//!    pipeline, output
//!
//! The standard pipeline runs in stages: Verification → Input →
//! Canonicalization → Lowering → Serialization.
//!
//! # Example
//!
//! ```no_run
//! use kiln_compiler::{Invocation, Output, Pipeline, Session, global_initialize};
//! use kiln_ir::{Location, Module};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! global_initialize();
//! let mut session = Session::new()?;
//! session.set_flags(["--kiln-hal-target-backends=llvm-cpu", "--kiln-input-type=onnx"])?;
//!
//! let mut invocation = Invocation::new(&session);
//! invocation.enable_callback_diagnostics(|d| eprintln!("{}", d))?;
//! invocation.import_steal_module(Module::new(Location::Unknown))?;
//! if invocation.run_pipeline(Pipeline::Std) {
//!     let mut output = Output::open_membuffer();
//!     invocation.output_vm_bytecode(&mut output)?;
//!     println!("{} bytes", output.map_memory()?.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod dialect;
pub mod error;
pub mod invocation;
pub mod options;
pub mod output;
pub mod pass;
pub mod passes;
pub mod session;

pub use error::{CompilerError, Result};
pub use invocation::Invocation;
pub use options::{CompilerOptions, InputType, KNOWN_TARGET_BACKENDS};
pub use output::Output;
pub use pass::{Pass, PassContext, Pipeline, Stage};
pub use passes::{CanonicalizePass, LegalizeInputPass, LowerToVmPass, SerializePass, VerifyPass};
pub use session::Session;

use kiln_ir::DialectRegistry;
use std::sync::OnceLock;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Process-wide initialization. Safe to call any number of times.
pub fn global_initialize() {
    INITIALIZED.get_or_init(|| {
        tracing::debug!(version = env!("CARGO_PKG_VERSION"), "initialized kiln compiler");
    });
}

pub fn is_initialized() -> bool {
    INITIALIZED.get().is_some()
}

/// Dialects this compiler build registers.
pub fn default_registry() -> DialectRegistry {
    let registry = DialectRegistry::new();
    #[cfg(feature = "onnx")]
    let registry = registry.with(dialect::onnx_dialect());
    registry
}
