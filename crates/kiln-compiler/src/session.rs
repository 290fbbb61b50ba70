//! Compiler sessions.

use crate::options::CompilerOptions;
use crate::{CompilerError, Result};
use kiln_ir::{Context, DialectRegistry};
use std::sync::Arc;

/// An IR context plus the flags applied to every invocation created from it.
///
/// Flags can only change while no invocation borrows the session.
#[derive(Debug)]
pub struct Session {
    context: Arc<Context>,
    options: CompilerOptions,
}

impl Session {
    /// Create a session over the default dialect registry.
    pub fn new() -> Result<Self> {
        Self::with_registry(crate::default_registry())
    }

    /// Create a session over a custom dialect registry.
    pub fn with_registry(registry: DialectRegistry) -> Result<Self> {
        if !crate::is_initialized() {
            return Err(CompilerError::NotInitialized);
        }
        Ok(Self {
            context: Arc::new(Context::new(registry)),
            options: CompilerOptions::default(),
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Apply flags in order. Flags applied before a failing one stay
    /// applied.
    pub fn set_flags<I, S>(&mut self, flags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for flag in flags {
            self.options.apply_flag(flag.as_ref())?;
        }
        Ok(())
    }

    /// Current options rendered as flags.
    pub fn get_flags(&self) -> Vec<String> {
        self.options.to_flags()
    }
}
