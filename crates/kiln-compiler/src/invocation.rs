//! Compiler invocations.
//!
//! An invocation owns the module being compiled. Diagnostics reporting and
//! the crash handler must be configured before the module is imported.

use crate::output::Output;
use crate::pass::{Pass, PassContext, Pipeline};
use crate::session::Session;
use crate::{CompilerError, Result};
use kiln_ir::{Diagnostic, HandlerId, Module, PrintingFlags};
use std::panic::{self, AssertUnwindSafe};

type CrashHandler = Box<dyn FnMut() -> Result<Output> + Send>;

/// One compilation of one module within a [`Session`].
pub struct Invocation<'s> {
    session: &'s Session,
    module: Option<Module>,
    diagnostic_handler: Option<HandlerId>,
    crash_handler: Option<CrashHandler>,
    artifact: Option<Vec<u8>>,
}

impl<'s> Invocation<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            session,
            module: None,
            diagnostic_handler: None,
            crash_handler: None,
            artifact: None,
        }
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    fn ensure_no_module(&self, what: &str) -> Result<()> {
        if self.module.is_some() {
            return Err(CompilerError::InvalidState(format!(
                "{} must be configured before a module is imported",
                what
            )));
        }
        Ok(())
    }

    /// Route diagnostics of the session context to `callback` for the
    /// lifetime of this invocation.
    pub fn enable_callback_diagnostics<F>(&mut self, callback: F) -> Result<()>
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        self.ensure_no_module("diagnostics")?;
        if let Some(previous) = self.diagnostic_handler.take() {
            self.session.context().detach_diagnostic_handler(previous);
        }
        self.diagnostic_handler = Some(self.session.context().attach_diagnostic_handler(callback));
        Ok(())
    }

    /// Install a handler that opens the output receiving a crash reproducer
    /// if a pass panics.
    pub fn set_crash_handler<F>(&mut self, handler: F) -> Result<()>
    where
        F: FnMut() -> Result<Output> + Send + 'static,
    {
        self.ensure_no_module("the crash handler")?;
        self.crash_handler = Some(Box::new(handler));
        Ok(())
    }

    /// Take ownership of `module`. Only one module can be imported.
    pub fn import_steal_module(&mut self, module: Module) -> Result<()> {
        if self.module.is_some() {
            return Err(CompilerError::InvalidState(
                "a module has already been imported".to_string(),
            ));
        }
        self.module = Some(module);
        Ok(())
    }

    pub fn module(&self) -> Option<&Module> {
        self.module.as_ref()
    }

    pub fn module_mut(&mut self) -> Option<&mut Module> {
        self.module.as_mut()
    }

    /// Run a predefined pipeline. Failures are reported as diagnostics.
    pub fn run_pipeline(&mut self, pipeline: Pipeline) -> bool {
        self.run_passes(pipeline.passes())
    }

    /// Run `passes` sorted by stage. Failures, including panics inside a
    /// pass, are reported as diagnostics.
    #[tracing::instrument(skip_all, fields(num_passes = passes.len()))]
    pub fn run_passes(&mut self, mut passes: Vec<Box<dyn Pass>>) -> bool {
        let context = self.session.context().clone();
        let options = self.session.options();
        let Some(module) = self.module.as_mut() else {
            context.emit_error(Default::default(), "no module has been imported");
            return false;
        };

        passes.sort_by_key(|p| p.stage());
        // Printed only if a pass panics.
        let snapshot = self.crash_handler.is_some().then(|| module.clone());

        let mut cx = PassContext {
            context: &context,
            options,
            lowered: None,
            artifact: None,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            for pass in &passes {
                let _span = tracing::debug_span!("pass", name = pass.name(), stage = ?pass.stage())
                    .entered();
                pass.run(module, &mut cx)?;
                if options.print_ir_after_all {
                    tracing::debug!(
                        "IR after {}:\n{}",
                        pass.name(),
                        kiln_ir::print_module(module, &PrintingFlags::default())
                    );
                }
            }
            Ok(())
        }));

        match outcome {
            Ok(Ok(())) => {
                if cx.artifact.is_some() {
                    self.artifact = cx.artifact;
                }
                true
            }
            Ok(Err(CompilerError::PassFailed(name))) => {
                tracing::debug!(pass = %name, "pipeline failed");
                false
            }
            Ok(Err(e)) => {
                context.emit_error(module.location().clone(), e.to_string());
                false
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let location = module.location().clone();
                let written = match (self.crash_handler.as_mut(), snapshot) {
                    (Some(handler), Some(snapshot)) => {
                        let text = kiln_ir::print_module(&snapshot, &PrintingFlags::generic());
                        write_reproducer(handler, &text)
                    }
                    _ => None,
                };
                let note = match written {
                    Some(path) => format!("; reproducer written to {}", path),
                    None => String::new(),
                };
                context.emit_error(location, format!("compiler crashed: {}{}", message, note));
                false
            }
        }
    }

    /// Print the current module.
    pub fn output_ir(&self, output: &mut Output) -> Result<()> {
        let module = self
            .module
            .as_ref()
            .ok_or_else(|| CompilerError::InvalidState("no module has been imported".to_string()))?;
        output.write(kiln_ir::print_module(module, &PrintingFlags::default()).as_bytes())?;
        output.flush()
    }

    /// Write the VM bytecode produced by the last successful pipeline run.
    pub fn output_vm_bytecode(&self, output: &mut Output) -> Result<()> {
        let artifact = self.artifact.as_ref().ok_or_else(|| {
            CompilerError::InvalidState(
                "module has not been compiled to VM bytecode".to_string(),
            )
        })?;
        output.write(artifact)?;
        output.flush()
    }
}

fn write_reproducer(handler: &mut CrashHandler, text: &str) -> Option<String> {
    let mut output = match handler() {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("failed to open crash reproducer output: {}", e);
            return None;
        }
    };
    output.keep();
    if let Err(e) = output.write(text.as_bytes()).and_then(|()| output.flush()) {
        tracing::error!("failed to write crash reproducer: {}", e);
        return None;
    }
    Some(
        output
            .path()
            .map_or_else(|| "memory".to_string(), |p| p.display().to_string()),
    )
}

impl Drop for Invocation<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.diagnostic_handler.take() {
            self.session.context().detach_diagnostic_handler(id);
        }
    }
}

impl std::fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("has_module", &self.module.is_some())
            .field("has_artifact", &self.artifact.is_some())
            .finish_non_exhaustive()
    }
}
