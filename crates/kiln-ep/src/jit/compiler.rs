//! Compiler session and invocation wrappers.
//!
//! A [`CompilerSession`] owns the engine session and its flags. A
//! [`CompilerInvocation`] owns one module: every subgraph is imported into it
//! as a function, the module is compiled once and written to a
//! [`CompilerOutput`].

use super::importer::{self, ImportError};
use crate::rt::DisposeCallback;
use crate::{EpError, Result};
use kiln_compiler::{Invocation, Output, Pipeline};
use kiln_ir::{Context, DialectRegistry, Location, Module, PrintingFlags, Severity};
use kiln_onnx::GraphView;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A diagnostic reported by the compiler during one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticRecord {
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

type DiagnosticLog = Arc<Mutex<Vec<DiagnosticRecord>>>;

// ──────────────────────────────── Session ────────────────────────────────

/// Dialects every import produces operations or types from.
const REQUIRED_DIALECTS: [&str; 3] = ["builtin", "func", "onnx"];

pub struct CompilerSession {
    session: kiln_compiler::Session,
    reproducer_path: PathBuf,
}

impl CompilerSession {
    /// Create a session over the dialects of this compiler build.
    pub fn new() -> Result<Self> {
        Self::with_dialects(kiln_compiler::default_registry())
    }

    /// Create a session over a specific set of dialects.
    pub fn with_dialects(registry: DialectRegistry) -> Result<Self> {
        kiln_compiler::global_initialize();
        let session = kiln_compiler::Session::with_registry(registry)
            .map_err(|e| EpError::compiler("Failed to create compiler session: ", e))?;
        Ok(Self {
            session,
            reproducer_path: std::env::temp_dir().join("kiln_reproducer.mlir"),
        })
    }

    /// Where invocations created afterwards write crash reproducers.
    pub fn set_reproducer_path(&mut self, path: impl Into<PathBuf>) {
        self.reproducer_path = path.into();
    }

    pub fn reproducer_path(&self) -> &Path {
        &self.reproducer_path
    }

    pub fn context(&self) -> &Arc<Context> {
        self.session.context()
    }

    /// Load the dialects imported IR uses and select ONNX input.
    pub fn initialize(&mut self) -> Result<()> {
        for namespace in REQUIRED_DIALECTS {
            if self.context().get_or_load_dialect(namespace).is_some() {
                continue;
            }
            let mut message = format!("Dialect '{}' not registered in the kiln compiler", namespace);
            if namespace == "onnx" {
                message.push_str(" (this could mean that kiln was not built with ONNX input support)");
            }
            return Err(EpError::CapabilityMismatch(message));
        }
        self.set_flag("--kiln-input-type=onnx")
    }

    /// Apply one global compiler flag.
    pub fn set_flag(&mut self, flag: &str) -> Result<()> {
        self.session
            .set_flags([flag])
            .map_err(|e| EpError::compiler("Error setting compiler flag: ", e))
    }

    pub fn flags(&self) -> Vec<String> {
        self.session.get_flags()
    }
}

impl fmt::Debug for CompilerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerSession")
            .field("flags", &self.flags())
            .field("reproducer_path", &self.reproducer_path)
            .finish()
    }
}

// ──────────────────────────────── Output ────────────────────────────────

/// Owned destination of a compiled artifact.
#[derive(Debug)]
pub struct CompilerOutput {
    output: Output,
}

impl CompilerOutput {
    pub fn open_membuffer() -> Self {
        Self {
            output: Output::open_membuffer(),
        }
    }

    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        let output = Output::open_file(path)
            .map_err(|e| EpError::compiler("Failure opening compiler output: ", e))?;
        Ok(Self { output })
    }

    /// Artifact bytes of a memory buffer output.
    pub fn map_memory(&self) -> Result<&[u8]> {
        self.output
            .map_memory()
            .map_err(|e| EpError::compiler("Failed to map compiler output memory: ", e))
    }

    /// Path of a file output.
    pub fn path(&self) -> Option<&Path> {
        self.output.path()
    }

    /// Keep a file output on disk after the output is destroyed.
    pub fn keep(&mut self) {
        self.output.keep();
    }

    /// Give up ownership. The output is destroyed when the returned callback
    /// runs.
    pub fn release(self) -> DisposeCallback {
        let output = self.output;
        Box::new(move || {
            tracing::trace!(?output, "releasing compiler output");
            drop(output);
        })
    }
}

// ──────────────────────────────── Invocation ────────────────────────────────

/// One compilation unit of a [`CompilerSession`].
pub struct CompilerInvocation<'s> {
    session: &'s CompilerSession,
    inv: Invocation<'s>,
    diagnostics: DiagnosticLog,
}

impl<'s> CompilerInvocation<'s> {
    /// Create an invocation owning an empty module named `module_name`.
    pub fn new(session: &'s CompilerSession, module_name: &str) -> Result<Self> {
        let mut inv = Invocation::new(&session.session);

        let diagnostics = DiagnosticLog::default();
        let sink = diagnostics.clone();
        inv.enable_callback_diagnostics(move |d| {
            let message = match &d.location {
                Location::Unknown => d.message.clone(),
                location => format!("{}: {}", location, d.message),
            };
            let record = DiagnosticRecord {
                severity: d.severity,
                message,
            };
            tracing::debug!("{}", record);
            sink.lock().unwrap_or_else(|e| e.into_inner()).push(record);
        })
        .map_err(|e| EpError::compiler("Failed to enable compiler diagnostics: ", e))?;

        let reproducer_path = session.reproducer_path.clone();
        inv.set_crash_handler(move || {
            tracing::error!(
                "kiln compiler crash. Writing reproducer to: {}",
                reproducer_path.display()
            );
            Output::open_file(&reproducer_path)
        })
        .map_err(|e| EpError::compiler("Failed to set compiler crash handler: ", e))?;

        // Callbacks must be in place before this: the module belongs to the
        // invocation from here on.
        let mut module = Module::new(Location::Unknown);
        module.set_sym_name(module_name);
        inv.import_steal_module(module)
            .map_err(|e| EpError::compiler("Failed to import module: ", e))?;

        Ok(Self {
            session,
            inv,
            diagnostics,
        })
    }

    /// Import `view` as the function `func_name` of this invocation's module.
    #[tracing::instrument(skip_all, fields(function = func_name))]
    pub fn import_subgraph(&mut self, view: &GraphView<'_>, func_name: &str) -> Result<()> {
        let context = self.session.context().clone();
        let module = self
            .inv
            .module_mut()
            .ok_or_else(|| EpError::InvalidGraph("Invocation has no module".to_string()))?;

        match importer::import_subgraph(&context, module, view, func_name) {
            Ok(()) => Ok(()),
            Err(ImportError::Model(message)) => Err(EpError::InvalidGraph(message)),
            Err(ImportError::DefineFunction(message)) => Err(EpError::InvalidGraph(format!(
                "Failed to define entry function for graph: {}{}",
                message,
                self.consume_diagnostics()
            ))),
            Err(ImportError::ImportNodes(message)) => Err(EpError::InvalidGraph(format!(
                "Failed to import nodes: {}{}",
                message,
                self.consume_diagnostics()
            ))),
            Err(ImportError::Verification(function)) => Err(EpError::InvalidGraph(format!(
                "Imported ONNX IR failed to verify.{}\nUnverified IR:\n{}",
                self.consume_diagnostics(),
                kiln_ir::print_function(&function, &PrintingFlags::generic())
            ))),
        }
    }

    /// Run the standard pipeline and write VM bytecode to `output`.
    #[tracing::instrument(skip_all)]
    pub fn compile_and_output_artifact(&mut self, output: &mut CompilerOutput) -> Result<()> {
        if !self.inv.run_pipeline(Pipeline::Std) {
            return Err(EpError::Compilation(format!(
                "compilation error.{}",
                self.consume_diagnostics()
            )));
        }
        self.inv
            .output_vm_bytecode(&mut output.output)
            .map_err(|e| EpError::compiler("Failure emitting VM bytecode: ", e))
    }

    /// Print the module in its current state.
    pub fn module_ir(&self) -> Option<String> {
        self.inv
            .module()
            .map(|m| kiln_ir::print_module(m, &PrintingFlags::default()))
    }

    /// Drain collected diagnostics into one string. Empty if there were none.
    pub fn consume_diagnostics(&self) -> String {
        let mut diagnostics = self.diagnostics.lock().unwrap_or_else(|e| e.into_inner());
        if diagnostics.is_empty() {
            return String::new();
        }
        let mut accum = String::from("\nDiagnostics:");
        for record in diagnostics.drain(..) {
            accum.push_str("\n  ");
            accum.push_str(&record.to_string());
        }
        accum
    }
}

impl fmt::Debug for CompilerInvocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerInvocation")
            .field("inv", &self.inv)
            .finish_non_exhaustive()
    }
}
