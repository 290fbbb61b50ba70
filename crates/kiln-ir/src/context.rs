//! IR context: dialect registry, loaded dialects and diagnostic routing.

use crate::ops::Location;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

// ──────────────────────────────── Dialects ────────────────────────────────

/// Number of operands or results an operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == *n,
            Arity::AtLeast(n) => count >= *n,
            Arity::Any => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "{}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Any => f.write_str("any number of"),
        }
    }
}

/// Definition of a registered operation.
#[derive(Debug, Clone)]
pub struct OpDef {
    /// Operation name without the dialect prefix.
    pub name: String,
    pub operands: Arity,
    pub results: Arity,
    /// Terminators end a function body.
    pub terminator: bool,
}

impl OpDef {
    pub fn new(name: impl Into<String>, operands: Arity, results: Arity) -> Self {
        Self {
            name: name.into(),
            operands,
            results,
            terminator: false,
        }
    }

    pub fn terminator(mut self) -> Self {
        self.terminator = true;
        self
    }
}

/// A namespace of operations.
///
/// Open dialects accept any operation name in their namespace; registered
/// definitions still constrain the operations they name.
#[derive(Debug, Clone)]
pub struct Dialect {
    namespace: String,
    ops: HashMap<String, OpDef>,
    open: bool,
}

impl Dialect {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ops: HashMap::new(),
            open: false,
        }
    }

    /// Mark the dialect as accepting unregistered operation names.
    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    pub fn with_op(mut self, def: OpDef) -> Self {
        self.ops.insert(def.name.clone(), def);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Definition of `name` (without the namespace prefix).
    pub fn op(&self, name: &str) -> Option<&OpDef> {
        self.ops.get(name)
    }
}

/// The `builtin` dialect: module structure and types, no operations.
pub fn builtin_dialect() -> Dialect {
    Dialect::new("builtin")
}

/// The `func` dialect: function terminators.
pub fn func_dialect() -> Dialect {
    Dialect::new("func").with_op(OpDef::new("return", Arity::Any, Arity::Exactly(0)).terminator())
}

/// Dialects available for loading into a [`Context`].
#[derive(Debug, Clone)]
pub struct DialectRegistry {
    dialects: HashMap<String, Arc<Dialect>>,
}

impl DialectRegistry {
    /// Registry with the `builtin` and `func` dialects.
    pub fn new() -> Self {
        Self::empty()
            .with(builtin_dialect())
            .with(func_dialect())
    }

    /// Registry with no dialects at all.
    pub fn empty() -> Self {
        Self {
            dialects: HashMap::new(),
        }
    }

    pub fn insert(&mut self, dialect: Dialect) -> &mut Self {
        self.dialects
            .insert(dialect.namespace.clone(), Arc::new(dialect));
        self
    }

    pub fn with(mut self, dialect: Dialect) -> Self {
        self.insert(dialect);
        self
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.dialects.contains_key(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.dialects.keys().map(String::as_str)
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────── Diagnostics ────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Note,
    Remark,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
            Severity::Remark => "remark",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: Location,
    pub message: String,
}

impl Diagnostic {
    pub fn error(location: Location, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            location,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.severity, self.message)
    }
}

/// Handle returned by [`Context::attach_diagnostic_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

// ──────────────────────────────── Context ────────────────────────────────

/// Owns dialect state shared by every module built in it.
///
/// Diagnostics go to the most recently attached handler. With no handler
/// attached they are logged through `tracing`.
pub struct Context {
    registry: DialectRegistry,
    loaded: RwLock<BTreeMap<String, Arc<Dialect>>>,
    handlers: Mutex<Vec<(HandlerId, Handler)>>,
    next_handler: AtomicU64,
}

impl Context {
    pub fn new(registry: DialectRegistry) -> Self {
        Self {
            registry,
            loaded: RwLock::new(BTreeMap::new()),
            handlers: Mutex::new(Vec::new()),
            next_handler: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &DialectRegistry {
        &self.registry
    }

    /// Load a registered dialect, returning `None` if the registry lacks it.
    pub fn get_or_load_dialect(&self, namespace: &str) -> Option<Arc<Dialect>> {
        if let Some(dialect) = self
            .loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(namespace)
        {
            return Some(dialect.clone());
        }

        let dialect = self.registry.dialects.get(namespace)?.clone();
        self.loaded
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(namespace.to_string(), dialect.clone());
        tracing::trace!(dialect = namespace, "loaded dialect");
        Some(dialect)
    }

    /// A dialect that has already been loaded.
    pub fn loaded_dialect(&self, namespace: &str) -> Option<Arc<Dialect>> {
        self.loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(namespace)
            .cloned()
    }

    pub fn loaded_dialects(&self) -> Vec<String> {
        self.loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn attach_diagnostic_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns false if the handler was not attached.
    pub fn detach_diagnostic_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn emit_diagnostic(&self, diagnostic: Diagnostic) {
        // The lock is released before calling out so handlers may re-enter.
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .map(|(_, handler)| handler.clone());

        match handler {
            Some(handler) => handler(&diagnostic),
            None => match diagnostic.severity {
                Severity::Error => tracing::error!("{}", diagnostic),
                Severity::Warning => tracing::warn!("{}", diagnostic),
                Severity::Note | Severity::Remark => tracing::debug!("{}", diagnostic),
            },
        }
    }

    pub fn emit_error(&self, location: Location, message: impl Into<String>) {
        self.emit_diagnostic(Diagnostic::error(location, message));
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("loaded", &self.loaded_dialects())
            .finish_non_exhaustive()
    }
}
