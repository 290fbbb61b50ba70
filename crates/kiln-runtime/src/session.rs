//! Sessions: loaded modules bound to one device.

use crate::hal::{Allocator, Device};
use crate::instance::Instance;
use crate::{Result, RuntimeError};
use kiln_bytecode::ModuleDef;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Check arguments against function signatures before invoking.
    pub validate_arguments: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            validate_arguments: true,
        }
    }
}

/// A resolved function: its module and index within it.
#[derive(Debug, Clone)]
pub(crate) struct FunctionRef {
    pub module: Arc<ModuleDef>,
    pub index: usize,
}

#[derive(Debug)]
pub struct Session {
    device: Arc<dyn Device>,
    options: SessionOptions,
    modules: Vec<Arc<ModuleDef>>,
}

impl Session {
    pub fn create_with_device(
        _instance: &Instance,
        options: SessionOptions,
        device: Arc<dyn Device>,
    ) -> Result<Self> {
        tracing::debug!(device = device.id(), "created runtime session");
        Ok(Self {
            device,
            options,
            modules: Vec::new(),
        })
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn device_allocator(&self) -> &Allocator {
        self.device.allocator()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleDef> {
        self.modules.iter().map(|m| m.as_ref())
    }

    /// Decode a bytecode module from memory and register it.
    ///
    /// The bytes are copied; the caller may release them once this returns.
    #[tracing::instrument(skip_all, fields(bytes = bytes.len()))]
    pub fn append_bytecode_module_from_memory(&mut self, bytes: &[u8]) -> Result<()> {
        let module = kiln_bytecode::decode(bytes)?;
        self.append_module(module)
    }

    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn append_bytecode_module_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                RuntimeError::NotFound(format!("module file {} does not exist", path.display()))
            }
            _ => RuntimeError::Io(e),
        })?;
        let module = kiln_bytecode::decode(&bytes)?;
        self.append_module(module)
    }

    fn append_module(&mut self, module: ModuleDef) -> Result<()> {
        let capabilities = self.device.capabilities();
        if !module
            .target_formats
            .iter()
            .any(|f| capabilities.supports_format(f))
        {
            return Err(RuntimeError::FailedPrecondition(format!(
                "module '{}' targets {:?} but device '{}' only runs {:?}",
                module.name,
                module.target_formats,
                self.device.id(),
                capabilities.executable_formats
            )));
        }
        if self.modules.iter().any(|m| m.name == module.name) {
            return Err(RuntimeError::AlreadyExists(format!(
                "module '{}' is already loaded",
                module.name
            )));
        }
        tracing::debug!(
            module = %module.name,
            functions = module.functions.len(),
            "loaded module"
        );
        self.modules.push(Arc::new(module));
        Ok(())
    }

    /// Resolve a fully qualified `module.function` name.
    pub(crate) fn lookup_function(&self, qualified_name: &str) -> Result<FunctionRef> {
        let not_found =
            || RuntimeError::NotFound(format!("function '{}' not found", qualified_name));
        let (module_name, function_name) = qualified_name.split_once('.').ok_or_else(not_found)?;
        self.modules
            .iter()
            .filter(|m| m.name == module_name)
            .find_map(|m| {
                m.functions
                    .iter()
                    .position(|f| f.name == function_name)
                    .map(|index| FunctionRef {
                        module: m.clone(),
                        index,
                    })
            })
            .ok_or_else(not_found)
    }
}
