//! Provider options.
//!
//! Options arrive as a flat string map, the way a host session passes them
//! to every provider. [`ProviderConfig`] is the parsed form.

use crate::{EpError, Result};
use std::collections::HashMap;
use std::path::PathBuf;

/// Raw provider options as supplied by the host.
pub type ProviderOptions = HashMap<String, String>;

pub const HAL_TARGET_DEVICE: &str = "hal_target_device";
pub const DEVICE: &str = "device";
pub const MODULE_LOADING: &str = "module_loading";
pub const ARTIFACT_DIR: &str = "artifact_dir";
pub const REPRODUCER_PATH: &str = "reproducer_path";
pub const COMPILER_FLAGS: &str = "compiler_flags";

const KNOWN_KEYS: [&str; 6] = [
    HAL_TARGET_DEVICE,
    DEVICE,
    MODULE_LOADING,
    ARTIFACT_DIR,
    REPRODUCER_PATH,
    COMPILER_FLAGS,
];

/// How compiled artifacts reach the runtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleLoading {
    /// Write the artifact to `artifact_dir` and load it from there.
    #[default]
    File,
    /// Load the artifact straight from the compiler's memory buffer.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Compiler target backend, e.g. `llvm-cpu` or `vmvx`.
    pub hal_target_device: String,
    /// Runtime device identifier, e.g. `local-sync`.
    pub device: String,
    pub module_loading: ModuleLoading,
    pub artifact_dir: PathBuf,
    /// Where a crash reproducer is written if the compiler crashes.
    pub reproducer_path: PathBuf,
    /// Extra compiler flags applied after the target flag.
    pub compiler_flags: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        Self {
            hal_target_device: "llvm-cpu".to_string(),
            device: "local-sync".to_string(),
            module_loading: ModuleLoading::File,
            reproducer_path: temp.join("kiln_reproducer.mlir"),
            artifact_dir: temp,
            compiler_flags: Vec::new(),
        }
    }
}

impl ProviderConfig {
    /// Parse host options. Missing keys take their defaults; unknown keys
    /// are ignored.
    pub fn from_options(options: &ProviderOptions) -> Result<Self> {
        let mut config = Self::default();

        let mut keys: Vec<&String> = options.keys().collect();
        keys.sort();
        for key in keys {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "ignoring unknown provider option");
            }
        }

        if let Some(target) = options.get(HAL_TARGET_DEVICE) {
            config.hal_target_device = target.clone();
        }
        if let Some(device) = options.get(DEVICE) {
            config.device = device.clone();
        }
        if let Some(loading) = options.get(MODULE_LOADING) {
            config.module_loading = match loading.as_str() {
                "file" => ModuleLoading::File,
                "memory" => ModuleLoading::Memory,
                other => {
                    return Err(EpError::InvalidOption {
                        key: MODULE_LOADING.to_string(),
                        message: format!("expected 'file' or 'memory', got '{}'", other),
                    });
                }
            };
        }
        if let Some(dir) = options.get(ARTIFACT_DIR) {
            config.artifact_dir = PathBuf::from(dir);
        }
        if let Some(path) = options.get(REPRODUCER_PATH) {
            config.reproducer_path = PathBuf::from(path);
        }
        if let Some(flags) = options.get(COMPILER_FLAGS) {
            config.compiler_flags = flags.split_whitespace().map(str::to_string).collect();
        }
        Ok(config)
    }

    /// The flag selecting the compiler target backend.
    pub fn device_flag(&self) -> String {
        format!("--kiln-hal-target-backends={}", self.hal_target_device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> ProviderOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::from_options(&ProviderOptions::new()).unwrap();
        assert_eq!(config.device_flag(), "--kiln-hal-target-backends=llvm-cpu");
        assert_eq!(config.device, "local-sync");
        assert_eq!(config.module_loading, ModuleLoading::File);
        assert_eq!(
            config.reproducer_path,
            std::env::temp_dir().join("kiln_reproducer.mlir")
        );
        assert!(config.compiler_flags.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = ProviderConfig::from_options(&options(&[
            (HAL_TARGET_DEVICE, "vmvx"),
            (DEVICE, "local-queued"),
            (MODULE_LOADING, "memory"),
            (COMPILER_FLAGS, " --kiln-print-ir-after-all   --kiln-input-type=onnx "),
            ("not_an_option", "1"),
        ]))
        .unwrap();
        assert_eq!(config.device_flag(), "--kiln-hal-target-backends=vmvx");
        assert_eq!(config.device, "local-queued");
        assert_eq!(config.module_loading, ModuleLoading::Memory);
        assert_eq!(
            config.compiler_flags,
            vec!["--kiln-print-ir-after-all", "--kiln-input-type=onnx"]
        );
    }

    #[test]
    fn test_bad_module_loading() {
        let err = ProviderConfig::from_options(&options(&[(MODULE_LOADING, "mmap")])).unwrap_err();
        assert!(matches!(err, EpError::InvalidOption { .. }));
    }
}
