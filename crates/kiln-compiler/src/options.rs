//! Command-line style compiler flags.

use crate::{CompilerError, Result};
use std::fmt;

/// Target backends the compiler can emit executables for.
pub const KNOWN_TARGET_BACKENDS: &[&str] = &["llvm-cpu", "vmvx"];

/// Dialect family accepted as pipeline input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputType {
    /// Only core dialects; input dialect operations are rejected.
    #[default]
    None,
    Onnx,
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputType::None => "none",
            InputType::Onnx => "onnx",
        })
    }
}

/// Options set through [`crate::Session::set_flags`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilerOptions {
    pub target_backends: Vec<String>,
    pub input_type: InputType,
    pub print_ir_after_all: bool,
}

fn parse_bool(flag: &str, value: Option<&str>) -> Result<bool> {
    match value {
        None | Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(CompilerError::InvalidFlagValue {
            flag: flag.to_string(),
            value: other.to_string(),
        }),
    }
}

impl CompilerOptions {
    /// Apply one `--name=value` flag.
    pub fn apply_flag(&mut self, flag: &str) -> Result<()> {
        let Some(body) = flag.strip_prefix("--") else {
            return Err(CompilerError::UnknownFlag(flag.to_string()));
        };
        let (name, value) = match body.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (body, None),
        };
        let invalid = |value: &str| CompilerError::InvalidFlagValue {
            flag: name.to_string(),
            value: value.to_string(),
        };

        match name {
            "kiln-hal-target-backends" => {
                let value = value.unwrap_or("");
                let backends: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .map(str::to_string)
                    .collect();
                if backends.is_empty() {
                    return Err(invalid(value));
                }
                if let Some(unknown) = backends
                    .iter()
                    .find(|b| !KNOWN_TARGET_BACKENDS.contains(&b.as_str()))
                {
                    return Err(invalid(unknown));
                }
                self.target_backends = backends;
            }
            "kiln-input-type" => {
                self.input_type = match value {
                    Some("onnx") => InputType::Onnx,
                    Some("none") => InputType::None,
                    other => return Err(invalid(other.unwrap_or(""))),
                };
            }
            "kiln-print-ir-after-all" => {
                self.print_ir_after_all = parse_bool(name, value)?;
            }
            _ => return Err(CompilerError::UnknownFlag(flag.to_string())),
        }
        tracing::trace!(flag, "applied compiler flag");
        Ok(())
    }

    /// The options rendered back as flags.
    pub fn to_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if !self.target_backends.is_empty() {
            flags.push(format!(
                "--kiln-hal-target-backends={}",
                self.target_backends.join(",")
            ));
        }
        flags.push(format!("--kiln-input-type={}", self.input_type));
        flags.push(format!(
            "--kiln-print-ir-after-all={}",
            self.print_ir_after_all
        ));
        flags
    }
}
