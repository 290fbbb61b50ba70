use crate::pass::{Pass, PassContext, Stage};
use crate::{CompilerError, Result};
use kiln_ir::Module;

/// Encodes the lowered module into its binary form.
pub struct SerializePass;

impl Pass for SerializePass {
    fn name(&self) -> &str {
        "serialize"
    }

    fn stage(&self) -> Stage {
        Stage::Serialization
    }

    fn run(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool> {
        let Some(lowered) = &cx.lowered else {
            cx.context.emit_error(
                module.location().clone(),
                "module has not been lowered to VM instructions",
            );
            return Err(CompilerError::PassFailed(self.name().to_string()));
        };
        let bytes = kiln_bytecode::encode(lowered);
        tracing::debug!(bytes = bytes.len(), "serialized VM module");
        cx.artifact = Some(bytes);
        Ok(false)
    }
}
