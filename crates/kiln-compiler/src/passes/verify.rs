use crate::pass::{Pass, PassContext, Stage};
use crate::{CompilerError, Result};
use kiln_ir::Module;

/// Runs the structural verifier over every function.
pub struct VerifyPass;

impl Pass for VerifyPass {
    fn name(&self) -> &str {
        "verify"
    }

    fn stage(&self) -> Stage {
        Stage::Verification
    }

    fn run(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool> {
        kiln_ir::verify_module(cx.context, module)
            .map_err(|_| CompilerError::PassFailed(self.name().to_string()))?;
        Ok(false)
    }
}
