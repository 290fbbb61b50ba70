use crate::dialect::ONNX_NAMESPACE;
use crate::options::InputType;
use crate::pass::{Pass, PassContext, Stage};
use crate::{CompilerError, Result};
use kiln_ir::Module;

/// Rejects input-dialect operations the configured input type does not
/// accept.
pub struct LegalizeInputPass;

impl Pass for LegalizeInputPass {
    fn name(&self) -> &str {
        "legalize-input"
    }

    fn stage(&self) -> Stage {
        Stage::Input
    }

    fn run(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool> {
        let mut failed = false;
        for function in module.functions() {
            for op in function.operations() {
                let legal = match op.dialect() {
                    "func" | "builtin" => true,
                    ONNX_NAMESPACE => cx.options.input_type == InputType::Onnx,
                    _ => false,
                };
                if !legal {
                    cx.context.emit_error(
                        op.location().clone(),
                        format!(
                            "'{}' op is not legal for input type '{}'",
                            op.name(),
                            cx.options.input_type
                        ),
                    );
                    failed = true;
                }
            }
        }
        if failed {
            return Err(CompilerError::PassFailed(self.name().to_string()));
        }
        Ok(false)
    }
}
