use crate::Result;
use crate::pass::{Pass, PassContext, Stage};
use kiln_ir::{Function, Module};

/// Forwards `onnx.Identity` operands to their users and erases operations
/// whose results are unused.
pub struct CanonicalizePass;

fn forward_identities(function: &mut Function) -> bool {
    let forwards: Vec<_> = function
        .operations()
        .iter()
        .filter(|op| op.name() == "onnx.Identity" && op.operands().len() == 1)
        .filter_map(|op| Some((op.result(0)?, op.operands()[0])))
        .collect();

    for &(result, source) in &forwards {
        function.replace_all_uses_with(result, source);
    }
    !forwards.is_empty()
}

fn erase_dead_operations(function: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let dead: Vec<_> = function
            .operations()
            .iter()
            .filter(|op| op.name() != "func.return")
            .filter(|op| op.results().iter().all(|&r| !function.has_uses(r)))
            .flat_map(|op| op.results().to_vec())
            .collect();
        let before = function.operations().len();
        function.retain_operations(|op| {
            op.name() == "func.return" || !op.results().iter().all(|r| dead.contains(r))
        });
        if function.operations().len() == before {
            return changed;
        }
        changed = true;
    }
}

impl Pass for CanonicalizePass {
    fn name(&self) -> &str {
        "canonicalize"
    }

    fn stage(&self) -> Stage {
        Stage::Canonicalization
    }

    fn run(&self, module: &mut Module, _cx: &mut PassContext<'_>) -> Result<bool> {
        let mut changed = false;
        for function in module.functions_mut() {
            changed |= forward_identities(function);
            changed |= erase_dead_operations(function);
        }
        Ok(changed)
    }
}
