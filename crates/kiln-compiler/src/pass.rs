//! Pass trait, stages and pipelines.

use crate::Result;
use crate::options::CompilerOptions;
use crate::passes::{
    CanonicalizePass, LegalizeInputPass, LowerToVmPass, SerializePass, VerifyPass,
};
use kiln_bytecode::ModuleDef;
use kiln_ir::{Context, Module};

/// Compilation stage for organizing passes.
///
/// Passes run sorted by stage; within a stage they keep their registration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Structural checks on the incoming module.
    Verification,

    /// Check that input dialects are accepted by the configured input type.
    Input,

    /// Local simplifications (forwarding, dead code removal).
    Canonicalization,

    /// Translate operations to VM instructions.
    Lowering,

    /// Encode the lowered module.
    Serialization,
}

/// State shared between the passes of one pipeline run.
pub struct PassContext<'a> {
    pub context: &'a Context,
    pub options: &'a CompilerOptions,
    /// Produced by the lowering stage.
    pub lowered: Option<ModuleDef>,
    /// Produced by the serialization stage.
    pub artifact: Option<Vec<u8>>,
}

/// A module transformation that runs during a specific stage.
///
/// `run` returns `Ok(true)` if the module changed. Passes report problems as
/// diagnostics through the context and then fail with
/// [`crate::CompilerError::PassFailed`].
pub trait Pass: Send + Sync {
    fn name(&self) -> &str;

    fn stage(&self) -> Stage;

    fn run(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool>;
}

/// Predefined pass pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// Full compilation down to VM bytecode.
    Std,
    /// Input checks and canonicalization only.
    Precompile,
}

impl Pipeline {
    pub fn passes(self) -> Vec<Box<dyn Pass>> {
        let mut passes: Vec<Box<dyn Pass>> = vec![
            Box::new(VerifyPass),
            Box::new(LegalizeInputPass),
            Box::new(CanonicalizePass),
        ];
        if self == Pipeline::Std {
            passes.push(Box::new(LowerToVmPass));
            passes.push(Box::new(SerializePass));
        }
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoOpPass;

    impl Pass for NoOpPass {
        fn name(&self) -> &str {
            "noop"
        }

        fn stage(&self) -> Stage {
            Stage::Canonicalization
        }

        fn run(&self, _module: &mut Module, _cx: &mut PassContext<'_>) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::Verification < Stage::Input);
        assert!(Stage::Input < Stage::Canonicalization);
        assert!(Stage::Canonicalization < Stage::Lowering);
        assert!(Stage::Lowering < Stage::Serialization);
    }

    #[test]
    fn test_noop_pass() {
        let ctx = Context::new(kiln_ir::DialectRegistry::new());
        let options = CompilerOptions::default();
        let mut cx = PassContext {
            context: &ctx,
            options: &options,
            lowered: None,
            artifact: None,
        };
        let mut module = Module::default();
        assert!(!NoOpPass.run(&mut module, &mut cx).unwrap());
    }

    #[test]
    fn test_pipeline_passes() {
        let names: Vec<String> = Pipeline::Std
            .passes()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["verify", "legalize-input", "canonicalize", "lower-to-vm", "serialize"]
        );
        assert_eq!(Pipeline::Precompile.passes().len(), 3);
    }
}
