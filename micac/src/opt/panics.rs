//! Panic-to-trap replacement for the abort strategy.

use inkwell::builder::BuilderError;
use log::debug;

use super::Optimizer;
use crate::ir;
use crate::runtime::functions;

impl<'a, 'ctx> Optimizer<'a, 'ctx> {
    /// Insert a `llvm.trap` call before every panic call.
    ///
    /// The panic calls themselves become unreachable and are cleaned up by
    /// the following DCE runs. `llvm.trap` must already be declared in the
    /// module; a panic function use that is not a direct call means the IR is
    /// corrupt, and both are programmer errors.
    pub fn replace_panics_with_trap(&self) -> Result<(), BuilderError> {
        let trap = self
            .module
            .get_function(functions::LLVM_TRAP)
            .expect("llvm.trap must be declared before panics can be replaced");

        for name in [functions::PANIC, functions::RUNTIME_PANIC] {
            let function = match self.module.get_function(name) {
                Some(function) => function,
                None => continue,
            };
            for site in ir::function_uses(function) {
                let call = match site.inst {
                    Some(inst) if ir::is_call_to(inst, function) => inst,
                    _ => panic!("expected every use of {name} to be a direct call"),
                };
                self.builder.position_before(&call);
                self.builder.build_call(trap, &[], "")?;
                debug!("inserted trap before {name} call");
            }
        }
        Ok(())
    }
}
