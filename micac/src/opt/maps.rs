//! Dead-map elimination.

use inkwell::values::{FunctionValue, InstructionValue};
use log::debug;

use super::Optimizer;
use crate::ir;
use crate::runtime::functions;

impl<'a, 'ctx> Optimizer<'a, 'ctx> {
    /// Remove maps that are created and written but never read.
    ///
    /// A map whose only uses are update calls can be dropped together with
    /// the updates. Maps that are created but never modified could in
    /// principle become static allocations; that is not done here.
    pub fn optimize_maps(&self) {
        let hashmap_make = match self.module.get_function(functions::HASHMAP_MAKE) {
            Some(function) => function,
            // Nothing to optimize.
            None => return,
        };

        let binary_set = self.module.get_function(functions::HASHMAP_BINARY_SET);
        let string_set = self.module.get_function(functions::HASHMAP_STRING_SET);
        let is_update = |inst: InstructionValue<'ctx>| {
            let matches_setter =
                |setter: Option<FunctionValue<'ctx>>| setter.map_or(false, |f| ir::is_call_to(inst, f));
            matches_setter(binary_set) || matches_setter(string_set)
        };

        for make_site in ir::call_sites_of(hashmap_make) {
            let (make_inst, make_value) = match (make_site.inst, make_site.value) {
                (Some(inst), Some(value)) => (inst, value),
                _ => continue,
            };

            let mut update_calls = Vec::new();
            // Any use other than setting a value keeps the map alive.
            let mut unknown_uses = false;
            for site in ir::uses_of(make_value) {
                match site.inst {
                    Some(inst) if is_update(inst) => update_calls.push(inst),
                    _ => unknown_uses = true,
                }
            }

            if !unknown_uses {
                for update in update_calls {
                    update.erase_from_basic_block();
                }
                make_inst.erase_from_basic_block();
                debug!("removed a map that was only ever written");
            }
        }
    }
}
