//! Nil-check lowering.

use inkwell::builder::BuilderError;
use inkwell::values::{BasicValue, BasicValueEnum};
use inkwell::IntPredicate;
use log::debug;

use super::Optimizer;
use crate::ir;
use crate::runtime::functions;

impl<'a, 'ctx> Optimizer<'a, 'ctx> {
    /// Lower `runtime.isnil` calls to plain null comparisons.
    ///
    /// The front-end emits nil checks through an opaque runtime call so that
    /// earlier passes cannot judge pointers by them; once the rewrites that
    /// care have run, each becomes an `icmp eq` against the typed null. A
    /// leading bitcast to `i8*` is stripped so the comparison happens on the
    /// original pointer type.
    pub fn lower_isnil(&self) -> Result<(), BuilderError> {
        let isnil = match self.module.get_function(functions::IS_NIL) {
            Some(function) => function,
            None => return Ok(()),
        };

        for site in ir::call_sites_of(isnil) {
            let (call, call_value) = match (site.inst, site.value) {
                (Some(inst), Some(value)) => (inst, value),
                _ => continue,
            };
            let operand = call
                .get_operand(0)
                .and_then(|operand| operand.left())
                .expect("nil check without a pointer operand");
            let pointer = match ir::strip_bitcast(operand) {
                BasicValueEnum::PointerValue(pointer) => pointer,
                other => panic!("nil check on a non-pointer value: {other:?}"),
            };

            self.builder.position_before(&call);
            let null = pointer.get_type().const_null();
            let is_null = self
                .builder
                .build_int_compare(IntPredicate::EQ, pointer, null, "")?;

            ir::replace_all_uses(call_value, is_null.as_basic_value_enum());
            call.erase_from_basic_block();
            debug!("lowered a nil check to a null comparison");
        }
        Ok(())
    }
}
