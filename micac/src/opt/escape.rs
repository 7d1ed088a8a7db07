//! Escape and read-only analyses.
//!
//! Both are recursive predicates over the SSA use graph. A value escapes its
//! function when it may be observed after the function returns, directly or
//! through a captured reference; a pointer is read-only when nothing ever
//! writes through it. The allocation rewrite uses the first to move small
//! heap objects to the stack, the string rewrite uses the second to hand out
//! constant string memory as byte-slice storage.
//!
//! Def-use edges over the scanned instruction kinds form a DAG (phi nodes are
//! never recursed into), so plain recursion terminates without memoization.
//! Both predicates lean on the `nocapture`/`readonly` parameter attributes,
//! so they are only as good as the most recent function-attrs run.

use inkwell::module::Module;
use inkwell::values::{BasicValueEnum, InstructionOpcode};
use log::trace;

use crate::ir;

/// Whether `value` may be observed after its defining function returns.
///
/// Conservative: any use this cannot classify counts as an escape.
pub fn does_escape<'ctx>(module: &Module<'ctx>, value: BasicValueEnum<'ctx>) -> bool {
    for site in ir::uses_of(value) {
        let inst = match site.inst {
            Some(inst) => inst,
            // A constant-expression user; no telling where that ends up.
            None => return true,
        };
        match inst.get_opcode() {
            InstructionOpcode::GetElementPtr | InstructionOpcode::BitCast => {
                // The derived pointer aliases the original.
                match site.value {
                    Some(derived) if !does_escape(module, derived) => {}
                    _ => return true,
                }
            }
            InstructionOpcode::Load => {}
            InstructionOpcode::Store => {
                // Storing the value itself publishes it; storing through it
                // does not.
                if inst.get_operand(0).and_then(|operand| operand.left()) == Some(value) {
                    return true;
                }
            }
            InstructionOpcode::Call => {
                if !ir::has_param_flag(module, inst, value, "nocapture") {
                    return true;
                }
            }
            // Pointer comparisons, typically compiler-inserted nil checks.
            InstructionOpcode::ICmp => {}
            opcode => {
                trace!("escape: unhandled use {opcode:?}, assuming escape");
                return true;
            }
        }
    }
    false
}

/// Whether nothing ever stores through the pointer `value`.
pub fn is_read_only<'ctx>(module: &Module<'ctx>, value: BasicValueEnum<'ctx>) -> bool {
    for site in ir::uses_of(value) {
        let inst = match site.inst {
            Some(inst) => inst,
            None => return false,
        };
        match inst.get_opcode() {
            InstructionOpcode::GetElementPtr => match site.value {
                Some(derived) if is_read_only(module, derived) => {}
                _ => return false,
            },
            InstructionOpcode::Call => {
                if !ir::has_param_flag(module, inst, value, "readonly") {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell::attributes::{Attribute, AttributeLoc};
    use inkwell::builder::Builder;
    use inkwell::context::Context;
    use inkwell::values::{FunctionValue, PointerValue};
    use inkwell::AddressSpace;

    /// A `main(i8* %p)` body to hang uses off; returns the builder positioned
    /// in the entry block and the pointer parameter.
    fn pointer_fixture<'ctx>(
        context: &'ctx Context,
        module: &inkwell::module::Module<'ctx>,
    ) -> (Builder<'ctx>, FunctionValue<'ctx>, PointerValue<'ctx>) {
        let i8_ptr = context.i8_type().ptr_type(AddressSpace::default());
        let main = module.add_function(
            "main",
            context.void_type().fn_type(&[i8_ptr.into()], false),
            None,
        );
        let entry = context.append_basic_block(main, "entry");
        let builder = context.create_builder();
        builder.position_at_end(entry);
        let pointer = main.get_nth_param(0).unwrap().into_pointer_value();
        (builder, main, pointer)
    }

    #[test]
    fn loads_and_compares_do_not_escape() {
        let context = Context::create();
        let module = context.create_module("escape");
        let (builder, _, pointer) = pointer_fixture(&context, &module);

        builder.build_load(pointer, "value").unwrap();
        let null = context.i8_type().ptr_type(AddressSpace::default()).const_null();
        builder
            .build_int_compare(inkwell::IntPredicate::EQ, pointer, null, "isnull")
            .unwrap();
        builder.build_return(None).unwrap();

        assert!(!does_escape(&module, pointer.into()));
    }

    #[test]
    fn storing_the_value_escapes_storing_through_it_does_not() {
        let context = Context::create();
        let module = context.create_module("escape");
        let (builder, _, pointer) = pointer_fixture(&context, &module);

        // *p = 1 writes through the pointer, fine.
        builder
            .build_store(pointer, context.i8_type().const_int(1, false))
            .unwrap();
        builder.build_return(None).unwrap();
        assert!(!does_escape(&module, pointer.into()));

        // slot = p publishes the pointer itself.
        let i8_ptr = context.i8_type().ptr_type(AddressSpace::default());
        let slot = module.add_global(i8_ptr, Some(AddressSpace::default()), "slot");
        slot.set_initializer(&i8_ptr.const_null());
        let last = module
            .get_function("main")
            .unwrap()
            .get_first_basic_block()
            .unwrap()
            .get_last_instruction()
            .unwrap();
        builder.position_before(&last);
        builder.build_store(slot.as_pointer_value(), pointer).unwrap();
        assert!(does_escape(&module, pointer.into()));
    }

    #[test]
    fn calls_escape_unless_nocapture() {
        let context = Context::create();
        let module = context.create_module("escape");
        let i8_ptr = context.i8_type().ptr_type(AddressSpace::default());
        let sink = module.add_function(
            "sink",
            context.void_type().fn_type(&[i8_ptr.into()], false),
            None,
        );

        let (builder, _, pointer) = pointer_fixture(&context, &module);
        builder.build_call(sink, &[pointer.into()], "").unwrap();
        builder.build_return(None).unwrap();

        assert!(does_escape(&module, pointer.into()));

        let nocapture =
            context.create_enum_attribute(Attribute::get_named_enum_kind_id("nocapture"), 0);
        sink.add_attribute(AttributeLoc::Param(0), nocapture);
        assert!(!does_escape(&module, pointer.into()));
    }

    #[test]
    fn bitcasts_alias_the_original_pointer() {
        let context = Context::create();
        let module = context.create_module("escape");
        let i32_ptr = context.i32_type().ptr_type(AddressSpace::default());
        let (builder, _, pointer) = pointer_fixture(&context, &module);

        let typed = builder
            .build_bitcast(pointer, i32_ptr, "typed")
            .unwrap()
            .into_pointer_value();
        builder
            .build_store(typed, context.i32_type().const_int(1, false))
            .unwrap();
        builder.build_return(None).unwrap();
        assert!(!does_escape(&module, pointer.into()));

        let slot = module.add_global(i32_ptr, Some(AddressSpace::default()), "slot");
        slot.set_initializer(&i32_ptr.const_null());
        let last = module
            .get_function("main")
            .unwrap()
            .get_first_basic_block()
            .unwrap()
            .get_last_instruction()
            .unwrap();
        builder.position_before(&last);
        builder.build_store(slot.as_pointer_value(), typed).unwrap();
        assert!(does_escape(&module, pointer.into()));
    }

    #[test]
    fn escape_propagates_through_element_pointers() {
        let context = Context::create();
        let module = context.create_module("escape");
        let i8_ptr = context.i8_type().ptr_type(AddressSpace::default());
        let (builder, _, pointer) = pointer_fixture(&context, &module);

        let element = unsafe {
            builder
                .build_gep(
                    pointer,
                    &[context.i32_type().const_int(1, false)],
                    "element",
                )
                .unwrap()
        };
        builder.build_load(element, "value").unwrap();
        builder.build_return(None).unwrap();
        assert!(!does_escape(&module, pointer.into()));

        // Publishing the derived pointer escapes the original too.
        let slot = module.add_global(i8_ptr, Some(AddressSpace::default()), "slot");
        slot.set_initializer(&i8_ptr.const_null());
        let last = module
            .get_function("main")
            .unwrap()
            .get_first_basic_block()
            .unwrap()
            .get_last_instruction()
            .unwrap();
        builder.position_before(&last);
        builder.build_store(slot.as_pointer_value(), element).unwrap();
        assert!(does_escape(&module, pointer.into()));
    }

    #[test]
    fn unknown_uses_escape() {
        let context = Context::create();
        let module = context.create_module("escape");
        let (builder, _, pointer) = pointer_fixture(&context, &module);

        builder
            .build_ptr_to_int(pointer, context.i64_type(), "address")
            .unwrap();
        builder.build_return(None).unwrap();

        assert!(does_escape(&module, pointer.into()));
    }

    #[test]
    fn read_only_requires_readonly_at_calls() {
        let context = Context::create();
        let module = context.create_module("readonly");
        let i8_ptr = context.i8_type().ptr_type(AddressSpace::default());
        let writer = module.add_function(
            "writer",
            context.void_type().fn_type(&[i8_ptr.into()], false),
            None,
        );

        let (builder, _, pointer) = pointer_fixture(&context, &module);
        builder.build_call(writer, &[pointer.into()], "").unwrap();
        builder.build_return(None).unwrap();

        assert!(!is_read_only(&module, pointer.into()));

        let readonly =
            context.create_enum_attribute(Attribute::get_named_enum_kind_id("readonly"), 0);
        writer.add_attribute(AttributeLoc::Param(0), readonly);
        assert!(is_read_only(&module, pointer.into()));
    }

    #[test]
    fn read_only_rejects_direct_stores_and_loads() {
        let context = Context::create();
        let module = context.create_module("readonly");
        let (builder, _, pointer) = pointer_fixture(&context, &module);

        // Even a load is outside the accepted shape; only GEPs and readonly
        // calls qualify.
        builder.build_load(pointer, "value").unwrap();
        builder.build_return(None).unwrap();

        assert!(!is_read_only(&module, pointer.into()));
    }
}
