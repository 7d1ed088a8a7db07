//! Heap-to-stack promotion of runtime allocations.

use inkwell::builder::BuilderError;
use inkwell::values::{BasicValueEnum, InstructionOpcode};
use inkwell::AddressSpace;
use log::debug;

use super::escape;
use super::Optimizer;
use crate::ir;
use crate::runtime::functions;

/// Largest allocation considered for stack promotion, in bytes. A heuristic
/// knob, not a semantic bound.
const MAX_STACK_ALLOC: u64 = 256;

impl<'a, 'ctx> Optimizer<'a, 'ctx> {
    /// Turn small, non-escaping `runtime.alloc` calls into entry-block
    /// allocas.
    ///
    /// The alloca goes at the top of the entry block so a later mem2reg run
    /// can promote scalar objects all the way into registers, and is
    /// zero-initialized because `runtime.alloc` returns zeroed memory.
    pub fn optimize_allocs(&self) -> Result<(), BuilderError> {
        let allocator = match self.module.get_function(functions::ALLOC) {
            Some(function) => function,
            // Nothing to optimize.
            None => return Ok(()),
        };

        for site in ir::call_sites_of(allocator) {
            let (heap_alloc, alloc_value) = match (site.inst, site.value) {
                (Some(inst), Some(value)) => (inst, value),
                _ => continue,
            };

            let size_operand = match heap_alloc.get_operand(0).and_then(|operand| operand.left()) {
                Some(BasicValueEnum::IntValue(size)) => size,
                _ => continue,
            };
            if !size_operand.is_const() {
                // Do not put variable-length objects on the stack.
                continue;
            }
            let size = match size_operand.get_zero_extended_constant() {
                Some(size) if size <= MAX_STACK_ALLOC => size,
                _ => continue,
            };

            // The usual shape is alloc -> bitcast to the object type -> uses,
            // but the bitcast is absent when the object type is i8. Analyze
            // and replace whichever value the uses actually see.
            let mut defining_inst = heap_alloc;
            let mut defined = alloc_value;
            let uses = ir::uses_of(alloc_value);
            if uses.len() == 1 {
                if let (Some(inst), Some(value)) = (uses[0].inst, uses[0].value) {
                    if inst.get_opcode() == InstructionOpcode::BitCast {
                        defining_inst = inst;
                        defined = value;
                    }
                }
            }

            if escape::does_escape(self.module, defined) {
                continue;
            }

            let function = defining_inst
                .get_parent()
                .and_then(|block| block.get_parent())
                .expect("allocation call outside any function");
            let entry = function
                .get_first_basic_block()
                .expect("function with an allocation call has no entry block");
            match entry.get_first_instruction() {
                Some(first) => self.builder.position_before(&first),
                None => self.builder.position_at_end(entry),
            }

            // Size the alloca in machine words at the i8-pointer ABI
            // alignment.
            let i8_ptr = self.context.i8_type().ptr_type(AddressSpace::default());
            let alignment = u64::from(self.target_data.get_abi_alignment(&i8_ptr));
            let size_in_words = (size + alignment - 1) / alignment;
            let word_type = self.context.custom_width_int_type(alignment as u32 * 8);
            let alloca_type = word_type.array_type(size_in_words as u32);

            let alloca = self.builder.build_alloca(alloca_type, "stackalloc.alloca")?;
            self.builder.build_store(alloca, alloca_type.const_zero())?;
            let stack_value = self
                .builder
                .build_bitcast(alloca, defined.get_type(), "stackalloc")?;

            ir::replace_all_uses(defined, stack_value);
            if defining_inst != heap_alloc {
                defining_inst.erase_from_basic_block();
            }
            heap_alloc.erase_from_basic_block();
            debug!("promoted a {size} byte heap allocation to the stack");
        }
        Ok(())
    }
}
