//! String-to-byte-slice folding.

use inkwell::values::{BasicValueEnum, InstructionOpcode};
use log::debug;

use super::escape;
use super::Optimizer;
use crate::ir;
use crate::runtime::functions;

impl<'a, 'ctx> Optimizer<'a, 'ctx> {
    /// Fold `runtime.stringToBytes` calls into their constant operands.
    ///
    /// The conversion copies a string into fresh byte-slice storage so the
    /// caller may mutate it. When every extracted field is either a length
    /// (always safe to forward) or a byte pointer that is never written
    /// through, the copy is unobservable: forward the original string pointer
    /// and length instead and drop the call. String pointers are always
    /// constants, so a fully-folded conversion leaves only constant inputs
    /// behind.
    pub fn optimize_string_to_bytes(&self) {
        let string_to_bytes = match self.module.get_function(functions::STRING_TO_BYTES) {
            Some(function) => function,
            // Nothing to optimize.
            None => return,
        };

        for call_site in ir::call_sites_of(string_to_bytes) {
            let (call, call_value) = match (call_site.inst, call_site.value) {
                (Some(inst), Some(value)) => (inst, value),
                _ => continue,
            };
            let str_ptr = call
                .get_operand(0)
                .and_then(|operand| operand.left())
                .expect("string-to-bytes call without a pointer operand");
            let str_len = call
                .get_operand(1)
                .and_then(|operand| operand.left())
                .expect("string-to-bytes call without a length operand");

            let mut converted_all_uses = true;
            for site in ir::uses_of(call_value) {
                let extract = match site.inst {
                    Some(inst) if inst.get_opcode() == InstructionOpcode::ExtractValue => inst,
                    _ => {
                        converted_all_uses = false;
                        continue;
                    }
                };
                let extracted = match site.value {
                    Some(value) => value,
                    None => {
                        converted_all_uses = false;
                        continue;
                    }
                };
                match extracted {
                    BasicValueEnum::IntValue(_) => {
                        // A length (len or cap); forward the length operand.
                        ir::replace_all_uses(extracted, str_len);
                        extract.erase_from_basic_block();
                    }
                    BasicValueEnum::PointerValue(_) => {
                        // The byte pointer: only safe when nothing writes
                        // through it, since the string data is constant.
                        if !escape::is_read_only(self.module, extracted) {
                            converted_all_uses = false;
                            continue;
                        }
                        ir::replace_all_uses(extracted, str_ptr);
                        extract.erase_from_basic_block();
                    }
                    other => {
                        panic!("unexpected field extracted from a byte-slice conversion: {other:?}")
                    }
                }
            }

            if converted_all_uses {
                call.erase_from_basic_block();
                debug!("folded a string-to-bytes conversion to its constant operands");
            }
        }
    }
}
