//! Use-graph utilities over the LLVM IR.
//!
//! The rewrite passes and analyses walk def-use edges constantly; this module
//! concentrates the raw inkwell idioms for doing so: snapshotting a value's
//! users, resolving call callees, querying parameter attributes, and replacing
//! values. Use lists are invalidated by any mutation of the value they belong
//! to, so callers recompute them after replacing or erasing uses.

use inkwell::attributes::{Attribute, AttributeLoc};
use inkwell::module::Module;
use inkwell::values::{
    AnyValueEnum, BasicValue, BasicValueEnum, BasicValueUse, FunctionValue, InstructionOpcode,
    InstructionValue,
};

/// `BasicValue::get_first_use`/`get_next_use` tie their returned
/// [`BasicValueUse`] to the borrow of the value reference they're called
/// through, rather than to the value's own `'ctx`, because the trait default
/// method (inkwell 0.4's `BasicValue::get_first_use`) elides its lifetime to
/// `&self` instead of `'ctx`. `BasicValueUse`'s only field beyond the raw use
/// pointer is a zero-sized `PhantomData<&'ctx ()>`, so re-tagging the
/// lifetime to the value's actual `'ctx` changes nothing at runtime.
fn rebind_use_lifetime<'ctx>(use_: Option<BasicValueUse<'_>>) -> Option<BasicValueUse<'ctx>> {
    unsafe { std::mem::transmute(use_) }
}

/// One user of a value.
///
/// `inst` is the using instruction; it is `None` when the user is not an
/// instruction at all (a constant expression referencing the value), which
/// analyses must treat conservatively. `value` is the user's own result,
/// present when the instruction produces one; it is what recursive analyses
/// descend into and what rewrites pass to [`replace_all_uses`].
#[derive(Debug, Clone, Copy)]
pub struct UseSite<'ctx> {
    /// The using instruction, when the user is one.
    pub inst: Option<InstructionValue<'ctx>>,
    /// The user's result value, when it produces one.
    pub value: Option<BasicValueEnum<'ctx>>,
}

fn classify_user(user: AnyValueEnum<'_>) -> UseSite<'_> {
    match user {
        AnyValueEnum::ArrayValue(v) => UseSite {
            inst: v.as_instruction_value(),
            value: Some(v.as_basic_value_enum()),
        },
        AnyValueEnum::IntValue(v) => UseSite {
            inst: v.as_instruction_value(),
            value: Some(v.as_basic_value_enum()),
        },
        AnyValueEnum::FloatValue(v) => UseSite {
            inst: v.as_instruction_value(),
            value: Some(v.as_basic_value_enum()),
        },
        AnyValueEnum::PointerValue(v) => UseSite {
            inst: v.as_instruction_value(),
            value: Some(v.as_basic_value_enum()),
        },
        AnyValueEnum::StructValue(v) => UseSite {
            inst: v.as_instruction_value(),
            value: Some(v.as_basic_value_enum()),
        },
        AnyValueEnum::VectorValue(v) => UseSite {
            inst: v.as_instruction_value(),
            value: Some(v.as_basic_value_enum()),
        },
        AnyValueEnum::PhiValue(v) => {
            let value = v.as_basic_value();
            UseSite {
                inst: value.as_instruction_value(),
                value: Some(value),
            }
        }
        AnyValueEnum::InstructionValue(inst) => UseSite {
            inst: Some(inst),
            value: None,
        },
        AnyValueEnum::FunctionValue(_) | AnyValueEnum::MetadataValue(_) => UseSite {
            inst: None,
            value: None,
        },
    }
}

/// Snapshot the current users of `value`.
pub fn uses_of<'ctx>(value: BasicValueEnum<'ctx>) -> Vec<UseSite<'ctx>> {
    let mut sites = Vec::new();
    let mut next: Option<BasicValueUse<'ctx>> = rebind_use_lifetime(value.get_first_use());
    while let Some(current) = next {
        sites.push(classify_user(current.get_user()));
        next = current.get_next_use();
    }
    sites
}

/// Snapshot the users of a function, through its global pointer value.
pub fn function_uses(function: FunctionValue<'_>) -> Vec<UseSite<'_>> {
    uses_of(function.as_global_value().as_pointer_value().as_basic_value_enum())
}

/// The call instructions whose callee is `function`.
///
/// A use of the function in an argument position (its address taken) is not a
/// call site and is excluded.
pub fn call_sites_of(function: FunctionValue<'_>) -> Vec<UseSite<'_>> {
    function_uses(function)
        .into_iter()
        .filter(|site| site.inst.map_or(false, |inst| is_call_to(inst, function)))
        .collect()
}

/// Whether `inst` is a call whose callee is exactly `function`.
pub fn is_call_to<'ctx>(inst: InstructionValue<'ctx>, function: FunctionValue<'ctx>) -> bool {
    if inst.get_opcode() != InstructionOpcode::Call {
        return false;
    }
    let operands = inst.get_num_operands();
    if operands == 0 {
        return false;
    }
    // The callee is the last operand of a call.
    let callee = inst.get_operand(operands - 1).and_then(|operand| operand.left());
    callee
        == Some(
            function
                .as_global_value()
                .as_pointer_value()
                .as_basic_value_enum(),
        )
}

/// Resolve the callee of a call instruction back to a module function.
///
/// Returns `None` for indirect calls and for constant-expression callees,
/// which is the conservative answer everywhere this is used.
pub fn called_function<'ctx>(
    module: &Module<'ctx>,
    call: InstructionValue<'ctx>,
) -> Option<FunctionValue<'ctx>> {
    let operands = call.get_num_operands();
    if call.get_opcode() != InstructionOpcode::Call || operands == 0 {
        return None;
    }
    let callee = call.get_operand(operands - 1)?.left()?;
    let pointer = match callee {
        BasicValueEnum::PointerValue(pointer) => pointer,
        _ => return None,
    };
    let name = pointer.get_name().to_str().ok()?;
    if name.is_empty() {
        return None;
    }
    module.get_function(name)
}

/// Whether every argument position of `call` holding `param` carries the
/// parameter attribute `flag` on the callee.
///
/// Usually there is a single matching position, but a function can take the
/// same value twice; every position must carry the flag. An indirect call has
/// no attributes to consult and yields `false`.
pub fn has_param_flag<'ctx>(
    module: &Module<'ctx>,
    call: InstructionValue<'ctx>,
    param: BasicValueEnum<'ctx>,
    flag: &str,
) -> bool {
    let callee = match called_function(module, call) {
        Some(function) => function,
        None => return false,
    };
    let kind_id = Attribute::get_named_enum_kind_id(flag);
    for index in 0..callee.count_params() {
        if call.get_operand(index).and_then(|operand| operand.left()) != Some(param) {
            continue;
        }
        if callee.get_enum_attribute(AttributeLoc::Param(index), kind_id).is_none() {
            return false;
        }
    }
    true
}

/// Replace every use of `old` with `new`.
///
/// Both values must be of the same kind; the rewrites only ever substitute a
/// value of identical type, so a mismatch is a programmer error.
pub fn replace_all_uses<'ctx>(old: BasicValueEnum<'ctx>, new: BasicValueEnum<'ctx>) {
    match (old, new) {
        (BasicValueEnum::IntValue(old), BasicValueEnum::IntValue(new)) => {
            old.replace_all_uses_with(new)
        }
        (BasicValueEnum::PointerValue(old), BasicValueEnum::PointerValue(new)) => {
            old.replace_all_uses_with(new)
        }
        (BasicValueEnum::FloatValue(old), BasicValueEnum::FloatValue(new)) => {
            old.replace_all_uses_with(new)
        }
        (BasicValueEnum::StructValue(old), BasicValueEnum::StructValue(new)) => {
            old.replace_all_uses_with(new)
        }
        (BasicValueEnum::ArrayValue(old), BasicValueEnum::ArrayValue(new)) => {
            old.replace_all_uses_with(new)
        }
        (BasicValueEnum::VectorValue(old), BasicValueEnum::VectorValue(new)) => {
            old.replace_all_uses_with(new)
        }
        (old, new) => panic!("cannot replace {old:?} with {new:?}: mismatched value kinds"),
    }
}

/// Strip one leading bitcast from `value`, yielding the casted operand.
pub fn strip_bitcast(value: BasicValueEnum<'_>) -> BasicValueEnum<'_> {
    if let Some(inst) = value.as_instruction_value() {
        if inst.get_opcode() == InstructionOpcode::BitCast {
            if let Some(operand) = inst.get_operand(0).and_then(|operand| operand.left()) {
                return operand;
            }
        }
    }
    value
}
