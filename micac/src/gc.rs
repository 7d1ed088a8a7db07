//! Globals bitmap emission for the precise collector.
//!
//! The collector needs to know which global slots hold managed pointers.
//! This pass gathers every pointer-carrying global into one contiguous
//! bundle and publishes three symbols describing it:
//!
//! - `runtime.trackedGlobalsStart`: address of the first tracked slot,
//! - `runtime.trackedGlobalsLength`: number of pointer-sized slots,
//! - `runtime.trackedGlobalsBitmap`: byte array where bit `i` of byte `i/8`
//!   marks slot `i` as a managed pointer.
//!
//! The collector's global scan reads exactly these three symbols. Slots are
//! pointer-aligned by construction; a tracked slot may still hold a value
//! that merely looks like a pointer, which the collector screens with its
//! own heap-bounds check.

use inkwell::module::Linkage;
use inkwell::types::{BasicType, BasicTypeEnum};
use inkwell::values::{BasicValue, BasicValueEnum, GlobalValue, IntValue};
use inkwell::AddressSpace;
use log::debug;

use crate::opt::Optimizer;
use crate::runtime::gc_symbols;

impl<'a, 'ctx> Optimizer<'a, 'ctx> {
    /// Bundle the pointer-carrying globals and define the tracking symbols.
    ///
    /// A no-op when `runtime.trackedGlobalsStart` is not declared, which
    /// means the precise-GC runtime is not linked into this program.
    pub fn add_globals_bitmap(&self) {
        let start_symbol = match self.module.get_global(gc_symbols::TRACKED_GLOBALS_START) {
            Some(global) => global,
            None => return,
        };

        let pointer_size = u64::from(self.target_data.get_pointer_byte_size(None));

        // Gather the globals worth tracking: defined, mutable, holding at
        // least one pointer slot, and not an intrinsic or one of the
        // tracking symbols themselves.
        let mut tracked: Vec<GlobalValue<'ctx>> = Vec::new();
        let mut tracked_types: Vec<BasicTypeEnum<'ctx>> = Vec::new();
        let mut next = self.module.get_first_global();
        while let Some(global) = next {
            next = global.get_next_global();
            if global.get_initializer().is_none() || global.is_constant() {
                continue;
            }
            let name = global.get_name().to_str().unwrap_or("");
            if name.starts_with("llvm.") || name.starts_with("runtime.trackedGlobals") {
                continue;
            }
            let value_type = match BasicTypeEnum::try_from(
                global.as_pointer_value().get_type().get_element_type(),
            ) {
                Ok(value_type) => value_type,
                Err(_) => continue,
            };
            let slot_count = self.target_data.get_abi_size(&value_type) / pointer_size;
            let mut slots = vec![false; slot_count as usize];
            self.pointer_slots(value_type, 0, &mut slots);
            if !slots.iter().any(|&is_pointer| is_pointer) {
                continue;
            }
            tracked.push(global);
            tracked_types.push(value_type);
        }

        // One struct bundling every tracked global makes the region a single
        // contiguous run of slots.
        let bundle_type = self.context.struct_type(&tracked_types, false);
        let bundle = self.module.add_global(
            bundle_type,
            Some(AddressSpace::default()),
            gc_symbols::TRACKED_GLOBALS_BUNDLE,
        );
        bundle.set_linkage(Linkage::Internal);
        let initializers: Vec<BasicValueEnum<'ctx>> = tracked
            .iter()
            .map(|global| {
                global
                    .get_initializer()
                    .expect("tracked globals are definitions")
            })
            .collect();
        bundle.set_initializer(&self.context.const_struct(&initializers, false));

        let i32_type = self.context.i32_type();
        let zero = i32_type.const_zero();
        for (index, original) in tracked.iter().enumerate() {
            let field = unsafe {
                bundle
                    .as_pointer_value()
                    .const_gep(&[zero, i32_type.const_int(index as u64, false)])
            };
            original.as_pointer_value().replace_all_uses_with(field);
            unsafe { original.delete() };
        }

        let usize_type = self.context.ptr_sized_int_type(self.target_data, None);
        start_symbol.set_initializer(&bundle.as_pointer_value().const_to_int(usize_type));

        let slot_count = self.target_data.get_abi_size(&bundle_type) / pointer_size;
        if let Some(length_symbol) = self.module.get_global(gc_symbols::TRACKED_GLOBALS_LENGTH) {
            length_symbol.set_initializer(&usize_type.const_int(slot_count, false));
        }

        let mut slots = vec![false; slot_count as usize];
        self.pointer_slots(bundle_type.as_basic_type_enum(), 0, &mut slots);
        let bytes: Vec<IntValue<'ctx>> = slots
            .chunks(8)
            .map(|chunk| {
                let mut byte = 0u64;
                for (bit, &is_pointer) in chunk.iter().enumerate() {
                    if is_pointer {
                        byte |= 1 << bit;
                    }
                }
                self.context.i8_type().const_int(byte, false)
            })
            .collect();
        let bitmap_value = self.context.i8_type().const_array(&bytes);

        // The runtime declares the bitmap as a zero-length array; swap the
        // declaration for a definition of the real length under the same
        // name.
        let bitmap = self.module.add_global(
            bitmap_value.get_type(),
            Some(AddressSpace::default()),
            "runtime.trackedGlobalsBitmap.def",
        );
        bitmap.set_initializer(&bitmap_value);
        bitmap.set_constant(true);
        if let Some(declared) = self.module.get_global(gc_symbols::TRACKED_GLOBALS_BITMAP) {
            let declared_pointer = declared.as_pointer_value();
            if declared_pointer.get_first_use().is_some() {
                declared_pointer
                    .replace_all_uses_with(bitmap.as_pointer_value().const_cast(declared_pointer.get_type()));
            }
            unsafe { declared.delete() };
        }
        bitmap
            .as_pointer_value()
            .set_name(gc_symbols::TRACKED_GLOBALS_BITMAP);

        debug!(
            "tracked globals bitmap: {} global(s), {slot_count} slot(s)",
            tracked.len()
        );
    }

    /// Mark the pointer-sized slots of `value_type` that hold pointers,
    /// starting `base` bytes into the tracked region.
    fn pointer_slots(&self, value_type: BasicTypeEnum<'ctx>, base: u64, slots: &mut [bool]) {
        let pointer_size = u64::from(self.target_data.get_pointer_byte_size(None));
        match value_type {
            BasicTypeEnum::PointerType(_) => {
                if let Some(slot) = slots.get_mut((base / pointer_size) as usize) {
                    *slot = true;
                }
            }
            BasicTypeEnum::StructType(struct_type) => {
                for (index, field) in struct_type.get_field_types().iter().enumerate() {
                    let offset = self
                        .target_data
                        .offset_of_element(&struct_type, index as u32)
                        .unwrap_or(0);
                    self.pointer_slots(*field, base + offset, slots);
                }
            }
            BasicTypeEnum::ArrayType(array_type) => {
                let element = array_type.get_element_type();
                let stride = self.target_data.get_abi_size(&element);
                for index in 0..u64::from(array_type.len()) {
                    self.pointer_slots(element, base + index * stride, slots);
                }
            }
            // Scalars and vectors of scalars hold no pointers.
            _ => {}
        }
    }
}
