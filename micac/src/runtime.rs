//! Runtime symbols recognized by the backend.
//!
//! The front-end lowers Mica constructs to calls into the language runtime;
//! the rewrite passes recognize those calls by name. The GC section lists the
//! symbols the precise collector reads, which the backend must define.

/// Runtime functions the rewrite passes recognize.
pub mod functions {
    /// Heap allocation: `runtime.alloc(size) -> i8*`, returns zeroed memory.
    pub const ALLOC: &str = "runtime.alloc";

    /// Create an empty hashmap.
    pub const HASHMAP_MAKE: &str = "runtime.hashmapMake";

    /// Insert into a hashmap with a binary (fixed-size) key.
    pub const HASHMAP_BINARY_SET: &str = "runtime.hashmapBinarySet";

    /// Insert into a hashmap with a string key.
    pub const HASHMAP_STRING_SET: &str = "runtime.hashmapStringSet";

    /// Copy a string into a fresh byte slice: `(ptr, len) -> {ptr, len}`.
    pub const STRING_TO_BYTES: &str = "runtime.stringToBytes";

    /// Nil check on a pointer, lowered to a plain null comparison.
    pub const IS_NIL: &str = "runtime.isnil";

    /// User panic entry point.
    pub const PANIC: &str = "runtime._panic";

    /// Runtime-internal panic entry point (bounds checks and friends).
    pub const RUNTIME_PANIC: &str = "runtime.runtimePanic";

    /// LLVM trap intrinsic, substituted for panics under the abort strategy.
    pub const LLVM_TRAP: &str = "llvm.trap";
}

/// Globals shared between the backend and the precise collector.
///
/// The collector declares these as external symbols; the globals-bitmap
/// emitter defines them. Bit `i` of the bitmap marks pointer-sized slot `i`
/// of the tracked region as a managed pointer.
pub mod gc_symbols {
    /// Address of the first tracked pointer-sized slot.
    pub const TRACKED_GLOBALS_START: &str = "runtime.trackedGlobalsStart";

    /// Number of pointer-sized slots the bitmap covers.
    pub const TRACKED_GLOBALS_LENGTH: &str = "runtime.trackedGlobalsLength";

    /// Byte bitmap over the tracked slots.
    pub const TRACKED_GLOBALS_BITMAP: &str = "runtime.trackedGlobalsBitmap";

    /// Internal bundle holding every tracked global, making the region
    /// contiguous.
    pub const TRACKED_GLOBALS_BUNDLE: &str = "mica.trackedGlobals";
}

/// Symbols the linker script provides on WebAssembly-like targets.
///
/// The runtime reads these to find the heap, the data segment, and the
/// shadow stack. They are listed here for the contract's sake; the backend
/// itself never touches them.
pub mod linker_symbols {
    /// First address past the static data, start of the heap.
    pub const HEAP_BASE: &str = "__heap_base";

    /// End of the heap, when the linker script provides one.
    pub const HEAP_END: &str = "_heap_end";

    /// Start of the globals (data) region.
    pub const GLOBALS_START: &str = "_globals_start";

    /// End of the globals region.
    pub const GLOBALS_END: &str = "_globals_end";

    /// Top of the shadow stack.
    pub const STACK_TOP: &str = "_stack_top";
}
