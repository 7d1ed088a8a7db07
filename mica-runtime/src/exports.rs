//! C-ABI entry points for compiled Mica programs.
//!
//! Build this crate as a staticlib and link compiled programs against it;
//! the backend emits calls to these symbols. The tracked-globals symbols are
//! defined by the compiler's bitmap pass, the layout symbols by the linker
//! script.

use core::cell::UnsafeCell;

use crate::arch::{self, WORD_SIZE};
use crate::gc::{GcHeap, RootRegions, TrackedGlobals};

extern "C" {
    #[link_name = "runtime.trackedGlobalsStart"]
    static TRACKED_GLOBALS_START: usize;
    #[link_name = "runtime.trackedGlobalsLength"]
    static TRACKED_GLOBALS_LENGTH: usize;
    #[link_name = "runtime.trackedGlobalsBitmap"]
    static TRACKED_GLOBALS_BITMAP: u8;
}

/// The program heap.
///
/// WebAssembly runs single-threaded and the collector is stop-the-world, so
/// there is no mutator/collector concurrency to guard against.
struct HeapCell(UnsafeCell<Option<GcHeap>>);

unsafe impl Sync for HeapCell {}

static HEAP: HeapCell = HeapCell(UnsafeCell::new(None));

fn roots() -> RootRegions {
    unsafe {
        RootRegions {
            globals: Some(TrackedGlobals {
                start: TRACKED_GLOBALS_START,
                len_slots: TRACKED_GLOBALS_LENGTH,
                bitmap: &TRACKED_GLOBALS_BITMAP as *const u8,
            }),
            // There is no portable way to read the shadow stack pointer, so
            // scan everything between the data segment and the stack top.
            // Over-scanning only delays reclamation.
            stack: Some((
                arch::align_up(arch::wasm::globals_end(), WORD_SIZE),
                arch::align_down(arch::wasm::stack_top(), WORD_SIZE),
            )),
        }
    }
}

/// Initialize the heap. Must run before any allocation.
#[no_mangle]
pub extern "C" fn mica_rt_init() {
    let (start, end) = arch::wasm::heap_bounds();
    unsafe {
        *HEAP.0.get() = Some(GcHeap::new(start, end));
    }
}

/// Allocate `size` zeroed bytes, collecting first. Traps on exhaustion.
#[no_mangle]
pub extern "C" fn mica_rt_alloc(size: usize) -> *mut u8 {
    let heap = unsafe { (*HEAP.0.get()).as_mut() }
        .expect("mica_rt_init must run before any allocation");
    match heap.alloc(size, &roots()) {
        Some(object) => object.as_ptr(),
        // Out of memory even after collecting.
        None => core::arch::wasm32::unreachable(),
    }
}

/// Run a collection cycle outside the allocation path.
#[no_mangle]
pub extern "C" fn mica_rt_gc() {
    if let Some(heap) = unsafe { (*HEAP.0.get()).as_mut() } {
        heap.collect(&roots());
    }
}
