//! # Mica Runtime
//!
//! The runtime library compiled Mica programs link against. Its centerpiece
//! is a precise mark-sweep garbage collector over a block-structured heap,
//! sized for small embedded devices and WebAssembly:
//!
//! - **Heap**: a metadata prefix of packed 2-bit block states followed by a
//!   pool of fixed-size blocks ([`gc`]).
//! - **Roots**: the compiler emits a bitmap describing exactly which global
//!   slots hold managed pointers; the stack is scanned conservatively.
//! - **Policy**: stop-the-world, collect before every allocation. Simple and
//!   predictable, which is what a 64 KiB heap wants.
//!
//! The [`arch`] module binds the linker-provided layout symbols on
//! WebAssembly; [`exports`] exposes the C ABI entry points
//! (`mica_rt_init`, `mica_rt_alloc`, `mica_rt_gc`) that compiled programs
//! call.
//!
//! Hosted builds are used by the test suite, which lays heaps over plain
//! buffers and drives collection with explicit root regions.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod arch;
pub mod gc;

#[cfg(target_arch = "wasm32")]
pub mod exports;

pub use gc::{BlockState, GcHeap, RootRegions, TrackedGlobals};

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
