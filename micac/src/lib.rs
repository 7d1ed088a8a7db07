//! # Mica Compiler Backend
//!
//! Backend core for the Mica compiler. The front-end hands this crate an
//! LLVM module; the pipeline here interleaves LLVM's classical passes with
//! Mica-specific rewrites, then prepares the module for the precise garbage
//! collector.
//!
//! ## Pipeline
//!
//! ```text
//! LLVM module
//!   -> classical function passes
//!   -> dead-map elimination, string folding, stack promotion
//!   -> interface / function-value / task lowering (external stages)
//!   -> nil-check lowering
//!   -> verification
//!   -> GC globals bitmap
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use inkwell::context::Context;
//! use micac::opt::{NoLowerStages, OptConfig, Optimizer};
//!
//! let context = Context::create();
//! let module = context.create_module("program");
//! // ... front-end fills the module ...
//! let optimizer = Optimizer::new(&context, &module, &target_data, OptConfig::default());
//! optimizer.run(&mut NoLowerStages)?;
//! ```

#![warn(rust_2018_idioms)]

pub mod gc;
pub mod ir;
pub mod opt;
pub mod runtime;

pub use opt::{
    LowerStages, NoLowerStages, OptConfig, OptError, OptLevel, Optimizer, PanicStrategy,
    VerifyStage,
};
