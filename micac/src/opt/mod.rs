//! The optimization pipeline.
//!
//! [`Optimizer`] drives LLVM's classical passes and the Mica-specific
//! rewrites over a module in a fixed order. The interleaving matters: the
//! module pass set refreshes function attributes (`nocapture`, `readonly`)
//! that the escape and read-only analyses consult, interface lowering opens
//! up a second round of interprocedural opportunities, and the rewrites are
//! re-run afterwards to pick those up.

use inkwell::attributes::{Attribute, AttributeLoc};
use inkwell::builder::{Builder, BuilderError};
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::passes::{PassManager, PassManagerBuilder};
use inkwell::targets::TargetData;
use inkwell::values::FunctionValue;
use inkwell::OptimizationLevel;
use std::fmt;
use thiserror::Error;

pub mod escape;

mod allocs;
mod isnil;
mod maps;
mod panics;
mod string_to_bytes;

/// Optimization level for the classical passes.
///
/// Only [`OptLevel::None`] suppresses the Mica-specific rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    /// No optimization (for debugging).
    None,
    /// Basic optimization, fast compiles.
    Less,
    /// The default balance.
    #[default]
    Default,
    /// Everything, like -O3.
    Aggressive,
}

impl OptLevel {
    fn to_llvm(self) -> OptimizationLevel {
        match self {
            OptLevel::None => OptimizationLevel::None,
            OptLevel::Less => OptimizationLevel::Less,
            OptLevel::Default => OptimizationLevel::Default,
            OptLevel::Aggressive => OptimizationLevel::Aggressive,
        }
    }
}

/// What a panic does in the compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicStrategy {
    /// Call into the runtime to report the panic.
    #[default]
    Report,
    /// Replace panic calls with a trap instruction, trading diagnostics for
    /// code size.
    Abort,
}

/// Configuration for one run of the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct OptConfig {
    /// Classical optimization level.
    pub opt_level: OptLevel,
    /// Size level 0-2; 2 additionally marks every function `optsize`.
    pub size_level: u32,
    /// Inliner threshold; 0 disables inlining.
    pub inliner_threshold: u32,
    /// Panic handling strategy.
    pub panic_strategy: PanicStrategy,
    /// Whether the target uses the precise collector, which needs the
    /// globals bitmap emitted.
    pub precise_gc: bool,
}

impl Default for OptConfig {
    fn default() -> Self {
        OptConfig {
            opt_level: OptLevel::Default,
            size_level: 0,
            inliner_threshold: 0,
            panic_strategy: PanicStrategy::Report,
            precise_gc: false,
        }
    }
}

/// Which verification checkpoint rejected the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStage {
    /// After the optimization passes and lowerings.
    Optimizations,
    /// After the globals bitmap was emitted.
    Gc,
}

impl fmt::Display for VerifyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyStage::Optimizations => f.write_str("optimizations"),
            VerifyStage::Gc => f.write_str("gc"),
        }
    }
}

/// Errors surfaced by the pipeline.
#[derive(Debug, Error)]
pub enum OptError {
    /// A pass left the module in a state the verifier rejects.
    #[error("{stage} caused a module verification failure: {message}")]
    Verification {
        /// The checkpoint that failed.
        stage: VerifyStage,
        /// The verifier's diagnostic.
        message: String,
    },

    /// Task lowering failed.
    #[error("task lowering failed: {0}")]
    Lowering(String),

    /// An instruction could not be emitted.
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

/// The backend stages the driver calls out to.
///
/// Interface dispatch, function values, and task spawns are lowered by
/// separate stages that live outside this crate. Task lowering goes through
/// LLVM coroutines and owns the scheduling of the coroutine passes for the
/// intrinsics it introduces; the driver guarantees the extra function-pass
/// cycle that `llvm.coro.size` lowering requires afterwards.
pub trait LowerStages<'ctx> {
    /// Lower interface dispatch to direct calls and type switches.
    fn lower_interfaces(&mut self, module: &Module<'ctx>);

    /// Lower first-class function values.
    fn lower_func_values(&mut self, module: &Module<'ctx>);

    /// Lower task spawns through LLVM coroutines.
    fn lower_tasks(&mut self, module: &Module<'ctx>) -> Result<(), String>;
}

/// No-op stages for modules that contain no interface dispatch, function
/// values, or task spawns.
#[derive(Debug, Default)]
pub struct NoLowerStages;

impl<'ctx> LowerStages<'ctx> for NoLowerStages {
    fn lower_interfaces(&mut self, _module: &Module<'ctx>) {}

    fn lower_func_values(&mut self, _module: &Module<'ctx>) {}

    fn lower_tasks(&mut self, _module: &Module<'ctx>) -> Result<(), String> {
        Ok(())
    }
}

/// Drives the pass pipeline over a single module.
///
/// The module is the only mutable state; the optimizer holds exclusive
/// mutation rights for the duration of [`Optimizer::run`]. The builder's
/// insertion point is transient: every pass positions it before emitting and
/// nothing persists across pass boundaries.
pub struct Optimizer<'a, 'ctx> {
    pub(crate) context: &'ctx Context,
    pub(crate) module: &'a Module<'ctx>,
    pub(crate) builder: Builder<'ctx>,
    pub(crate) target_data: &'a TargetData,
    pub(crate) config: OptConfig,
}

impl<'a, 'ctx> Optimizer<'a, 'ctx> {
    /// Create an optimizer for `module`.
    ///
    /// `target_data` must describe the layout the module is compiled for; the
    /// allocation rewrite and the globals bitmap depend on it.
    pub fn new(
        context: &'ctx Context,
        module: &'a Module<'ctx>,
        target_data: &'a TargetData,
        config: OptConfig,
    ) -> Self {
        Optimizer {
            context,
            module,
            builder: context.create_builder(),
            target_data,
            config,
        }
    }

    /// Run the full pipeline.
    ///
    /// Pass managers are released on every exit path, including verification
    /// failures and lowering errors.
    pub fn run(&self, stages: &mut dyn LowerStages<'ctx>) -> Result<(), OptError> {
        let pm_builder = PassManagerBuilder::create();
        pm_builder.set_optimization_level(self.config.opt_level.to_llvm());
        pm_builder.set_size_level(self.config.size_level);
        if self.config.inliner_threshold > 0 {
            pm_builder.set_inliner_with_threshold(self.config.inliner_threshold);
        }

        if self.config.panic_strategy == PanicStrategy::Abort {
            self.replace_panics_with_trap()?;
        }

        // Run function passes for each function.
        let func_passes: PassManager<FunctionValue<'ctx>> = PassManager::create(self.module);
        pm_builder.populate_function_pass_manager(&func_passes);
        func_passes.initialize();
        for function in self.module.get_functions() {
            func_passes.run_on(&function);
        }
        func_passes.finalize();

        if self.config.opt_level != OptLevel::None {
            // Preparatory passes for the Mica rewrites. Function-attrs is the
            // load-bearing one: it infers the nocapture/readonly flags the
            // escape and read-only analyses read.
            let prep_passes: PassManager<Module<'ctx>> = PassManager::create(());
            prep_passes.add_global_optimizer_pass();
            prep_passes.add_global_dce_pass();
            prep_passes.add_sccp_pass();
            prep_passes.add_aggressive_dce_pass();
            prep_passes.add_function_attrs_pass();
            prep_passes.run_on(self.module);

            self.optimize_maps();
            self.optimize_string_to_bytes();
            self.optimize_allocs()?;
            stages.lower_interfaces(self.module);
            stages.lower_func_values(self.module);

            // Interface lowering exposes many more interprocedural
            // opportunities, but the function attributes have to be brought
            // up to date first.
            prep_passes.run_on(self.module);

            self.optimize_allocs()?;
            self.optimize_string_to_bytes();

            self.lower_isnil()?;

            stages.lower_tasks(self.module).map_err(OptError::Lowering)?;
        } else {
            // Must run at every optimization level.
            stages.lower_interfaces(self.module);
            stages.lower_func_values(self.module);
            stages.lower_tasks(self.module).map_err(OptError::Lowering)?;
        }

        self.verify(VerifyStage::Optimizations)?;

        if self.config.size_level >= 2 {
            // Slightly smaller binaries at some performance cost.
            let kind_id = Attribute::get_named_enum_kind_id("optsize");
            let optsize = self.context.create_enum_attribute(kind_id, 0);
            for function in self.module.get_functions() {
                function.add_attribute(AttributeLoc::Function, optsize);
            }
        }

        // Second function-pass cycle: the coroutine-size intrinsics
        // introduced by task lowering are only folded on this run.
        for function in self.module.get_functions() {
            func_passes.run_on(&function);
        }
        func_passes.finalize();

        let module_passes: PassManager<Module<'ctx>> = PassManager::create(());
        pm_builder.populate_module_pass_manager(&module_passes);
        module_passes.run_on(self.module);

        if self.config.precise_gc {
            self.add_globals_bitmap();
            self.verify(VerifyStage::Gc)?;
        }

        Ok(())
    }

    fn verify(&self, stage: VerifyStage) -> Result<(), OptError> {
        self.module.verify().map_err(|message| OptError::Verification {
            stage,
            message: message.to_string(),
        })
    }
}
