//! The silt middle end: takes a resolved, semantically analyzed program in
//! the surface language's AST and produces typed, language-neutral Core IR
//! for a code generation backend.
//!
//! The pipeline is five phases over a shared [lowering
//! context](middle::context::LoweringContext):
//!
//!   1) validation — reject anything outside the compilable subset
//!   2) type resolution — map surface types onto the closed Core IR type set
//!   3) desugaring — rewrite classes, closures, exceptions, and the other
//!      surface conveniences into the small Core IR
//!   4) monomorphization — instantiate generic definitions on demand
//!   5) ownership analysis — parameter modes, escape analysis, placement
//!
//! Failure is a batch of [`Diagnostic`](diagnostics::Diagnostic) values; no
//! Core IR is emitted when any phase reports an error.

pub mod diagnostics;
pub mod frontend;
pub mod index;
pub mod middle;

use diagnostics::Diagnostic;
use frontend::{
    ast,
    resolve::{ImportGraph, ResolutionMap},
};
use index::Index;
use middle::{cir, context::LoweringContext, desugar, monomorph, ownership, resolve, validate};

/// Everything the external frontend hands to the middle end
#[derive(Debug, Default)]
pub struct ProgramInput {
    /// One module per source file
    pub modules: Vec<ast::Module>,
    pub resolutions: ResolutionMap,
    pub imports: ImportGraph,
}

/// Runs the whole middle end. On success the returned program is complete
/// and immutable; on failure the accumulated diagnostics come back instead
/// and nothing is emitted
pub fn lower_program(input: &ProgramInput) -> Result<cir::Program, Vec<Diagnostic>> {
    let mut ctx = LoweringContext::new();

    // Files are visited in import order; within each phase, declaration order
    let order = input.imports.topological_order(input.modules.len());
    let modules: Vec<&ast::Module> = order
        .iter()
        .filter_map(|file| input.modules.iter().find(|m| m.file == *file))
        .collect();

    // Phase 1: validation. A rejected declaration is skipped by the later
    // phases; the rest of its module continues
    let mut rejected = std::collections::BTreeSet::new();
    for module in &modules {
        let outcome = validate::validate_module(module, &input.resolutions);
        ctx.diagnostics.extend(outcome.diagnostics);
        rejected.extend(outcome.rejected);
    }

    // Phase 2: type resolution over every module, then signatures, so bodies
    // can reference declarations from any file
    for module in &modules {
        resolve::register_module_types(&mut ctx, module, &rejected);
    }
    for module in &modules {
        desugar::collect_module_signatures(&mut ctx, module, &rejected);
    }

    // Phase 3: desugar every body. Generic applications enqueue work items
    for module in &modules {
        desugar::lower_module_bodies(&mut ctx, module, &rejected);
        if ctx.fatal {
            return Err(ctx.diagnostics);
        }
    }

    // Phase 4: drain the monomorphization queue; instances can enqueue more
    while let Some(item) = ctx.mono_queue.pop_front() {
        ctx.mono_depth = item.depth;
        desugar::lower_function(&mut ctx, item.ast, item.mangled, item.bindings, false);
        if ctx.fatal {
            return Err(ctx.diagnostics);
        }
    }
    ctx.mono_depth = 0;

    if !ctx.diagnostics.is_empty() {
        return Err(ctx.diagnostics);
    }

    // Phase 5: ownership analysis annotates the finished function table
    let signatures = ctx.signatures.clone();
    ownership::analyze_program(&mut ctx.functions, &signatures);

    Ok(ctx.into_program())
}

/// Convenience constructor for single-file programs: no imports, identity
/// file ordering
pub fn single_module_input(module: ast::Module, resolutions: ResolutionMap) -> ProgramInput {
    debug_assert_eq!(module.file, ast::FileId::new(0));
    ProgramInput {
        modules: vec![module],
        resolutions,
        imports: ImportGraph::default(),
    }
}

/// Mangled-name helper re-exported for backends and tests; the grammar is
/// part of the ABI contract
pub use monomorph::mangle;
