//! Call-site machinery: argument schemas and the tail-call trampoline.
//!
//! Spec §4.2 "Tail-call trampoline": a call site starts out driven by a
//! [`trampoline::CallOptimiserState::Fresh`] optimiser, upgrades to
//! `Simple` once it has seen one callee, and upgrades again to `Looping`
//! once the callee has been observed calling itself (directly or through a
//! short mutual-recursion cycle) from tail position. Grounded in the
//! teacher's bytecode dispatch loop (`run()` in
//! `crates/ouros/src/bytecode/vm/mod.rs`), which already runs a flat loop
//! for its own call/return opcodes instead of recursing the Rust stack for
//! every call; here that loop is made a first-class, observable state
//! machine per call site instead of an implicit property of the whole VM.

pub mod trampoline;

use std::rc::Rc;

use crate::ast::template::ArgStrategy;

/// Per-parameter evaluation strategy for one function, consulted by a
/// call-site's PIC once it resolves which concrete function it is calling
/// (spec §3 "Function — `{..., schema: ArgSchema }`"). Kept distinct from
/// the call-site's own [`ArgStrategy`] list because a polymorphic call site
/// may resolve, across its lifetime, to several target functions with
/// different schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSchema {
    pub param_count: usize,
    pub strategies: Vec<ArgStrategy>,
}

impl ArgSchema {
    #[must_use]
    pub fn new(strategies: Vec<ArgStrategy>) -> Rc<Self> {
        Rc::new(Self {
            param_count: strategies.len(),
            strategies,
        })
    }

    #[must_use]
    pub fn strategy_for(&self, index: usize) -> ArgStrategy {
        self.strategies.get(index).copied().unwrap_or(ArgStrategy::Eager)
    }
}
