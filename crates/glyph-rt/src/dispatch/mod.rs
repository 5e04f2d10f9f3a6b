//! The polymorphic inline cache (PIC), spec §4.1 "Method dispatch".
//!
//! Grounded in the teacher's monomorphic call-attribute cache
//! (`CallAttrInlineCacheEntry`/`CallAttrInlineCacheKind`,
//! `crates/ouros/src/bytecode/vm/mod.rs`), which caches a specialized call
//! shape keyed by code identity, opcode IP and static call signature, and
//! falls back safely when the receiver shape changes — generalized here
//! from one fixed specialization per call site into a small, explicit,
//! bounded-capacity `(TypeId, FunctionTemplate)` cache owned by each
//! `method-dispatch` node.

use smallvec::SmallVec;

use crate::{
    ast::template::FunctionTemplate,
    intern::InternedStr,
    types::{ctor::TypeId, scope::ModuleScope},
};
use std::rc::Rc;

#[derive(Debug, Clone)]
struct PicEntry {
    receiver_type: TypeId,
    target: Rc<FunctionTemplate>,
}

/// One call site's cache, keyed by receiver `TypeId`.
///
/// Holds up to `capacity` `(TypeId, FunctionTemplate)` pairs (spec §4.1
/// "caches up to `K` resolved targets per call site"). Once a site would
/// need to hold more than that, it gives up caching entirely rather than
/// evicting — spec §4.1 "a call site that outgrows its cache capacity is
/// demoted to megamorphic and dispatches by full lookup from then on",
/// which matches the teacher's own inline-cache deoptimization behavior on
/// a polymorphic site.
#[derive(Debug)]
pub struct Pic {
    capacity: usize,
    entries: SmallVec<[PicEntry; 4]>,
    megamorphic: bool,
    hits: u64,
    misses: u64,
}

/// Outcome of one dispatch, distinguishing a cache hit from a miss so
/// callers (and instrumentation) can observe PIC behavior, spec §8
/// "property: PIC soundness... a cache hit and a cache miss resolve to the
/// identical target for the same receiver type". `strum::Display` gives this
/// a stable textual form for the `tracing::debug!` PIC-transition logging
/// SPEC_FULL §A.1 calls for, the same way the teacher derives `Display` on
/// its own small tag enums rather than hand-writing `fmt::Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DispatchOutcome {
    Hit,
    Miss,
    Megamorphic,
}

impl Pic {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: SmallVec::new(),
            megamorphic: false,
            hits: 0,
            misses: 0,
        }
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    #[must_use]
    pub fn is_megamorphic(&self) -> bool {
        self.megamorphic
    }

    /// Resolves `method_name` on `receiver_type`, consulting the cache
    /// first and falling back to `scope`'s full method-resolution order on
    /// a miss (spec §4.1 steps 1-2: primitive sentinel or atom constructor's
    /// `type_id`, then walk `supertype` upward through `scope`).
    pub fn dispatch(
        &mut self,
        receiver_type: TypeId,
        scope: &ModuleScope,
        method_name: InternedStr,
    ) -> (Option<Rc<FunctionTemplate>>, DispatchOutcome) {
        if !self.megamorphic {
            if let Some(entry) = self.entries.iter().find(|e| e.receiver_type == receiver_type) {
                self.hits += 1;
                return (Some(Rc::clone(&entry.target)), DispatchOutcome::Hit);
            }
        }

        let resolved = scope.resolve_method(receiver_type, method_name);
        self.misses += 1;

        let Some(target) = resolved else {
            return (None, DispatchOutcome::Miss);
        };

        if self.megamorphic {
            return (Some(target), DispatchOutcome::Megamorphic);
        }

        if self.entries.len() >= self.capacity {
            self.megamorphic = true;
            self.entries.clear();
            tracing::debug!(
                capacity = self.capacity,
                outcome = %DispatchOutcome::Megamorphic,
                "call site demoted to megamorphic dispatch"
            );
            return (Some(target), DispatchOutcome::Megamorphic);
        }

        self.entries.push(PicEntry {
            receiver_type,
            target: Rc::clone(&target),
        });
        (Some(target), DispatchOutcome::Miss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::template::TaggedTemplate, intern::intern, values::Value};

    fn make_template(name: &str) -> Rc<FunctionTemplate> {
        FunctionTemplate::new(
            intern(name),
            0,
            Vec::new(),
            Vec::new(),
            0,
            TaggedTemplate::new(crate::ast::template::NodeTemplate::Literal(Value::Unit)),
            None,
            ModuleScope::new(intern("TestScope")),
        )
    }

    #[test]
    fn repeated_same_type_is_a_cache_hit() {
        let scope = ModuleScope::new(intern("M"));
        let ty = TypeId::fresh();
        scope.define_method(ty, intern("go"), make_template("go"));
        let mut pic = Pic::new(3);

        let (_, first) = pic.dispatch(ty, &scope, intern("go"));
        let (_, second) = pic.dispatch(ty, &scope, intern("go"));
        assert_eq!(first, DispatchOutcome::Miss);
        assert_eq!(second, DispatchOutcome::Hit);
    }

    #[test]
    fn exceeding_capacity_demotes_to_megamorphic() {
        let scope = ModuleScope::new(intern("M"));
        let mut pic = Pic::new(2);
        let types: Vec<TypeId> = (0..4).map(|_| TypeId::fresh()).collect();
        for (i, ty) in types.iter().enumerate() {
            scope.define_method(*ty, intern("go"), make_template(&format!("go{i}")));
        }
        for ty in &types {
            pic.dispatch(*ty, &scope, intern("go"));
        }
        assert!(pic.is_megamorphic());
    }

    #[test]
    fn cache_hit_and_miss_resolve_to_same_target() {
        let scope = ModuleScope::new(intern("M"));
        let ty = TypeId::fresh();
        let template = make_template("go");
        scope.define_method(ty, intern("go"), Rc::clone(&template));
        let mut pic = Pic::new(3);

        let (first, _) = pic.dispatch(ty, &scope, intern("go"));
        let (second, _) = pic.dispatch(ty, &scope, intern("go"));
        assert!(Rc::ptr_eq(&first.unwrap(), &second.unwrap()));
    }
}
