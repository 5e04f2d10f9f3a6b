//! The expression cache: ID-keyed memoization of already-computed results.
//!
//! Spec §4.3 "Expression cache... the evaluator consults the cache before
//! (re-)executing any node carrying an expression id; a hit returns the
//! memoized value without walking the node's subtree at all". Grounded in
//! `enso-org-ide`'s `ComputedValueInfoRegistry`
//! (`model/execution_context.rs`): a `HashMap<ExpressionId, Rc<ComputedValueInfo>>`
//! that caches values reported for a running execution context and is
//! wholesale `clear()`-ed whenever the context's call stack changes, the
//! same "invalidate the lot on a structural change" policy
//! `invalidate_all` implements here.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::ast::template::ExpressionId;
use crate::values::Value;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    /// Monotonic generation this entry was written in; an entry written in
    /// a generation older than the cache's current generation is treated as
    /// a miss without being physically removed, so a stale entry can still
    /// be inspected for diagnostics (spec §6.1 item 4's "what was the last
    /// value here before the edit").
    generation: u64,
}

/// Per-[`crate::context::ExecutionContext`] expression cache.
///
/// Owned exclusively by the context's home worker thread (spec §5
/// "per-context state... accessed only from the context's home thread"),
/// so a plain `RefCell` suffices; no atomic or lock is needed.
#[derive(Debug, Default)]
pub struct ExprCache {
    entries: RefCell<HashMap<ExpressionId, CacheEntry>>,
    generation: std::cell::Cell<u64>,
}

impl ExprCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized value for `id`, if any, from the current
    /// generation.
    #[must_use]
    pub fn get(&self, id: ExpressionId) -> Option<Value> {
        let entries = self.entries.borrow();
        let entry = entries.get(&id)?;
        (entry.generation == self.generation.get()).then(|| entry.value.clone())
    }

    pub fn insert(&self, id: ExpressionId, value: Value) {
        self.entries.borrow_mut().insert(
            id,
            CacheEntry {
                value,
                generation: self.generation.get(),
            },
        );
    }

    /// Invalidates one expression id's entry (spec §6.1 item 4
    /// "invalidate a specific expression's cached value").
    pub fn invalidate(&self, id: ExpressionId) {
        self.entries.borrow_mut().remove(&id);
    }

    /// Invalidates every cached entry by bumping the generation counter,
    /// called whenever the owning module is edited (spec §6.1 item 4 "a
    /// module edit invalidates every node whose span overlaps the edited
    /// range; in the absence of span-precise invalidation tracking, the
    /// engine may over-invalidate").
    pub fn invalidate_all(&self) {
        self.generation.set(self.generation.get() + 1);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let gen = self.generation.get();
        self.entries.borrow().values().filter(|e| e.generation == gen).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_after_insert_miss_before() {
        let cache = ExprCache::new();
        let id = ExpressionId::new();
        assert!(cache.get(id).is_none());
        cache.insert(id, Value::Long(42));
        assert_eq!(cache.get(id), Some(Value::Long(42)));
    }

    #[test]
    fn invalidate_all_clears_every_entry() {
        let cache = ExprCache::new();
        let id = ExpressionId::new();
        cache.insert(id, Value::Long(1));
        cache.invalidate_all();
        assert!(cache.get(id).is_none());
    }

    #[test]
    fn invalidate_one_leaves_others() {
        let cache = ExprCache::new();
        let a = ExpressionId::new();
        let b = ExpressionId::new();
        cache.insert(a, Value::Long(1));
        cache.insert(b, Value::Long(2));
        cache.invalidate(a);
        assert!(cache.get(a).is_none());
        assert_eq!(cache.get(b), Some(Value::Long(2)));
    }
}
