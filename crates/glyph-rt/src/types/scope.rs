//! Module scopes: the per-module namespace of constructors and methods.
//!
//! Grounded in the teacher's `Namespace`/module-globals handling in
//! `crates/ouros/src/namespace.rs` and `prepare.rs` — a per-module mapping
//! from name to definition, reachable from many execution contexts at once.
//! Spec §5 "Concurrency model" calls module scope "many-readers/one-writer";
//! this is `parking_lot::RwLock` rather than the teacher's single-writer
//! `RefCell`, since here the writer (an `edit_module` call) genuinely races
//! with readers on other worker threads.

use std::{
    collections::HashMap,
    rc::Rc,
    sync::{Arc, Weak},
};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::{
    ast::template::FunctionTemplate,
    intern::InternedStr,
    types::ctor::{TypeCtor, TypeId},
};

/// The mutable content of a module scope.
#[derive(Debug)]
pub struct ModuleScopeData {
    pub name: InternedStr,
    /// Constructors declared in this module, keyed by their own name.
    /// `IndexMap` rather than `HashMap` since `declared_constructors`
    /// reports them back in declaration order, the way a module's type list
    /// is presented to a host IDE.
    constructors: IndexMap<InternedStr, Rc<TypeCtor>>,
    /// Per-type method tables: `type_id -> (method_name -> template)`.
    /// Spec §3 "a mapping from `type_id` to (mapping from method-name to
    /// `Function`)".
    methods: HashMap<TypeId, HashMap<InternedStr, Rc<FunctionTemplate>>>,
    /// Other scopes this module imports from, consulted after `methods`
    /// misses locally (spec §3 "declared imports (weak references to other
    /// module scopes)"). Weak because import cycles between modules must
    /// not keep either alive past its owning `Engine`.
    imports: Vec<Weak<RwLock<ModuleScopeData>>>,
    /// When `Some`, an in-memory source string shadowing the module's
    /// on-disk content (spec §6.1 items 4/5, `setExpressionValue`-adjacent
    /// "edit a module's literal source, then reset to the on-disk version").
    literal_source: Option<String>,
}

impl ModuleScopeData {
    fn new(name: InternedStr) -> Self {
        Self {
            name,
            constructors: IndexMap::new(),
            methods: HashMap::new(),
            imports: Vec::new(),
            literal_source: None,
        }
    }
}

/// A shared, mutable handle to one module's scope.
///
/// Cloning is cheap (an `Arc` bump); every clone observes the same
/// underlying data.
#[derive(Debug, Clone)]
pub struct ModuleScopeHandle(Arc<RwLock<ModuleScopeData>>);

pub type ModuleScope = ModuleScopeHandle;

impl ModuleScopeHandle {
    #[must_use]
    pub fn new(name: InternedStr) -> Self {
        Self(Arc::new(RwLock::new(ModuleScopeData::new(name))))
    }

    #[must_use]
    pub fn downgrade(&self) -> Weak<RwLock<ModuleScopeData>> {
        Arc::downgrade(&self.0)
    }

    pub fn register_constructor(&self, ctor: Rc<TypeCtor>) {
        self.0.write().constructors.insert(ctor.name, ctor);
    }

    #[must_use]
    pub fn lookup_constructor(&self, name: InternedStr) -> Option<Rc<TypeCtor>> {
        self.0.read().constructors.get(&name).cloned()
    }

    /// Every constructor registered in this module, in declaration order.
    #[must_use]
    pub fn declared_constructors(&self) -> Vec<Rc<TypeCtor>> {
        self.0.read().constructors.values().cloned().collect()
    }

    pub fn define_method(&self, type_id: TypeId, method_name: InternedStr, template: Rc<FunctionTemplate>) {
        self.0
            .write()
            .methods
            .entry(type_id)
            .or_default()
            .insert(method_name, template);
    }

    pub fn add_import(&self, other: &Self) {
        self.0.write().imports.push(other.downgrade());
    }

    /// Looks up `method_name` on `type_id` in this module only, not
    /// following the supertype chain or imports — callers that need the
    /// full method-resolution order use [`Self::resolve_method`].
    #[must_use]
    fn local_method(&self, type_id: TypeId, method_name: InternedStr) -> Option<Rc<FunctionTemplate>> {
        self.0.read().methods.get(&type_id)?.get(&method_name).cloned()
    }

    /// Full method lookup: walks the single-inheritance `type_id` chain
    /// starting at the receiver's own type, consulting this module's own
    /// table and then its live imports at each ancestor before continuing
    /// upward (spec §4.1 step 2: "Walk the type chain starting at
    /// `ctor.type_id`: for each ancestor, consult `scope.methods[type_id][name]`.
    /// The first hit wins").
    #[must_use]
    pub fn resolve_method(&self, type_id: TypeId, method_name: InternedStr) -> Option<Rc<FunctionTemplate>> {
        let mut current = Some(type_id);
        while let Some(ty) = current {
            if let Some(found) = self.local_method(ty, method_name) {
                return Some(found);
            }
            for import in &self.0.read().imports {
                if let Some(scope) = import.upgrade() {
                    if let Some(found) = ModuleScopeHandle(scope).local_method(ty, method_name) {
                        return Some(found);
                    }
                }
            }
            current = crate::types::ctor::supertype_of(ty);
        }
        None
    }

    #[must_use]
    pub fn literal_source(&self) -> Option<String> {
        self.0.read().literal_source.clone()
    }

    pub fn set_literal_source(&self, source: impl Into<String>) {
        self.0.write().literal_source = Some(source.into());
    }

    /// Discards any in-memory override, falling back to the on-disk module
    /// content the host process is responsible for supplying (spec §6.1
    /// item 5 "reset a module back to its on-disk source").
    pub fn reset_to_on_disk(&self) {
        self.0.write().literal_source = None;
    }
}

static PRIMITIVES_SCOPE: std::sync::OnceLock<ModuleScope> = std::sync::OnceLock::new();

/// The single, process-wide module scope methods on primitive receivers
/// (`Integer`, `Decimal`, `Boolean`, `Text`, `Function`, `Array`, `Unit`)
/// resolve against. Primitives have no module of their own to carry a
/// `defining_scope`, so method dispatch on them falls back to this shared
/// scope instead of a fresh, empty one that could never accumulate
/// definitions across calls.
#[must_use]
pub fn primitives_scope() -> ModuleScope {
    PRIMITIVES_SCOPE
        .get_or_init(|| ModuleScopeHandle::new(crate::intern::intern("<primitives>")))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;

    #[test]
    fn method_lookup_falls_back_to_import() {
        let base = ModuleScopeHandle::new(intern("Base"));
        let derived = ModuleScopeHandle::new(intern("Derived"));
        derived.add_import(&base);

        let ty = TypeId::fresh();
        let template = FunctionTemplate::new(
            intern("greet"),
            0,
            Vec::new(),
            Vec::new(),
            0,
            crate::ast::template::TaggedTemplate::new(crate::ast::template::NodeTemplate::Literal(
                crate::values::Value::Unit,
            )),
            None,
            base.clone(),
        );
        base.define_method(ty, intern("greet"), template);

        assert!(derived.resolve_method(ty, intern("greet")).is_some());
        assert!(derived.resolve_method(ty, intern("nonexistent")).is_none());
    }

    #[test]
    fn method_lookup_walks_the_supertype_chain() {
        let scope = ModuleScopeHandle::new(intern("M"));
        let base_ty = TypeId::fresh();
        let derived_ty = TypeId::fresh();
        // Registering a `TypeCtor` for `derived_ty` with `base_ty` as its
        // supertype is what records the chain `resolve_method` walks.
        let _derived_ctor = TypeCtor::new(derived_ty, intern("Derived"), Vec::new(), Some(base_ty), scope.clone());

        let template = FunctionTemplate::new(
            intern("describe"),
            0,
            Vec::new(),
            Vec::new(),
            0,
            crate::ast::template::TaggedTemplate::new(crate::ast::template::NodeTemplate::Literal(
                crate::values::Value::Unit,
            )),
            None,
            scope.clone(),
        );
        // Only the base type has a `describe` method; a receiver of the
        // derived type must still find it by walking up from its own
        // `type_id` (spec §4.1 step 2).
        scope.define_method(base_ty, intern("describe"), template);

        assert!(scope.resolve_method(derived_ty, intern("describe")).is_some());
        assert!(scope.resolve_method(derived_ty, intern("nonexistent")).is_none());
    }

    #[test]
    fn declared_constructors_preserve_registration_order() {
        let scope = ModuleScopeHandle::new(intern("M"));
        let first = Rc::new(TypeCtor::new(TypeId::fresh(), intern("First"), Vec::new(), None, scope.clone()));
        let second = Rc::new(TypeCtor::new(TypeId::fresh(), intern("Second"), Vec::new(), None, scope.clone()));
        scope.register_constructor(Rc::clone(&first));
        scope.register_constructor(Rc::clone(&second));

        let names: Vec<InternedStr> = scope.declared_constructors().iter().map(|c| c.name).collect();
        assert_eq!(names, vec![first.name, second.name]);
    }

    #[test]
    fn literal_source_override_resets_to_on_disk() {
        let scope = ModuleScopeHandle::new(intern("M"));
        assert_eq!(scope.literal_source(), None);
        scope.set_literal_source("main = 1 + 1");
        assert_eq!(scope.literal_source().as_deref(), Some("main = 1 + 1"));
        scope.reset_to_on_disk();
        assert_eq!(scope.literal_source(), None);
    }
}
