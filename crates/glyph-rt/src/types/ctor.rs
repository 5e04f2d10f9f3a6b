//! Type constructors: the runtime's record-shape descriptors.
//!
//! Grounded in the teacher's `types::class::ClassObject`
//! (`crates/ouros/src/types/class.rs`) — a class/constructor descriptor
//! shared by every instance — generalized from Python's single mutable
//! class object into spec §3's `TypeCtor`: an immutable, per-constructor
//! descriptor, with a single-inheritance `supertype` pointer used only by
//! method lookup (spec §3 "Types and scopes").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::{intern::InternedStr, types::scope::ModuleScope};

/// Process-wide counter handing out unique [`TypeId`]s.
///
/// All constructors of one type share a `TypeId`; a type with several
/// constructors (e.g. `Maybe` with `Some`/`None`) is modeled as several
/// [`TypeCtor`]s carrying the same `type_id`.
static NEXT_TYPE_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of a *type* (as opposed to one of its constructors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Fixed sentinel ids for the primitive constructors spec §4.1 names:
    /// every long maps to `Integer`, every double to `Decimal`, and so on.
    /// Carved out of the low end of the id space so they never collide with
    /// a `fresh()` id minted later (the counter starts above them).
    pub const INTEGER: Self = Self(0xFFFF_0001);
    pub const DECIMAL: Self = Self(0xFFFF_0002);
    pub const BOOLEAN: Self = Self(0xFFFF_0003);
    pub const TEXT: Self = Self(0xFFFF_0004);
    pub const FUNCTION: Self = Self(0xFFFF_0005);
    pub const UNIT: Self = Self(0xFFFF_0006);
    pub const ARRAY: Self = Self(0xFFFF_0007);
    pub const ERROR: Self = Self(0xFFFF_0008);
    pub const PANIC: Self = Self(0xFFFF_0009);
}

/// Process-wide `type_id -> supertype` table, consulted by method dispatch
/// to walk the single-inheritance chain upward (spec §4.1 step 2: "Walk the
/// type chain starting at `ctor.type_id`: for each ancestor, consult
/// `scope.methods[type_id][name]`").
///
/// A `TypeCtor` itself only records its *own* supertype; this table is what
/// lets [`crate::types::scope::ModuleScopeHandle::resolve_method`] continue
/// the walk past the receiver's immediate type without needing a `TypeCtor`
/// handle in hand at every step.
fn supertypes() -> &'static RwLock<HashMap<TypeId, Option<TypeId>>> {
    static TABLE: OnceLock<RwLock<HashMap<TypeId, Option<TypeId>>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Returns `type_id`'s direct supertype, if one was registered when its
/// constructor(s) were built.
#[must_use]
pub fn supertype_of(type_id: TypeId) -> Option<TypeId> {
    supertypes().read().get(&type_id).copied().flatten()
}

/// Identity of one constructor of a (possibly multi-constructor) type.
///
/// Method dispatch (spec §4.1) walks the `TypeId` chain, not individual
/// `CtorId`s — but atoms carry their originating `CtorId` for field-name
/// lookups and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtorId(u32);

static NEXT_CTOR_ID: AtomicU32 = AtomicU32::new(0);

impl CtorId {
    fn fresh() -> Self {
        Self(NEXT_CTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A named constructor: `{ type_id, name, arity, field_names[], scope_id }`
/// per spec §3.
///
/// Immutable once built. Shared via `Rc`/`Arc` from every atom it
/// constructs and from the owning `ModuleScope`'s constructor registry.
#[derive(Debug)]
pub struct TypeCtor {
    pub ctor_id: CtorId,
    pub type_id: TypeId,
    pub name: InternedStr,
    pub field_names: Vec<InternedStr>,
    /// The type this constructor's type directly extends, if any. Method
    /// lookup walks this chain upward (spec §4.1 step 2); there is no
    /// multiple inheritance.
    pub supertype: Option<TypeId>,
    /// The module this constructor (and therefore its type's methods) was
    /// declared in; consulted by method dispatch to resolve a receiver's
    /// methods and that module's imports.
    pub defining_scope: ModuleScope,
}

impl TypeCtor {
    #[must_use]
    pub fn new(
        type_id: TypeId,
        name: InternedStr,
        field_names: Vec<InternedStr>,
        supertype: Option<TypeId>,
        defining_scope: ModuleScope,
    ) -> Self {
        supertypes().write().entry(type_id).or_insert(supertype);
        Self {
            ctor_id: CtorId::fresh(),
            type_id,
            name,
            field_names,
            supertype,
            defining_scope,
        }
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.field_names.len()
    }

    /// Builds one of the fixed, process-wide constructors used for
    /// primitive receivers (spec §4.1 step 1: "a primitive whose
    /// constructor is a fixed, per-primitive sentinel").
    #[must_use]
    pub fn primitive(type_id: TypeId, name: InternedStr, home_scope: ModuleScope) -> Self {
        Self {
            ctor_id: CtorId::fresh(),
            type_id,
            name,
            field_names: Vec::new(),
            supertype: None,
            defining_scope: home_scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_type_ids_are_distinct() {
        let a = TypeId::fresh();
        let b = TypeId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn primitive_sentinels_are_stable_constants() {
        assert_eq!(TypeId::INTEGER, TypeId::INTEGER);
        assert_ne!(TypeId::INTEGER, TypeId::DECIMAL);
    }
}
