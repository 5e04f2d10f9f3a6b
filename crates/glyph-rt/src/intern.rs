//! Process-wide symbol interner.
//!
//! Per spec §9 "Global mutable state": a process-wide symbol interner is the
//! only global in the system. Its lifecycle is initialize-at-startup,
//! read-only-during-execution, flush-at-shutdown. Modeled after the
//! teacher's `intern::StringId` (`crates/ouros/src/intern.rs`): a small
//! `Copy` index type backed by a table, rather than reference-counting every
//! occurrence of a symbol name.
//!
//! Symbol equality throughout the engine (method names, scope lookups, PIC
//! keys) is index equality here, which stands in for the "interned-pointer
//! equality" spec §4.1 requires: two `InternedStr`s compare equal iff they
//! were interned from the same text, and the comparison is an integer
//! compare, not a string compare.

use std::sync::OnceLock;

use parking_lot::RwLock;

/// An interned symbol: a method name, type name, or variable name.
///
/// `Copy` and cheap to compare/hash; the canonical text lives in the global
/// [`Interner`] table and is looked up only for error messages and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternedStr(u32);

impl InternedStr {
    #[must_use]
    pub fn as_str(self) -> String {
        resolve(self)
    }
}

impl std::fmt::Display for InternedStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", resolve(*self))
    }
}

#[derive(Default)]
struct InternerTable {
    strings: Vec<String>,
    by_text: std::collections::HashMap<String, u32>,
}

fn global_table() -> &'static RwLock<InternerTable> {
    static TABLE: OnceLock<RwLock<InternerTable>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(InternerTable::default()))
}

/// Interns `text`, returning the canonical [`InternedStr`] for it.
///
/// Subsequent calls with the same text return the same id. Safe to call from
/// any thread; the writer lock is held only for the duration of the
/// insertion, and only when `text` was not already interned.
pub fn intern(text: &str) -> InternedStr {
    {
        let table = global_table().read();
        if let Some(&id) = table.by_text.get(text) {
            return InternedStr(id);
        }
    }
    let mut table = global_table().write();
    // Re-check: another thread may have interned `text` while we waited for
    // the write lock.
    if let Some(&id) = table.by_text.get(text) {
        return InternedStr(id);
    }
    let id = u32::try_from(table.strings.len()).expect("symbol table exhausted u32 index space");
    table.strings.push(text.to_owned());
    table.by_text.insert(text.to_owned(), id);
    InternedStr(id)
}

/// Resolves an [`InternedStr`] back to its text.
///
/// # Panics
/// Panics if `id` was not produced by [`intern`] on this process — this
/// would indicate an `InternedStr` crossed a process boundary, which is not
/// a supported usage.
#[must_use]
pub fn resolve(id: InternedStr) -> String {
    let table = global_table().read();
    table
        .strings
        .get(id.0 as usize)
        .cloned()
        .unwrap_or_else(|| panic!("InternedStr({}) not present in this process's interner", id.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_interns_to_same_id() {
        let a = intern("squareNorm");
        let b = intern("squareNorm");
        assert_eq!(a, b);
    }

    #[test]
    fn different_text_interns_to_different_id() {
        let a = intern("foo_unique_1");
        let b = intern("bar_unique_2");
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_resolve() {
        let id = intern("round_trip_me");
        assert_eq!(resolve(id), "round_trip_me");
    }
}
