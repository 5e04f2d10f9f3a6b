//! Types, constructors, and module scopes (spec §3 "Types and scopes").

pub mod ctor;
pub mod scope;

pub use ctor::{CtorId, TypeCtor, TypeId};
pub use scope::{ModuleScope, ModuleScopeData, ModuleScopeHandle};
