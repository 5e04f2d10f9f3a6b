//! AST node graph: immutable templates and the mutable runtime tree
//! instantiated from them (spec §3 "AST nodes").

pub mod node;
pub mod template;

pub use node::{CallTarget, ExprNode, NodeKind};
pub use template::{ArgStrategy, ExpressionId, FunctionTemplate, NodeTemplate, SlotId, SourceSpan, TaggedTemplate};
