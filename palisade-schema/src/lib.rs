//! Data-model schema and rule expression AST
//!
//! This crate is the structured input to the palisade policy compiler:
//!
//! - [`Schema`] / [`Model`] / [`Field`]: the data model with its relations,
//!   defaults, foreign keys, and delegate (polymorphic base) markers
//! - [`PolicyRule`]: `@@allow`/`@@deny` and `@allow`/`@deny` declarations,
//!   kept in declaration order
//! - [`Expr`]: the rule-condition AST produced by the DSL front-end, each
//!   node optionally carrying a statically resolved [`ScalarType`]
//!
//! Parsing the DSL text and translating the model into a storage schema
//! happen upstream; nothing in this crate reads or writes files.

mod expr;
mod model;
mod types;

pub use expr::{BinaryOp, Expr, ExprKind, Literal, UnaryOp, AUTH_FN};
pub use model::{
    AccessKind, Field, FieldType, FieldValidator, Model, PolicyOp, PolicyRule, Relation, RuleKind,
    Schema,
};
pub use types::ScalarType;
