//! Access-policy compilation for palisade schemas
//!
//! This crate lowers the declarative `@@allow`/`@@deny` (model) and
//! `@allow`/`@deny` (field) rules of a [`palisade_schema::Schema`] into the
//! executable artifacts an authorization-enforcing runtime consumes:
//!
//! - **Query guards** ([`QueryFilter`]): single-table predicates merged into
//!   database queries before execution
//! - **Permission checkers** ([`Constraint`]): storage-free constraint trees
//!   for static "can I do X" decisions
//! - **Entity checkers** ([`EntityChecker`]): post-fetch predicates for
//!   rules that cross relation boundaries, paired with the exact field
//!   selection they read
//! - **Input checkers** ([`InputChecker`]): create-payload predicates for
//!   rule sets decidable from the write input alone
//!
//! # Core Types
//!
//! - [`compile_policies`]: compile a schema into one [`PolicyMap`] plus a
//!   [`PolicyRegistry`] of resolvable function references and the rendered
//!   shared output unit
//! - [`ConstraintTransformer`]: the rule-set to constraint-tree lowering
//! - [`QueryGuardBuilder`]: the parallel lowering into query filters
//! - [`selection_for_rules`]: minimal fetched-data selection for a rule set
//!
//! # Semantics
//!
//! Allow rules are conjoined and deny rules veto: a rule set lowers to
//! `AND(allows, NOT(OR(denies)))`, an empty allow set to constant `false`.
//! Every representation is produced by one shared lowering pass, so query
//! guards, checkers, and rendered source cannot drift apart. Expressions
//! with no static representation degrade to opaque placeholders - soundness
//! over precision, never an error.
//!
//! Compilation is synchronous and pure: all mutable state (the opaque
//! variable counter, the output buffer) is scoped to a single call, so
//! repeated compilations of the same input are byte-identical.

mod analyze;
mod assemble;
mod collect;
mod constraint;
mod entity;
mod error;
mod guard;
mod lower;
mod render;
mod select;

pub use analyze::Guard;
pub use assemble::{
    compile_policies, CompiledPolicies, DynamicGuard, FieldLevel, FieldPolicy, ModelLevel,
    ModelPolicy, OpPolicy, PolicyFunction, PolicyMap, PolicyOptions, PolicyRegistry,
};
pub use collect::{policy_expressions, PolicyTarget, RuleScope};
pub use constraint::{
    auth_lookup, auth_term_or_fresh, CompareOp, Constraint, ConstraintTerm, ConstraintTransformer,
    ConstraintValue, FreshVars, ValueType,
};
pub use entity::{
    compare_opt, object_path_value, truthy, EntityChecker, InputChecker, ObjectPredicate,
    ObjectTerm,
};
pub use error::{PolicyError, Result};
pub use guard::{auth_value, compare_values_or, QueryFilter, QueryGuardBuilder};
pub use render::SourceBuffer;
pub use select::{selection_for_rules, Selection, SelectionTree};
