//! Permission-check constraint trees
//!
//! A [`Constraint`] is the storage-free representation of a rule set: a
//! boolean tree over typed values and named variables that a caller can
//! inspect or solve without touching the database. Variables name fields of
//! the entity under check; opaque `__varN` variables stand in for
//! sub-expressions that could not be represented statically, so a solver
//! reports "cannot decide" instead of silently misjudging.
//!
//! Trees are immutable once built. Comparison operands are always values or
//! variables, never nested sub-trees.

use crate::lower::{self, EmptyAllows, LowerEnv, LowerTarget};
use palisade_schema::{Expr, Model, Schema};
use serde::Serialize;
use serde_json::Value;

/// Type of a constraint value or variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    Boolean,
    Int,
    String,
}

/// A concrete constraint value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConstraintValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl ConstraintValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ConstraintValue::Bool(_) => ValueType::Boolean,
            ConstraintValue::Int(_) => ValueType::Int,
            ConstraintValue::String(_) => ValueType::String,
        }
    }

    /// Evaluate a comparison between two values.
    ///
    /// Returns `None` for mismatched kinds and for orderings a kind does not
    /// support (booleans only compare for equality). Callers treat `None` as
    /// a failed comparison.
    pub fn compare(&self, op: CompareOp, other: &ConstraintValue) -> Option<bool> {
        use ConstraintValue::*;
        match (self, other) {
            (Bool(l), Bool(r)) => match op {
                CompareOp::Eq => Some(l == r),
                _ => None,
            },
            (Int(l), Int(r)) => Some(op.evaluate(l.cmp(r))),
            (String(l), String(r)) => Some(op.evaluate(l.cmp(r))),
            _ => None,
        }
    }

    /// Convert a JSON scalar into a constraint value.
    ///
    /// `None` for null, objects, arrays, and non-integral numbers.
    pub fn from_json(value: &Value) -> Option<ConstraintValue> {
        match value {
            Value::Bool(b) => Some(ConstraintValue::Bool(*b)),
            Value::Number(n) => n.as_i64().map(ConstraintValue::Int),
            Value::String(s) => Some(ConstraintValue::String(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<bool> for ConstraintValue {
    fn from(v: bool) -> Self {
        ConstraintValue::Bool(v)
    }
}

impl From<i64> for ConstraintValue {
    fn from(v: i64) -> Self {
        ConstraintValue::Int(v)
    }
}

impl From<&str> for ConstraintValue {
    fn from(v: &str) -> Self {
        ConstraintValue::String(v.to_string())
    }
}

/// Comparison operators in lowered output.
///
/// There is no not-equal: `!=` lowers to `NOT(eq(..))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    fn evaluate(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Lt => ordering == Less,
            CompareOp::Lte => ordering != Greater,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Gte => ordering != Less,
        }
    }

    /// Mirror the operator across swapped operands (`a < b` ⇔ `b > a`).
    pub fn flip(&self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Lte => CompareOp::Gte,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Gte => CompareOp::Lte,
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompareOp::Eq => "eq",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
        };
        f.write_str(s)
    }
}

/// A comparison operand: always a value or a variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConstraintTerm {
    Value { value: ConstraintValue },
    Variable { name: String, ty: ValueType },
}

impl ConstraintTerm {
    pub fn value(value: impl Into<ConstraintValue>) -> Self {
        ConstraintTerm::Value {
            value: value.into(),
        }
    }

    pub fn variable(name: impl Into<String>, ty: ValueType) -> Self {
        ConstraintTerm::Variable {
            name: name.into(),
            ty,
        }
    }
}

/// A permission-check constraint tree node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Constraint {
    Value {
        value: ConstraintValue,
    },
    Variable {
        name: String,
        ty: ValueType,
    },
    Comparison {
        op: CompareOp,
        left: ConstraintTerm,
        right: ConstraintTerm,
    },
    And {
        children: Vec<Constraint>,
    },
    Or {
        children: Vec<Constraint>,
    },
    Not {
        child: Box<Constraint>,
    },
}

impl Constraint {
    pub fn value(value: impl Into<ConstraintValue>) -> Self {
        Constraint::Value {
            value: value.into(),
        }
    }

    pub fn variable(name: impl Into<String>, ty: ValueType) -> Self {
        Constraint::Variable {
            name: name.into(),
            ty,
        }
    }

    pub fn comparison(op: CompareOp, left: ConstraintTerm, right: ConstraintTerm) -> Self {
        Constraint::Comparison { op, left, right }
    }

    /// Conjunction. Panics on empty input - callers never combine nothing.
    /// A singleton is returned unwrapped.
    pub fn and(mut children: Vec<Constraint>) -> Self {
        assert!(!children.is_empty(), "and() requires at least one child");
        if children.len() == 1 {
            return children.pop().expect("len checked");
        }
        Constraint::And { children }
    }

    /// Disjunction. Panics on empty input; singletons are unwrapped.
    pub fn or(mut children: Vec<Constraint>) -> Self {
        assert!(!children.is_empty(), "or() requires at least one child");
        if children.len() == 1 {
            return children.pop().expect("len checked");
        }
        Constraint::Or { children }
    }

    pub fn not(child: Constraint) -> Self {
        Constraint::Not {
            child: Box::new(child),
        }
    }

    /// True when this is the boolean constant `value`.
    pub fn is_const(&self, value: bool) -> bool {
        matches!(self, Constraint::Value { value: ConstraintValue::Bool(b) } if *b == value)
    }
}

/// Allocator for opaque placeholder variables.
///
/// Names are unique and strictly increasing within one allocator; every
/// compilation unit creates its own so numbering never leaks across calls
/// or models.
#[derive(Debug, Default)]
pub struct FreshVars {
    next: u32,
}

impl FreshVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> String {
        let name = format!("__var{}", self.next);
        self.next += 1;
        name
    }

    pub fn fresh_term(&mut self) -> ConstraintTerm {
        ConstraintTerm::variable(self.fresh(), ValueType::Boolean)
    }

    pub fn fresh_node(&mut self) -> Constraint {
        let name = self.fresh();
        Constraint::variable(name, ValueType::Boolean)
    }
}

/// Resolve an auth-context property for generated checker code.
///
/// A present scalar becomes a value term; anything absent or not
/// representable becomes a fresh opaque variable.
pub fn auth_term_or_fresh(value: Option<&Value>, vars: &mut FreshVars) -> ConstraintTerm {
    match value.and_then(ConstraintValue::from_json) {
        Some(v) => ConstraintTerm::value(v),
        None => vars.fresh_term(),
    }
}

/// Look up a property chain in an auth-context object.
pub fn auth_lookup<'a, S: AsRef<str>>(auth: Option<&'a Value>, path: &[S]) -> Option<&'a Value> {
    let mut current = auth?;
    for seg in path {
        current = current.get(seg.as_ref())?;
    }
    Some(current)
}

/// Lowers rule sets into [`Constraint`] trees.
///
/// The auth snapshot, when provided, substitutes authentication-context
/// references with concrete values; references the snapshot cannot satisfy
/// degrade to fresh opaque variables.
pub struct ConstraintTransformer<'a> {
    schema: &'a Schema,
    model: &'a Model,
    auth: Option<&'a Value>,
}

impl<'a> ConstraintTransformer<'a> {
    pub fn new(schema: &'a Schema, model: &'a Model) -> Self {
        Self {
            schema,
            model,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<&'a Value>) -> Self {
        self.auth = auth;
        self
    }

    /// Lower a rule set into one constraint tree.
    ///
    /// Empty `allows` is constant `false`. Otherwise allows are conjoined
    /// and denies veto: `AND(allows, NOT(OR(denies)))`. The opaque-variable
    /// counter is reset on every call, so identical inputs produce
    /// structurally identical trees.
    pub fn transform_rules(&self, allows: &[&Expr], denies: &[&Expr]) -> Constraint {
        transform_rules_with(
            self.schema,
            self.model,
            allows,
            denies,
            self.auth,
            EmptyAllows::Deny,
        )
    }
}

/// Constraint lowering with an explicit empty-allow behavior; field-level
/// guards pass rows through when they carry only deny rules.
pub(crate) fn transform_rules_with(
    schema: &Schema,
    model: &Model,
    allows: &[&Expr],
    denies: &[&Expr],
    auth: Option<&Value>,
    empty_allows: EmptyAllows,
) -> Constraint {
    let mut target = CheckerTarget {
        auth,
        vars: FreshVars::new(),
    };
    let env = LowerEnv::new(schema, model);
    lower::lower_rule_set(env, &mut target, allows, denies, empty_allows)
}

/// Lowering target producing constraint trees.
struct CheckerTarget<'a> {
    auth: Option<&'a Value>,
    vars: FreshVars,
}

impl LowerTarget for CheckerTarget<'_> {
    type Term = ConstraintTerm;
    type Pred = Constraint;

    fn literal(&mut self, value: ConstraintValue) -> ConstraintTerm {
        ConstraintTerm::Value { value }
    }

    fn field_term(&mut self, name: &str, ty: ValueType) -> Option<ConstraintTerm> {
        Some(ConstraintTerm::variable(name, ty))
    }

    fn relation_term(&mut self, _path: &[String], _ty: ValueType) -> Option<ConstraintTerm> {
        // Cross-model state is not visible to a storage-free check.
        None
    }

    fn auth_term(&mut self, path: &[String], _ty: Option<ValueType>) -> Option<ConstraintTerm> {
        match auth_lookup(self.auth, path) {
            Some(value) if !value.is_null() => ConstraintValue::from_json(value)
                .map(|v| ConstraintTerm::Value { value: v }),
            // Principal shape not proven present: guarded fallback.
            _ => Some(self.vars.fresh_term()),
        }
    }

    fn compare(
        &mut self,
        op: CompareOp,
        left: ConstraintTerm,
        right: ConstraintTerm,
        _positive: bool,
    ) -> Constraint {
        Constraint::Comparison { op, left, right }
    }

    fn truth(&mut self, term: ConstraintTerm) -> Constraint {
        match term {
            ConstraintTerm::Value { value } => Constraint::Value { value },
            ConstraintTerm::Variable { name, ty } => Constraint::Variable { name, ty },
        }
    }

    fn constant(&mut self, value: bool) -> Constraint {
        Constraint::value(value)
    }

    fn and(&mut self, children: Vec<Constraint>) -> Constraint {
        Constraint::and(children)
    }

    fn or(&mut self, children: Vec<Constraint>) -> Constraint {
        Constraint::or(children)
    }

    fn not(&mut self, child: Constraint) -> Constraint {
        Constraint::not(child)
    }

    fn opaque(&mut self, _positive: bool) -> Constraint {
        self.vars.fresh_node()
    }
}
