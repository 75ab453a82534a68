//! Query-level guard predicates
//!
//! A [`QueryFilter`] is a single-table predicate merged into a partial query
//! before execution: comparisons over the model's own columns, combined with
//! and/or/not. Guards use two-valued logic - an operand that cannot be
//! resolved at guard-build time collapses the enclosing comparison to a
//! constant chosen by polarity, so unknown always denies:
//!
//! - under positive polarity the comparison becomes `false` (no rows match)
//! - under an odd number of negations it becomes `true` (the veto fires)
//!
//! Cross-model comparisons never reach a query guard; the rule collector
//! routes them to entity checkers instead.

use crate::constraint::{CompareOp, ConstraintValue, ValueType};
use crate::lower::{self, EmptyAllows, LowerEnv, LowerTarget};
use palisade_schema::{Expr, Model, Schema};
use serde::Serialize;
use serde_json::Value;

/// A predicate over the guarded model's own columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QueryFilter {
    Const {
        value: bool,
    },
    /// Truthiness of a boolean column.
    Field {
        field: String,
    },
    Compare {
        field: String,
        op: CompareOp,
        value: ConstraintValue,
    },
    /// Column-to-column comparison on the same row.
    CompareFields {
        left: String,
        op: CompareOp,
        right: String,
    },
    And {
        children: Vec<QueryFilter>,
    },
    Or {
        children: Vec<QueryFilter>,
    },
    Not {
        child: Box<QueryFilter>,
    },
}

impl QueryFilter {
    pub fn constant(value: bool) -> Self {
        QueryFilter::Const { value }
    }

    pub fn field(name: impl Into<String>) -> Self {
        QueryFilter::Field { field: name.into() }
    }

    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<ConstraintValue>) -> Self {
        QueryFilter::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn compare_fields(
        left: impl Into<String>,
        op: CompareOp,
        right: impl Into<String>,
    ) -> Self {
        QueryFilter::CompareFields {
            left: left.into(),
            op,
            right: right.into(),
        }
    }

    /// Comparison against an optional value; `None` falls back to a
    /// constant. Generated guard code uses this for auth-context lookups
    /// whose presence is only known at query time.
    pub fn compare_or(
        field: impl Into<String>,
        op: CompareOp,
        value: Option<ConstraintValue>,
        fallback: bool,
    ) -> Self {
        match value {
            Some(value) => QueryFilter::compare(field, op, value),
            None => QueryFilter::constant(fallback),
        }
    }

    /// Conjunction with constant folding. Panics on empty input.
    pub fn and(children: Vec<QueryFilter>) -> Self {
        assert!(!children.is_empty(), "and() requires at least one child");
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            match child {
                QueryFilter::Const { value: false } => return QueryFilter::constant(false),
                QueryFilter::Const { value: true } => {}
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => QueryFilter::constant(true),
            1 => kept.pop().expect("len checked"),
            _ => QueryFilter::And { children: kept },
        }
    }

    /// Disjunction with constant folding. Panics on empty input.
    pub fn or(children: Vec<QueryFilter>) -> Self {
        assert!(!children.is_empty(), "or() requires at least one child");
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            match child {
                QueryFilter::Const { value: true } => return QueryFilter::constant(true),
                QueryFilter::Const { value: false } => {}
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => QueryFilter::constant(false),
            1 => kept.pop().expect("len checked"),
            _ => QueryFilter::Or { children: kept },
        }
    }

    pub fn negate(child: QueryFilter) -> Self {
        match child {
            QueryFilter::Const { value } => QueryFilter::constant(!value),
            other => QueryFilter::Not {
                child: Box::new(other),
            },
        }
    }

    /// Merge this guard into an existing query predicate.
    pub fn and_with(self, other: QueryFilter) -> Self {
        QueryFilter::and(vec![self, other])
    }

    pub fn is_const(&self, value: bool) -> bool {
        matches!(self, QueryFilter::Const { value: v } if *v == value)
    }
}

/// Look up an auth-context property chain as a comparable value.
///
/// Used by generated guard code; `None` for absent paths, nulls, and
/// non-scalar values.
pub fn auth_value<S: AsRef<str>>(auth: Option<&Value>, path: &[S]) -> Option<ConstraintValue> {
    let mut current = auth?;
    for seg in path {
        current = current.get(seg.as_ref())?;
    }
    ConstraintValue::from_json(current)
}

/// Fold a comparison of optional values into a constant filter.
///
/// Generated guard code uses this when neither operand is a column; an
/// unresolved operand yields the polarity-chosen `fallback`.
pub fn compare_values_or(
    left: Option<ConstraintValue>,
    op: CompareOp,
    right: Option<ConstraintValue>,
    fallback: bool,
) -> QueryFilter {
    match (left, right) {
        (Some(l), Some(r)) => QueryFilter::constant(l.compare(op, &r).unwrap_or(false)),
        _ => QueryFilter::constant(fallback),
    }
}

/// Builds query guards from rule sets.
pub struct QueryGuardBuilder<'a> {
    schema: &'a Schema,
    model: &'a Model,
    auth: Option<&'a Value>,
}

impl<'a> QueryGuardBuilder<'a> {
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

    /// Lower a rule set into a query filter.
    ///
    /// `deferred_allows` marks a rule set whose allow rules all live in a
    /// post-fetch checker: the guard then passes rows through (denies still
    /// veto) instead of denying everything.
    pub fn build(&self, allows: &[&Expr], denies: &[&Expr], deferred_allows: bool) -> QueryFilter {
        let empty_allows = if deferred_allows {
            EmptyAllows::Pass
        } else {
            EmptyAllows::Deny
        };
        let mut target = QueryTarget { auth: self.auth };
        let env = LowerEnv::new(self.schema, self.model);
        lower::lower_rule_set(env, &mut target, allows, denies, empty_allows)
    }
}

/// A resolved query operand.
enum QueryTerm {
    Value(ConstraintValue),
    Column(String),
}

/// Lowering target producing query filters.
struct QueryTarget<'a> {
    auth: Option<&'a Value>,
}

impl LowerTarget for QueryTarget<'_> {
    type Term = QueryTerm;
    type Pred = QueryFilter;

    fn literal(&mut self, value: ConstraintValue) -> QueryTerm {
        QueryTerm::Value(value)
    }

    fn field_term(&mut self, name: &str, _ty: ValueType) -> Option<QueryTerm> {
        Some(QueryTerm::Column(name.to_string()))
    }

    fn relation_term(&mut self, _path: &[String], _ty: ValueType) -> Option<QueryTerm> {
        // Not a single-table predicate.
        None
    }

    fn auth_term(&mut self, path: &[String], _ty: Option<ValueType>) -> Option<QueryTerm> {
        let mut current = self.auth?;
        for seg in path {
            current = current.get(seg)?;
        }
        ConstraintValue::from_json(current).map(QueryTerm::Value)
    }

    fn compare(
        &mut self,
        op: CompareOp,
        left: QueryTerm,
        right: QueryTerm,
        _positive: bool,
    ) -> QueryFilter {
        match (left, right) {
            (QueryTerm::Column(field), QueryTerm::Value(value)) => {
                QueryFilter::compare(field, op, value)
            }
            (QueryTerm::Value(value), QueryTerm::Column(field)) => {
                QueryFilter::compare(field, op.flip(), value)
            }
            (QueryTerm::Column(left), QueryTerm::Column(right)) => QueryFilter::CompareFields {
                left,
                op,
                right,
            },
            (QueryTerm::Value(l), QueryTerm::Value(r)) => {
                QueryFilter::constant(l.compare(op, &r).unwrap_or(false))
            }
        }
    }

    fn truth(&mut self, term: QueryTerm) -> QueryFilter {
        match term {
            QueryTerm::Column(field) => QueryFilter::Field { field },
            QueryTerm::Value(ConstraintValue::Bool(b)) => QueryFilter::constant(b),
            QueryTerm::Value(_) => QueryFilter::constant(true),
        }
    }

    fn constant(&mut self, value: bool) -> QueryFilter {
        QueryFilter::constant(value)
    }

    fn and(&mut self, children: Vec<QueryFilter>) -> QueryFilter {
        QueryFilter::and(children)
    }

    fn or(&mut self, children: Vec<QueryFilter>) -> QueryFilter {
        QueryFilter::or(children)
    }

    fn not(&mut self, child: QueryFilter) -> QueryFilter {
        QueryFilter::negate(child)
    }

    fn opaque(&mut self, positive: bool) -> QueryFilter {
        QueryFilter::constant(!positive)
    }
}
