//! Shared rule-lowering core
//!
//! Every output representation of a rule set (permission-check constraint
//! trees, query guards, entity/input predicates, rendered source) is produced
//! by the same recursive pass over the rule AST, parameterized by a
//! [`LowerTarget`]. Keeping one pass prevents the representations from
//! drifting apart semantically: they can differ only in how terms and
//! predicates are materialized, never in how rules combine.
//!
//! # Combination semantics
//!
//! `allow` rules are conjoined: permission holds only if every allow rule
//! passes. `deny` rules veto: any firing deny removes permission. Lowered as
//! `AND(allows, NOT(OR(denies)))`, with singleton combinators unwrapped.
//!
//! # Degradation
//!
//! Lowering never fails. A sub-expression with no representation in the
//! target becomes an opaque placeholder via [`LowerTarget::opaque`], which
//! receives the boolean polarity at the point of degradation so targets that
//! collapse unknowns to constants can stay conservative (unknown always
//! denies, under any number of negations).

use crate::constraint::{CompareOp, ConstraintValue, ValueType};
use palisade_schema::{BinaryOp, Expr, ExprKind, Literal, Model, Schema, UnaryOp};

/// Lowering environment: the schema and the model the rules are declared on.
#[derive(Clone, Copy)]
pub(crate) struct LowerEnv<'a> {
    pub schema: &'a Schema,
    pub model: &'a Model,
}

impl<'a> LowerEnv<'a> {
    pub fn new(schema: &'a Schema, model: &'a Model) -> Self {
        Self { schema, model }
    }
}

/// A field reference resolved against the enclosing model.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResolvedRef {
    /// Scalar field of the enclosing model, of a comparable type.
    Field { name: String, ty: ValueType },
    /// Path through to-one relations ending at a comparable scalar of
    /// another model.
    Relation { path: Vec<String>, ty: ValueType },
}

/// Resolve a `this.`-rooted or bare field reference.
///
/// Returns `None` when the path does not resolve to a comparable scalar:
/// unknown fields, to-many traversal, non-comparable leaf types. Callers
/// degrade those to opaque operands.
pub(crate) fn resolve_entity_ref(env: LowerEnv<'_>, expr: &Expr) -> Option<ResolvedRef> {
    let path = expr.entity_path()?;
    let (last, rels) = path.split_last()?;

    let mut current = env.model;
    for seg in rels {
        let field = current.field(seg)?;
        let rel = field.relation_info()?;
        if rel.many {
            return None;
        }
        current = env.schema.model(&rel.model)?;
    }

    let leaf = current.field(last)?;
    let ty = value_type(leaf.scalar_type()?)?;
    if rels.is_empty() {
        Some(ResolvedRef::Field {
            name: last.to_string(),
            ty,
        })
    } else {
        Some(ResolvedRef::Relation {
            path: path.iter().map(|s| s.to_string()).collect(),
            ty,
        })
    }
}

/// Comparable subset of scalar types carried through lowering.
pub(crate) fn value_type(ty: palisade_schema::ScalarType) -> Option<ValueType> {
    use palisade_schema::ScalarType;
    match ty {
        ScalarType::Boolean => Some(ValueType::Boolean),
        ScalarType::Int => Some(ValueType::Int),
        ScalarType::String => Some(ValueType::String),
        _ => None,
    }
}

/// Constraint value of a literal, when it has one.
pub(crate) fn literal_value(lit: &Literal) -> Option<ConstraintValue> {
    match lit {
        Literal::Bool(b) => Some(ConstraintValue::Bool(*b)),
        Literal::Int(i) => Some(ConstraintValue::Int(*i)),
        Literal::String(s) => Some(ConstraintValue::String(s.clone())),
        Literal::Float(_) => None,
    }
}

/// Map a comparison operator into the lowered operator set.
///
/// `!=` never reaches this dispatch (it lowers to `NOT(eq(..))` upstream);
/// non-comparison operators reaching it are a caller contract violation.
pub(crate) fn comparison_op(op: BinaryOp) -> CompareOp {
    match op {
        BinaryOp::Eq => CompareOp::Eq,
        BinaryOp::Lt => CompareOp::Lt,
        BinaryOp::Lte => CompareOp::Lte,
        BinaryOp::Gt => CompareOp::Gt,
        BinaryOp::Gte => CompareOp::Gte,
        other => unreachable!("operator {:?} is not a lowered comparison", other),
    }
}

/// Target representation of one lowering pass.
///
/// `Term` is a comparison operand; `Pred` a boolean node. Term constructors
/// return `Option` so a target can refuse shapes it cannot express (the
/// enclosing comparison then degrades to opaque).
pub(crate) trait LowerTarget {
    type Term;
    type Pred;

    fn literal(&mut self, value: ConstraintValue) -> Self::Term;
    /// Scalar field of the enclosing model.
    fn field_term(&mut self, name: &str, ty: ValueType) -> Option<Self::Term>;
    /// Relation path into another model.
    fn relation_term(&mut self, path: &[String], ty: ValueType) -> Option<Self::Term>;
    /// Authentication-context property chain (never empty).
    fn auth_term(&mut self, path: &[String], ty: Option<ValueType>) -> Option<Self::Term>;

    /// Build a comparison. `positive` is the polarity at the comparison
    /// site, for targets that must pick a conservative fallback when an
    /// operand resolves only later.
    fn compare(
        &mut self,
        op: CompareOp,
        left: Self::Term,
        right: Self::Term,
        positive: bool,
    ) -> Self::Pred;
    /// A term standing alone in boolean position.
    fn truth(&mut self, term: Self::Term) -> Self::Pred;
    fn constant(&mut self, value: bool) -> Self::Pred;
    fn and(&mut self, children: Vec<Self::Pred>) -> Self::Pred;
    fn or(&mut self, children: Vec<Self::Pred>) -> Self::Pred;
    fn not(&mut self, child: Self::Pred) -> Self::Pred;
    /// Unrepresentable sub-expression. `positive` is the polarity at the
    /// point of degradation.
    fn opaque(&mut self, positive: bool) -> Self::Pred;
}

/// How a lowering treats an empty allow set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EmptyAllows {
    /// No allow rule, no permission.
    Deny,
    /// Allow rules exist but are enforced elsewhere (deferred to a
    /// post-fetch checker or to the query guard); denies still veto.
    Pass,
}

/// Lower a rule set with the standard combination semantics.
pub(crate) fn lower_rule_set<T: LowerTarget>(
    env: LowerEnv<'_>,
    target: &mut T,
    allows: &[&Expr],
    denies: &[&Expr],
    empty_allows: EmptyAllows,
) -> T::Pred {
    let base = if allows.is_empty() {
        match empty_allows {
            EmptyAllows::Deny => return target.constant(false),
            EmptyAllows::Pass => None,
        }
    } else {
        let preds = allows
            .iter()
            .map(|e| lower_expr(env, target, e, true))
            .collect();
        Some(combine(target, preds, Combinator::And))
    };

    if denies.is_empty() {
        return match base {
            Some(pred) => pred,
            None => target.constant(true),
        };
    }

    let deny_preds = denies
        .iter()
        .map(|e| lower_expr(env, target, e, false))
        .collect();
    let deny_combo = combine(target, deny_preds, Combinator::Or);
    let veto = target.not(deny_combo);

    match base {
        Some(pred) => target.and(vec![pred, veto]),
        None => veto,
    }
}

/// Lower a create rule set against the write input: denies veto, and any
/// single allow suffices (the input is checked before per-rule guards can
/// narrow it). No allow rules, no permission.
pub(crate) fn lower_input_rules<T: LowerTarget>(
    env: LowerEnv<'_>,
    target: &mut T,
    allows: &[&Expr],
    denies: &[&Expr],
) -> T::Pred {
    if allows.is_empty() {
        return target.constant(false);
    }

    let allow_preds = allows
        .iter()
        .map(|e| lower_expr(env, target, e, true))
        .collect();
    let allow_combo = combine(target, allow_preds, Combinator::Or);

    if denies.is_empty() {
        return allow_combo;
    }

    let deny_preds = denies
        .iter()
        .map(|e| lower_expr(env, target, e, false))
        .collect();
    let deny_combo = combine(target, deny_preds, Combinator::Or);
    let veto = target.not(deny_combo);
    target.and(vec![veto, allow_combo])
}

enum Combinator {
    And,
    Or,
}

/// Combine lowered rules, unwrapping singletons. Empty input is a caller
/// bug: rule-set entry points check emptiness before lowering.
fn combine<T: LowerTarget>(target: &mut T, mut preds: Vec<T::Pred>, combinator: Combinator) -> T::Pred {
    assert!(!preds.is_empty(), "combinator requires at least one child");
    if preds.len() == 1 {
        return preds.pop().expect("len checked");
    }
    match combinator {
        Combinator::And => target.and(preds),
        Combinator::Or => target.or(preds),
    }
}

/// Lower one rule expression in boolean position.
pub(crate) fn lower_expr<T: LowerTarget>(
    env: LowerEnv<'_>,
    target: &mut T,
    expr: &Expr,
    positive: bool,
) -> T::Pred {
    match &expr.kind {
        ExprKind::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let l = lower_expr(env, target, left, positive);
                let r = lower_expr(env, target, right, positive);
                target.and(vec![l, r])
            }
            BinaryOp::Or => {
                let l = lower_expr(env, target, left, positive);
                let r = lower_expr(env, target, right, positive);
                target.or(vec![l, r])
            }
            // `!=` is `NOT(eq(..))`; there is no dedicated operator for it.
            BinaryOp::Ne => {
                let inner = lower_comparison(env, target, BinaryOp::Eq, left, right, !positive);
                target.not(inner)
            }
            op if op.is_comparison() => lower_comparison(env, target, *op, left, right, positive),
            // Array membership has no lowered form.
            _ => target.opaque(positive),
        },
        ExprKind::Unary { op, operand } => match op {
            UnaryOp::Not => {
                let inner = lower_expr(env, target, operand, !positive);
                target.not(inner)
            }
            UnaryOp::Neg => target.opaque(positive),
        },
        ExprKind::Literal(lit) => match literal_value(lit) {
            Some(value) => {
                let term = target.literal(value);
                target.truth(term)
            }
            None => target.opaque(positive),
        },
        // A bare boolean field (or `this.field`) in boolean position.
        ExprKind::Ref(_) | ExprKind::Member { .. } => {
            match resolve_entity_ref(env, expr) {
                Some(ResolvedRef::Field {
                    name,
                    ty: ValueType::Boolean,
                }) => match target.field_term(&name, ValueType::Boolean) {
                    Some(term) => target.truth(term),
                    None => target.opaque(positive),
                },
                _ => target.opaque(positive),
            }
        }
        ExprKind::Call { .. } | ExprKind::This => target.opaque(positive),
    }
}

fn lower_comparison<T: LowerTarget>(
    env: LowerEnv<'_>,
    target: &mut T,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    positive: bool,
) -> T::Pred {
    let lhs = resolve_operand(env, target, left);
    let rhs = resolve_operand(env, target, right);
    match (lhs, rhs) {
        (Some(l), Some(r)) => {
            let op = comparison_op(op);
            target.compare(op, l, r, positive)
        }
        _ => target.opaque(positive),
    }
}

/// Resolve a comparison operand into a target term.
///
/// Literals become values; comparable fields of the enclosing model become
/// field terms; to-one relation paths and auth-context chains are offered to
/// the target, which may refuse them. Anything else makes the enclosing
/// comparison opaque.
fn resolve_operand<T: LowerTarget>(
    env: LowerEnv<'_>,
    target: &mut T,
    expr: &Expr,
) -> Option<T::Term> {
    if let ExprKind::Literal(lit) = &expr.kind {
        return literal_value(lit).map(|v| target.literal(v));
    }

    if let Some(path) = expr.auth_path() {
        if path.is_empty() {
            // The bare principal object is not a comparable value.
            return None;
        }
        let owned: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        let ty = expr.ty.and_then(value_type);
        return target.auth_term(&owned, ty);
    }

    match resolve_entity_ref(env, expr)? {
        ResolvedRef::Field { name, ty } => target.field_term(&name, ty),
        ResolvedRef::Relation { path, ty } => target.relation_term(&path, ty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "not a lowered comparison")]
    fn comparison_dispatch_rejects_logical_operators() {
        comparison_op(BinaryOp::And);
    }

    #[test]
    #[should_panic(expected = "not a lowered comparison")]
    fn comparison_dispatch_rejects_ne() {
        // `!=` must be rewritten to NOT(eq) before reaching the dispatch.
        comparison_op(BinaryOp::Ne);
    }
}
