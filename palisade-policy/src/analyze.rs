//! Policy analysis
//!
//! Decides, per model and operation, whether a guard is a constant or needs
//! a generated function, and whether create rules are checkable from the
//! write input alone.

use palisade_schema::{Expr, ExprKind, Model, PolicyOp};
use serde::Serialize;

/// A guard: a constant outcome or a reference to a generated function.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Guard {
    Constant(bool),
    Function { function: String },
}

impl Guard {
    pub fn function(name: impl Into<String>) -> Self {
        Guard::Function {
            function: name.into(),
        }
    }

    pub fn is_constant(&self, value: bool) -> bool {
        matches!(self, Guard::Constant(v) if *v == value)
    }
}

/// Constant-or-dynamic classification of a rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardClass {
    Constant(bool),
    Dynamic,
}

/// Classify a rule set without lowering it.
///
/// Special cases:
/// - `update` with no allow rules is constant: `true` iff the model has at
///   least one `postUpdate` allow rule (the decision moves to after the
///   write), else `false`.
/// - `postUpdate` with no rules at all is constant `true`.
pub(crate) fn classify_guard(
    op: PolicyOp,
    allows: &[&Expr],
    denies: &[&Expr],
    post_update_has_allow: bool,
) -> GuardClass {
    if op == PolicyOp::PostUpdate && allows.is_empty() && denies.is_empty() {
        return GuardClass::Constant(true);
    }
    if allows.is_empty() {
        if op == PolicyOp::Update {
            return GuardClass::Constant(post_update_has_allow);
        }
        return GuardClass::Constant(false);
    }

    // Allows are conjoined: one constant-false allow decides the set.
    if allows.iter().any(|e| e.as_bool_literal() == Some(false)) {
        return GuardClass::Constant(false);
    }
    // A constant-true deny vetoes everything.
    if denies.iter().any(|e| e.as_bool_literal() == Some(true)) {
        return GuardClass::Constant(false);
    }

    let live_allows = allows
        .iter()
        .filter(|e| e.as_bool_literal() != Some(true))
        .count();
    let live_denies = denies
        .iter()
        .filter(|e| e.as_bool_literal() != Some(false))
        .count();
    if live_allows == 0 && live_denies == 0 {
        return GuardClass::Constant(true);
    }
    GuardClass::Dynamic
}

/// Classify a field-level rule set.
///
/// Fields differ from models in the empty-allow case: a field with no allow
/// rules falls back to the enclosing model's guard, so only its deny rules
/// restrict access.
pub(crate) fn classify_field_guard(allows: &[&Expr], denies: &[&Expr]) -> GuardClass {
    if denies.iter().any(|e| e.as_bool_literal() == Some(true)) {
        return GuardClass::Constant(false);
    }
    if allows.iter().any(|e| e.as_bool_literal() == Some(false)) {
        return GuardClass::Constant(false);
    }
    let live_allows = allows
        .iter()
        .filter(|e| e.as_bool_literal() != Some(true))
        .count();
    let live_denies = denies
        .iter()
        .filter(|e| e.as_bool_literal() != Some(false))
        .count();
    if live_allows == 0 && live_denies == 0 {
        return GuardClass::Constant(true);
    }
    GuardClass::Dynamic
}

/// True when every rule expression is representable from the create payload
/// alone.
///
/// Rejected: a bare `this` reference, a reference to a relation field, a
/// reference to a same-model field carrying a default, and a reference to a
/// foreign-key field - all unknowable before the write.
pub(crate) fn input_checkable(model: &Model, rules: &[&Expr]) -> bool {
    rules.iter().all(|e| expr_input_representable(model, e))
}

fn expr_input_representable(model: &Model, expr: &Expr) -> bool {
    if expr.auth_path().is_some() {
        // The auth context is available to the input checker.
        return true;
    }
    if let Some(path) = expr.entity_path() {
        let Some(field) = model.field(path[0]) else {
            // Unknown references lower to opaque placeholders.
            return true;
        };
        return !(field.is_relation() || field.has_default || field.is_foreign_key);
    }
    match &expr.kind {
        ExprKind::This => false,
        ExprKind::Binary { left, right, .. } => {
            expr_input_representable(model, left) && expr_input_representable(model, right)
        }
        ExprKind::Unary { operand, .. } => expr_input_representable(model, operand),
        ExprKind::Call { args, .. } => args.iter().all(|a| expr_input_representable(model, a)),
        ExprKind::Member { object, .. } => expr_input_representable(model, object),
        ExprKind::Literal(_) | ExprKind::Ref(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_schema::{BinaryOp, Field, Model, ScalarType};

    fn rule() -> Expr {
        Expr::binary(
            BinaryOp::Eq,
            Expr::this_field("public", Some(ScalarType::Boolean)),
            Expr::bool(true),
        )
    }

    #[test]
    fn update_without_allows_follows_post_update_allows() {
        assert_eq!(
            classify_guard(PolicyOp::Update, &[], &[], true),
            GuardClass::Constant(true)
        );
        assert_eq!(
            classify_guard(PolicyOp::Update, &[], &[], false),
            GuardClass::Constant(false)
        );
        // Denies don't change the zero-allow update outcome.
        let deny = rule();
        assert_eq!(
            classify_guard(PolicyOp::Update, &[], &[&deny], true),
            GuardClass::Constant(true)
        );
    }

    #[test]
    fn post_update_without_rules_is_true() {
        assert_eq!(
            classify_guard(PolicyOp::PostUpdate, &[], &[], false),
            GuardClass::Constant(true)
        );
        let deny = rule();
        assert_eq!(
            classify_guard(PolicyOp::PostUpdate, &[], &[&deny], false),
            GuardClass::Constant(false)
        );
    }

    #[test]
    fn empty_allows_deny_everything() {
        for op in [PolicyOp::Create, PolicyOp::Read, PolicyOp::Delete] {
            assert_eq!(
                classify_guard(op, &[], &[], true),
                GuardClass::Constant(false)
            );
        }
    }

    #[test]
    fn literal_rules_resolve_to_constants() {
        let t = Expr::bool(true);
        let f = Expr::bool(false);
        let dynamic = rule();

        assert_eq!(
            classify_guard(PolicyOp::Read, &[&t], &[], false),
            GuardClass::Constant(true)
        );
        assert_eq!(
            classify_guard(PolicyOp::Read, &[&t, &f], &[], false),
            GuardClass::Constant(false)
        );
        assert_eq!(
            classify_guard(PolicyOp::Read, &[&dynamic], &[&t], false),
            GuardClass::Constant(false)
        );
        assert_eq!(
            classify_guard(PolicyOp::Read, &[&t], &[&f], false),
            GuardClass::Constant(true)
        );
        assert_eq!(
            classify_guard(PolicyOp::Read, &[&dynamic], &[], false),
            GuardClass::Dynamic
        );
    }

    #[test]
    fn field_guard_without_allows_passes_through() {
        assert_eq!(classify_field_guard(&[], &[]), GuardClass::Constant(true));
        let deny = rule();
        assert_eq!(classify_field_guard(&[], &[&deny]), GuardClass::Dynamic);
        let t = Expr::bool(true);
        assert_eq!(
            classify_field_guard(&[], &[&t]),
            GuardClass::Constant(false)
        );
    }

    fn create_model() -> Model {
        Model::new("Post")
            .with_field(Field::scalar("public", ScalarType::Boolean))
            .with_field(Field::scalar("createdAt", ScalarType::DateTime).with_default())
            .with_field(Field::scalar("ownerId", ScalarType::Int).as_foreign_key())
            .with_field(Field::relation("owner", "User"))
    }

    #[test]
    fn input_checkable_accepts_plain_fields_and_auth() {
        let model = create_model();
        let ok = Expr::binary(
            BinaryOp::Eq,
            Expr::this_field("public", Some(ScalarType::Boolean)),
            Expr::member(Expr::auth(), "isAdmin", Some(ScalarType::Boolean)),
        );
        assert!(input_checkable(&model, &[&ok]));
    }

    #[test]
    fn input_checkable_rejects_unknowable_references() {
        let model = create_model();
        let relation = Expr::binary(
            BinaryOp::Eq,
            Expr::member(Expr::this_field("owner", None), "id", Some(ScalarType::Int)),
            Expr::int(1),
        );
        let defaulted = Expr::binary(
            BinaryOp::Ne,
            Expr::this_field("createdAt", Some(ScalarType::DateTime)),
            Expr::string(""),
        );
        let foreign_key = Expr::binary(
            BinaryOp::Eq,
            Expr::field("ownerId", Some(ScalarType::Int)),
            Expr::int(1),
        );
        let bare_this = Expr::binary(
            BinaryOp::Eq,
            Expr::this(),
            Expr::member(Expr::auth(), "post", None),
        );
        for expr in [&relation, &defaulted, &foreign_key, &bare_this] {
            assert!(!input_checkable(&model, &[expr]));
        }
        // One bad rule poisons the whole set.
        let ok = Expr::field("public", Some(ScalarType::Boolean));
        assert!(!input_checkable(&model, &[&ok, &relation]));
    }
}
