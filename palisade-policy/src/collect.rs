//! Rule collection
//!
//! Pulls ordered rule-expression lists out of model and field declarations.
//! Order is declaration order and stable across repeated compilations; the
//! numbering of opaque variables in lowered output depends on it.

use crate::lower::{resolve_entity_ref, LowerEnv, ResolvedRef};
use palisade_schema::{Expr, ExprKind, Field, Model, PolicyOp, PolicyRule, RuleKind, Schema};

/// Which rules of a set a consumer can enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    All,
    /// Rules with no cross-model comparison: the query-guard subset.
    WithoutCrossModel,
    /// Rules containing a cross-model comparison: the entity-checker subset.
    OnlyCrossModel,
}

/// What a rule set is attached to.
#[derive(Debug, Clone, Copy)]
pub enum PolicyTarget<'a> {
    Model(&'a Model),
    Field(&'a Model, &'a Field),
}

impl<'a> PolicyTarget<'a> {
    pub fn model(&self) -> &'a Model {
        match self {
            PolicyTarget::Model(m) => m,
            PolicyTarget::Field(m, _) => m,
        }
    }

    fn rules(&self) -> &'a [PolicyRule] {
        match self {
            PolicyTarget::Model(m) => &m.rules,
            PolicyTarget::Field(_, f) => &f.rules,
        }
    }
}

/// Collect the expressions of every rule matching the query.
///
/// `for_override` selects field-level allow rules carrying the override
/// flag; deny rules never carry it and are returned for either setting.
pub fn policy_expressions<'a>(
    schema: &Schema,
    target: PolicyTarget<'a>,
    kind: RuleKind,
    op: PolicyOp,
    for_override: bool,
    scope: RuleScope,
) -> Vec<&'a Expr> {
    let model = target.model();
    target
        .rules()
        .iter()
        .filter(|rule| rule.kind == kind && rule.covers(op))
        .filter(|rule| match kind {
            RuleKind::Allow => rule.override_allow == for_override,
            RuleKind::Deny => true,
        })
        .filter(|rule| {
            let crosses = references_cross_model(schema, model, &rule.condition);
            match scope {
                RuleScope::All => true,
                RuleScope::WithoutCrossModel => !crosses,
                RuleScope::OnlyCrossModel => crosses,
            }
        })
        .map(|rule| &rule.condition)
        .collect()
}

/// True when the expression contains a comparison with an operand reaching
/// through a relation into another model.
pub(crate) fn references_cross_model(schema: &Schema, model: &Model, expr: &Expr) -> bool {
    let env = LowerEnv::new(schema, model);
    let is_relation_operand = |operand: &Expr| {
        matches!(
            resolve_entity_ref(env, operand),
            Some(ResolvedRef::Relation { .. })
        )
    };
    match &expr.kind {
        ExprKind::Binary { op, left, right } if op.is_comparison() => {
            is_relation_operand(left)
                || is_relation_operand(right)
                || references_cross_model(schema, model, left)
                || references_cross_model(schema, model, right)
        }
        ExprKind::Binary { left, right, .. } => {
            references_cross_model(schema, model, left)
                || references_cross_model(schema, model, right)
        }
        ExprKind::Unary { operand, .. } => references_cross_model(schema, model, operand),
        ExprKind::Call { args, .. } => args
            .iter()
            .any(|arg| references_cross_model(schema, model, arg)),
        ExprKind::Member { object, .. } => references_cross_model(schema, model, object),
        ExprKind::Literal(_) | ExprKind::Ref(_) | ExprKind::This => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_schema::{AccessKind, BinaryOp, Field, Model, ScalarType, Schema};

    fn cross_model_rule() -> Expr {
        Expr::binary(
            BinaryOp::Eq,
            Expr::member(
                Expr::this_field("owner", None),
                "isAdmin",
                Some(ScalarType::Boolean),
            ),
            Expr::bool(true),
        )
    }

    fn local_rule() -> Expr {
        Expr::binary(
            BinaryOp::Eq,
            Expr::this_field("public", Some(ScalarType::Boolean)),
            Expr::bool(true),
        )
    }

    fn test_schema() -> Schema {
        let user = Model::new("User")
            .with_field(Field::scalar("isAdmin", ScalarType::Boolean));
        let post = Model::new("Post")
            .with_field(Field::scalar("public", ScalarType::Boolean))
            .with_field(Field::relation("owner", "User"))
            .with_rule(PolicyRule::allow(vec![AccessKind::Read], local_rule()))
            .with_rule(PolicyRule::allow(vec![AccessKind::Read], cross_model_rule()))
            .with_rule(PolicyRule::deny(vec![AccessKind::All], local_rule()));
        Schema::new(vec![user, post])
    }

    #[test]
    fn scope_splits_rules_on_cross_model_comparisons() {
        let schema = test_schema();
        let post = schema.model("Post").expect("Post");
        let target = PolicyTarget::Model(post);

        let all = policy_expressions(&schema, target, RuleKind::Allow, PolicyOp::Read, false, RuleScope::All);
        assert_eq!(all.len(), 2);

        let local = policy_expressions(
            &schema,
            target,
            RuleKind::Allow,
            PolicyOp::Read,
            false,
            RuleScope::WithoutCrossModel,
        );
        assert_eq!(local.len(), 1);

        let cross = policy_expressions(
            &schema,
            target,
            RuleKind::Allow,
            PolicyOp::Read,
            false,
            RuleScope::OnlyCrossModel,
        );
        assert_eq!(cross.len(), 1);
        assert_eq!(cross[0], &cross_model_rule());
    }

    #[test]
    fn collection_order_is_declaration_order() {
        let schema = test_schema();
        let post = schema.model("Post").expect("Post");
        let target = PolicyTarget::Model(post);
        let all = policy_expressions(&schema, target, RuleKind::Allow, PolicyOp::Read, false, RuleScope::All);
        assert_eq!(all[0], &local_rule());
        assert_eq!(all[1], &cross_model_rule());
    }

    #[test]
    fn deny_rules_ignore_the_override_flag() {
        let schema = test_schema();
        let post = schema.model("Post").expect("Post");
        let target = PolicyTarget::Model(post);
        let denies = policy_expressions(&schema, target, RuleKind::Deny, PolicyOp::Update, true, RuleScope::All);
        assert_eq!(denies.len(), 1);
    }

    #[test]
    fn same_model_field_comparison_is_not_cross_model() {
        let schema = test_schema();
        let post = schema.model("Post").expect("Post");
        assert!(!references_cross_model(&schema, post, &local_rule()));
        assert!(references_cross_model(&schema, post, &cross_model_rule()));
    }
}
