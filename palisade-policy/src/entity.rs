//! Post-fetch entity checkers
//!
//! Rules that compare across a relation boundary are not single-table query
//! predicates; they are enforced after the rows are fetched, by evaluating an
//! [`ObjectPredicate`] against the entity's (already selected) properties.
//! The same predicate form backs the create input checker, evaluated against
//! the write input instead of a fetched entity.
//!
//! Evaluation uses two-valued logic: a property or auth value that cannot be
//! resolved fails the enclosing comparison. Sub-expressions that were opaque
//! at compile time were already collapsed, polarity-aware, to conservative
//! constants - unknown denies.

use crate::constraint::{CompareOp, ConstraintValue, ValueType};
use crate::lower::{self, EmptyAllows, LowerEnv, LowerTarget};
use crate::select::SelectionTree;
use palisade_schema::{Expr, Model, Schema};
use serde::Serialize;
use serde_json::Value;

/// An operand resolved at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ObjectTerm {
    Value { value: ConstraintValue },
    /// Property path into the checked object.
    Path { path: Vec<String> },
    /// Property path into the auth context.
    Auth { path: Vec<String> },
}

/// A predicate over a fetched entity (or a write input) and the auth context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ObjectPredicate {
    Const {
        value: bool,
    },
    /// Truthiness of a resolved term.
    Truthy {
        term: ObjectTerm,
    },
    Compare {
        op: CompareOp,
        left: ObjectTerm,
        right: ObjectTerm,
    },
    And {
        children: Vec<ObjectPredicate>,
    },
    Or {
        children: Vec<ObjectPredicate>,
    },
    Not {
        child: Box<ObjectPredicate>,
    },
}

impl ObjectPredicate {
    /// Evaluate against an object and an optional auth context.
    pub fn evaluate(&self, object: &Value, auth: Option<&Value>) -> bool {
        match self {
            ObjectPredicate::Const { value } => *value,
            ObjectPredicate::Truthy { term } => truthy(resolve_term(term, object, auth)),
            ObjectPredicate::Compare { op, left, right } => compare_opt(
                resolve_term(left, object, auth),
                *op,
                resolve_term(right, object, auth),
            ),
            ObjectPredicate::And { children } => {
                children.iter().all(|c| c.evaluate(object, auth))
            }
            ObjectPredicate::Or { children } => {
                children.iter().any(|c| c.evaluate(object, auth))
            }
            ObjectPredicate::Not { child } => !child.evaluate(object, auth),
        }
    }
}

fn resolve_term(term: &ObjectTerm, object: &Value, auth: Option<&Value>) -> Option<ConstraintValue> {
    match term {
        ObjectTerm::Value { value } => Some(value.clone()),
        ObjectTerm::Path { path } => object_path_value(object, path),
        ObjectTerm::Auth { path } => crate::guard::auth_value(auth, path),
    }
}

/// Look up a property path in a fetched object as a comparable value.
pub fn object_path_value<S: AsRef<str>>(object: &Value, path: &[S]) -> Option<ConstraintValue> {
    let mut current = object;
    for seg in path {
        current = current.get(seg.as_ref())?;
    }
    ConstraintValue::from_json(current)
}

/// Truthiness of an optional value: unresolved is false, non-boolean
/// scalars are true.
pub fn truthy(value: Option<ConstraintValue>) -> bool {
    match value {
        Some(ConstraintValue::Bool(b)) => b,
        Some(_) => true,
        None => false,
    }
}

/// Compare two optional values; an unresolved operand fails the comparison.
pub fn compare_opt(
    left: Option<ConstraintValue>,
    op: CompareOp,
    right: Option<ConstraintValue>,
) -> bool {
    match (left, right) {
        (Some(l), Some(r)) => l.compare(op, &r).unwrap_or(false),
        _ => false,
    }
}

/// A compiled entity checker: the predicate plus the selection covering
/// exactly the property paths it reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityChecker {
    pub predicate: ObjectPredicate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionTree>,
}

impl EntityChecker {
    pub fn check(&self, entity: &Value, auth: Option<&Value>) -> bool {
        self.predicate.evaluate(entity, auth)
    }
}

/// A compiled create input checker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputChecker {
    pub predicate: ObjectPredicate,
}

impl InputChecker {
    pub fn check(&self, input: &Value, auth: Option<&Value>) -> bool {
        self.predicate.evaluate(input, auth)
    }
}

/// Lower a rule set into an object predicate with the standard combination
/// semantics.
pub(crate) fn build_object_predicate(
    schema: &Schema,
    model: &Model,
    allows: &[&Expr],
    denies: &[&Expr],
    empty_allows: EmptyAllows,
) -> ObjectPredicate {
    let mut target = ObjectTarget;
    let env = LowerEnv::new(schema, model);
    lower::lower_rule_set(env, &mut target, allows, denies, empty_allows)
}

/// Lower create rules into the input-checker predicate:
/// `NOT(OR(denies)) AND OR(allows)`.
pub(crate) fn build_input_predicate(
    schema: &Schema,
    model: &Model,
    allows: &[&Expr],
    denies: &[&Expr],
) -> ObjectPredicate {
    let mut target = ObjectTarget;
    let env = LowerEnv::new(schema, model);
    lower::lower_input_rules(env, &mut target, allows, denies)
}

/// Lowering target producing object predicates.
struct ObjectTarget;

impl LowerTarget for ObjectTarget {
    type Term = ObjectTerm;
    type Pred = ObjectPredicate;

    fn literal(&mut self, value: ConstraintValue) -> ObjectTerm {
        ObjectTerm::Value { value }
    }

    fn field_term(&mut self, name: &str, _ty: ValueType) -> Option<ObjectTerm> {
        Some(ObjectTerm::Path {
            path: vec![name.to_string()],
        })
    }

    fn relation_term(&mut self, path: &[String], _ty: ValueType) -> Option<ObjectTerm> {
        Some(ObjectTerm::Path {
            path: path.to_vec(),
        })
    }

    fn auth_term(&mut self, path: &[String], _ty: Option<ValueType>) -> Option<ObjectTerm> {
        Some(ObjectTerm::Auth {
            path: path.to_vec(),
        })
    }

    fn compare(
        &mut self,
        op: CompareOp,
        left: ObjectTerm,
        right: ObjectTerm,
        _positive: bool,
    ) -> ObjectPredicate {
        ObjectPredicate::Compare { op, left, right }
    }

    fn truth(&mut self, term: ObjectTerm) -> ObjectPredicate {
        ObjectPredicate::Truthy { term }
    }

    fn constant(&mut self, value: bool) -> ObjectPredicate {
        ObjectPredicate::Const { value }
    }

    fn and(&mut self, children: Vec<ObjectPredicate>) -> ObjectPredicate {
        ObjectPredicate::And { children }
    }

    fn or(&mut self, children: Vec<ObjectPredicate>) -> ObjectPredicate {
        ObjectPredicate::Or { children }
    }

    fn not(&mut self, child: ObjectPredicate) -> ObjectPredicate {
        ObjectPredicate::Not {
            child: Box::new(child),
        }
    }

    fn opaque(&mut self, positive: bool) -> ObjectPredicate {
        ObjectPredicate::Const { value: !positive }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_schema::{BinaryOp, Field, Model, ScalarType, Schema};
    use serde_json::json;

    fn test_schema() -> Schema {
        let user = Model::new("User")
            .with_field(Field::scalar("id", ScalarType::Int))
            .with_field(Field::scalar("isAdmin", ScalarType::Boolean));
        let post = Model::new("Post")
            .with_field(Field::scalar("public", ScalarType::Boolean))
            .with_field(Field::scalar("title", ScalarType::String))
            .with_field(Field::relation("owner", "User"));
        Schema::new(vec![user, post])
    }

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

    #[test]
    fn cross_model_rule_evaluates_against_fetched_properties() {
        let schema = test_schema();
        let model = schema.model("Post").expect("Post");
        let rule = cross_model_rule();
        let predicate =
            build_object_predicate(&schema, model, &[&rule], &[], EmptyAllows::Deny);

        let admin_owned = json!({"owner": {"isAdmin": true}});
        let plain_owned = json!({"owner": {"isAdmin": false}});
        let no_owner = json!({});
        assert!(predicate.evaluate(&admin_owned, None));
        assert!(!predicate.evaluate(&plain_owned, None));
        assert!(!predicate.evaluate(&no_owner, None));
    }

    #[test]
    fn auth_terms_resolve_at_evaluation_time() {
        let schema = test_schema();
        let model = schema.model("Post").expect("Post");
        let rule = Expr::binary(
            BinaryOp::Eq,
            Expr::member(
                Expr::this_field("owner", None),
                "id",
                Some(ScalarType::Int),
            ),
            Expr::member(Expr::auth(), "id", Some(ScalarType::Int)),
        );
        let predicate =
            build_object_predicate(&schema, model, &[&rule], &[], EmptyAllows::Deny);

        let entity = json!({"owner": {"id": 7}});
        let me = json!({"id": 7});
        let someone_else = json!({"id": 8});
        assert!(predicate.evaluate(&entity, Some(&me)));
        assert!(!predicate.evaluate(&entity, Some(&someone_else)));
        // Without an auth context the comparison cannot hold.
        assert!(!predicate.evaluate(&entity, None));
    }

    #[test]
    fn deny_rules_veto_in_object_evaluation() {
        let schema = test_schema();
        let model = schema.model("Post").expect("Post");
        let allow = Expr::bool(true);
        let deny = cross_model_rule();
        let predicate =
            build_object_predicate(&schema, model, &[&allow], &[&deny], EmptyAllows::Deny);

        assert!(!predicate.evaluate(&json!({"owner": {"isAdmin": true}}), None));
        assert!(predicate.evaluate(&json!({"owner": {"isAdmin": false}}), None));
    }

    #[test]
    fn input_predicate_ors_allows_and_vetoes_denies() {
        let schema = test_schema();
        let model = schema.model("Post").expect("Post");
        let allow_public = Expr::field("public", Some(ScalarType::Boolean));
        let allow_admin = Expr::binary(
            BinaryOp::Eq,
            Expr::member(Expr::auth(), "isAdmin", Some(ScalarType::Boolean)),
            Expr::bool(true),
        );
        let deny_reserved = Expr::binary(
            BinaryOp::Eq,
            Expr::this_field("title", Some(ScalarType::String)),
            Expr::string("reserved"),
        );
        let predicate = build_input_predicate(
            &schema,
            model,
            &[&allow_public, &allow_admin],
            &[&deny_reserved],
        );

        let admin = json!({"isAdmin": true});
        assert!(predicate.evaluate(&json!({"public": true, "title": "a"}), None));
        assert!(predicate.evaluate(&json!({"public": false, "title": "a"}), Some(&admin)));
        assert!(!predicate.evaluate(&json!({"public": false, "title": "a"}), None));
        assert!(!predicate.evaluate(&json!({"public": true, "title": "reserved"}), Some(&admin)));
    }

    #[test]
    fn input_predicate_without_allows_is_constant_false() {
        let schema = test_schema();
        let model = schema.model("Post").expect("Post");
        let deny = cross_model_rule();
        let predicate = build_input_predicate(&schema, model, &[], &[&deny]);
        assert_eq!(predicate, ObjectPredicate::Const { value: false });
    }
}
