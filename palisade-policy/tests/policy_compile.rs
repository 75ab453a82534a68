//! End-to-end policy compilation tests
//!
//! Compiles a small but realistic schema (users, posts with an owner
//! relation, drafts with post-update rules) and checks the assembled
//! descriptors, the function registry, and the rendered output unit.

use palisade_policy::{
    compile_policies, ConstraintTransformer, Constraint, Guard, PolicyFunction, PolicyOptions,
    QueryFilter, ValueType,
};
use palisade_schema::{
    AccessKind, BinaryOp, Expr, Field, FieldValidator, Model, PolicyRule, ScalarType, Schema,
};
use serde_json::json;

fn owner_is_admin() -> Expr {
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

fn public_is_true() -> Expr {
    Expr::binary(
        BinaryOp::Eq,
        Expr::this_field("public", Some(ScalarType::Boolean)),
        Expr::bool(true),
    )
}

fn auth_role_is(role: &str) -> Expr {
    Expr::binary(
        BinaryOp::Eq,
        Expr::member(Expr::auth(), "role", Some(ScalarType::String)),
        Expr::string(role),
    )
}

fn test_schema() -> Schema {
    let user = Model::new("User")
        .with_field(Field::scalar("id", ScalarType::Int))
        .with_field(Field::scalar("role", ScalarType::String))
        .with_field(Field::scalar("isAdmin", ScalarType::Boolean))
        .with_field(
            Field::scalar("email", ScalarType::String).with_validator(FieldValidator::Email),
        )
        .with_rule(PolicyRule::allow(
            vec![AccessKind::Read],
            Expr::bool(true),
        ));

    let post = Model::new("Post")
        .with_field(Field::scalar("id", ScalarType::Int))
        .with_field(Field::scalar("title", ScalarType::String))
        .with_field(Field::scalar("public", ScalarType::Boolean))
        .with_field(
            Field::scalar("score", ScalarType::Int).with_rule(
                PolicyRule::allow(vec![AccessKind::Read], owner_is_admin()).with_override(),
            ),
        )
        .with_field(Field::scalar("ownerId", ScalarType::Int).as_foreign_key())
        .with_field(Field::relation("owner", "User"))
        .with_field(Field::scalar("createdAt", ScalarType::DateTime).with_default())
        .with_rule(PolicyRule::allow(vec![AccessKind::Read], public_is_true()))
        .with_rule(PolicyRule::allow(vec![AccessKind::Read], owner_is_admin()))
        .with_rule(PolicyRule::allow(
            vec![AccessKind::Create],
            auth_role_is("AUTHOR"),
        ))
        .with_rule(PolicyRule::allow(
            vec![AccessKind::Update, AccessKind::Delete],
            Expr::binary(
                BinaryOp::Eq,
                Expr::this_field("ownerId", Some(ScalarType::Int)),
                Expr::member(Expr::auth(), "id", Some(ScalarType::Int)),
            ),
        ));

    // Create rules referencing a foreign key: no input checker.
    let comment = Model::new("Comment")
        .with_field(Field::scalar("id", ScalarType::Int))
        .with_field(Field::scalar("postId", ScalarType::Int).as_foreign_key())
        .with_field(Field::relation("post", "Post"))
        .with_rule(PolicyRule::allow(
            vec![AccessKind::Create],
            Expr::binary(
                BinaryOp::Eq,
                Expr::this_field("postId", Some(ScalarType::Int)),
                Expr::member(Expr::auth(), "id", Some(ScalarType::Int)),
            ),
        ));

    // Post-update rules but no update rules.
    let draft = Model::new("Draft")
        .with_field(Field::scalar("published", ScalarType::Boolean))
        .with_rule(PolicyRule::allow(
            vec![AccessKind::PostUpdate],
            Expr::field("published", Some(ScalarType::Boolean)),
        ));

    // No rules at all.
    let note = Model::new("Note").with_field(Field::scalar("body", ScalarType::String));

    Schema::new(vec![user, post, comment, draft, note])
}

#[test]
fn cross_model_rules_go_to_the_entity_checker_not_the_guard() {
    let schema = test_schema();
    let compiled = compile_policies(&schema, &PolicyOptions::default()).expect("compile");
    let read = &compiled.map.models["Post"].model_level.read;

    let Guard::Function { function } = &read.guard else {
        panic!("expected a dynamic read guard");
    };
    let Some(PolicyFunction::Guard(guard)) = compiled.registry.resolve(function) else {
        panic!("guard not registered");
    };
    // The query filter covers the local rule only.
    let filter = guard.query_filter(&schema, None).expect("filter");
    assert_eq!(
        filter,
        QueryFilter::compare("public", palisade_policy::CompareOp::Eq, true)
    );
    // The rendered guard never mentions the relation either.
    assert!(!compiled.source.contains("owner__"));

    let checker_name = read.entity_checker.as_ref().expect("entity checker");
    let Some(PolicyFunction::Entity(checker)) = compiled.registry.resolve(checker_name) else {
        panic!("entity checker not registered");
    };
    assert_eq!(
        serde_json::to_value(checker.selection.as_ref().expect("selection")).expect("json"),
        json!({"owner": {"select": {"isAdmin": true}}})
    );
    assert!(checker.check(&json!({"owner": {"isAdmin": true}}), None));
    assert!(!checker.check(&json!({"owner": {"isAdmin": false}}), None));
}

#[test]
fn update_guard_follows_post_update_allows() {
    let schema = test_schema();
    let compiled = compile_policies(&schema, &PolicyOptions::default()).expect("compile");

    // Draft: no update allows, one postUpdate allow.
    let draft = &compiled.map.models["Draft"].model_level;
    assert!(draft.update.guard.is_constant(true));
    assert!(matches!(draft.post_update.guard, Guard::Function { .. }));
    assert_eq!(
        serde_json::to_value(draft.post_update.pre_update_selector.as_ref().expect("selector"))
            .expect("json"),
        json!({"published": true})
    );
    // No post-update permission checker, ever.
    assert!(draft.post_update.permission_checker.is_none());

    // Note: no rules anywhere.
    let note = &compiled.map.models["Note"].model_level;
    assert!(note.update.guard.is_constant(false));
    assert!(note.read.guard.is_constant(false));
    assert!(note.post_update.guard.is_constant(true));
    assert_eq!(note.read.permission_checker, Some(Guard::Constant(false)));
}

#[test]
fn input_checker_is_emitted_only_for_input_representable_rules() {
    let schema = test_schema();
    let compiled = compile_policies(&schema, &PolicyOptions::default()).expect("compile");

    let post_create = &compiled.map.models["Post"].model_level.create;
    let name = post_create.input_checker.as_ref().expect("input checker");
    let Some(PolicyFunction::Input(checker)) = compiled.registry.resolve(name) else {
        panic!("input checker not registered");
    };
    let author = json!({"role": "AUTHOR"});
    let reader = json!({"role": "READER"});
    assert!(checker.check(&json!({"title": "hello"}), Some(&author)));
    assert!(!checker.check(&json!({"title": "hello"}), Some(&reader)));
    assert!(!checker.check(&json!({"title": "hello"}), None));

    // Comment's create rule reads a foreign key: unknowable pre-write.
    let comment_create = &compiled.map.models["Comment"].model_level.create;
    assert!(comment_create.input_checker.is_none());
    assert!(matches!(comment_create.guard, Guard::Function { .. }));
}

#[test]
fn field_override_rules_produce_override_artifacts() {
    let schema = test_schema();
    let compiled = compile_policies(&schema, &PolicyOptions::default()).expect("compile");
    let fields = &compiled.map.models["Post"].field_level;

    let score = fields.read.get("score").expect("score policy");
    // Only an override rule: the base guard passes through to the model
    // guard, the override escalates.
    assert!(score.guard.is_constant(true));
    assert!(score.entity_checker.is_none());
    assert!(score.override_guard.is_some());
    let name = score
        .override_entity_checker
        .as_ref()
        .expect("override entity checker");
    let Some(PolicyFunction::Entity(checker)) = compiled.registry.resolve(name) else {
        panic!("override checker not registered");
    };
    assert!(checker.check(&json!({"owner": {"isAdmin": true}}), None));
    assert!(fields.update.get("score").is_none());
}

#[test]
fn auth_selector_covers_auth_properties_rules_read() {
    let schema = test_schema();
    let compiled = compile_policies(&schema, &PolicyOptions::default()).expect("compile");
    let selector = compiled.map.models["Post"]
        .auth_selector
        .as_ref()
        .expect("auth selector");
    assert_eq!(
        serde_json::to_value(selector).expect("json"),
        json!({"id": true, "role": true})
    );
    assert!(compiled.map.models["Note"].auth_selector.is_none());
}

#[test]
fn validation_flags_follow_field_validators() {
    let schema = test_schema();
    let compiled = compile_policies(&schema, &PolicyOptions::default()).expect("compile");
    assert!(compiled.map.models["User"].has_validation);
    assert!(!compiled.map.models["Post"].has_validation);
}

#[test]
fn compilation_is_deterministic() {
    let schema = test_schema();
    let options = PolicyOptions::default();
    let first = compile_policies(&schema, &options).expect("compile");
    let second = compile_policies(&schema, &options).expect("compile");
    assert_eq!(first.source, second.source);
    assert_eq!(
        serde_json::to_value(&first.map).expect("json"),
        serde_json::to_value(&second.map).expect("json")
    );
    let names_first: Vec<_> = first.registry.names().collect();
    let names_second: Vec<_> = second.registry.names().collect();
    assert_eq!(names_first, names_second);
}

#[test]
fn generated_unit_substitutes_the_configured_accessor() {
    let schema = test_schema();
    let options = PolicyOptions {
        auth_accessor: "principal".to_string(),
    };
    let compiled = compile_policies(&schema, &options).expect("compile");
    assert!(compiled.source.contains("ctx.principal.as_ref()"));
    assert!(!compiled.source.contains("ctx.user.as_ref()"));
    assert!(compiled.source.contains("pub fn post__read__guard"));
    assert!(compiled.source.contains("pub fn post__create__input"));
}

#[test]
fn permission_checker_resolves_auth_against_a_snapshot() {
    let schema = test_schema();
    let compiled = compile_policies(&schema, &PolicyOptions::default()).expect("compile");
    let create = &compiled.map.models["Post"].model_level.create;
    let Some(Guard::Function { function }) = &create.permission_checker else {
        panic!("expected a dynamic permission checker");
    };
    let Some(PolicyFunction::Checker(checker)) = compiled.registry.resolve(function) else {
        panic!("checker not registered");
    };

    let author = json!({"role": "AUTHOR"});
    let constraint = checker.constraint(&schema, Some(&author)).expect("constraint");
    assert_eq!(
        constraint,
        Constraint::comparison(
            palisade_policy::CompareOp::Eq,
            palisade_policy::ConstraintTerm::value("AUTHOR"),
            palisade_policy::ConstraintTerm::value("AUTHOR"),
        )
    );

    // Without an auth context the reference degrades to an opaque variable.
    let constraint = checker.constraint(&schema, None).expect("constraint");
    assert_eq!(
        constraint,
        Constraint::comparison(
            palisade_policy::CompareOp::Eq,
            palisade_policy::ConstraintTerm::variable("__var0", ValueType::Boolean),
            palisade_policy::ConstraintTerm::value("AUTHOR"),
        )
    );
}

#[test]
fn array_membership_degrades_to_an_opaque_variable() {
    let schema = test_schema();
    let post = schema.model("Post").expect("Post");
    let rule = Expr::binary(
        BinaryOp::In,
        Expr::this_field("title", Some(ScalarType::String)),
        Expr::member(Expr::auth(), "titles", None),
    );
    let transformer = ConstraintTransformer::new(&schema, post);
    assert_eq!(
        transformer.transform_rules(&[&rule], &[]),
        Constraint::variable("__var0", ValueType::Boolean)
    );
}
