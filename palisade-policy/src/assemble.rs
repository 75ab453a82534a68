//! Policy assembly
//!
//! Combines the analyzer, the lowering paths, the selection inferrer, and
//! the renderer into one descriptor per model:
//!
//! - model-level: per-operation guards, permission checkers, entity
//!   checkers, the post-update pre-value selector, and the create input
//!   checker
//! - field-level: per-field read/update guards with optional override
//!   variants
//! - the auth selector and validation flags
//!
//! Generated function names are unique per (model, operation, field,
//! override) so every model emits into the one shared output unit. A
//! delegate base model without a usable discriminator assembles to constant
//! deny for every operation.

use crate::analyze::{
    classify_field_guard, classify_guard, input_checkable, Guard, GuardClass,
};
use crate::collect::{policy_expressions, PolicyTarget, RuleScope};
use crate::constraint::{transform_rules_with, Constraint};
use crate::entity::{build_input_predicate, build_object_predicate, EntityChecker, InputChecker};
use crate::error::{PolicyError, Result};
use crate::guard::{QueryFilter, QueryGuardBuilder};
use crate::lower::EmptyAllows;
use crate::render::{self, SourceBuffer};
use crate::select::{selection_for_rules, SelectionTree};
use palisade_schema::{AccessKind, Expr, Field, Model, PolicyOp, PolicyRule, RuleKind, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Compiler options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyOptions {
    /// Name of the authentication-context accessor, substituted verbatim
    /// into generated code.
    pub auth_accessor: String,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            auth_accessor: "user".to_string(),
        }
    }
}

/// Policy for one (model, operation).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpPolicy {
    pub guard: Guard,
    /// Storage-free permission checker; absent for `postUpdate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_checker: Option<Guard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_checker: Option<String>,
    /// Pre-update values the post-update rules need; `postUpdate` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_update_selector: Option<SelectionTree>,
    /// Write-input checker; `create` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_checker: Option<String>,
}

impl OpPolicy {
    fn constant(op: PolicyOp, value: bool) -> Self {
        Self {
            guard: Guard::Constant(value),
            permission_checker: (op != PolicyOp::PostUpdate).then_some(Guard::Constant(value)),
            entity_checker: None,
            pre_update_selector: None,
            input_checker: None,
        }
    }
}

/// Model-level policies by operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelLevel {
    pub create: OpPolicy,
    pub read: OpPolicy,
    pub update: OpPolicy,
    pub post_update: OpPolicy,
    pub delete: OpPolicy,
}

impl ModelLevel {
    pub fn op(&self, op: PolicyOp) -> &OpPolicy {
        match op {
            PolicyOp::Create => &self.create,
            PolicyOp::Read => &self.read,
            PolicyOp::Update => &self.update,
            PolicyOp::PostUpdate => &self.post_update,
            PolicyOp::Delete => &self.delete,
        }
    }

    fn constant(value: bool) -> Self {
        Self {
            create: OpPolicy::constant(PolicyOp::Create, value),
            read: OpPolicy::constant(PolicyOp::Read, value),
            update: OpPolicy::constant(PolicyOp::Update, value),
            post_update: OpPolicy::constant(PolicyOp::PostUpdate, value),
            delete: OpPolicy::constant(PolicyOp::Delete, value),
        }
    }
}

/// Policy for one field under read or update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPolicy {
    pub guard: Guard,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_checker: Option<String>,
    /// Guard built from the field's override-allow rules, escalating past
    /// the model-level guard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_guard: Option<Guard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_entity_checker: Option<String>,
}

/// Field-level policies.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldLevel {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub read: BTreeMap<String, FieldPolicy>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub update: BTreeMap<String, FieldPolicy>,
}

/// The compiled policy descriptor for one model.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPolicy {
    pub model_level: ModelLevel,
    #[serde(skip_serializing_if = "FieldLevel::is_empty")]
    pub field_level: FieldLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_selector: Option<SelectionTree>,
    pub has_validation: bool,
}

impl FieldLevel {
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.update.is_empty()
    }
}

/// Policy descriptors for every model in the schema.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PolicyMap {
    pub models: BTreeMap<String, ModelPolicy>,
}

/// A dynamic guard: the rule sets behind one generated function reference.
///
/// The query subset excludes cross-model rules (those are enforced by the
/// paired entity checker); the full set backs the permission checker.
#[derive(Debug, Clone)]
pub struct DynamicGuard {
    model: String,
    allows: Vec<Expr>,
    denies: Vec<Expr>,
    query_allows: Vec<Expr>,
    query_denies: Vec<Expr>,
}

impl DynamicGuard {
    fn new(
        model: &Model,
        allows: &[&Expr],
        denies: &[&Expr],
        query_allows: &[&Expr],
        query_denies: &[&Expr],
    ) -> Self {
        Self {
            model: model.name.clone(),
            allows: allows.iter().map(|e| (*e).clone()).collect(),
            denies: denies.iter().map(|e| (*e).clone()).collect(),
            query_allows: query_allows.iter().map(|e| (*e).clone()).collect(),
            query_denies: query_denies.iter().map(|e| (*e).clone()).collect(),
        }
    }

    fn target<'a>(&self, schema: &'a Schema) -> Result<&'a Model> {
        schema.model(&self.model).ok_or_else(|| {
            PolicyError::internal(format!("guard references unknown model `{}`", self.model))
        })
    }

    /// Build the query filter for this guard under an auth context.
    pub fn query_filter(&self, schema: &Schema, auth: Option<&Value>) -> Result<QueryFilter> {
        let model = self.target(schema)?;
        let allows: Vec<&Expr> = self.query_allows.iter().collect();
        let denies: Vec<&Expr> = self.query_denies.iter().collect();
        // An empty allow list here means the allows are enforced elsewhere
        // (post-fetch checker or enclosing model guard); pass rows through.
        Ok(QueryGuardBuilder::new(schema, model)
            .with_auth(auth)
            .build(&allows, &denies, true))
    }

    /// Build the permission-check constraint for this guard.
    pub fn constraint(&self, schema: &Schema, auth: Option<&Value>) -> Result<Constraint> {
        let model = self.target(schema)?;
        let allows: Vec<&Expr> = self.allows.iter().collect();
        let denies: Vec<&Expr> = self.denies.iter().collect();
        Ok(transform_rules_with(
            schema,
            model,
            &allows,
            &denies,
            auth,
            EmptyAllows::Pass,
        ))
    }
}

/// A generated function, resolvable by name.
#[derive(Debug, Clone)]
pub enum PolicyFunction {
    Guard(DynamicGuard),
    Checker(DynamicGuard),
    Entity(EntityChecker),
    Input(InputChecker),
}

/// Name-to-function registry for one compilation.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    functions: BTreeMap<String, PolicyFunction>,
}

impl PolicyRegistry {
    pub fn resolve(&self, name: &str) -> Option<&PolicyFunction> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn insert(&mut self, name: String, function: PolicyFunction) -> Result<()> {
        if self.functions.insert(name.clone(), function).is_some() {
            return Err(PolicyError::internal(format!(
                "generated function name collision: `{}`",
                name
            )));
        }
        Ok(())
    }
}

/// Output of one policy compilation.
#[derive(Debug)]
pub struct CompiledPolicies {
    /// The per-model descriptors.
    pub map: PolicyMap,
    /// Resolvable function references.
    pub registry: PolicyRegistry,
    /// The rendered shared output unit.
    pub source: String,
}

fn op_ident(op: PolicyOp) -> &'static str {
    match op {
        PolicyOp::Create => "create",
        PolicyOp::Read => "read",
        PolicyOp::Update => "update",
        PolicyOp::PostUpdate => "post_update",
        PolicyOp::Delete => "delete",
    }
}

/// Generated function name, unique per (model, op, field, override).
fn function_name(
    model: &str,
    op: PolicyOp,
    field: Option<&str>,
    for_override: bool,
    artifact: &str,
) -> String {
    let mut parts = vec![model.to_lowercase(), op_ident(op).to_string()];
    if let Some(field) = field {
        parts.push(field.to_lowercase());
    }
    if for_override {
        parts.push("override".to_string());
    }
    parts.push(artifact.to_string());
    parts.join("__")
}

/// Compile every model's access policies.
pub fn compile_policies(schema: &Schema, options: &PolicyOptions) -> Result<CompiledPolicies> {
    validate_schema(schema)?;

    let mut registry = PolicyRegistry::default();
    let mut buffer = SourceBuffer::new();
    render::render_header(&mut buffer);

    let mut models = BTreeMap::new();
    for model in &schema.models {
        let span = tracing::debug_span!("compile_model", model = %model.name);
        let _enter = span.enter();
        let policy = compile_model(schema, model, options, &mut registry, &mut buffer)?;
        models.insert(model.name.clone(), policy);
    }
    tracing::debug!(
        models = models.len(),
        functions = registry.len(),
        "policy compilation complete"
    );

    Ok(CompiledPolicies {
        map: PolicyMap { models },
        registry,
        source: buffer.finish(),
    })
}

/// Reject schemas the front-end should never produce.
fn validate_schema(schema: &Schema) -> Result<()> {
    for model in &schema.models {
        for field in &model.fields {
            if let Some(rel) = field.relation_info() {
                if schema.model(&rel.model).is_none() {
                    return Err(PolicyError::UnknownRelationTarget {
                        model: model.name.clone(),
                        relation: field.name.clone(),
                        target: rel.model.clone(),
                    });
                }
            }
            for rule in &field.rules {
                if let Some(op) = invalid_field_access(rule) {
                    return Err(PolicyError::InvalidFieldRuleOperation {
                        model: model.name.clone(),
                        field: field.name.clone(),
                        op,
                    });
                }
            }
        }
    }
    Ok(())
}

fn invalid_field_access(rule: &PolicyRule) -> Option<PolicyOp> {
    rule.access.iter().find_map(|access| match access {
        AccessKind::Create => Some(PolicyOp::Create),
        AccessKind::Delete => Some(PolicyOp::Delete),
        AccessKind::PostUpdate => Some(PolicyOp::PostUpdate),
        AccessKind::All | AccessKind::Read | AccessKind::Update => None,
    })
}

fn compile_model(
    schema: &Schema,
    model: &Model,
    options: &PolicyOptions,
    registry: &mut PolicyRegistry,
    buffer: &mut SourceBuffer,
) -> Result<ModelPolicy> {
    let has_validation = model.has_validation();
    let auth_selector = auth_selector(schema, model);

    // A delegate base without a usable discriminator cannot route to its
    // concrete sub-models; deny everything, don't error.
    if model.is_delegate && model.delegate_discriminator().is_none() {
        tracing::debug!(model = %model.name, "delegate base lacks a discriminator field");
        return Ok(ModelPolicy {
            model_level: ModelLevel::constant(false),
            field_level: FieldLevel::default(),
            auth_selector,
            has_validation,
        });
    }

    let target = PolicyTarget::Model(model);
    let post_update_has_allow = !policy_expressions(
        schema,
        target,
        RuleKind::Allow,
        PolicyOp::PostUpdate,
        false,
        RuleScope::All,
    )
    .is_empty();

    let model_level = ModelLevel {
        create: compile_op(
            schema, model, options, registry, buffer, PolicyOp::Create, post_update_has_allow,
        )?,
        read: compile_op(
            schema, model, options, registry, buffer, PolicyOp::Read, post_update_has_allow,
        )?,
        update: compile_op(
            schema, model, options, registry, buffer, PolicyOp::Update, post_update_has_allow,
        )?,
        post_update: compile_op(
            schema, model, options, registry, buffer, PolicyOp::PostUpdate, post_update_has_allow,
        )?,
        delete: compile_op(
            schema, model, options, registry, buffer, PolicyOp::Delete, post_update_has_allow,
        )?,
    };

    let field_level = compile_fields(schema, model, options, registry, buffer)?;

    Ok(ModelPolicy {
        model_level,
        field_level,
        auth_selector,
        has_validation,
    })
}

#[allow(clippy::too_many_arguments)]
fn compile_op(
    schema: &Schema,
    model: &Model,
    options: &PolicyOptions,
    registry: &mut PolicyRegistry,
    buffer: &mut SourceBuffer,
    op: PolicyOp,
    post_update_has_allow: bool,
) -> Result<OpPolicy> {
    let target = PolicyTarget::Model(model);
    let collect = |kind, scope| policy_expressions(schema, target, kind, op, false, scope);

    let allows = collect(RuleKind::Allow, RuleScope::All);
    let denies = collect(RuleKind::Deny, RuleScope::All);
    let class = classify_guard(op, &allows, &denies, post_update_has_allow);

    let guard = match class {
        GuardClass::Constant(value) => Guard::Constant(value),
        GuardClass::Dynamic => {
            let name = function_name(&model.name, op, None, false, "guard");
            let query_allows = collect(RuleKind::Allow, RuleScope::WithoutCrossModel);
            let query_denies = collect(RuleKind::Deny, RuleScope::WithoutCrossModel);
            render::render_query_guard(
                buffer,
                schema,
                model,
                &name,
                &options.auth_accessor,
                &query_allows,
                &query_denies,
                EmptyAllows::Pass,
            );
            registry.insert(
                name.clone(),
                PolicyFunction::Guard(DynamicGuard::new(
                    model,
                    &allows,
                    &denies,
                    &query_allows,
                    &query_denies,
                )),
            )?;
            Guard::function(name)
        }
    };

    let permission_checker = if op == PolicyOp::PostUpdate {
        None
    } else {
        Some(match class {
            GuardClass::Constant(value) => Guard::Constant(value),
            GuardClass::Dynamic => {
                let name = function_name(&model.name, op, None, false, "check");
                render::render_permission_checker(
                    buffer,
                    schema,
                    model,
                    &name,
                    &options.auth_accessor,
                    &allows,
                    &denies,
                );
                registry.insert(
                    name.clone(),
                    PolicyFunction::Checker(DynamicGuard::new(
                        model, &allows, &denies, &allows, &denies,
                    )),
                )?;
                Guard::function(name)
            }
        })
    };

    let entity_checker = if class == GuardClass::Dynamic {
        emit_entity_checker(
            schema,
            model,
            options,
            registry,
            buffer,
            op,
            None,
            false,
        )?
    } else {
        None
    };

    let pre_update_selector = if op == PolicyOp::PostUpdate && class == GuardClass::Dynamic {
        let exprs: Vec<&Expr> = allows.iter().chain(denies.iter()).copied().collect();
        selection_for_rules(schema, model, &exprs, false, None)
    } else {
        None
    };

    let input_checker = if op == PolicyOp::Create && class == GuardClass::Dynamic {
        let all: Vec<&Expr> = allows.iter().chain(denies.iter()).copied().collect();
        if input_checkable(model, &all) {
            let name = function_name(&model.name, op, None, false, "input");
            let predicate = build_input_predicate(schema, model, &allows, &denies);
            render::render_object_checker(
                buffer,
                &name,
                "input",
                &options.auth_accessor,
                &predicate,
            );
            registry.insert(name.clone(), PolicyFunction::Input(InputChecker { predicate }))?;
            Some(name)
        } else {
            None
        }
    } else {
        None
    };

    Ok(OpPolicy {
        guard,
        permission_checker,
        entity_checker,
        pre_update_selector,
        input_checker,
    })
}

/// Emit the entity checker for a rule set's cross-model subset, if any.
#[allow(clippy::too_many_arguments)]
fn emit_entity_checker(
    schema: &Schema,
    model: &Model,
    options: &PolicyOptions,
    registry: &mut PolicyRegistry,
    buffer: &mut SourceBuffer,
    op: PolicyOp,
    field: Option<&Field>,
    for_override: bool,
) -> Result<Option<String>> {
    let target = match field {
        Some(f) => PolicyTarget::Field(model, f),
        None => PolicyTarget::Model(model),
    };
    let cross_allows = policy_expressions(
        schema,
        target,
        RuleKind::Allow,
        op,
        for_override,
        RuleScope::OnlyCrossModel,
    );
    let cross_denies = policy_expressions(
        schema,
        target,
        RuleKind::Deny,
        op,
        for_override,
        RuleScope::OnlyCrossModel,
    );
    if cross_allows.is_empty() && cross_denies.is_empty() {
        return Ok(None);
    }

    // Rules outside the cross-model subset are enforced by the query guard;
    // the checker passes through when its own allow subset is empty.
    let predicate =
        build_object_predicate(schema, model, &cross_allows, &cross_denies, EmptyAllows::Pass);
    let exprs: Vec<&Expr> = cross_allows
        .iter()
        .chain(cross_denies.iter())
        .copied()
        .collect();
    let selection = selection_for_rules(schema, model, &exprs, false, None);

    let name = function_name(
        &model.name,
        op,
        field.map(|f| f.name.as_str()),
        for_override,
        "entity",
    );
    render::render_object_checker(buffer, &name, "entity", &options.auth_accessor, &predicate);
    registry.insert(
        name.clone(),
        PolicyFunction::Entity(EntityChecker {
            predicate,
            selection,
        }),
    )?;
    Ok(Some(name))
}

fn compile_fields(
    schema: &Schema,
    model: &Model,
    options: &PolicyOptions,
    registry: &mut PolicyRegistry,
    buffer: &mut SourceBuffer,
) -> Result<FieldLevel> {
    let mut field_level = FieldLevel::default();
    for field in &model.fields {
        if field.rules.is_empty() {
            continue;
        }
        for op in [PolicyOp::Read, PolicyOp::Update] {
            if let Some(policy) =
                compile_field_op(schema, model, field, options, registry, buffer, op)?
            {
                match op {
                    PolicyOp::Read => field_level.read.insert(field.name.clone(), policy),
                    _ => field_level.update.insert(field.name.clone(), policy),
                };
            }
        }
    }
    Ok(field_level)
}

#[allow(clippy::too_many_arguments)]
fn compile_field_op(
    schema: &Schema,
    model: &Model,
    field: &Field,
    options: &PolicyOptions,
    registry: &mut PolicyRegistry,
    buffer: &mut SourceBuffer,
    op: PolicyOp,
) -> Result<Option<FieldPolicy>> {
    let target = PolicyTarget::Field(model, field);
    let collect = |kind, for_override, scope| {
        policy_expressions(schema, target, kind, op, for_override, scope)
    };

    let allows = collect(RuleKind::Allow, false, RuleScope::All);
    let denies = collect(RuleKind::Deny, false, RuleScope::All);
    let override_allows = collect(RuleKind::Allow, true, RuleScope::All);
    if allows.is_empty() && denies.is_empty() && override_allows.is_empty() {
        return Ok(None);
    }

    let class = classify_field_guard(&allows, &denies);
    let guard = match class {
        GuardClass::Constant(value) => Guard::Constant(value),
        GuardClass::Dynamic => {
            let name = function_name(&model.name, op, Some(&field.name), false, "guard");
            let query_allows = collect(RuleKind::Allow, false, RuleScope::WithoutCrossModel);
            let query_denies = collect(RuleKind::Deny, false, RuleScope::WithoutCrossModel);
            render::render_query_guard(
                buffer,
                schema,
                model,
                &name,
                &options.auth_accessor,
                &query_allows,
                &query_denies,
                EmptyAllows::Pass,
            );
            registry.insert(
                name.clone(),
                PolicyFunction::Guard(DynamicGuard::new(
                    model,
                    &allows,
                    &denies,
                    &query_allows,
                    &query_denies,
                )),
            )?;
            Guard::function(name)
        }
    };

    let entity_checker = if class == GuardClass::Dynamic {
        emit_entity_checker(
            schema,
            model,
            options,
            registry,
            buffer,
            op,
            Some(field),
            false,
        )?
    } else {
        None
    };

    let (override_guard, override_entity_checker) = if override_allows.is_empty() {
        (None, None)
    } else {
        let oclass = classify_field_guard(&override_allows, &denies);
        let oguard = match oclass {
            GuardClass::Constant(value) => Guard::Constant(value),
            GuardClass::Dynamic => {
                let name = function_name(&model.name, op, Some(&field.name), true, "guard");
                let query_allows = collect(RuleKind::Allow, true, RuleScope::WithoutCrossModel);
                let query_denies = collect(RuleKind::Deny, true, RuleScope::WithoutCrossModel);
                render::render_query_guard(
                    buffer,
                    schema,
                    model,
                    &name,
                    &options.auth_accessor,
                    &query_allows,
                    &query_denies,
                    EmptyAllows::Pass,
                );
                registry.insert(
                    name.clone(),
                    PolicyFunction::Guard(DynamicGuard::new(
                        model,
                        &override_allows,
                        &denies,
                        &query_allows,
                        &query_denies,
                    )),
                )?;
                Guard::function(name)
            }
        };
        let oentity = if oclass == GuardClass::Dynamic {
            emit_entity_checker(
                schema,
                model,
                options,
                registry,
                buffer,
                op,
                Some(field),
                true,
            )?
        } else {
            None
        };
        (Some(oguard), oentity)
    };

    Ok(Some(FieldPolicy {
        guard,
        entity_checker,
        override_guard,
        override_entity_checker,
    }))
}

/// Selection over the auth model covering every auth-context property the
/// model's rules read.
fn auth_selector(schema: &Schema, model: &Model) -> Option<SelectionTree> {
    let mut exprs: Vec<&Expr> = model.rules.iter().map(|r| &r.condition).collect();
    for field in &model.fields {
        exprs.extend(field.rules.iter().map(|r| &r.condition));
    }
    selection_for_rules(schema, model, &exprs, true, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_schema::{BinaryOp, ScalarType};

    #[test]
    fn function_names_are_unique_per_target() {
        let names = [
            function_name("Post", PolicyOp::Read, None, false, "guard"),
            function_name("Post", PolicyOp::Read, None, false, "check"),
            function_name("Post", PolicyOp::Update, None, false, "guard"),
            function_name("Post", PolicyOp::PostUpdate, None, false, "guard"),
            function_name("Post", PolicyOp::Read, Some("title"), false, "guard"),
            function_name("Post", PolicyOp::Read, Some("title"), true, "guard"),
            function_name("User", PolicyOp::Read, None, false, "guard"),
        ];
        let unique: std::collections::BTreeSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert_eq!(names[0], "post__read__guard");
        assert_eq!(names[3], "post__post_update__guard");
        assert_eq!(names[5], "post__read__title__override__guard");
    }

    #[test]
    fn validate_rejects_unknown_relation_targets() {
        let schema = Schema::new(vec![Model::new("Post")
            .with_field(Field::relation("owner", "Ghost"))]);
        let err = compile_policies(&schema, &PolicyOptions::default()).unwrap_err();
        assert!(matches!(err, PolicyError::UnknownRelationTarget { .. }));
    }

    #[test]
    fn validate_rejects_field_rules_outside_read_update() {
        let rule = PolicyRule::allow(vec![AccessKind::Delete], Expr::bool(true));
        let schema = Schema::new(vec![Model::new("Post").with_field(
            Field::scalar("title", ScalarType::String).with_rule(rule),
        )]);
        let err = compile_policies(&schema, &PolicyOptions::default()).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidFieldRuleOperation { .. }));
    }

    #[test]
    fn delegate_base_without_discriminator_denies_everything() {
        let schema = Schema::new(vec![Model::new("Content")
            .with_field(Field::scalar("id", ScalarType::Int))
            .with_rule(PolicyRule::allow(vec![AccessKind::All], Expr::bool(true)))
            .as_delegate(None)]);
        let compiled = compile_policies(&schema, &PolicyOptions::default()).expect("compile");
        let policy = &compiled.map.models["Content"];
        for op in PolicyOp::ALL {
            assert!(policy.model_level.op(op).guard.is_constant(false));
        }
        assert!(compiled.registry.is_empty());
    }

    #[test]
    fn dynamic_guard_resolves_through_the_registry() {
        let rule = PolicyRule::allow(
            vec![AccessKind::All],
            Expr::binary(
                BinaryOp::Eq,
                Expr::this_field("public", Some(ScalarType::Boolean)),
                Expr::bool(true),
            ),
        );
        let schema = Schema::new(vec![Model::new("Post")
            .with_field(Field::scalar("public", ScalarType::Boolean))
            .with_rule(rule)]);
        let compiled = compile_policies(&schema, &PolicyOptions::default()).expect("compile");
        let read = &compiled.map.models["Post"].model_level.read;
        let Guard::Function { function } = &read.guard else {
            panic!("expected a dynamic guard");
        };
        match compiled.registry.resolve(function) {
            Some(PolicyFunction::Guard(guard)) => {
                let filter = guard.query_filter(&schema, None).expect("filter");
                assert!(!filter.is_const(true) && !filter.is_const(false));
            }
            other => panic!("expected a guard function, got {:?}", other),
        }
    }
}
