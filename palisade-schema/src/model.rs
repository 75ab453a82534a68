//! Data-model declarations
//!
//! The structural half of the schema front-end's output: models, fields,
//! relations, and the access/validation attributes attached to them. The
//! rule DSL has already been parsed; conditions appear here as [`Expr`]
//! trees in declaration order.

use crate::expr::Expr;
use crate::types::ScalarType;
use serde::{Deserialize, Serialize};

/// Operation a policy decision is being made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyOp {
    Create,
    Read,
    Update,
    /// Update re-checked against the written values, after the write is
    /// applied but before the transaction commits.
    PostUpdate,
    Delete,
}

impl PolicyOp {
    /// The CRUD subset: every kind except `PostUpdate`.
    pub const CRUD: [PolicyOp; 4] = [
        PolicyOp::Create,
        PolicyOp::Read,
        PolicyOp::Update,
        PolicyOp::Delete,
    ];

    /// All operation kinds in descriptor order.
    pub const ALL: [PolicyOp; 5] = [
        PolicyOp::Create,
        PolicyOp::Read,
        PolicyOp::Update,
        PolicyOp::PostUpdate,
        PolicyOp::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyOp::Create => "create",
            PolicyOp::Read => "read",
            PolicyOp::Update => "update",
            PolicyOp::PostUpdate => "postUpdate",
            PolicyOp::Delete => "delete",
        }
    }
}

impl std::fmt::Display for PolicyOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a rule grants or vetoes access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    Allow,
    Deny,
}

/// Operation set a rule was declared for.
///
/// `All` expands to the CRUD subset only; `postUpdate` rules must name the
/// kind explicitly because they are evaluated in a different context (the
/// written values rather than the stored ones).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessKind {
    All,
    Create,
    Read,
    Update,
    PostUpdate,
    Delete,
}

impl AccessKind {
    pub fn covers(&self, op: PolicyOp) -> bool {
        match self {
            AccessKind::All => op != PolicyOp::PostUpdate,
            AccessKind::Create => op == PolicyOp::Create,
            AccessKind::Read => op == PolicyOp::Read,
            AccessKind::Update => op == PolicyOp::Update,
            AccessKind::PostUpdate => op == PolicyOp::PostUpdate,
            AccessKind::Delete => op == PolicyOp::Delete,
        }
    }
}

/// One `@@allow`/`@@deny` (model) or `@allow`/`@deny` (field) declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub kind: RuleKind,
    /// Declared operation set, in declaration order.
    pub access: Vec<AccessKind>,
    pub condition: Expr,
    /// Field-level allow rules may escalate past the enclosing model's
    /// guard; deny rules never carry this flag.
    #[serde(default)]
    pub override_allow: bool,
}

impl PolicyRule {
    pub fn allow(access: Vec<AccessKind>, condition: Expr) -> Self {
        Self {
            kind: RuleKind::Allow,
            access,
            condition,
            override_allow: false,
        }
    }

    pub fn deny(access: Vec<AccessKind>, condition: Expr) -> Self {
        Self {
            kind: RuleKind::Deny,
            access,
            condition,
            override_allow: false,
        }
    }

    pub fn with_override(mut self) -> Self {
        self.override_allow = true;
        self
    }

    pub fn covers(&self, op: PolicyOp) -> bool {
        self.access.iter().any(|a| a.covers(op))
    }
}

/// Field validation attribute (`@email`, `@length(..)`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldValidator {
    Email,
    Url,
    Regex(String),
    Length {
        min: Option<usize>,
        max: Option<usize>,
    },
}

/// Relation target and the scalar foreign-key fields backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Name of the related model.
    pub model: String,
    /// To-many relations hold lists of related entities.
    pub many: bool,
    /// Scalar fields on this model that store the relation's keys.
    #[serde(default)]
    pub foreign_keys: Vec<String>,
}

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Scalar(ScalarType),
    Relation(Relation),
}

/// A field declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    #[serde(default)]
    pub optional: bool,
    /// Field carries a `@default(..)` value, so its post-write value is
    /// unknowable from the write input alone.
    #[serde(default)]
    pub has_default: bool,
    /// Scalar field backing a relation on this model.
    #[serde(default)]
    pub is_foreign_key: bool,
    /// Field-level policy rules in declaration order.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub validators: Vec<FieldValidator>,
}

impl Field {
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Scalar(ty),
            optional: false,
            has_default: false,
            is_foreign_key: false,
            rules: Vec::new(),
            validators: Vec::new(),
        }
    }

    pub fn relation(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Relation(Relation {
                model: model.into(),
                many: false,
                foreign_keys: Vec::new(),
            }),
            optional: false,
            has_default: false,
            is_foreign_key: false,
            rules: Vec::new(),
            validators: Vec::new(),
        }
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn as_foreign_key(mut self) -> Self {
        self.is_foreign_key = true;
        self
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_validator(mut self, validator: FieldValidator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.ty, FieldType::Relation(_))
    }

    pub fn relation_info(&self) -> Option<&Relation> {
        match &self.ty {
            FieldType::Relation(r) => Some(r),
            FieldType::Scalar(_) => None,
        }
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        match &self.ty {
            FieldType::Scalar(t) => Some(*t),
            FieldType::Relation(_) => None,
        }
    }
}

/// A model declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub fields: Vec<Field>,
    /// Model-level policy rules in declaration order.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    /// Model-level validation conditions (`@@validate`).
    #[serde(default)]
    pub validations: Vec<Expr>,
    /// Polymorphic base model (`@@delegate`).
    #[serde(default)]
    pub is_delegate: bool,
    /// Field discriminating concrete sub-models of a delegate base.
    #[serde(default)]
    pub discriminator: Option<String>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            rules: Vec::new(),
            validations: Vec::new(),
            is_delegate: false,
            discriminator: None,
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_validation(mut self, condition: Expr) -> Self {
        self.validations.push(condition);
        self
    }

    pub fn as_delegate(mut self, discriminator: Option<&str>) -> Self {
        self.is_delegate = true;
        self.discriminator = discriminator.map(str::to_string);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A delegate base is usable only when its discriminator names an
    /// existing field.
    pub fn delegate_discriminator(&self) -> Option<&Field> {
        self.discriminator.as_deref().and_then(|d| self.field(d))
    }

    /// True when any field carries validators or the model declares
    /// `@@validate` conditions.
    pub fn has_validation(&self) -> bool {
        !self.validations.is_empty() || self.fields.iter().any(|f| !f.validators.is_empty())
    }
}

/// A complete data-model schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub models: Vec<Model>,
}

impl Schema {
    pub fn new(models: Vec<Model>) -> Self {
        Self { models }
    }

    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name == name)
    }
}
