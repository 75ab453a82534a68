//! Rule expression AST
//!
//! Expressions arrive from the schema front-end already parsed and, where
//! possible, type-resolved. The policy compiler treats them as read-only
//! input: nodes are never rewritten in place, and lowering that cannot
//! represent a node degrades to an opaque placeholder instead of failing.
//!
//! Node kinds:
//! - [`ExprKind::Literal`] - boolean/int/float/string constants
//! - [`ExprKind::Ref`] - bare reference (a field of the enclosing model)
//! - [`ExprKind::Member`] - property access (`this.owner.isAdmin`)
//! - [`ExprKind::Binary`] / [`ExprKind::Unary`] - operators
//! - [`ExprKind::Call`] - invocation (`auth()`, `contains(..)`)
//! - [`ExprKind::This`] - the enclosing entity

use crate::types::ScalarType;
use serde::{Deserialize, Serialize};

/// Name of the authentication-context invocation in rule expressions.
pub const AUTH_FN: &str = "auth";

/// Literal constant in a rule expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Binary operators understood by the rule DSL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Array membership. Not representable in lowered output; degrades to
    /// an opaque operand.
    In,
}

impl BinaryOp {
    /// True for the comparison subset (`==`, `!=`, `<`, `<=`, `>`, `>=`).
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
        )
    }
}

/// Unary operators understood by the rule DSL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnaryOp {
    Not,
    Neg,
}

/// An expression node, optionally carrying its statically resolved type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    /// Resolved scalar type, when the front-end could determine one.
    pub ty: Option<ScalarType>,
}

/// Expression node kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExprKind {
    Literal(Literal),
    Ref(String),
    Member {
        object: Box<Expr>,
        member: String,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
    This,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Option<ScalarType>) -> Self {
        Self { kind, ty }
    }

    /// Boolean literal
    pub fn bool(value: bool) -> Self {
        Self::new(
            ExprKind::Literal(Literal::Bool(value)),
            Some(ScalarType::Boolean),
        )
    }

    /// Integer literal
    pub fn int(value: i64) -> Self {
        Self::new(ExprKind::Literal(Literal::Int(value)), Some(ScalarType::Int))
    }

    /// String literal
    pub fn string(value: impl Into<String>) -> Self {
        Self::new(
            ExprKind::Literal(Literal::String(value.into())),
            Some(ScalarType::String),
        )
    }

    /// Bare field reference, typed when the field's type is known
    pub fn field(name: impl Into<String>, ty: Option<ScalarType>) -> Self {
        Self::new(ExprKind::Ref(name.into()), ty)
    }

    /// `this`
    pub fn this() -> Self {
        Self::new(ExprKind::This, None)
    }

    /// Property access on an object expression
    pub fn member(object: Expr, member: impl Into<String>, ty: Option<ScalarType>) -> Self {
        Self::new(
            ExprKind::Member {
                object: Box::new(object),
                member: member.into(),
            },
            ty,
        )
    }

    /// `this.<field>`
    pub fn this_field(name: impl Into<String>, ty: Option<ScalarType>) -> Self {
        Self::member(Self::this(), name, ty)
    }

    /// The `auth()` invocation
    pub fn auth() -> Self {
        Self::new(
            ExprKind::Call {
                function: AUTH_FN.to_string(),
                args: Vec::new(),
            },
            None,
        )
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            Some(ScalarType::Boolean),
        )
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        let ty = operand.ty;
        Self::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
        )
    }

    /// `Some(b)` when this expression is exactly the boolean literal `b`.
    pub fn as_bool_literal(&self) -> Option<bool> {
        match &self.kind {
            ExprKind::Literal(Literal::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// True when this is the `auth()` invocation itself.
    pub fn is_auth_call(&self) -> bool {
        matches!(&self.kind, ExprKind::Call { function, args } if function == AUTH_FN && args.is_empty())
    }

    /// Property path of a member chain rooted at `auth()`.
    ///
    /// `auth().profile.role` yields `["profile", "role"]`; the bare `auth()`
    /// invocation yields an empty path. Returns `None` for anything not
    /// rooted at the auth invocation.
    pub fn auth_path(&self) -> Option<Vec<&str>> {
        match &self.kind {
            ExprKind::Call { .. } if self.is_auth_call() => Some(Vec::new()),
            ExprKind::Member { object, member } => {
                let mut path = object.auth_path()?;
                path.push(member.as_str());
                Some(path)
            }
            _ => None,
        }
    }

    /// Field path of a reference into the enclosing entity.
    ///
    /// Bare refs (`published`) and member chains rooted at `this`
    /// (`this.owner.isAdmin`) both resolve; everything else is `None`.
    /// A bare `this` yields `None` - it names the entity, not a field.
    pub fn entity_path(&self) -> Option<Vec<&str>> {
        match &self.kind {
            ExprKind::Ref(name) => Some(vec![name.as_str()]),
            ExprKind::Member { object, member } => {
                let mut path = match &object.kind {
                    ExprKind::This => Vec::new(),
                    _ => object.entity_path()?,
                };
                path.push(member.as_str());
                Some(path)
            }
            _ => None,
        }
    }

    /// Pre-order traversal over this expression and all sub-expressions.
    pub fn walk(&self, visit: &mut impl FnMut(&Expr)) {
        visit(self);
        match &self.kind {
            ExprKind::Member { object, .. } => object.walk(visit),
            ExprKind::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            ExprKind::Unary { operand, .. } => operand.walk(visit),
            ExprKind::Call { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            ExprKind::Literal(_) | ExprKind::Ref(_) | ExprKind::This => {}
        }
    }
}
