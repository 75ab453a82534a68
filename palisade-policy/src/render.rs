//! Generated-source rendering
//!
//! Semantic lowering and rendering are separate stages: the compiler first
//! builds trees (constraints, query filters, object predicates) and tests
//! against their shape; this module renders the same rule sets as Rust
//! source for the shared generated output unit. Emission is append-only -
//! once a function is written into the [`SourceBuffer`] it is never
//! rewritten.
//!
//! Generated functions take a `PolicyContext` whose auth field is named by
//! the configured accessor, substituted verbatim into the emitted code.

use crate::constraint::{CompareOp, ConstraintValue, ValueType};
use crate::entity::{ObjectPredicate, ObjectTerm};
use crate::lower::{self, EmptyAllows, LowerEnv, LowerTarget};
use palisade_schema::{Expr, Model, Schema};

/// Append-only in-memory output unit.
#[derive(Debug, Default)]
pub struct SourceBuffer {
    out: String,
}

impl SourceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: impl AsRef<str>) {
        self.out.push_str(line.as_ref());
        self.out.push('\n');
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Emit the unit preamble: warning header and imports.
pub(crate) fn render_header(buf: &mut SourceBuffer) {
    buf.line("// Generated access-policy functions. Do not edit.");
    buf.line("#![allow(unused_mut, unused_variables)]");
    buf.blank();
    buf.line("use palisade_policy::{auth_lookup, auth_term_or_fresh, auth_value, compare_opt, compare_values_or, object_path_value, truthy};");
    buf.line("use palisade_policy::{CompareOp, Constraint, ConstraintTerm, ConstraintValue, FreshVars, QueryFilter, ValueType};");
    buf.line("use crate::runtime::PolicyContext;");
    buf.blank();
}

fn value_expr(value: &ConstraintValue) -> String {
    match value {
        ConstraintValue::Bool(b) => format!("ConstraintValue::Bool({})", b),
        ConstraintValue::Int(i) => format!("ConstraintValue::Int({})", i),
        ConstraintValue::String(s) => format!("ConstraintValue::String({:?}.to_string())", s),
    }
}

fn ty_expr(ty: ValueType) -> &'static str {
    match ty {
        ValueType::Boolean => "ValueType::Boolean",
        ValueType::Int => "ValueType::Int",
        ValueType::String => "ValueType::String",
    }
}

fn op_expr(op: CompareOp) -> String {
    format!("CompareOp::{:?}", op)
}

fn path_expr<S: AsRef<str>>(path: &[S]) -> String {
    let segs: Vec<String> = path.iter().map(|s| format!("{:?}", s.as_ref())).collect();
    format!("&[{}]", segs.join(", "))
}

fn join_children(children: Vec<String>) -> String {
    children.join(", ")
}

/// Render a query-guard function.
pub(crate) fn render_query_guard(
    buf: &mut SourceBuffer,
    schema: &Schema,
    model: &Model,
    name: &str,
    accessor: &str,
    allows: &[&Expr],
    denies: &[&Expr],
    empty_allows: EmptyAllows,
) {
    let mut target = QueryRender { accessor };
    let env = LowerEnv::new(schema, model);
    let body = lower::lower_rule_set(env, &mut target, allows, denies, empty_allows);
    buf.line(format!("pub fn {}(ctx: &PolicyContext) -> QueryFilter {{", name));
    buf.line(format!("    {}", body));
    buf.line("}");
    buf.blank();
}

/// Render a permission-checker function returning a constraint tree.
pub(crate) fn render_permission_checker(
    buf: &mut SourceBuffer,
    schema: &Schema,
    model: &Model,
    name: &str,
    accessor: &str,
    allows: &[&Expr],
    denies: &[&Expr],
) {
    let mut target = CheckerRender { accessor };
    let env = LowerEnv::new(schema, model);
    let body = lower::lower_rule_set(env, &mut target, allows, denies, EmptyAllows::Deny);
    buf.line(format!("pub fn {}(ctx: &PolicyContext) -> Constraint {{", name));
    buf.line("    let mut vars = FreshVars::new();");
    buf.line(format!("    {}", body));
    buf.line("}");
    buf.blank();
}

/// Render an entity or input checker from its compiled predicate.
///
/// `param` names the checked object (`entity` for post-fetch checkers,
/// `input` for create input checkers).
pub(crate) fn render_object_checker(
    buf: &mut SourceBuffer,
    name: &str,
    param: &str,
    accessor: &str,
    predicate: &ObjectPredicate,
) {
    let body = object_pred_expr(predicate, param, accessor);
    buf.line(format!(
        "pub fn {}({}: &serde_json::Value, ctx: &PolicyContext) -> bool {{",
        name, param
    ));
    buf.line(format!("    {}", body));
    buf.line("}");
    buf.blank();
}

fn object_term_expr(term: &ObjectTerm, root: &str, accessor: &str) -> String {
    match term {
        ObjectTerm::Value { value } => format!("Some({})", value_expr(value)),
        ObjectTerm::Path { path } => format!("object_path_value({}, {})", root, path_expr(path)),
        ObjectTerm::Auth { path } => {
            format!("auth_value(ctx.{}.as_ref(), {})", accessor, path_expr(path))
        }
    }
}

fn object_pred_expr(pred: &ObjectPredicate, root: &str, accessor: &str) -> String {
    match pred {
        ObjectPredicate::Const { value } => value.to_string(),
        ObjectPredicate::Truthy { term } => {
            format!("truthy({})", object_term_expr(term, root, accessor))
        }
        ObjectPredicate::Compare { op, left, right } => format!(
            "compare_opt({}, {}, {})",
            object_term_expr(left, root, accessor),
            op_expr(*op),
            object_term_expr(right, root, accessor)
        ),
        ObjectPredicate::And { children } => {
            let parts: Vec<String> = children
                .iter()
                .map(|c| object_pred_expr(c, root, accessor))
                .collect();
            format!("({})", parts.join(" && "))
        }
        ObjectPredicate::Or { children } => {
            let parts: Vec<String> = children
                .iter()
                .map(|c| object_pred_expr(c, root, accessor))
                .collect();
            format!("({})", parts.join(" || "))
        }
        ObjectPredicate::Not { child } => {
            format!("!({})", object_pred_expr(child, root, accessor))
        }
    }
}

/// Rendered query-guard operand.
enum QueryRenderTerm {
    Value(ConstraintValue),
    Column(String),
    Auth(Vec<String>),
}

/// Lowering target rendering query-guard construction code.
struct QueryRender<'a> {
    accessor: &'a str,
}

impl QueryRender<'_> {
    fn auth_expr(&self, path: &[String]) -> String {
        format!(
            "auth_value(ctx.{}.as_ref(), {})",
            self.accessor,
            path_expr(path)
        )
    }
}

impl LowerTarget for QueryRender<'_> {
    type Term = QueryRenderTerm;
    type Pred = String;

    fn literal(&mut self, value: ConstraintValue) -> QueryRenderTerm {
        QueryRenderTerm::Value(value)
    }

    fn field_term(&mut self, name: &str, _ty: ValueType) -> Option<QueryRenderTerm> {
        Some(QueryRenderTerm::Column(name.to_string()))
    }

    fn relation_term(&mut self, _path: &[String], _ty: ValueType) -> Option<QueryRenderTerm> {
        None
    }

    fn auth_term(&mut self, path: &[String], _ty: Option<ValueType>) -> Option<QueryRenderTerm> {
        Some(QueryRenderTerm::Auth(path.to_vec()))
    }

    fn compare(
        &mut self,
        op: CompareOp,
        left: QueryRenderTerm,
        right: QueryRenderTerm,
        positive: bool,
    ) -> String {
        use QueryRenderTerm::*;
        let fallback = !positive;
        match (left, right) {
            (Column(f), Value(v)) => format!(
                "QueryFilter::compare({:?}, {}, {})",
                f,
                op_expr(op),
                value_expr(&v)
            ),
            (Value(v), Column(f)) => format!(
                "QueryFilter::compare({:?}, {}, {})",
                f,
                op_expr(op.flip()),
                value_expr(&v)
            ),
            (Column(l), Column(r)) => format!(
                "QueryFilter::compare_fields({:?}, {}, {:?})",
                l,
                op_expr(op),
                r
            ),
            (Column(f), Auth(p)) => format!(
                "QueryFilter::compare_or({:?}, {}, {}, {})",
                f,
                op_expr(op),
                self.auth_expr(&p),
                fallback
            ),
            (Auth(p), Column(f)) => format!(
                "QueryFilter::compare_or({:?}, {}, {}, {})",
                f,
                op_expr(op.flip()),
                self.auth_expr(&p),
                fallback
            ),
            (Auth(p), Value(v)) => format!(
                "compare_values_or({}, {}, Some({}), {})",
                self.auth_expr(&p),
                op_expr(op),
                value_expr(&v),
                fallback
            ),
            (Value(v), Auth(p)) => format!(
                "compare_values_or(Some({}), {}, {}, {})",
                value_expr(&v),
                op_expr(op),
                self.auth_expr(&p),
                fallback
            ),
            (Auth(l), Auth(r)) => format!(
                "compare_values_or({}, {}, {}, {})",
                self.auth_expr(&l),
                op_expr(op),
                self.auth_expr(&r),
                fallback
            ),
            (Value(l), Value(r)) => format!(
                "QueryFilter::constant({})",
                l.compare(op, &r).unwrap_or(false)
            ),
        }
    }

    fn truth(&mut self, term: QueryRenderTerm) -> String {
        match term {
            QueryRenderTerm::Column(f) => format!("QueryFilter::field({:?})", f),
            QueryRenderTerm::Value(ConstraintValue::Bool(b)) => {
                format!("QueryFilter::constant({})", b)
            }
            QueryRenderTerm::Value(_) => "QueryFilter::constant(true)".to_string(),
            QueryRenderTerm::Auth(_) => {
                unreachable!("auth term in boolean position")
            }
        }
    }

    fn constant(&mut self, value: bool) -> String {
        format!("QueryFilter::constant({})", value)
    }

    fn and(&mut self, children: Vec<String>) -> String {
        format!("QueryFilter::and(vec![{}])", join_children(children))
    }

    fn or(&mut self, children: Vec<String>) -> String {
        format!("QueryFilter::or(vec![{}])", join_children(children))
    }

    fn not(&mut self, child: String) -> String {
        format!("QueryFilter::negate({})", child)
    }

    fn opaque(&mut self, positive: bool) -> String {
        format!("QueryFilter::constant({})", !positive)
    }
}

/// Rendered constraint operand.
enum CheckerRenderTerm {
    Value(ConstraintValue),
    Variable(String, ValueType),
    Auth(Vec<String>),
}

/// Lowering target rendering constraint-construction code.
struct CheckerRender<'a> {
    accessor: &'a str,
}

impl CheckerRender<'_> {
    fn term_expr(&self, term: &CheckerRenderTerm) -> String {
        match term {
            CheckerRenderTerm::Value(v) => format!("ConstraintTerm::value({})", value_expr(v)),
            CheckerRenderTerm::Variable(name, ty) => {
                format!("ConstraintTerm::variable({:?}, {})", name, ty_expr(*ty))
            }
            CheckerRenderTerm::Auth(path) => format!(
                "auth_term_or_fresh(auth_lookup(ctx.{}.as_ref(), {}), &mut vars)",
                self.accessor,
                path_expr(path)
            ),
        }
    }
}

impl LowerTarget for CheckerRender<'_> {
    type Term = CheckerRenderTerm;
    type Pred = String;

    fn literal(&mut self, value: ConstraintValue) -> CheckerRenderTerm {
        CheckerRenderTerm::Value(value)
    }

    fn field_term(&mut self, name: &str, ty: ValueType) -> Option<CheckerRenderTerm> {
        Some(CheckerRenderTerm::Variable(name.to_string(), ty))
    }

    fn relation_term(&mut self, _path: &[String], _ty: ValueType) -> Option<CheckerRenderTerm> {
        None
    }

    fn auth_term(&mut self, path: &[String], _ty: Option<ValueType>) -> Option<CheckerRenderTerm> {
        Some(CheckerRenderTerm::Auth(path.to_vec()))
    }

    fn compare(
        &mut self,
        op: CompareOp,
        left: CheckerRenderTerm,
        right: CheckerRenderTerm,
        _positive: bool,
    ) -> String {
        format!(
            "Constraint::comparison({}, {}, {})",
            op_expr(op),
            self.term_expr(&left),
            self.term_expr(&right)
        )
    }

    fn truth(&mut self, term: CheckerRenderTerm) -> String {
        match term {
            CheckerRenderTerm::Value(v) => format!("Constraint::value({})", value_expr(&v)),
            CheckerRenderTerm::Variable(name, ty) => {
                format!("Constraint::variable({:?}, {})", name, ty_expr(ty))
            }
            CheckerRenderTerm::Auth(_) => "vars.fresh_node()".to_string(),
        }
    }

    fn constant(&mut self, value: bool) -> String {
        format!("Constraint::value({})", value)
    }

    fn and(&mut self, children: Vec<String>) -> String {
        format!("Constraint::and(vec![{}])", join_children(children))
    }

    fn or(&mut self, children: Vec<String>) -> String {
        format!("Constraint::or(vec![{}])", join_children(children))
    }

    fn not(&mut self, child: String) -> String {
        format!("Constraint::not({})", child)
    }

    fn opaque(&mut self, _positive: bool) -> String {
        "vars.fresh_node()".to_string()
    }
}
