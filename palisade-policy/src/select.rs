//! Field-selection inference
//!
//! Computes the minimal nested selection a rule set needs from fetched data.
//! The normal mode drives the shared lowering pass with a collecting target,
//! so the selection covers exactly the field paths lowering would reference -
//! the two cannot drift apart. The auth mode instead gathers every
//! property-access chain rooted at the auth invocation, since any of them may
//! be read when guards and checkers are built for a request.

use crate::constraint::{CompareOp, ConstraintValue, ValueType};
use crate::lower::{self, LowerEnv, LowerTarget};
use palisade_schema::{Expr, ExprKind, Model, Schema};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Nested field selection: field name to leaf or sub-selection.
pub type SelectionTree = BTreeMap<String, Selection>;

/// One selected field: a leaf scalar or a nested relation selection.
///
/// Serializes as `true` for leaves and `{"select": {..}}` for relations.
/// Tree equality is order-independent.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field,
    Select(SelectionTree),
}

impl Serialize for Selection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Selection::Field => serializer.serialize_bool(true),
            Selection::Select(tree) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("select", tree)?;
                map.end()
            }
        }
    }
}

/// Insert a field path, deepening existing entries as needed.
///
/// A leaf never downgrades a nested selection already present at the same
/// key; a nested path upgrades an existing leaf.
fn insert_path(tree: &mut SelectionTree, path: &[String]) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        tree.entry(head.clone()).or_insert(Selection::Field);
        return;
    }
    let entry = tree
        .entry(head.clone())
        .and_modify(|s| {
            if matches!(s, Selection::Field) {
                *s = Selection::Select(SelectionTree::new());
            }
        })
        .or_insert_with(|| Selection::Select(SelectionTree::new()));
    if let Selection::Select(nested) = entry {
        insert_path(nested, rest);
    }
}

/// Compute the selection a rule set requires.
///
/// `for_auth` collects auth-context paths instead of entity paths.
/// `exclude_field` drops paths rooted at the named field (used when the
/// caller already holds that field's value). Returns `None` when the rules
/// need no fetched data.
pub fn selection_for_rules(
    schema: &Schema,
    model: &Model,
    exprs: &[&Expr],
    for_auth: bool,
    exclude_field: Option<&str>,
) -> Option<SelectionTree> {
    let mut tree = SelectionTree::new();
    if for_auth {
        for expr in exprs {
            collect_auth_paths(expr, &mut tree);
        }
    } else {
        let mut target = CollectTarget {
            tree: &mut tree,
            exclude: exclude_field,
        };
        let env = LowerEnv::new(schema, model);
        for expr in exprs {
            lower::lower_expr(env, &mut target, expr, true);
        }
    }
    if tree.is_empty() {
        None
    } else {
        Some(tree)
    }
}

/// Collect maximal auth-rooted property chains.
fn collect_auth_paths(expr: &Expr, tree: &mut SelectionTree) {
    if let Some(path) = expr.auth_path() {
        if !path.is_empty() {
            let owned: Vec<String> = path.iter().map(|s| s.to_string()).collect();
            insert_path(tree, &owned);
        }
        return;
    }
    match &expr.kind {
        ExprKind::Member { object, .. } => collect_auth_paths(object, tree),
        ExprKind::Binary { left, right, .. } => {
            collect_auth_paths(left, tree);
            collect_auth_paths(right, tree);
        }
        ExprKind::Unary { operand, .. } => collect_auth_paths(operand, tree),
        ExprKind::Call { args, .. } => {
            for arg in args {
                collect_auth_paths(arg, tree);
            }
        }
        ExprKind::Literal(_) | ExprKind::Ref(_) | ExprKind::This => {}
    }
}

/// Lowering target that records referenced entity paths instead of building
/// predicates.
struct CollectTarget<'a> {
    tree: &'a mut SelectionTree,
    exclude: Option<&'a str>,
}

impl CollectTarget<'_> {
    fn record(&mut self, path: &[String]) {
        if let Some(excluded) = self.exclude {
            if path.first().map(String::as_str) == Some(excluded) {
                return;
            }
        }
        insert_path(self.tree, path);
    }
}

impl LowerTarget for CollectTarget<'_> {
    type Term = ();
    type Pred = ();

    fn literal(&mut self, _value: ConstraintValue) {}

    fn field_term(&mut self, name: &str, _ty: ValueType) -> Option<()> {
        self.record(&[name.to_string()]);
        Some(())
    }

    fn relation_term(&mut self, path: &[String], _ty: ValueType) -> Option<()> {
        self.record(path);
        Some(())
    }

    fn auth_term(&mut self, _path: &[String], _ty: Option<ValueType>) -> Option<()> {
        // Auth context is not fetched data.
        Some(())
    }

    fn compare(&mut self, _op: CompareOp, _left: (), _right: (), _positive: bool) {}
    fn truth(&mut self, _term: ()) {}
    fn constant(&mut self, _value: bool) {}
    fn and(&mut self, _children: Vec<()>) {}
    fn or(&mut self, _children: Vec<()>) {}
    fn not(&mut self, _child: ()) {}
    fn opaque(&mut self, _positive: bool) {}
}
