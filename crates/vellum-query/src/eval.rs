use std::borrow::Cow;
use std::cmp::Ordering;

use vellum_document::{Document, Value, comparable, compare, eq_opt, get_path, get_value_path, value_eq};

use crate::expression::{CmpOp, Expression};

/// Evaluate an expression against a document.
pub(crate) fn match_doc(doc: &Document, expr: &Expression) -> bool {
    match expr {
        Expression::And(children) => children.iter().all(|c| match_doc(doc, c)),
        Expression::Or(children) => children.iter().any(|c| match_doc(doc, c)),
        Expression::Not(child) => !match_doc(doc, child),
        Expression::Where(pred) => pred(doc),
        Expression::Cmp { path, op } => {
            let target = get_path(doc, path);
            match_target(target.as_deref(), op)
        }
    }
}

/// Evaluate an expression against a bare value (an array element under
/// `$elemMatch` or `$pull`). An empty condition path addresses the value
/// itself; a primitive element simply misses every field path.
pub(crate) fn match_value(value: &Value, expr: &Expression) -> bool {
    match expr {
        Expression::And(children) => children.iter().all(|c| match_value(value, c)),
        Expression::Or(children) => children.iter().any(|c| match_value(value, c)),
        Expression::Not(child) => !match_value(value, child),
        Expression::Where(pred) => match value {
            Value::Object(map) => pred(map),
            _ => false,
        },
        Expression::Cmp { path, op } => {
            let target = if path.is_empty() {
                Some(Cow::Borrowed(value))
            } else {
                get_value_path(value, path)
            };
            match_target(target.as_deref(), op)
        }
    }
}

/// Apply a comparison to a resolved field value.
///
/// When the field holds an array and the operator is not array-specific
/// (`$size`, `$elemMatch`) nor an array-vs-array equality, the condition
/// succeeds if any element satisfies it.
fn match_target(target: Option<&Value>, op: &CmpOp) -> bool {
    if let Some(Value::Array(items)) = target {
        let array_as_value = matches!(
            op,
            CmpOp::Size(_) | CmpOp::ElemMatch(_) | CmpOp::Eq(Value::Array(_))
        );
        if !array_as_value {
            return items.iter().any(|el| match_target(Some(el), op));
        }
    }
    match_scalar(target, op)
}

fn match_scalar(target: Option<&Value>, op: &CmpOp) -> bool {
    match op {
        CmpOp::Eq(v) => eq_opt(target, Some(v)),
        CmpOp::Ne(v) => !eq_opt(target, Some(v)),
        CmpOp::Lt(v) => ordered(target, v, |o| o == Ordering::Less),
        CmpOp::Lte(v) => ordered(target, v, |o| o != Ordering::Greater),
        CmpOp::Gt(v) => ordered(target, v, |o| o == Ordering::Greater),
        CmpOp::Gte(v) => ordered(target, v, |o| o != Ordering::Less),
        CmpOp::In(values) => match target {
            Some(x) => values.iter().any(|v| value_eq(x, v)),
            None => false,
        },
        CmpOp::Nin(values) => match target {
            Some(x) => !values.iter().any(|v| value_eq(x, v)),
            None => true,
        },
        CmpOp::Regex(re) => match target {
            Some(Value::String(s)) => re.is_match(s),
            _ => false,
        },
        CmpOp::Exists(expected) => *expected == target.is_some(),
        CmpOp::Size(n) => match target {
            Some(Value::Array(items)) => items.len() == *n,
            _ => false,
        },
        CmpOp::ElemMatch(expr) => match target {
            Some(Value::Array(items)) => items.iter().any(|el| match_value(el, expr)),
            _ => false,
        },
    }
}

fn ordered(target: Option<&Value>, operand: &Value, pred: fn(Ordering) -> bool) -> bool {
    match target {
        Some(x) if comparable(x, operand) => pred(compare(x, operand)),
        _ => false,
    }
}
