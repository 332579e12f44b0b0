use std::fmt;
use std::sync::Arc;

use regex::Regex;
use vellum_document::{Document, Value};

/// A user-supplied predicate over the whole document, the programmatic form
/// of `$where`. Returning `bool` is enforced by the signature.
pub type WherePredicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// A parsed query: a recursive predicate tree evaluated against documents.
///
/// Owns its field paths and operand values so it can outlive the query
/// document it was parsed from and cross thread boundaries into the
/// executor.
#[derive(Clone)]
pub enum Expression {
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    Where(WherePredicate),
    /// A single field condition: dot-path plus comparison operator. An empty
    /// path addresses the value itself (array-element conditions).
    Cmp { path: String, op: CmpOp },
}

#[derive(Debug, Clone)]
pub enum CmpOp {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Regex(Regex),
    Exists(bool),
    Size(usize),
    ElemMatch(Box<Expression>),
}

impl Expression {
    /// The match-everything query (what an empty query document parses to).
    pub fn all() -> Self {
        Expression::And(Vec::new())
    }

    /// Attach a `$where` predicate to an existing expression.
    pub fn and_where(self, pred: WherePredicate) -> Self {
        Expression::And(vec![self, Expression::Where(pred)])
    }

    /// Returns `true` when the document satisfies this expression.
    pub fn matches(&self, doc: &Document) -> bool {
        crate::eval::match_doc(doc, self)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::And(children) => f.debug_tuple("And").field(children).finish(),
            Expression::Or(children) => f.debug_tuple("Or").field(children).finish(),
            Expression::Not(child) => f.debug_tuple("Not").field(child).finish(),
            Expression::Where(_) => f.write_str("Where(<predicate>)"),
            Expression::Cmp { path, op } => f
                .debug_struct("Cmp")
                .field("path", path)
                .field("op", op)
                .finish(),
        }
    }
}
