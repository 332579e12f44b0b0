use std::fmt;

use vellum_document::DocumentError;

#[derive(Debug)]
pub enum QueryError {
    /// Unknown `$`-operator at query top level or in a field condition.
    UnknownOperator(String),
    /// Unknown `$`-modifier at update top level.
    UnknownModifier(String),
    /// `$`-keys mixed with plain field keys at a level where one kind is
    /// required.
    MixedOperators,
    /// An operator or modifier operand has the wrong shape.
    BadOperand(String),
    /// A modifier hit a target of the wrong type.
    TypeMismatch(String),
    /// An update attempted to change `_id`.
    ImmutableId,
    Document(DocumentError),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::UnknownOperator(op) => write!(f, "unknown query operator: {op}"),
            QueryError::UnknownModifier(op) => write!(f, "unknown update modifier: {op}"),
            QueryError::MixedOperators => {
                write!(f, "cannot mix operators and plain fields at the same level")
            }
            QueryError::BadOperand(msg) => write!(f, "bad operand: {msg}"),
            QueryError::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            QueryError::ImmutableId => write!(f, "the _id field is immutable"),
            QueryError::Document(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<DocumentError> for QueryError {
    fn from(e: DocumentError) -> Self {
        QueryError::Document(e)
    }
}
