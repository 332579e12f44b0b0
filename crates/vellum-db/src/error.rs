use std::fmt;

use vellum_document::DocumentError;
use vellum_query::QueryError;
use vellum_store::StoreError;

#[derive(Debug)]
pub enum DbError {
    /// A field name beginning with `$` or containing `.`.
    InvalidKey(String),
    /// An update attempted to change `_id`.
    ImmutableId,
    UnknownOperator(String),
    UnknownModifier(String),
    /// An operator or modifier operand has the wrong shape.
    ModifierArgType(String),
    MixedOperators,
    TypeMismatch(String),
    /// A unique index rejected a duplicate key.
    UniqueViolation { field: String },
    /// A null (or missing) key reached a unique index.
    NullKey { field: String },
    /// An array value at an indexed field.
    ArrayKey { field: String },
    /// Journal replay exceeded the corruption threshold.
    Corruption(String),
    /// Only one of the two serialization hooks is configured.
    HooksMissing,
    /// The serialization hooks are not mutually inverse.
    HooksNotInverse,
    /// Invalid datastore configuration.
    Config(String),
    /// A projection document mixed include and exclude modes.
    Projection(String),
    Serialization(String),
    Io(std::io::Error),
    /// A queued operation did not report back (the executor is gone or the
    /// task died).
    Internal(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::InvalidKey(key) => write!(f, "invalid field name: {key}"),
            DbError::ImmutableId => write!(f, "the _id field is immutable"),
            DbError::UnknownOperator(op) => write!(f, "unknown query operator: {op}"),
            DbError::UnknownModifier(op) => write!(f, "unknown update modifier: {op}"),
            DbError::ModifierArgType(msg) => write!(f, "bad operand: {msg}"),
            DbError::MixedOperators => {
                write!(f, "cannot mix operators and plain fields at the same level")
            }
            DbError::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            DbError::UniqueViolation { field } => {
                write!(f, "unique constraint violated on field {field}")
            }
            DbError::NullKey { field } => {
                write!(f, "null key rejected by unique index on field {field}")
            }
            DbError::ArrayKey { field } => {
                write!(f, "array keys are not supported (index on field {field})")
            }
            DbError::Corruption(msg) => write!(f, "data file corruption: {msg}"),
            DbError::HooksMissing => write!(
                f,
                "afterSerialization and beforeDeserialization must be configured together"
            ),
            DbError::HooksNotInverse => write!(
                f,
                "afterSerialization and beforeDeserialization do not compose to the identity"
            ),
            DbError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            DbError::Projection(msg) => write!(f, "invalid projection: {msg}"),
            DbError::Serialization(msg) => write!(f, "serialization error: {msg}"),
            DbError::Io(e) => write!(f, "io error: {e}"),
            DbError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<StoreError> for DbError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Io(io) => DbError::Io(io),
        }
    }
}

impl From<DocumentError> for DbError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::InvalidKey(key) => DbError::InvalidKey(key),
            DocumentError::Serialization(msg) => DbError::Serialization(msg),
        }
    }
}

impl From<QueryError> for DbError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::UnknownOperator(op) => DbError::UnknownOperator(op),
            QueryError::UnknownModifier(op) => DbError::UnknownModifier(op),
            QueryError::MixedOperators => DbError::MixedOperators,
            QueryError::BadOperand(msg) => DbError::ModifierArgType(msg),
            QueryError::TypeMismatch(msg) => DbError::TypeMismatch(msg),
            QueryError::ImmutableId => DbError::ImmutableId,
            QueryError::Document(d) => d.into(),
        }
    }
}
