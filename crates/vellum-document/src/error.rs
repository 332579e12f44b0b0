use std::fmt;

#[derive(Debug)]
pub enum DocumentError {
    /// A field name beginning with `$` or containing `.`.
    InvalidKey(String),
    Serialization(String),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::InvalidKey(key) => write!(f, "invalid field name: {key}"),
            DocumentError::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for DocumentError {}

impl From<serde_json::Error> for DocumentError {
    fn from(e: serde_json::Error) -> Self {
        DocumentError::Serialization(e.to_string())
    }
}
