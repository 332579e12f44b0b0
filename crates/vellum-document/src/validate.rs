use crate::codec::is_reserved_key;
use crate::error::DocumentError;
use crate::value::{Document, Value};

/// Check a single field name: no `$` prefix, no embedded `.`. The reserved
/// wire forms (`$$date`, `$$deleted`, …) are exempt.
pub fn check_key(key: &str) -> Result<(), DocumentError> {
    if is_reserved_key(key) {
        return Ok(());
    }
    if key.starts_with('$') || key.contains('.') {
        return Err(DocumentError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Walk a document and fail on the first invalid field name.
pub fn validate_keys(doc: &Document) -> Result<(), DocumentError> {
    for (key, value) in doc {
        check_key(key)?;
        validate_value(value)?;
    }
    Ok(())
}

fn validate_value(value: &Value) -> Result<(), DocumentError> {
    match value {
        Value::Object(map) => validate_keys(map),
        Value::Array(items) => {
            for item in items {
                validate_value(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Strict-keys deep copy: offending field names are dropped from the copy
/// instead of failing the caller.
pub fn sanitize(doc: &Document) -> Document {
    doc.iter()
        .filter(|(key, _)| check_key(key).is_ok())
        .map(|(key, value)| (key.clone(), sanitize_value(value)))
        .collect()
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize(map)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}
