use crate::error::DocumentError;
use crate::validate::check_key;
use crate::value::{Document, Value};

/// Wire form of a `Date` value: `{"$$date": ms}`.
pub const DATE_KEY: &str = "$$date";
/// Tombstone marker: `{"_id": ..., "$$deleted": true}`.
pub const DELETED_KEY: &str = "$$deleted";
/// Index descriptor record key.
pub const INDEX_CREATED_KEY: &str = "$$indexCreated";
/// Index removal record key.
pub const INDEX_REMOVED_KEY: &str = "$$indexRemoved";

/// The four wire forms allowed to carry a `$` prefix in persisted payloads.
pub fn is_reserved_key(key: &str) -> bool {
    matches!(
        key,
        DATE_KEY | DELETED_KEY | INDEX_CREATED_KEY | INDEX_REMOVED_KEY
    )
}

/// Serialize a document to exactly one line of text.
///
/// Dates become `{"$$date": ms}`. Field names are validated during the walk
/// and an invalid one fails the whole operation; the reserved forms are
/// exempt. Newlines inside string values are escaped by the JSON encoder, so
/// the output never spans lines.
pub fn serialize(doc: &Document) -> Result<String, DocumentError> {
    let json = document_to_json(doc)?;
    Ok(serde_json::Value::Object(json).to_string())
}

fn document_to_json(doc: &Document) -> Result<serde_json::Map<String, serde_json::Value>, DocumentError> {
    let mut out = serde_json::Map::new();
    for (key, value) in doc {
        check_key(key)?;
        out.insert(key.clone(), value_to_json(value)?);
    }
    Ok(out)
}

fn value_to_json(value: &Value) -> Result<serde_json::Value, DocumentError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(ms) => {
            let mut wrap = serde_json::Map::new();
            wrap.insert(DATE_KEY.to_string(), serde_json::Value::from(*ms));
            serde_json::Value::Object(wrap)
        }
        Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(value_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) => serde_json::Value::Object(document_to_json(map)?),
    })
}

/// Inverse of [`serialize`]. `{"$$date": n}` rehydrates to a `Date`; any
/// other reserved-looking key passes through untouched (it is data). All
/// numbers come back as `Number(f64)`.
pub fn deserialize(line: &str) -> Result<Document, DocumentError> {
    let json: serde_json::Value = serde_json::from_str(line)?;
    match json_to_value(&json) {
        Value::Object(doc) => Ok(doc),
        _ => Err(DocumentError::Serialization(
            "record is not an object".to_string(),
        )),
    }
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                if let Some(ms) = map.get(DATE_KEY).and_then(serde_json::Value::as_f64) {
                    return Value::Date(ms as i64);
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), json_to_value(v)))
                    .collect(),
            )
        }
    }
}
