use std::borrow::Cow;

use crate::value::{Document, Value};

/// Resolve a dot-path against a document.
///
/// Each segment descends into an object field. When the current value is an
/// array, a segment that parses as a non-negative integer indexes into it;
/// any other segment maps the remaining path across all elements and yields
/// an array of the hits. A miss anywhere yields `None` (the absent value).
///
/// Borrows from the document whenever possible; only the array-mapping case
/// allocates.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<Cow<'a, Value>> {
    let segments: Vec<&str> = path.split('.').collect();
    let (head, rest) = segments.split_first()?;
    doc.get(*head).and_then(|v| get_segments(v, rest))
}

/// [`get_path`] rooted at an arbitrary value instead of a document.
pub fn get_value_path<'a>(value: &'a Value, path: &str) -> Option<Cow<'a, Value>> {
    let segments: Vec<&str> = path.split('.').collect();
    get_segments(value, &segments)
}

fn get_segments<'a>(value: &'a Value, segments: &[&str]) -> Option<Cow<'a, Value>> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(Cow::Borrowed(value));
    };
    match value {
        Value::Object(map) => map.get(*head).and_then(|v| get_segments(v, rest)),
        Value::Array(items) => {
            if let Ok(idx) = head.parse::<usize>() {
                items.get(idx).and_then(|v| get_segments(v, rest))
            } else {
                let hits: Vec<Value> = items
                    .iter()
                    .filter_map(|el| get_segments(el, segments).map(Cow::into_owned))
                    .collect();
                Some(Cow::Owned(Value::Array(hits)))
            }
        }
        _ => None,
    }
}
