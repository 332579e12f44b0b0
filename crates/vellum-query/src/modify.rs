use vellum_document::{Document, Value, compare, eq_opt, validate_keys, value_eq};

use crate::error::QueryError;
use crate::eval::match_value;
use crate::expression::Expression;
use crate::parse::parse_element_condition;

/// A parsed update document.
#[derive(Debug, Clone)]
pub enum Update {
    /// No `$`-modifiers at top level: the update replaces the document
    /// (keeping `_id`).
    Replace(Document),
    /// All-`$` top level: a list of (path, modifier) applications.
    Ops(Vec<FieldOp>),
}

#[derive(Debug, Clone)]
pub struct FieldOp {
    pub path: String,
    pub op: Modifier,
}

#[derive(Debug, Clone)]
pub enum Modifier {
    Set(Value),
    Unset,
    Inc(f64),
    Min(Value),
    Max(Value),
    Push { items: Vec<Value>, slice: Option<i64> },
    AddToSet { items: Vec<Value> },
    Pop(i64),
    Pull(Expression),
}

/// Parse an update document.
///
/// Top-level keys must be either all plain (full replace) or all
/// `$`-modifiers; mixing fails. Each modifier's value is a sub-document
/// mapping dot-paths to operands, validated here (`$inc` numeric, `$pop`
/// integer, `$push`/`$addToSet` companion keys, …).
pub fn parse_update(update: &Document) -> Result<Update, QueryError> {
    let dollar = update.keys().filter(|k| k.starts_with('$')).count();
    if dollar == 0 {
        return Ok(Update::Replace(update.clone()));
    }
    if dollar != update.len() {
        return Err(QueryError::MixedOperators);
    }

    let mut ops = Vec::new();
    for (key, value) in update {
        let fields = value.as_object().ok_or_else(|| {
            QueryError::BadOperand(format!("{key} takes a document of path/operand pairs"))
        })?;
        for (path, operand) in fields {
            let op = match key.as_str() {
                "$set" => Modifier::Set(operand.clone()),
                "$unset" => Modifier::Unset,
                "$inc" => match operand.as_number() {
                    Some(n) => Modifier::Inc(n),
                    None => {
                        return Err(QueryError::BadOperand(format!(
                            "$inc operand for '{path}' must be a number"
                        )));
                    }
                },
                "$min" => Modifier::Min(operand.clone()),
                "$max" => Modifier::Max(operand.clone()),
                "$push" => parse_push(operand)?,
                "$addToSet" => parse_add_to_set(operand)?,
                "$pop" => match operand.as_number().filter(|n| n.fract() == 0.0) {
                    Some(n) => Modifier::Pop(n as i64),
                    None => {
                        return Err(QueryError::BadOperand(format!(
                            "$pop operand for '{path}' must be an integer"
                        )));
                    }
                },
                "$pull" => Modifier::Pull(parse_element_condition(operand)?),
                other => return Err(QueryError::UnknownModifier(other.to_string())),
            };
            ops.push(FieldOp {
                path: path.clone(),
                op,
            });
        }
    }
    Ok(Update::Ops(ops))
}

fn parse_push(operand: &Value) -> Result<Modifier, QueryError> {
    if let Value::Object(map) = operand {
        if map.contains_key("$each") {
            for key in map.keys() {
                if key != "$each" && key != "$slice" {
                    return Err(QueryError::BadOperand(format!(
                        "$push with $each allows only $slice alongside, got {key}"
                    )));
                }
            }
            let items = map
                .get("$each")
                .and_then(Value::as_array)
                .map(<[Value]>::to_vec)
                .ok_or_else(|| QueryError::BadOperand("$each takes an array".to_string()))?;
            let slice = match map.get("$slice") {
                None => None,
                Some(v) => match v.as_number().filter(|n| n.fract() == 0.0) {
                    Some(n) => Some(n as i64),
                    None => {
                        return Err(QueryError::BadOperand(
                            "$slice takes an integer".to_string(),
                        ));
                    }
                },
            };
            return Ok(Modifier::Push { items, slice });
        }
        if map.contains_key("$slice") {
            return Err(QueryError::BadOperand(
                "$slice requires $each".to_string(),
            ));
        }
    }
    Ok(Modifier::Push {
        items: vec![operand.clone()],
        slice: None,
    })
}

fn parse_add_to_set(operand: &Value) -> Result<Modifier, QueryError> {
    if let Value::Object(map) = operand {
        if map.contains_key("$each") {
            if map.len() != 1 {
                return Err(QueryError::BadOperand(
                    "$addToSet with $each allows no other keys".to_string(),
                ));
            }
            let items = map
                .get("$each")
                .and_then(Value::as_array)
                .map(<[Value]>::to_vec)
                .ok_or_else(|| QueryError::BadOperand("$each takes an array".to_string()))?;
            return Ok(Modifier::AddToSet { items });
        }
    }
    Ok(Modifier::AddToSet {
        items: vec![operand.clone()],
    })
}

/// Apply an update to a document, producing the new document.
///
/// The original is untouched. The result keeps the original `_id`; any
/// attempt to change it fails, as does an invalid field name in the result.
pub fn modify(doc: &Document, update: &Update) -> Result<Document, QueryError> {
    let result = match update {
        Update::Replace(new_doc) => {
            if let Some(new_id) = new_doc.get("_id") {
                if !eq_opt(Some(new_id), doc.get("_id")) {
                    return Err(QueryError::ImmutableId);
                }
            }
            let mut result = new_doc.clone();
            if let Some(id) = doc.get("_id") {
                result.insert("_id".to_string(), id.clone());
            }
            result
        }
        Update::Ops(ops) => {
            let mut result = doc.clone();
            for field_op in ops {
                apply_op(&mut result, &field_op.path, &field_op.op)?;
            }
            if doc.contains_key("_id") && !eq_opt(result.get("_id"), doc.get("_id")) {
                return Err(QueryError::ImmutableId);
            }
            result
        }
    };
    validate_keys(&result)?;
    Ok(result)
}

/// Set a dot-path to a value, fabricating intermediate objects as needed.
/// A scalar in the middle of the path makes this a silent no-op.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    // Set cannot fail; the Result is an artifact of the shared walker.
    let _ = apply_to_doc(doc, &segments, &Modifier::Set(value));
}

/// Remove the leaf addressed by a dot-path; never fabricates intermediates.
pub fn unset_path(doc: &mut Document, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let _ = apply_to_doc(doc, &segments, &Modifier::Unset);
}

fn apply_op(doc: &mut Document, path: &str, op: &Modifier) -> Result<(), QueryError> {
    let segments: Vec<&str> = path.split('.').collect();
    apply_to_doc(doc, &segments, op)
}

fn apply_to_doc(map: &mut Document, segments: &[&str], op: &Modifier) -> Result<(), QueryError> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };
    if rest.is_empty() {
        return apply_leaf(map, head, op);
    }
    match map.get_mut(*head) {
        Some(Value::Object(sub)) => apply_to_doc(sub, rest, op),
        Some(Value::Array(items)) => apply_to_array(items, rest, op),
        // A scalar in the middle of the path: the mutation is refused
        // silently (the leaf is not created).
        Some(_) => Ok(()),
        None => {
            if matches!(op, Modifier::Unset) {
                return Ok(());
            }
            map.insert(head.to_string(), Value::Object(Document::new()));
            match map.get_mut(*head) {
                Some(Value::Object(sub)) => apply_to_doc(sub, rest, op),
                _ => Ok(()),
            }
        }
    }
}

fn apply_to_array(items: &mut [Value], segments: &[&str], op: &Modifier) -> Result<(), QueryError> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };
    let Ok(idx) = head.parse::<usize>() else {
        return Ok(());
    };
    let Some(slot) = items.get_mut(idx) else {
        return Ok(());
    };
    if rest.is_empty() {
        return apply_array_leaf(slot, op);
    }
    match slot {
        Value::Object(sub) => apply_to_doc(sub, rest, op),
        Value::Array(inner) => apply_to_array(inner, rest, op),
        _ => Ok(()),
    }
}

/// Leaf application when the parent is an array element addressed by index.
fn apply_array_leaf(slot: &mut Value, op: &Modifier) -> Result<(), QueryError> {
    match op {
        Modifier::Set(v) => {
            *slot = v.clone();
            Ok(())
        }
        // Unsetting an indexed slot nulls it rather than shifting later
        // elements, so sibling indexes stay stable.
        Modifier::Unset => {
            *slot = Value::Null;
            Ok(())
        }
        other => {
            let mut wrap = Document::new();
            wrap.insert("el".to_string(), std::mem::replace(slot, Value::Null));
            apply_leaf(&mut wrap, "el", other)?;
            if let Some(v) = wrap.remove("el") {
                *slot = v;
            }
            Ok(())
        }
    }
}

fn apply_leaf(map: &mut Document, key: &str, op: &Modifier) -> Result<(), QueryError> {
    match op {
        Modifier::Set(v) => {
            map.insert(key.to_string(), v.clone());
            Ok(())
        }
        Modifier::Unset => {
            map.remove(key);
            Ok(())
        }
        Modifier::Inc(amount) => match map.get_mut(key) {
            None => {
                map.insert(key.to_string(), Value::Number(*amount));
                Ok(())
            }
            Some(Value::Number(n)) => {
                *n += *amount;
                Ok(())
            }
            Some(_) => Err(QueryError::TypeMismatch(format!(
                "$inc target '{key}' is not a number"
            ))),
        },
        Modifier::Min(v) => {
            match map.get(key) {
                None => {
                    map.insert(key.to_string(), v.clone());
                }
                Some(current) => {
                    if compare(v, current) == std::cmp::Ordering::Less {
                        map.insert(key.to_string(), v.clone());
                    }
                }
            }
            Ok(())
        }
        Modifier::Max(v) => {
            match map.get(key) {
                None => {
                    map.insert(key.to_string(), v.clone());
                }
                Some(current) => {
                    if compare(v, current) == std::cmp::Ordering::Greater {
                        map.insert(key.to_string(), v.clone());
                    }
                }
            }
            Ok(())
        }
        Modifier::Push { items, slice } => {
            let target = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(arr) = target else {
                return Err(QueryError::TypeMismatch(format!(
                    "$push target '{key}' is not an array"
                )));
            };
            arr.extend(items.iter().cloned());
            if let Some(n) = slice {
                apply_slice(arr, *n);
            }
            Ok(())
        }
        Modifier::AddToSet { items } => {
            let target = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(arr) = target else {
                return Err(QueryError::TypeMismatch(format!(
                    "$addToSet target '{key}' is not an array"
                )));
            };
            for item in items {
                if !arr.iter().any(|existing| value_eq(existing, item)) {
                    arr.push(item.clone());
                }
            }
            Ok(())
        }
        Modifier::Pop(n) => {
            let Some(Value::Array(arr)) = map.get_mut(key) else {
                return Err(QueryError::TypeMismatch(format!(
                    "$pop target '{key}' is not an array"
                )));
            };
            if *n > 0 {
                arr.pop();
            } else if *n < 0 && !arr.is_empty() {
                arr.remove(0);
            }
            Ok(())
        }
        Modifier::Pull(cond) => {
            let Some(Value::Array(arr)) = map.get_mut(key) else {
                return Err(QueryError::TypeMismatch(format!(
                    "$pull target '{key}' is not an array"
                )));
            };
            arr.retain(|el| !match_value(el, cond));
            Ok(())
        }
    }
}

fn apply_slice(arr: &mut Vec<Value>, n: i64) {
    if n == 0 {
        arr.clear();
    } else if n > 0 {
        arr.truncate(n as usize);
    } else {
        let keep = n.unsigned_abs() as usize;
        if arr.len() > keep {
            arr.drain(..arr.len() - keep);
        }
    }
}

#[cfg(test)]
mod tests {
    use vellum_document::{arr, doc};

    use super::*;

    fn apply(doc: &Document, update: &Document) -> Result<Document, QueryError> {
        modify(doc, &parse_update(update)?)
    }

    #[test]
    fn replace_keeps_id() {
        let d = doc! { "_id": "a", "x": 1 };
        let out = apply(&d, &doc! { "y": 2 }).unwrap();
        assert_eq!(out, doc! { "_id": "a", "y": 2 });
    }

    #[test]
    fn replace_with_same_id_is_fine() {
        let d = doc! { "_id": "a", "x": 1 };
        let out = apply(&d, &doc! { "_id": "a", "y": 2 }).unwrap();
        assert_eq!(out.get("y"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn replace_with_different_id_fails() {
        let d = doc! { "_id": "a", "x": 1 };
        assert!(matches!(
            apply(&d, &doc! { "_id": "b" }),
            Err(QueryError::ImmutableId)
        ));
    }

    #[test]
    fn mixing_modifiers_and_fields_fails() {
        let d = doc! { "_id": "a" };
        assert!(matches!(
            apply(&d, &doc! { "$set": doc! { "x": 1 }, "plain": 2 }),
            Err(QueryError::MixedOperators)
        ));
    }

    #[test]
    fn unknown_modifier_fails() {
        let d = doc! { "_id": "a" };
        assert!(matches!(
            apply(&d, &doc! { "$bump": doc! { "x": 1 } }),
            Err(QueryError::UnknownModifier(op)) if op == "$bump"
        ));
    }

    #[test]
    fn set_creates_nested_path() {
        let d = doc! { "_id": "a" };
        let out = apply(&d, &doc! { "$set": doc! { "address.city": "Austin" } }).unwrap();
        let address = out.get("address").and_then(Value::as_object).unwrap();
        assert_eq!(address.get("city"), Some(&Value::String("Austin".into())));
    }

    #[test]
    fn set_through_scalar_is_silent_noop() {
        let d = doc! { "_id": "a", "x": 3 };
        let out = apply(&d, &doc! { "$set": doc! { "x.y": 1 } }).unwrap();
        assert_eq!(out, d);
    }

    #[test]
    fn set_array_element_by_index() {
        let d = doc! { "_id": "a", "tags": arr!["x", "y"] };
        let out = apply(&d, &doc! { "$set": doc! { "tags.1": "z" } }).unwrap();
        assert_eq!(out.get("tags"), Some(&arr!["x", "z"]));
    }

    #[test]
    fn unset_removes_leaf_without_fabricating() {
        let d = doc! { "_id": "a", "x": 1, "sub": doc! { "y": 2 } };
        let out = apply(&d, &doc! { "$unset": doc! { "x": true, "sub.y": true } }).unwrap();
        assert!(!out.contains_key("x"));
        assert_eq!(
            out.get("sub").and_then(Value::as_object).map(|m| m.len()),
            Some(0)
        );
        let out = apply(&d, &doc! { "$unset": doc! { "ghost.deep": true } }).unwrap();
        assert!(!out.contains_key("ghost"));
    }

    #[test]
    fn inc_creates_and_adds() {
        let d = doc! { "_id": "a", "n": 10 };
        let out = apply(&d, &doc! { "$inc": doc! { "n": 5, "fresh": 2 } }).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Number(15.0)));
        assert_eq!(out.get("fresh"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn inc_on_non_number_fails() {
        let d = doc! { "_id": "a", "s": "hi" };
        assert!(matches!(
            apply(&d, &doc! { "$inc": doc! { "s": 1 } }),
            Err(QueryError::TypeMismatch(_))
        ));
    }

    #[test]
    fn inc_operand_must_be_numeric() {
        let d = doc! { "_id": "a" };
        assert!(matches!(
            apply(&d, &doc! { "$inc": doc! { "n": "one" } }),
            Err(QueryError::BadOperand(_))
        ));
    }

    #[test]
    fn min_and_max() {
        let d = doc! { "_id": "a", "n": 10 };
        let out = apply(&d, &doc! { "$min": doc! { "n": 3 } }).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Number(3.0)));
        let out = apply(&d, &doc! { "$min": doc! { "n": 30 } }).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Number(10.0)));
        let out = apply(&d, &doc! { "$max": doc! { "n": 30 } }).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Number(30.0)));
        let out = apply(&d, &doc! { "$max": doc! { "fresh": 1 } }).unwrap();
        assert_eq!(out.get("fresh"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn push_appends_and_creates() {
        let d = doc! { "_id": "a", "tags": arr!["x"] };
        let out = apply(&d, &doc! { "$push": doc! { "tags": "y", "fresh": 1 } }).unwrap();
        assert_eq!(out.get("tags"), Some(&arr!["x", "y"]));
        assert_eq!(out.get("fresh"), Some(&arr![1]));
    }

    #[test]
    fn push_on_non_array_fails() {
        let d = doc! { "_id": "a", "n": 3 };
        assert!(matches!(
            apply(&d, &doc! { "$push": doc! { "n": 1 } }),
            Err(QueryError::TypeMismatch(_))
        ));
    }

    #[test]
    fn push_each_with_slice() {
        let d = doc! { "_id": "a", "arr": arr!["hello"] };
        let out = apply(
            &d,
            &doc! { "$push": doc! { "arr": doc! { "$each": arr!["w", "e", "x"], "$slice": -2 } } },
        )
        .unwrap();
        assert_eq!(out.get("arr"), Some(&arr!["e", "x"]));
    }

    #[test]
    fn push_slice_boundaries() {
        let d = doc! { "_id": "a", "arr": arr![1, 2] };
        let out = apply(
            &d,
            &doc! { "$push": doc! { "arr": doc! { "$each": arr![], "$slice": -10 } } },
        )
        .unwrap();
        assert_eq!(out.get("arr"), Some(&arr![1, 2]));
        let out = apply(
            &d,
            &doc! { "$push": doc! { "arr": doc! { "$each": arr![3], "$slice": 0 } } },
        )
        .unwrap();
        assert_eq!(out.get("arr"), Some(&arr![]));
        let out = apply(
            &d,
            &doc! { "$push": doc! { "arr": doc! { "$each": arr![3, 4], "$slice": 3 } } },
        )
        .unwrap();
        assert_eq!(out.get("arr"), Some(&arr![1, 2, 3]));
    }

    #[test]
    fn push_slice_requires_each() {
        let d = doc! { "_id": "a", "arr": arr![1] };
        assert!(matches!(
            apply(&d, &doc! { "$push": doc! { "arr": doc! { "$slice": 1 } } }),
            Err(QueryError::BadOperand(_))
        ));
    }

    #[test]
    fn push_each_rejects_stray_keys() {
        let d = doc! { "_id": "a" };
        assert!(apply(
            &d,
            &doc! { "$push": doc! { "arr": doc! { "$each": arr![1], "$sort": 1 } } }
        )
        .is_err());
    }

    #[test]
    fn push_plain_object_operand_is_pushed() {
        let d = doc! { "_id": "a", "arr": arr![] };
        let out = apply(&d, &doc! { "$push": doc! { "arr": doc! { "k": 1 } } }).unwrap();
        assert_eq!(out.get("arr"), Some(&arr![doc! { "k": 1 }]));
    }

    #[test]
    fn add_to_set_skips_deep_equal() {
        let d = doc! { "_id": "a", "tags": arr!["x", doc! { "k": 1 }] };
        let out = apply(&d, &doc! { "$addToSet": doc! { "tags": "x" } }).unwrap();
        assert_eq!(out.get("tags").and_then(Value::as_array).map(<[Value]>::len), Some(2));
        let out = apply(&d, &doc! { "$addToSet": doc! { "tags": doc! { "k": 1 } } }).unwrap();
        assert_eq!(out.get("tags").and_then(Value::as_array).map(<[Value]>::len), Some(2));
        let out = apply(&d, &doc! { "$addToSet": doc! { "tags": "y" } }).unwrap();
        assert_eq!(out.get("tags").and_then(Value::as_array).map(<[Value]>::len), Some(3));
    }

    #[test]
    fn add_to_set_each() {
        let d = doc! { "_id": "a", "tags": arr!["x"] };
        let out = apply(
            &d,
            &doc! { "$addToSet": doc! { "tags": doc! { "$each": arr!["x", "y"] } } },
        )
        .unwrap();
        assert_eq!(out.get("tags"), Some(&arr!["x", "y"]));
        assert!(apply(
            &d,
            &doc! { "$addToSet": doc! { "tags": doc! { "$each": arr![], "$slice": 1 } } }
        )
        .is_err());
    }

    #[test]
    fn pop_front_and_back() {
        let d = doc! { "_id": "a", "arr": arr![1, 2, 3] };
        let out = apply(&d, &doc! { "$pop": doc! { "arr": 1 } }).unwrap();
        assert_eq!(out.get("arr"), Some(&arr![1, 2]));
        let out = apply(&d, &doc! { "$pop": doc! { "arr": -1 } }).unwrap();
        assert_eq!(out.get("arr"), Some(&arr![2, 3]));
        let out = apply(&d, &doc! { "$pop": doc! { "arr": 0 } }).unwrap();
        assert_eq!(out.get("arr"), Some(&arr![1, 2, 3]));
    }

    #[test]
    fn pop_on_empty_array_is_noop() {
        let d = doc! { "_id": "a", "arr": arr![] };
        let out = apply(&d, &doc! { "$pop": doc! { "arr": 1 } }).unwrap();
        assert_eq!(out.get("arr"), Some(&arr![]));
    }

    #[test]
    fn pop_rejects_non_integer_and_non_array() {
        let d = doc! { "_id": "a", "n": 1, "arr": arr![1] };
        assert!(apply(&d, &doc! { "$pop": doc! { "arr": 1.5 } }).is_err());
        assert!(apply(&d, &doc! { "$pop": doc! { "n": 1 } }).is_err());
    }

    #[test]
    fn pull_primitive_and_query() {
        let d = doc! { "_id": "a", "arr": arr![1, 2, 3, 2] };
        let out = apply(&d, &doc! { "$pull": doc! { "arr": 2 } }).unwrap();
        assert_eq!(out.get("arr"), Some(&arr![1, 3]));

        let d = doc! {
            "_id": "a",
            "items": vec![
                Value::Object(doc! { "score": 3 }),
                Value::Object(doc! { "score": 9 }),
            ]
        };
        let out = apply(
            &d,
            &doc! { "$pull": doc! { "items": doc! { "score": doc! { "$gt": 5 } } } },
        )
        .unwrap();
        assert_eq!(out.get("items"), Some(&arr![doc! { "score": 3 }]));
    }

    #[test]
    fn pull_with_operator_condition() {
        let d = doc! { "_id": "a", "arr": arr![1, 8, 3] };
        let out = apply(&d, &doc! { "$pull": doc! { "arr": doc! { "$gte": 3 } } }).unwrap();
        assert_eq!(out.get("arr"), Some(&arr![1]));
    }

    #[test]
    fn modifier_cannot_touch_id() {
        let d = doc! { "_id": "a", "x": 1 };
        assert!(matches!(
            apply(&d, &doc! { "$set": doc! { "_id": "b" } }),
            Err(QueryError::ImmutableId)
        ));
    }

    #[test]
    fn result_keys_are_validated() {
        let d = doc! { "_id": "a" };
        assert!(apply(&d, &doc! { "$set": doc! { "x": doc! { "$bad": 1 } } }).is_err());
    }

    #[test]
    fn replace_equals_copy_with_id() {
        let d = doc! { "_id": "a", "old": 1 };
        let replacement = doc! { "fresh": true, "n": 2 };
        let out = apply(&d, &replacement).unwrap();
        let mut expected = replacement.clone();
        expected.insert("_id".to_string(), Value::String("a".into()));
        assert_eq!(out, expected);
    }
}
