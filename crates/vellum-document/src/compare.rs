use std::cmp::Ordering;
use std::sync::Arc;

use crate::value::Value;

/// Injectable string ordering, used by the `compare_strings` configuration.
pub type StringComparator = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// Position of a value in the cross-type ordering hierarchy.
///
/// `Undefined` (the absent value) ranks below everything; it is handled by
/// [`compare_opt`] since it has no `Value` representation.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Bool(_) => 4,
        Value::Date(_) => 5,
        Value::Array(_) => 6,
        Value::Object(_) => 7,
    }
}

/// Total order over all values with the default (lexicographic) string order.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    compare_with(a, b, None)
}

/// Total order over all values.
///
/// Values of different types order by the hierarchy
/// `Null < Number < String < Bool < Date < Array < Object`. Within a type:
/// numbers and dates numerically, strings by `str_cmp` (lexicographic when
/// `None`), booleans `false < true`, arrays element-wise with ties broken by
/// length, objects by sorted-key pairwise comparison of values then by key
/// count.
pub fn compare_with(a: &Value, b: &Value, str_cmp: Option<&StringComparator>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => match str_cmp {
            Some(f) => f(x, y),
            None => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ea, eb) in x.iter().zip(y.iter()) {
                let ord = compare_with(ea, eb, str_cmp);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            // BTreeMap iterates in sorted key order, which is exactly the
            // order this comparison is defined over.
            for ((_, va), (_, vb)) in x.iter().zip(y.iter()) {
                let ord = compare_with(va, vb, str_cmp);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

/// Lift the total order to possibly-absent values; the absent value ranks
/// below everything.
pub fn compare_opt(
    a: Option<&Value>,
    b: Option<&Value>,
    str_cmp: Option<&StringComparator>,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_with(x, y, str_cmp),
    }
}

/// Match-engine equality.
///
/// Scalars compare by value and dates by timestamp. Arrays compare
/// element-wise, but a one-sided array never equals anything else. Objects
/// compare by key set plus recursive equality. Cross-type pairs are unequal.
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(ea, eb)| value_eq(ea, eb))
        }
        (Value::Array(_), _) | (_, Value::Array(_)) => false,
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, va)| y.get(k).is_some_and(|vb| value_eq(va, vb)))
        }
        _ => false,
    }
}

/// Equality over possibly-absent values; an absent side never equals.
pub fn eq_opt(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => value_eq(x, y),
        _ => false,
    }
}

/// Whether `$lt`-family comparisons apply to this pair: both numbers, both
/// strings, or both dates.
pub fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Date(_), Value::Date(_))
    )
}

/// The permissive truthiness used by `$exists`: only `0`, `false`, `null`
/// and the absent value read as false.
pub fn truthy(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => *n != 0.0,
        Some(_) => true,
    }
}
