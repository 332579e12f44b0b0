use vellum_document::{Document, Value, truthy};

use crate::error::QueryError;
use crate::expression::{CmpOp, Expression};

/// Parse a query document into an [`Expression`] tree.
///
/// Top-level `$or`/`$and` take non-empty arrays of subqueries and `$not` a
/// subquery; they may sit alongside plain field conditions. A field value
/// that is an object with any `$`-key must consist only of known comparison
/// operators. `$regex` patterns are compiled here, once.
///
/// An empty document parses to the match-everything expression.
pub fn parse_query(query: &Document) -> Result<Expression, QueryError> {
    let mut children = Vec::new();

    for (key, value) in query {
        match key.as_str() {
            "$or" => children.push(parse_logical(value, Expression::Or)?),
            "$and" => children.push(parse_logical(value, Expression::And)?),
            "$not" => {
                let sub = value
                    .as_object()
                    .ok_or_else(|| QueryError::BadOperand("$not takes a query".to_string()))?;
                children.push(Expression::Not(Box::new(parse_query(sub)?)));
            }
            k if k.starts_with('$') => return Err(QueryError::UnknownOperator(k.to_string())),
            _ => children.push(parse_field(key, value)?),
        }
    }

    Ok(collapse(children))
}

fn collapse(mut children: Vec<Expression>) -> Expression {
    if children.len() == 1 {
        children.pop().unwrap_or(Expression::all())
    } else {
        Expression::And(children)
    }
}

fn parse_logical(
    value: &Value,
    make: fn(Vec<Expression>) -> Expression,
) -> Result<Expression, QueryError> {
    let items = value
        .as_array()
        .ok_or_else(|| QueryError::BadOperand("$and/$or take an array of queries".to_string()))?;
    if items.is_empty() {
        return Err(QueryError::BadOperand(
            "$and/$or array must not be empty".to_string(),
        ));
    }
    let mut children = Vec::with_capacity(items.len());
    for item in items {
        let sub = item
            .as_object()
            .ok_or_else(|| QueryError::BadOperand("$and/$or elements must be queries".to_string()))?;
        children.push(parse_query(sub)?);
    }
    Ok(make(children))
}

/// A field condition: either an operator sub-document or an implicit
/// equality against the given value.
fn parse_field(path: &str, value: &Value) -> Result<Expression, QueryError> {
    if let Value::Object(map) = value {
        let dollar = map.keys().filter(|k| k.starts_with('$')).count();
        if dollar > 0 {
            if dollar != map.len() {
                return Err(QueryError::MixedOperators);
            }
            let mut conditions = Vec::with_capacity(map.len());
            for (op_key, operand) in map {
                conditions.push(Expression::Cmp {
                    path: path.to_string(),
                    op: parse_cmp_op(op_key, operand)?,
                });
            }
            return Ok(collapse(conditions));
        }
    }
    Ok(Expression::Cmp {
        path: path.to_string(),
        op: CmpOp::Eq(value.clone()),
    })
}

fn is_comparison_op(key: &str) -> bool {
    matches!(
        key,
        "$eq" | "$ne" | "$lt" | "$lte" | "$gt" | "$gte" | "$in" | "$nin" | "$regex" | "$exists"
            | "$size" | "$elemMatch"
    )
}

fn parse_cmp_op(key: &str, operand: &Value) -> Result<CmpOp, QueryError> {
    Ok(match key {
        "$eq" => CmpOp::Eq(operand.clone()),
        "$ne" => CmpOp::Ne(operand.clone()),
        "$lt" => CmpOp::Lt(operand.clone()),
        "$lte" => CmpOp::Lte(operand.clone()),
        "$gt" => CmpOp::Gt(operand.clone()),
        "$gte" => CmpOp::Gte(operand.clone()),
        "$in" => CmpOp::In(operand_array(key, operand)?),
        "$nin" => CmpOp::Nin(operand_array(key, operand)?),
        "$regex" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| QueryError::BadOperand("$regex takes a string pattern".to_string()))?;
            let re = regex::Regex::new(pattern)
                .map_err(|e| QueryError::BadOperand(format!("invalid regex: {e}")))?;
            CmpOp::Regex(re)
        }
        "$exists" => CmpOp::Exists(truthy(Some(operand))),
        "$size" => {
            let n = operand.as_number().filter(|n| *n >= 0.0 && n.fract() == 0.0);
            match n {
                Some(n) => CmpOp::Size(n as usize),
                None => {
                    return Err(QueryError::BadOperand(
                        "$size takes a non-negative integer".to_string(),
                    ));
                }
            }
        }
        "$elemMatch" => CmpOp::ElemMatch(Box::new(parse_element_condition(operand)?)),
        other => return Err(QueryError::UnknownOperator(other.to_string())),
    })
}

fn operand_array(key: &str, operand: &Value) -> Result<Vec<Value>, QueryError> {
    operand
        .as_array()
        .map(<[Value]>::to_vec)
        .ok_or_else(|| QueryError::BadOperand(format!("{key} takes an array")))
}

/// Parse the condition applied to individual array elements (`$elemMatch`,
/// `$pull`).
///
/// An object whose keys are all comparison operators conditions the element
/// itself; any other object is a full subquery; a primitive is an equality
/// test against the element.
pub(crate) fn parse_element_condition(value: &Value) -> Result<Expression, QueryError> {
    match value {
        Value::Object(map)
            if !map.is_empty() && map.keys().all(|k| is_comparison_op(k)) =>
        {
            let mut conditions = Vec::with_capacity(map.len());
            for (op_key, operand) in map {
                conditions.push(Expression::Cmp {
                    path: String::new(),
                    op: parse_cmp_op(op_key, operand)?,
                });
            }
            Ok(collapse(conditions))
        }
        Value::Object(map) => parse_query(map),
        other => Ok(Expression::Cmp {
            path: String::new(),
            op: CmpOp::Eq(other.clone()),
        }),
    }
}
