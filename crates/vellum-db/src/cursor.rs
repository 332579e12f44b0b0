use std::cmp::Ordering;

use vellum_document::{Document, StringComparator, Value, compare_opt, get_path};
use vellum_query::{Expression, set_path, unset_path};

use crate::error::DbError;
use crate::index::SharedDoc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One sort criterion: a dot-path and its own direction.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Shaping applied after the predicate: sort, then skip/limit, then
/// projection.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    /// `{field: 1}` picks fields (plus `_id` unless `"_id": 0`); `{field: 0}`
    /// omits them. The two modes cannot be mixed except for `_id`.
    pub projection: Option<Document>,
}

impl FindOptions {
    pub fn limited(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// Run the read pipeline over the index candidates:
/// filter → sort → skip/limit → project. Returns deep copies.
pub(crate) fn run(
    candidates: Vec<SharedDoc>,
    expr: &Expression,
    opts: &FindOptions,
    str_cmp: Option<&StringComparator>,
) -> Result<Vec<Document>, DbError> {
    let mut matched: Vec<SharedDoc> = candidates
        .into_iter()
        .filter(|doc| expr.matches(doc))
        .collect();

    if !opts.sort.is_empty() {
        matched.sort_by(|a, b| {
            for key in &opts.sort {
                let av = get_path(a, &key.path);
                let bv = get_path(b, &key.path);
                let ord = compare_opt(av.as_deref(), bv.as_deref(), str_cmp);
                let ord = match key.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    let shaped = matched.into_iter().skip(opts.skip.unwrap_or(0));
    let shaped: Vec<SharedDoc> = match opts.limit {
        Some(limit) => shaped.take(limit).collect(),
        None => shaped.collect(),
    };

    match &opts.projection {
        None => Ok(shaped.iter().map(|doc| (**doc).clone()).collect()),
        Some(spec) => shaped.iter().map(|doc| apply_projection(doc, spec)).collect(),
    }
}

fn apply_projection(doc: &Document, spec: &Document) -> Result<Document, DbError> {
    let mut mode: Option<bool> = None;
    let mut keep_id = true;
    let mut paths: Vec<(&String, bool)> = Vec::new();

    for (path, value) in spec {
        let include = match value {
            Value::Number(n) if *n == 1.0 => true,
            Value::Number(n) if *n == 0.0 => false,
            Value::Bool(b) => *b,
            _ => {
                return Err(DbError::Projection(
                    "projection values must be 0 or 1".to_string(),
                ));
            }
        };
        if path == "_id" {
            keep_id = include;
            continue;
        }
        match mode {
            None => mode = Some(include),
            Some(current) if current != include => {
                return Err(DbError::Projection(
                    "cannot mix including and excluding fields (except _id)".to_string(),
                ));
            }
            Some(_) => {}
        }
        paths.push((path, include));
    }

    match mode {
        // Only an `_id` directive (or an empty spec).
        None => {
            let mut result = doc.clone();
            if !keep_id {
                result.remove("_id");
            }
            Ok(result)
        }
        Some(true) => {
            let mut result = Document::new();
            for (path, _) in paths {
                if let Some(value) = get_path(doc, path) {
                    set_path(&mut result, path, value.into_owned());
                }
            }
            if keep_id {
                if let Some(id) = doc.get("_id") {
                    result.insert("_id".to_string(), id.clone());
                }
            }
            Ok(result)
        }
        Some(false) => {
            let mut result = doc.clone();
            for (path, _) in paths {
                unset_path(&mut result, path);
            }
            if !keep_id {
                result.remove("_id");
            }
            Ok(result)
        }
    }
}
