mod tree;

use std::ops::Bound;
use std::sync::Arc;

use vellum_document::{Document, StringComparator, Value, compare, compare_with, get_path};

use crate::error::DbError;

use tree::{AvlTree, Comparator};

/// The canonical in-memory form of a stored document. Every index holds the
/// same `Arc` for a given live document; reads hand out deep copies.
pub(crate) type SharedDoc = Arc<Document>;

/// Options for a field index, also the payload of the `$$indexCreated`
/// journal record.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    pub field_name: String,
    pub unique: bool,
    pub sparse: bool,
    /// Time-to-live for documents whose indexed field is a `Date`.
    pub expire_after_seconds: Option<f64>,
}

impl IndexOptions {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            field_name: name.into(),
            unique: false,
            sparse: false,
            expire_after_seconds: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn expire_after(mut self, seconds: f64) -> Self {
        self.expire_after_seconds = Some(seconds);
        self
    }

    pub(crate) fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(
            "fieldName".to_string(),
            Value::String(self.field_name.clone()),
        );
        doc.insert("unique".to_string(), Value::Bool(self.unique));
        doc.insert("sparse".to_string(), Value::Bool(self.sparse));
        if let Some(secs) = self.expire_after_seconds {
            doc.insert("expireAfterSeconds".to_string(), Value::Number(secs));
        }
        doc
    }

    pub(crate) fn from_document(doc: &Document) -> Option<Self> {
        let field_name = doc.get("fieldName")?.as_str()?.to_string();
        Some(Self {
            field_name,
            unique: matches!(doc.get("unique"), Some(Value::Bool(true))),
            sparse: matches!(doc.get("sparse"), Some(Value::Bool(true))),
            expire_after_seconds: doc.get("expireAfterSeconds").and_then(Value::as_number),
        })
    }
}

/// Inclusive/exclusive bounds for an index range scan, the parsed form of a
/// `{$gt, $gte, $lt, $lte}` condition.
#[derive(Debug, Clone, Default)]
pub(crate) struct RangeQuery {
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
}

impl RangeQuery {
    pub fn is_empty(&self) -> bool {
        self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
    }

    fn bounds(&self) -> (Bound<&Value>, Bound<&Value>) {
        let lower = match (&self.gt, &self.gte) {
            (Some(v), _) => Bound::Excluded(v),
            (None, Some(v)) => Bound::Included(v),
            (None, None) => Bound::Unbounded,
        };
        let upper = match (&self.lt, &self.lte) {
            (Some(v), _) => Bound::Excluded(v),
            (None, Some(v)) => Bound::Included(v),
            (None, None) => Bound::Unbounded,
        };
        (lower, upper)
    }
}

/// An ordered key → document map over one dot-path field.
///
/// One value slot per key: on a non-unique index, inserting a document whose
/// key is already present replaces the previous entry. A missing field
/// indexes under `Null` unless the index is sparse, in which case the
/// document is skipped entirely.
pub(crate) struct Index {
    options: IndexOptions,
    tree: AvlTree<Value, SharedDoc>,
}

impl Index {
    pub fn new(options: IndexOptions, str_cmp: Option<StringComparator>) -> Self {
        let cmp: Comparator<Value> = match str_cmp {
            Some(f) => Arc::new(move |a: &Value, b: &Value| compare_with(a, b, Some(&f))),
            None => Arc::new(|a: &Value, b: &Value| compare(a, b)),
        };
        Self {
            options,
            tree: AvlTree::new(cmp),
        }
    }

    pub fn field(&self) -> &str {
        &self.options.field_name
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn expire_after_seconds(&self) -> Option<f64> {
        self.options.expire_after_seconds
    }

    pub fn count(&self) -> usize {
        self.tree.len()
    }

    /// The key this index stores for a document: `None` means "skip" (sparse
    /// miss), otherwise the scalar at the field path.
    fn key_of(&self, doc: &Document) -> Result<Option<Value>, DbError> {
        match get_path(doc, &self.options.field_name) {
            None => {
                if self.options.sparse {
                    Ok(None)
                } else {
                    Ok(Some(Value::Null))
                }
            }
            Some(cow) => {
                if matches!(cow.as_ref(), Value::Array(_)) {
                    return Err(DbError::ArrayKey {
                        field: self.options.field_name.clone(),
                    });
                }
                Ok(Some(cow.into_owned()))
            }
        }
    }

    pub fn insert(&mut self, doc: &SharedDoc) -> Result<(), DbError> {
        let Some(key) = self.key_of(doc)? else {
            return Ok(());
        };
        if self.options.unique {
            if key.is_null() {
                return Err(DbError::NullKey {
                    field: self.options.field_name.clone(),
                });
            }
            if self.tree.get(&key).is_some() {
                return Err(DbError::UniqueViolation {
                    field: self.options.field_name.clone(),
                });
            }
        }
        self.tree.insert(key, doc.clone());
        Ok(())
    }

    /// All-or-nothing batch insert: on failure, exactly the documents this
    /// call already inserted are removed before the error propagates.
    pub fn insert_many(&mut self, docs: &[SharedDoc]) -> Result<(), DbError> {
        for (i, doc) in docs.iter().enumerate() {
            if let Err(e) = self.insert(doc) {
                for inserted in &docs[..i] {
                    self.remove(inserted);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Remove a document's entry. A no-op when the document is not the one
    /// stored under its key (or has no entry at all).
    pub fn remove(&mut self, doc: &SharedDoc) {
        let Ok(Some(key)) = self.key_of(doc) else {
            return;
        };
        let stored = self.tree.get(&key).is_some_and(|cur| Arc::ptr_eq(cur, doc));
        if stored {
            self.remove_key(&key);
        }
    }

    pub fn remove_many(&mut self, docs: &[SharedDoc]) {
        for doc in docs {
            self.remove(doc);
        }
    }

    /// Remove whatever document is stored under a raw key.
    pub fn remove_key(&mut self, key: &Value) {
        self.tree.remove(key);
    }

    /// Replace a document's entry; on failure the old entry is restored and
    /// the error propagates.
    pub fn update(&mut self, old: &SharedDoc, new: &SharedDoc) -> Result<(), DbError> {
        self.remove(old);
        if let Err(e) = self.insert(new) {
            let _ = self.insert(old);
            return Err(e);
        }
        Ok(())
    }

    /// Apply a batch of (old, new) replacements atomically: on failure every
    /// replacement is rolled back.
    pub fn update_many(&mut self, pairs: &[(SharedDoc, SharedDoc)]) -> Result<(), DbError> {
        if let [(old, new)] = pairs {
            return self.update(old, new);
        }
        for (old, _) in pairs {
            self.remove(old);
        }
        for (i, (_, new)) in pairs.iter().enumerate() {
            if let Err(e) = self.insert(new) {
                for (_, inserted) in &pairs[..i] {
                    self.remove(inserted);
                }
                for (old, _) in pairs {
                    let _ = self.insert(old);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn find(&self, key: &Value) -> Option<&SharedDoc> {
        self.tree.get(key)
    }

    /// Documents stored under any of the given keys.
    pub fn get_matching(&self, keys: &[Value]) -> Vec<SharedDoc> {
        keys.iter()
            .filter_map(|key| self.find(key).cloned())
            .collect()
    }

    /// Documents whose key falls inside the range, in key order.
    pub fn between_bounds(&self, range: &RangeQuery) -> Vec<SharedDoc> {
        let (lower, upper) = range.bounds();
        let mut out = Vec::new();
        self.tree.range(lower, upper, |_, doc| out.push(doc.clone()));
        out
    }

    /// Every indexed document, in key order.
    pub fn get_all(&self) -> Vec<SharedDoc> {
        let mut out = Vec::with_capacity(self.tree.len());
        self.tree.for_each(|_, doc| out.push(doc.clone()));
        out
    }

    /// Clear the index and, when given, bulk-load a fresh document set.
    pub fn reset(&mut self, docs: &[SharedDoc]) -> Result<(), DbError> {
        self.tree.clear();
        self.insert_many(docs)
    }
}
