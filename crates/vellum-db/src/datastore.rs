use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::trace;
use vellum_document::{
    DELETED_KEY, Document, INDEX_REMOVED_KEY, StringComparator, Value, sanitize, validate_keys,
};
use vellum_query::{CmpOp, Expression, Update, modify, parse_query, parse_update};
use vellum_store::{DiskStorage, Storage};

use crate::compaction::CompactionTimer;
use crate::cursor::{self, FindOptions};
use crate::error::DbError;
use crate::executor::Executor;
use crate::index::{Index, IndexOptions, RangeQuery, SharedDoc};
use crate::journal::{Journal, SerializationHook};

const ID_FIELD: &str = "_id";

/// Datastore construction options.
#[derive(Clone)]
pub struct DatastoreConfig {
    /// Path of the journal file. A trailing `~` is rejected. Ignored when
    /// `in_memory_only`.
    pub filename: PathBuf,
    /// Skip persistence entirely; the store lives and dies in memory.
    pub in_memory_only: bool,
    /// Load the datafile during construction. When unset, operations queue
    /// in the executor's buffer until [`Datastore::load`] runs.
    pub autoload: bool,
    /// Stamp `createdAt`/`updatedAt` on insert and update.
    pub timestamp_data: bool,
    /// Share of corrupt journal lines tolerated on load, in `[0, 1]`.
    pub corrupt_alert_threshold: f64,
    /// Custom string ordering for indexes and sorts.
    pub compare_strings: Option<StringComparator>,
    pub after_serialization: Option<SerializationHook>,
    pub before_deserialization: Option<SerializationHook>,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            filename: PathBuf::new(),
            in_memory_only: true,
            autoload: true,
            timestamp_data: false,
            corrupt_alert_threshold: 0.1,
            compare_strings: None,
            after_serialization: None,
            before_deserialization: None,
        }
    }
}

impl DatastoreConfig {
    /// A persistent datastore journaling to `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            filename: path.into(),
            in_memory_only: false,
            ..Self::default()
        }
    }

    /// A datastore with no persistence.
    pub fn in_memory() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Update every matching document instead of the first.
    pub multi: bool,
    /// Insert when nothing matches: the replacement itself, or the
    /// modifiers applied to the plain fields of the query.
    pub upsert: bool,
    /// Return the new versions of the updated documents.
    pub return_updated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Remove every matching document instead of the first.
    pub multi: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    /// Matched-and-updated document count (1 for an upsert insert).
    pub affected: usize,
    /// The inserted document when the operation upserted.
    pub upserted: Option<Document>,
    /// New document versions, when `return_updated` was set.
    pub updated_docs: Option<Vec<Document>>,
}

/// An embeddable single-file document datastore.
///
/// All operations are serialized through a single worker: for any two calls
/// A then B on the same datastore, B observes the full effect of A, both in
/// the in-memory indexes and in the journal. Reads hand out deep copies, so
/// mutating a returned document never affects the store.
pub struct Datastore<S: Storage = DiskStorage> {
    autocompaction: Mutex<Option<CompactionTimer>>,
    executor: Arc<Executor<Core<S>>>,
}

impl<S: Storage> std::fmt::Debug for Datastore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore").finish_non_exhaustive()
    }
}

impl Datastore<DiskStorage> {
    /// Open a datastore on the real file system.
    pub fn open(config: DatastoreConfig) -> Result<Self, DbError> {
        Self::new(DiskStorage::new(), config)
    }
}

impl<S: Storage> Datastore<S> {
    pub fn new(storage: S, config: DatastoreConfig) -> Result<Self, DbError> {
        let autoload = config.autoload;
        let journal = Journal::new(
            storage,
            config.filename,
            config.in_memory_only,
            config.corrupt_alert_threshold,
            config.after_serialization,
            config.before_deserialization,
        )?;
        let core = Core::new(journal, config.timestamp_data, config.compare_strings);
        let datastore = Self {
            autocompaction: Mutex::new(None),
            executor: Arc::new(Executor::new(core)),
        };
        if autoload {
            datastore.load()?;
        }
        Ok(datastore)
    }

    /// Replay the journal, rebuild the indexes, compact, and release the
    /// operation buffer. Runs ahead of any operation queued before it.
    pub fn load(&self) -> Result<(), DbError> {
        let result = self.executor.submit(true, |core: &mut Core<S>| core.load())?;
        if result.is_ok() {
            self.executor.process_buffer();
        }
        result
    }

    /// Insert a document, assigning a fresh `_id` when absent. Returns the
    /// stored document.
    pub fn insert(&self, doc: Document) -> Result<Document, DbError> {
        self.executor
            .submit(false, move |core: &mut Core<S>| core.insert_one(doc))?
    }

    /// Insert several documents, all-or-nothing.
    pub fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>, DbError> {
        self.executor
            .submit(false, move |core: &mut Core<S>| core.insert_many(docs))?
    }

    pub fn find(&self, query: &Document) -> Result<Vec<Document>, DbError> {
        self.find_opts(query, FindOptions::default())
    }

    pub fn find_opts(&self, query: &Document, opts: FindOptions) -> Result<Vec<Document>, DbError> {
        let expr = parse_query(query)?;
        self.find_expr(expr, opts)
    }

    /// Query with a programmatic [`Expression`] — the way to use a `$where`
    /// predicate.
    pub fn find_expr(&self, expr: Expression, opts: FindOptions) -> Result<Vec<Document>, DbError> {
        self.executor
            .submit(false, move |core: &mut Core<S>| core.find(&expr, &opts))?
    }

    pub fn find_one(&self, query: &Document) -> Result<Option<Document>, DbError> {
        Ok(self
            .find_opts(query, FindOptions::limited(1))?
            .into_iter()
            .next())
    }

    pub fn count(&self, query: &Document) -> Result<usize, DbError> {
        let expr = parse_query(query)?;
        self.executor
            .submit(false, move |core: &mut Core<S>| core.count(&expr))?
    }

    pub fn update(
        &self,
        query: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult, DbError> {
        let expr = parse_query(query)?;
        let update = parse_update(update)?;
        let query = query.clone();
        self.executor.submit(false, move |core: &mut Core<S>| {
            core.update(&query, &expr, &update, &options)
        })?
    }

    /// Remove matching documents; returns how many were removed.
    pub fn remove(&self, query: &Document, options: RemoveOptions) -> Result<usize, DbError> {
        let expr = parse_query(query)?;
        self.executor
            .submit(false, move |core: &mut Core<S>| core.remove(&expr, &options))?
    }

    /// Create a field index and backfill it. Idempotent for an
    /// already-indexed field.
    pub fn ensure_index(&self, options: IndexOptions) -> Result<(), DbError> {
        self.executor
            .submit(false, move |core: &mut Core<S>| core.ensure_index(options))?
    }

    pub fn remove_index(&self, field: &str) -> Result<(), DbError> {
        let field = field.to_string();
        self.executor
            .submit(false, move |core: &mut Core<S>| core.remove_index(&field))?
    }

    /// Rewrite the journal down to the live documents and index
    /// descriptors.
    pub fn compact_datafile(&self) -> Result<(), DbError> {
        self.executor
            .submit(false, |core: &mut Core<S>| core.compact())?
    }

    /// Compact on a timer. The interval is clamped to at least 5000 ms;
    /// calling again replaces the previous timer.
    pub fn set_autocompaction(&self, interval: Duration) {
        let timer = CompactionTimer::spawn(Arc::clone(&self.executor), interval);
        let mut slot = self.lock_autocompaction();
        *slot = Some(timer);
    }

    pub fn stop_autocompaction(&self) {
        let mut slot = self.lock_autocompaction();
        *slot = None;
    }

    fn lock_autocompaction(&self) -> std::sync::MutexGuard<'_, Option<CompactionTimer>> {
        self.autocompaction.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Worker-side state ───────────────────────────────────────────

/// The state owned by the executor's worker thread: every index, the
/// journal, and the options that shape mutations. All methods here run
/// serialized.
pub(crate) struct Core<S: Storage> {
    indexes: HashMap<String, Index>,
    journal: Journal<S>,
    timestamp_data: bool,
    compare_strings: Option<StringComparator>,
}

impl<S: Storage> Core<S> {
    fn new(
        journal: Journal<S>,
        timestamp_data: bool,
        compare_strings: Option<StringComparator>,
    ) -> Self {
        let mut indexes = HashMap::new();
        indexes.insert(
            ID_FIELD.to_string(),
            Index::new(IndexOptions::field(ID_FIELD).unique(), compare_strings.clone()),
        );
        Self {
            indexes,
            journal,
            timestamp_data,
            compare_strings,
        }
    }

    fn all_docs(&self) -> Vec<SharedDoc> {
        self.indexes
            .get(ID_FIELD)
            .map(Index::get_all)
            .unwrap_or_default()
    }

    fn load(&mut self) -> Result<(), DbError> {
        let state = self.journal.load()?;

        let mut indexes = HashMap::new();
        indexes.insert(
            ID_FIELD.to_string(),
            Index::new(
                IndexOptions::field(ID_FIELD).unique(),
                self.compare_strings.clone(),
            ),
        );
        for spec in &state.indexes {
            indexes.insert(
                spec.field_name.clone(),
                Index::new(spec.clone(), self.compare_strings.clone()),
            );
        }
        self.indexes = indexes;

        let docs: Vec<SharedDoc> = state.docs.into_iter().map(Arc::new).collect();
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        for name in &names {
            let failed = match self.indexes.get_mut(name) {
                Some(index) => index.reset(&docs).err(),
                None => None,
            };
            if let Some(e) = failed {
                for index in self.indexes.values_mut() {
                    let _ = index.reset(&[]);
                }
                return Err(e);
            }
        }

        self.compact()
    }

    pub(crate) fn compact(&self) -> Result<(), DbError> {
        let docs: Vec<Document> = self.all_docs().iter().map(|d| (**d).clone()).collect();
        let mut specs: Vec<IndexOptions> = self
            .indexes
            .values()
            .filter(|index| index.field() != ID_FIELD)
            .map(|index| index.options().clone())
            .collect();
        specs.sort_by(|a, b| a.field_name.cmp(&b.field_name));
        self.journal.compact(&docs, &specs)
    }

    // ── Inserts ─────────────────────────────────────────────────

    fn prepare_for_insert(&self, mut doc: Document) -> Result<Document, DbError> {
        match doc.get(ID_FIELD) {
            None => {
                doc.insert(
                    ID_FIELD.to_string(),
                    Value::String(uuid::Uuid::new_v4().simple().to_string()),
                );
            }
            Some(Value::String(_)) => {}
            Some(_) => {
                return Err(DbError::TypeMismatch("_id must be a string".to_string()));
            }
        }
        if self.timestamp_data {
            let now = Value::Date(now_ms());
            doc.entry("createdAt".to_string()).or_insert_with(|| now.clone());
            doc.entry("updatedAt".to_string()).or_insert(now);
        }
        validate_keys(&doc)?;
        Ok(doc)
    }

    fn insert_one(&mut self, doc: Document) -> Result<Document, DbError> {
        let prepared = Arc::new(self.prepare_for_insert(doc)?);
        self.add_to_indexes(&prepared)?;
        if let Err(e) = self.journal.append(std::slice::from_ref(&*prepared)) {
            self.remove_from_indexes(&prepared);
            return Err(e);
        }
        trace!(id = ?prepared.get(ID_FIELD), "inserted document");
        Ok((*prepared).clone())
    }

    fn insert_many(&mut self, docs: Vec<Document>) -> Result<Vec<Document>, DbError> {
        let mut prepared: Vec<SharedDoc> = Vec::with_capacity(docs.len());
        for doc in docs {
            prepared.push(Arc::new(self.prepare_for_insert(doc)?));
        }
        for (i, doc) in prepared.iter().enumerate() {
            if let Err(e) = self.add_to_indexes(doc) {
                for inserted in &prepared[..i] {
                    self.remove_from_indexes(inserted);
                }
                return Err(e);
            }
        }
        let stored: Vec<Document> = prepared.iter().map(|d| (**d).clone()).collect();
        if let Err(e) = self.journal.append(&stored) {
            for doc in &prepared {
                self.remove_from_indexes(doc);
            }
            return Err(e);
        }
        Ok(stored)
    }

    fn add_to_indexes(&mut self, doc: &SharedDoc) -> Result<(), DbError> {
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        for (i, name) in names.iter().enumerate() {
            let result = match self.indexes.get_mut(name) {
                Some(index) => index.insert(doc),
                None => Ok(()),
            };
            if let Err(e) = result {
                for rolled_back in &names[..i] {
                    if let Some(index) = self.indexes.get_mut(rolled_back) {
                        index.remove(doc);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn remove_from_indexes(&mut self, doc: &SharedDoc) {
        for index in self.indexes.values_mut() {
            index.remove(doc);
        }
    }

    fn update_indexes(&mut self, pairs: &[(SharedDoc, SharedDoc)]) -> Result<(), DbError> {
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        for (i, name) in names.iter().enumerate() {
            let result = match self.indexes.get_mut(name) {
                Some(index) => index.update_many(pairs),
                None => Ok(()),
            };
            if let Err(e) = result {
                let reversed: Vec<(SharedDoc, SharedDoc)> = pairs
                    .iter()
                    .map(|(old, new)| (new.clone(), old.clone()))
                    .collect();
                for rolled_back in &names[..i] {
                    if let Some(index) = self.indexes.get_mut(rolled_back) {
                        let _ = index.update_many(&reversed);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    // ── Candidate selection ─────────────────────────────────────

    /// Pick candidates via the best usable index: an equality term on an
    /// indexed field, then `$in`, then a range; otherwise every document.
    /// An optimization only — the match predicate still runs on every
    /// candidate, and the result set always equals a full scan's.
    ///
    /// Only unique indexes serve candidates: a non-unique index keeps one
    /// document per key (same-key inserts overwrite), so it cannot produce
    /// the complete candidate set.
    fn candidates(&mut self, expr: &Expression) -> Result<Vec<SharedDoc>, DbError> {
        let hints = leaf_conditions(expr);
        let mut picked: Option<Vec<SharedDoc>> = None;

        for (path, op) in &hints {
            if let (Some(index), CmpOp::Eq(value)) = (self.usable_index(path), op) {
                if is_scalar(value) {
                    picked = Some(index.get_matching(std::slice::from_ref(value)));
                    break;
                }
            }
        }
        if picked.is_none() {
            for (path, op) in &hints {
                if let (Some(index), CmpOp::In(values)) = (self.usable_index(path), op) {
                    picked = Some(index.get_matching(values));
                    break;
                }
            }
        }
        if picked.is_none() {
            for (path, _) in &hints {
                let Some(index) = self.usable_index(path) else {
                    continue;
                };
                let range = range_for_path(&hints, *path);
                if !range.is_empty() {
                    picked = Some(index.between_bounds(&range));
                    break;
                }
            }
        }

        let raw = match picked {
            Some(docs) => docs,
            None => self.all_docs(),
        };
        self.expire_and_filter(raw)
    }

    fn usable_index(&self, path: &str) -> Option<&Index> {
        self.indexes.get(path).filter(|index| index.options().unique)
    }

    /// Drop candidates whose TTL-indexed date field has lapsed, removing
    /// them from the store exactly as a normal remove would.
    fn expire_and_filter(&mut self, docs: Vec<SharedDoc>) -> Result<Vec<SharedDoc>, DbError> {
        let ttl: Vec<(String, f64)> = self
            .indexes
            .values()
            .filter_map(|index| {
                index
                    .expire_after_seconds()
                    .map(|secs| (index.field().to_string(), secs))
            })
            .collect();
        if ttl.is_empty() {
            return Ok(docs);
        }

        let now = now_ms();
        let mut live = Vec::with_capacity(docs.len());
        let mut expired = Vec::new();
        for doc in docs {
            let lapsed = ttl.iter().any(|(field, secs)| {
                match vellum_document::get_path(&doc, field).as_deref() {
                    Some(Value::Date(ms)) => ms + ((secs * 1000.0) as i64) < now,
                    _ => false,
                }
            });
            if lapsed {
                expired.push(doc);
            } else {
                live.push(doc);
            }
        }

        if !expired.is_empty() {
            let mut tombstones = Vec::with_capacity(expired.len());
            for doc in &expired {
                self.remove_from_indexes(doc);
                if let Some(id) = doc.get(ID_FIELD).and_then(Value::as_str) {
                    tombstones.push(tombstone(id));
                }
            }
            self.journal.append(&tombstones)?;
            trace!(count = expired.len(), "expired documents removed");
        }
        Ok(live)
    }

    // ── Reads ───────────────────────────────────────────────────

    fn find(&mut self, expr: &Expression, opts: &FindOptions) -> Result<Vec<Document>, DbError> {
        let candidates = self.candidates(expr)?;
        cursor::run(candidates, expr, opts, self.compare_strings.as_ref())
    }

    fn count(&mut self, expr: &Expression) -> Result<usize, DbError> {
        let candidates = self.candidates(expr)?;
        Ok(candidates.iter().filter(|doc| expr.matches(doc)).count())
    }

    // ── Updates ─────────────────────────────────────────────────

    fn update(
        &mut self,
        query: &Document,
        expr: &Expression,
        update: &Update,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, DbError> {
        let candidates = self.candidates(expr)?;

        let mut pairs: Vec<(SharedDoc, SharedDoc)> = Vec::new();
        for old in &candidates {
            if !expr.matches(old) {
                continue;
            }
            let mut modified = modify(old, update)?;
            if self.timestamp_data {
                if let Some(created) = old.get("createdAt") {
                    modified.insert("createdAt".to_string(), created.clone());
                }
                modified.insert("updatedAt".to_string(), Value::Date(now_ms()));
            }
            pairs.push((old.clone(), Arc::new(modified)));
            if !options.multi {
                break;
            }
        }

        if pairs.is_empty() {
            if options.upsert {
                return self.upsert(query, update);
            }
            return Ok(UpdateResult::default());
        }

        self.update_indexes(&pairs)?;
        let stored: Vec<Document> = pairs.iter().map(|(_, new)| (**new).clone()).collect();
        if let Err(e) = self.journal.append(&stored) {
            let reversed: Vec<(SharedDoc, SharedDoc)> = pairs
                .iter()
                .map(|(old, new)| (new.clone(), old.clone()))
                .collect();
            let _ = self.update_indexes(&reversed);
            return Err(e);
        }
        trace!(count = pairs.len(), "updated documents");
        Ok(UpdateResult {
            affected: pairs.len(),
            upserted: None,
            updated_docs: options.return_updated.then_some(stored),
        })
    }

    /// Nothing matched and `upsert` is on: insert the replacement document,
    /// or the modifiers applied to the plain fields of the query.
    fn upsert(&mut self, query: &Document, update: &Update) -> Result<UpdateResult, DbError> {
        let base = match update {
            Update::Replace(replacement) => replacement.clone(),
            Update::Ops(_) => modify(&sanitize(query), update)?,
        };
        let inserted = self.insert_one(base)?;
        Ok(UpdateResult {
            affected: 1,
            upserted: Some(inserted),
            updated_docs: None,
        })
    }

    // ── Removes ─────────────────────────────────────────────────

    fn remove(&mut self, expr: &Expression, options: &RemoveOptions) -> Result<usize, DbError> {
        let candidates = self.candidates(expr)?;
        let mut removed: Vec<SharedDoc> = Vec::new();
        for doc in &candidates {
            if !expr.matches(doc) {
                continue;
            }
            removed.push(doc.clone());
            if !options.multi {
                break;
            }
        }

        for index in self.indexes.values_mut() {
            index.remove_many(&removed);
        }
        let tombstones: Vec<Document> = removed
            .iter()
            .filter_map(|doc| doc.get(ID_FIELD).and_then(Value::as_str).map(tombstone))
            .collect();
        if let Err(e) = self.journal.append(&tombstones) {
            for doc in &removed {
                let _ = self.add_to_indexes(doc);
            }
            return Err(e);
        }
        trace!(count = removed.len(), "removed documents");
        Ok(removed.len())
    }

    // ── Index management ────────────────────────────────────────

    fn ensure_index(&mut self, options: IndexOptions) -> Result<(), DbError> {
        if options.field_name.is_empty() {
            return Err(DbError::Config(
                "ensure_index requires a field name".to_string(),
            ));
        }
        if self.indexes.contains_key(&options.field_name) {
            return Ok(());
        }

        let mut index = Index::new(options.clone(), self.compare_strings.clone());
        let docs = self.all_docs();
        index.insert_many(&docs)?;

        let mut record = Document::new();
        record.insert(
            vellum_document::INDEX_CREATED_KEY.to_string(),
            Value::Object(options.to_document()),
        );
        self.journal.append(std::slice::from_ref(&record))?;
        self.indexes.insert(options.field_name.clone(), index);
        Ok(())
    }

    fn remove_index(&mut self, field: &str) -> Result<(), DbError> {
        if field == ID_FIELD {
            return Err(DbError::Config("cannot remove the _id index".to_string()));
        }
        self.indexes.remove(field);
        let mut record = Document::new();
        record.insert(INDEX_REMOVED_KEY.to_string(), Value::String(field.to_string()));
        self.journal.append(std::slice::from_ref(&record))
    }
}

// ── Helpers ─────────────────────────────────────────────────────

fn tombstone(id: &str) -> Document {
    let mut doc = Document::new();
    doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    doc.insert(DELETED_KEY.to_string(), Value::Bool(true));
    doc
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A usable index key must be scalar; objects and arrays go through the
/// full scan path.
fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// The field conditions visible at the top level of a query (bare or under
/// a top-level `$and`) — the only ones an index can serve soundly.
fn leaf_conditions(expr: &Expression) -> Vec<(&str, &CmpOp)> {
    match expr {
        Expression::Cmp { path, op } => vec![(path.as_str(), op)],
        Expression::And(children) => children
            .iter()
            .filter_map(|child| match child {
                Expression::Cmp { path, op } => Some((path.as_str(), op)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Collect every range operator for one path into a single bounds query.
fn range_for_path(hints: &[(&str, &CmpOp)], path: &str) -> RangeQuery {
    let mut range = RangeQuery::default();
    for (hint_path, op) in hints {
        if *hint_path != path {
            continue;
        }
        match op {
            CmpOp::Gt(v) if is_scalar(v) => range.gt = Some((*v).clone()),
            CmpOp::Gte(v) if is_scalar(v) => range.gte = Some((*v).clone()),
            CmpOp::Lt(v) if is_scalar(v) => range.lt = Some((*v).clone()),
            CmpOp::Lte(v) if is_scalar(v) => range.lte = Some((*v).clone()),
            _ => {}
        }
    }
    range
}
