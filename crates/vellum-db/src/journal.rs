use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};
use vellum_document::{
    DELETED_KEY, Document, INDEX_CREATED_KEY, INDEX_REMOVED_KEY, Value, deserialize, serialize,
};
use vellum_store::Storage;

use crate::error::DbError;
use crate::index::IndexOptions;

/// A line-level transform applied after serialization / before
/// deserialization (encryption, compression tagging, …). The two must
/// compose to the identity.
pub type SerializationHook = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// What a journal replay produces: the surviving documents (last write per
/// `_id`, tombstones applied) and the declared indexes.
pub(crate) struct LoadedState {
    pub docs: Vec<Document>,
    pub indexes: Vec<IndexOptions>,
}

/// The append-only datafile: one serialized record per line.
///
/// All writes funnel through either a plain append or the crash-safe full
/// rewrite; after a crash at any point, a reload sees either the old or the
/// new complete state.
pub(crate) struct Journal<S: Storage> {
    storage: S,
    filename: PathBuf,
    in_memory_only: bool,
    corrupt_alert_threshold: f64,
    after_serialization: Option<SerializationHook>,
    before_deserialization: Option<SerializationHook>,
}

impl<S: Storage> std::fmt::Debug for Journal<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").finish_non_exhaustive()
    }
}

impl<S: Storage> Journal<S> {
    pub fn new(
        storage: S,
        filename: PathBuf,
        in_memory_only: bool,
        corrupt_alert_threshold: f64,
        after_serialization: Option<SerializationHook>,
        before_deserialization: Option<SerializationHook>,
    ) -> Result<Self, DbError> {
        if !in_memory_only && filename.to_string_lossy().ends_with('~') {
            return Err(DbError::Config(
                "the datafile name cannot end with a ~, which is reserved for crash-safe temporary files"
                    .to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&corrupt_alert_threshold) {
            return Err(DbError::Config(
                "corrupt_alert_threshold must be between 0 and 1".to_string(),
            ));
        }
        validate_hooks(&after_serialization, &before_deserialization)?;
        Ok(Self {
            storage,
            filename,
            in_memory_only,
            corrupt_alert_threshold,
            after_serialization,
            before_deserialization,
        })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.filename.as_os_str().to_os_string();
        name.push("~");
        PathBuf::from(name)
    }

    fn dir_path(&self) -> PathBuf {
        match self.filename.parent() {
            Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        }
    }

    fn encode_line(&self, doc: &Document) -> Result<String, DbError> {
        let line = serialize(doc)?;
        Ok(match &self.after_serialization {
            Some(hook) => hook(&line),
            None => line,
        })
    }

    /// Append one line per record to the datafile. Empty input is a no-op.
    pub fn append(&self, docs: &[Document]) -> Result<(), DbError> {
        if self.in_memory_only || docs.is_empty() {
            return Ok(());
        }
        let mut out = String::new();
        for doc in docs {
            out.push_str(&self.encode_line(doc)?);
            out.push('\n');
        }
        self.storage.append_file(&self.filename, out.as_bytes())?;
        Ok(())
    }

    /// Rewrite the datafile to exactly the live documents plus the non-`_id`
    /// index descriptors, via the crash-safe protocol.
    pub fn compact(&self, docs: &[Document], indexes: &[IndexOptions]) -> Result<(), DbError> {
        if self.in_memory_only {
            return Ok(());
        }
        let mut out = String::new();
        for doc in docs {
            out.push_str(&self.encode_line(doc)?);
            out.push('\n');
        }
        for spec in indexes {
            let mut record = Document::new();
            record.insert(
                INDEX_CREATED_KEY.to_string(),
                Value::Object(spec.to_document()),
            );
            out.push_str(&self.encode_line(&record)?);
            out.push('\n');
        }
        self.crash_safe_write(out.as_bytes())?;
        debug!(
            file = %self.filename.display(),
            docs = docs.len(),
            indexes = indexes.len(),
            "compacted datafile"
        );
        Ok(())
    }

    /// Read and fold the datafile. Tolerates corrupt lines up to the
    /// configured share of the file; the final blank line never counts.
    pub fn load(&self) -> Result<LoadedState, DbError> {
        if self.in_memory_only {
            return Ok(LoadedState {
                docs: Vec::new(),
                indexes: Vec::new(),
            });
        }

        self.storage.mkdir_p(&self.dir_path())?;
        self.ensure_datafile_integrity()?;

        let raw = self.storage.read_file(&self.filename)?;
        let contents = String::from_utf8(raw)
            .map_err(|_| DbError::Corruption("datafile is not valid UTF-8".to_string()))?;

        let lines: Vec<&str> = contents.split('\n').collect();
        let total = lines.len();
        let mut corrupt = 0usize;
        let mut docs: BTreeMap<String, Document> = BTreeMap::new();
        let mut indexes: BTreeMap<String, IndexOptions> = BTreeMap::new();

        for (i, line) in lines.iter().enumerate() {
            if line.is_empty() && i == total - 1 {
                continue;
            }
            let decoded = match &self.before_deserialization {
                Some(hook) => hook(line),
                None => (*line).to_string(),
            };
            let record = match deserialize(&decoded) {
                Ok(doc) => doc,
                Err(e) => {
                    corrupt += 1;
                    warn!(line = i + 1, error = %e, "skipping corrupt journal line");
                    continue;
                }
            };
            if !self.fold_record(record, &mut docs, &mut indexes) {
                corrupt += 1;
                warn!(line = i + 1, "skipping malformed journal record");
            }
        }

        if total > 0 && corrupt as f64 / total as f64 > self.corrupt_alert_threshold {
            return Err(DbError::Corruption(format!(
                "{corrupt} of {total} lines are corrupt, above the {:.0}% alert threshold",
                self.corrupt_alert_threshold * 100.0
            )));
        }

        debug!(
            file = %self.filename.display(),
            docs = docs.len(),
            indexes = indexes.len(),
            corrupt,
            "journal replayed"
        );

        Ok(LoadedState {
            docs: docs.into_values().collect(),
            indexes: indexes.into_values().collect(),
        })
    }

    /// Fold one replayed record into the accumulating state. Returns `false`
    /// for a record of no recognizable form.
    fn fold_record(
        &self,
        record: Document,
        docs: &mut BTreeMap<String, Document>,
        indexes: &mut BTreeMap<String, IndexOptions>,
    ) -> bool {
        if let Some(Value::String(id)) = record.get("_id") {
            if matches!(record.get(DELETED_KEY), Some(Value::Bool(true))) {
                docs.remove(id.as_str());
            } else {
                docs.insert(id.clone(), record);
            }
            return true;
        }
        if let Some(Value::Object(spec)) = record.get(INDEX_CREATED_KEY) {
            return match IndexOptions::from_document(spec) {
                Some(options) => {
                    indexes.insert(options.field_name.clone(), options);
                    true
                }
                None => false,
            };
        }
        if let Some(Value::String(field)) = record.get(INDEX_REMOVED_KEY) {
            indexes.remove(field.as_str());
            return true;
        }
        false
    }

    /// If only the temporary file survived a crash, promote it; if neither
    /// file exists, start empty.
    fn ensure_datafile_integrity(&self) -> Result<(), DbError> {
        if self.storage.exists(&self.filename) {
            return Ok(());
        }
        let temp = self.temp_path();
        if self.storage.exists(&temp) {
            self.storage.rename(&temp, &self.filename)?;
            return Ok(());
        }
        self.storage.write_file(&self.filename, b"")?;
        Ok(())
    }

    /// Full-rewrite protocol: the new contents land under the `~` name, are
    /// fsynced, and replace the datafile with a rename, with the directory
    /// fsynced on both sides.
    fn crash_safe_write(&self, data: &[u8]) -> Result<(), DbError> {
        let dir = self.dir_path();
        let temp = self.temp_path();

        self.storage.fsync(&dir, true)?;
        if self.storage.exists(&self.filename) {
            self.storage.fsync(&self.filename, false)?;
        }
        self.storage.write_file(&temp, data)?;
        self.storage.fsync(&temp, false)?;
        self.storage.rename(&temp, &self.filename)?;
        self.storage.fsync(&dir, true)?;
        Ok(())
    }
}

/// The hooks must be configured together and compose to the identity;
/// anything else risks writing journal lines that can never be read back.
fn validate_hooks(
    after: &Option<SerializationHook>,
    before: &Option<SerializationHook>,
) -> Result<(), DbError> {
    match (after, before) {
        (None, None) => Ok(()),
        (Some(after), Some(before)) => {
            let sentinel =
                "Some string that would deserialize badly if mangled {\"_id\":\"probe\",\"n\":42}\u{1f4be}";
            if before(&after(sentinel)) != sentinel {
                return Err(DbError::HooksNotInverse);
            }
            Ok(())
        }
        _ => Err(DbError::HooksMissing),
    }
}

#[cfg(test)]
mod tests {
    use vellum_document::doc;
    use vellum_store::MemoryStorage;

    use super::*;

    fn journal(storage: MemoryStorage) -> Journal<MemoryStorage> {
        Journal::new(
            storage,
            PathBuf::from("data/test.db"),
            false,
            0.1,
            None,
            None,
        )
        .unwrap()
    }

    fn path() -> PathBuf {
        PathBuf::from("data/test.db")
    }

    #[test]
    fn load_creates_an_empty_datafile() {
        let storage = MemoryStorage::new();
        let j = journal(storage.clone());
        let state = j.load().unwrap();
        assert!(state.docs.is_empty());
        assert!(state.indexes.is_empty());
        assert_eq!(storage.contents(&path()), Some(Vec::new()));
    }

    #[test]
    fn append_then_load_folds_last_write() {
        let storage = MemoryStorage::new();
        let j = journal(storage.clone());
        j.append(&[doc! { "_id": "a", "v": 1 }]).unwrap();
        j.append(&[doc! { "_id": "a", "v": 2 }, doc! { "_id": "b", "v": 1 }])
            .unwrap();
        let state = j.load().unwrap();
        assert_eq!(state.docs.len(), 2);
        let a = state.docs.iter().find(|d| d.get("_id") == Some(&Value::String("a".into()))).unwrap();
        assert_eq!(a.get("v"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn tombstones_delete_on_replay() {
        let storage = MemoryStorage::new();
        let j = journal(storage.clone());
        j.append(&[doc! { "_id": "a", "v": 1 }]).unwrap();
        j.append(&[doc! { "_id": "a", "$$deleted": true }]).unwrap();
        let state = j.load().unwrap();
        assert!(state.docs.is_empty());
    }

    #[test]
    fn index_records_register_and_unregister() {
        let storage = MemoryStorage::new();
        let j = journal(storage.clone());
        let spec = IndexOptions::field("k").unique();
        j.append(&[doc! { "$$indexCreated": spec.to_document() }])
            .unwrap();
        let state = j.load().unwrap();
        assert_eq!(state.indexes, vec![spec]);

        j.append(&[doc! { "$$indexRemoved": "k" }]).unwrap();
        let state = j.load().unwrap();
        assert!(state.indexes.is_empty());
    }

    #[test]
    fn trailing_blank_line_is_not_corruption() {
        let storage = MemoryStorage::new();
        storage.put(&path(), b"{\"_id\":\"a\"}\n");
        let j = journal(storage);
        assert_eq!(j.load().unwrap().docs.len(), 1);
    }

    #[test]
    fn corruption_below_threshold_is_tolerated() {
        let storage = MemoryStorage::new();
        let mut data = String::new();
        for i in 0..20 {
            data.push_str(&format!("{{\"_id\":\"{i}\"}}\n"));
        }
        data.push_str("garbage\n");
        storage.put(&path(), data.as_bytes());
        let j = journal(storage);
        // 1 corrupt line out of 22 (incl. trailing blank) is under 10%.
        assert_eq!(j.load().unwrap().docs.len(), 20);
    }

    #[test]
    fn corruption_above_threshold_fails() {
        let storage = MemoryStorage::new();
        storage.put(&path(), b"{\"_id\":\"a\"}\ngarbage\nmore garbage\n");
        let j = journal(storage);
        assert!(matches!(j.load(), Err(DbError::Corruption(_))));
    }

    #[test]
    fn rescue_promotes_the_temp_file() {
        let storage = MemoryStorage::new();
        storage.put(&PathBuf::from("data/test.db~"), b"{\"_id\":\"a\"}\n");
        let j = journal(storage.clone());
        let state = j.load().unwrap();
        assert_eq!(state.docs.len(), 1);
        assert!(storage.contents(&PathBuf::from("data/test.db~")).is_none());
        assert!(storage.contents(&path()).is_some());
    }

    #[test]
    fn compact_rewrites_docs_and_specs() {
        let storage = MemoryStorage::new();
        let j = journal(storage.clone());
        j.append(&[doc! { "_id": "a", "v": 1 }]).unwrap();
        j.append(&[doc! { "_id": "a", "v": 2 }]).unwrap();

        j.compact(
            &[doc! { "_id": "a", "v": 2 }],
            &[IndexOptions::field("v")],
        )
        .unwrap();

        let contents = String::from_utf8(storage.contents(&path()).unwrap()).unwrap();
        let lines: Vec<&str> = contents.split('\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("$$indexCreated"));

        let state = j.load().unwrap();
        assert_eq!(state.docs.len(), 1);
        assert_eq!(state.indexes.len(), 1);
    }

    #[test]
    fn tilde_filename_is_rejected() {
        let err = Journal::new(
            MemoryStorage::new(),
            PathBuf::from("data/test.db~"),
            false,
            0.1,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn lone_hook_is_rejected() {
        let after: SerializationHook = Arc::new(|s: &str| s.to_string());
        let err = Journal::new(
            MemoryStorage::new(),
            path(),
            false,
            0.1,
            Some(after),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DbError::HooksMissing));
    }

    #[test]
    fn non_inverse_hooks_are_rejected() {
        let after: SerializationHook = Arc::new(|s: &str| format!("x{s}"));
        let before: SerializationHook = Arc::new(|s: &str| s.to_string());
        let err = Journal::new(
            MemoryStorage::new(),
            path(),
            false,
            0.1,
            Some(after),
            Some(before),
        )
        .unwrap_err();
        assert!(matches!(err, DbError::HooksNotInverse));
    }

    #[test]
    fn hooks_transform_the_journal_lines() {
        let after: SerializationHook = Arc::new(|s: &str| format!("line:{s}"));
        let before: SerializationHook =
            Arc::new(|s: &str| s.strip_prefix("line:").unwrap_or(s).to_string());
        let storage = MemoryStorage::new();
        let j = Journal::new(storage.clone(), path(), false, 0.1, Some(after), Some(before))
            .unwrap();
        j.append(&[doc! { "_id": "a" }]).unwrap();
        let contents = String::from_utf8(storage.contents(&path()).unwrap()).unwrap();
        assert!(contents.starts_with("line:{"));
        assert_eq!(j.load().unwrap().docs.len(), 1);
    }

    #[test]
    fn in_memory_mode_writes_nothing() {
        let storage = MemoryStorage::new();
        let j = Journal::new(storage.clone(), path(), true, 0.1, None, None).unwrap();
        j.append(&[doc! { "_id": "a" }]).unwrap();
        j.compact(&[doc! { "_id": "a" }], &[]).unwrap();
        assert!(j.load().unwrap().docs.is_empty());
        assert!(storage.contents(&path()).is_none());
    }
}
