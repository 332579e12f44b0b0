mod common;
use common::*;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vellum_db::{Datastore, DatastoreConfig, DbError, IndexOptions, SerializationHook};
use vellum_document::{Value, doc};
use vellum_store::MemoryStorage;

fn line_count(storage: &MemoryStorage) -> usize {
    let contents = String::from_utf8(storage.contents(&datafile()).unwrap()).unwrap();
    contents.split('\n').filter(|l| !l.is_empty()).count()
}

#[test]
fn inserts_append_to_the_journal() {
    let (db, storage) = memory_db();
    db.insert(doc! { "_id": "a", "x": 1 }).unwrap();
    db.insert(doc! { "_id": "b", "x": 2 }).unwrap();
    assert_eq!(line_count(&storage), 2);
}

#[test]
fn state_survives_reload_byte_for_byte() {
    let (db, storage) = memory_db();
    seed(&db);
    let before = {
        let mut docs = db.find(&doc! {}).unwrap();
        docs.sort_by_key(|d| d.get("_id").and_then(Value::as_str).map(str::to_string));
        docs
    };
    drop(db);

    let db = reopen(&storage);
    let mut after = db.find(&doc! {}).unwrap();
    after.sort_by_key(|d| d.get("_id").and_then(Value::as_str).map(str::to_string));
    assert_eq!(before, after);
}

#[test]
fn load_compacts_the_log() {
    let (db, storage) = memory_db();
    db.insert(doc! { "_id": "a", "v": 0 }).unwrap();
    for v in 1..=10 {
        db.update(
            &doc! { "_id": "a" },
            &doc! { "$set": doc! { "v": v } },
            Default::default(),
        )
        .unwrap();
    }
    assert_eq!(line_count(&storage), 11);
    drop(db);

    let db = reopen(&storage);
    assert_eq!(line_count(&storage), 1);
    let fetched = db.find_one(&doc! { "_id": "a" }).unwrap().unwrap();
    assert_eq!(fetched.get("v"), Some(&Value::Number(10.0)));
}

#[test]
fn compaction_preserves_index_descriptors() {
    let (db, storage) = memory_db();
    db.ensure_index(IndexOptions::field("k").unique()).unwrap();
    db.insert(doc! { "_id": "a", "k": "x" }).unwrap();
    db.compact_datafile().unwrap();

    let contents = String::from_utf8(storage.contents(&datafile()).unwrap()).unwrap();
    assert!(contents.contains("$$indexCreated"));
    assert!(contents.contains("fieldName"));

    drop(db);
    let db = reopen(&storage);
    assert!(matches!(
        db.insert(doc! { "_id": "b", "k": "x" }),
        Err(DbError::UniqueViolation { .. })
    ));
}

#[test]
fn mid_rename_crash_leaves_only_the_temp_file() {
    let storage = MemoryStorage::new();
    // Simulate a crash between writing file~ and the rename: only the temp
    // file exists.
    storage.put(
        &PathBuf::from("data/test.db~"),
        b"{\"_id\":\"a\",\"x\":1}\n",
    );

    let db = reopen(&storage);
    let all = db.find(&doc! {}).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("x"), Some(&Value::Number(1.0)));
    // The temp file was promoted.
    assert!(storage.contents(&PathBuf::from("data/test.db~")).is_none());
}

#[test]
fn interrupted_compaction_keeps_the_old_state() {
    let (db, storage) = memory_db();
    seed(&db);
    drop(db);

    // A stale temp file from a crashed compaction must not shadow the real
    // datafile.
    storage.put(&PathBuf::from("data/test.db~"), b"{\"_id\":\"zombie\"}\n");
    let db = reopen(&storage);
    assert_eq!(db.count(&doc! {}).unwrap(), 5);
    assert!(db.find_one(&doc! { "_id": "zombie" }).unwrap().is_none());
}

#[test]
fn corruption_over_threshold_fails_the_load() {
    let storage = MemoryStorage::new();
    storage.put(
        &datafile(),
        b"{\"_id\":\"a\"}\nnot json at all\nneither is this\n",
    );
    let err = Datastore::new(storage, DatastoreConfig::file(DATAFILE)).unwrap_err();
    assert!(matches!(err, DbError::Corruption(_)));
}

#[test]
fn corruption_under_threshold_is_tolerated() {
    let storage = MemoryStorage::new();
    let mut contents = String::new();
    for i in 0..30 {
        contents.push_str(&format!("{{\"_id\":\"{i}\"}}\n"));
    }
    contents.push_str("garbage line\n");
    storage.put(&datafile(), contents.as_bytes());

    let db = Datastore::new(storage, DatastoreConfig::file(DATAFILE)).unwrap();
    assert_eq!(db.count(&doc! {}).unwrap(), 30);
}

#[test]
fn zero_threshold_rejects_any_corruption() {
    let storage = MemoryStorage::new();
    let mut contents = String::new();
    for i in 0..100 {
        contents.push_str(&format!("{{\"_id\":\"{i}\"}}\n"));
    }
    contents.push_str("garbage\n");
    storage.put(&datafile(), contents.as_bytes());

    let mut config = DatastoreConfig::file(DATAFILE);
    config.corrupt_alert_threshold = 0.0;
    assert!(matches!(
        Datastore::new(storage, config),
        Err(DbError::Corruption(_))
    ));
}

#[test]
fn dates_roundtrip_through_the_journal() {
    let (db, storage) = memory_db();
    db.insert(doc! { "_id": "a", "when": Value::Date(1_700_000_000_000) })
        .unwrap();
    drop(db);

    let db = reopen(&storage);
    let fetched = db.find_one(&doc! { "_id": "a" }).unwrap().unwrap();
    assert_eq!(fetched.get("when"), Some(&Value::Date(1_700_000_000_000)));
}

#[test]
fn serialization_hooks_wrap_every_line() {
    let after: SerializationHook = Arc::new(|s: &str| format!("before {s} after"));
    let before: SerializationHook = Arc::new(|s: &str| {
        s.strip_prefix("before ")
            .and_then(|s| s.strip_suffix(" after"))
            .unwrap_or(s)
            .to_string()
    });

    let storage = MemoryStorage::new();
    let mut config = DatastoreConfig::file(DATAFILE);
    config.after_serialization = Some(after.clone());
    config.before_deserialization = Some(before.clone());
    let db = Datastore::new(storage.clone(), config).unwrap();
    db.insert(doc! { "_id": "a", "x": 1 }).unwrap();
    drop(db);

    let contents = String::from_utf8(storage.contents(&datafile()).unwrap()).unwrap();
    assert!(contents.lines().all(|l| l.starts_with("before ")));

    let mut config = DatastoreConfig::file(DATAFILE);
    config.after_serialization = Some(after);
    config.before_deserialization = Some(before);
    let db = Datastore::new(storage, config).unwrap();
    assert_eq!(db.count(&doc! {}).unwrap(), 1);
}

#[test]
fn misconfigured_hooks_fail_construction() {
    let mut config = DatastoreConfig::file(DATAFILE);
    config.after_serialization = Some(Arc::new(|s: &str| s.to_string()));
    assert!(matches!(
        Datastore::new(MemoryStorage::new(), config),
        Err(DbError::HooksMissing)
    ));

    let mut config = DatastoreConfig::file(DATAFILE);
    config.after_serialization = Some(Arc::new(|s: &str| format!("{s}!")));
    config.before_deserialization = Some(Arc::new(|s: &str| s.to_string()));
    assert!(matches!(
        Datastore::new(MemoryStorage::new(), config),
        Err(DbError::HooksNotInverse)
    ));
}

#[test]
fn tilde_filenames_are_rejected() {
    let config = DatastoreConfig::file("data/test.db~");
    assert!(matches!(
        Datastore::new(MemoryStorage::new(), config),
        Err(DbError::Config(_))
    ));
}

#[test]
fn in_memory_only_never_touches_storage() {
    let storage = MemoryStorage::new();
    let db = Datastore::new(storage.clone(), DatastoreConfig::in_memory()).unwrap();
    db.insert(doc! { "_id": "a" }).unwrap();
    db.compact_datafile().unwrap();
    assert!(storage.contents(&datafile()).is_none());
    assert_eq!(db.count(&doc! {}).unwrap(), 1);
}

#[test]
fn autocompaction_collapses_the_log() {
    let (db, storage) = memory_db();
    db.insert(doc! { "_id": "a", "v": 0 }).unwrap();
    for v in 1..=5 {
        db.update(
            &doc! { "_id": "a" },
            &doc! { "$set": doc! { "v": v } },
            Default::default(),
        )
        .unwrap();
    }
    assert_eq!(line_count(&storage), 6);

    // The interval is clamped to 5000 ms, so trigger one compaction by hand
    // through the same code path the timer uses.
    db.set_autocompaction(Duration::from_millis(1));
    db.compact_datafile().unwrap();
    db.stop_autocompaction();
    assert_eq!(line_count(&storage), 1);
}
