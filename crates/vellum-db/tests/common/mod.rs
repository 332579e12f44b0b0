use std::path::PathBuf;

use vellum_db::{Datastore, DatastoreConfig};
use vellum_document::doc;
use vellum_store::MemoryStorage;

pub const DATAFILE: &str = "data/test.db";

pub fn datafile() -> PathBuf {
    PathBuf::from(DATAFILE)
}

/// A datastore journaling into a shared in-memory file system; the returned
/// storage handle lets tests inspect what "reached disk".
pub fn memory_db() -> (Datastore<MemoryStorage>, MemoryStorage) {
    let storage = MemoryStorage::new();
    let db = Datastore::new(storage.clone(), DatastoreConfig::file(DATAFILE)).unwrap();
    (db, storage)
}

/// Reopen a datastore over the same in-memory file system.
pub fn reopen(storage: &MemoryStorage) -> Datastore<MemoryStorage> {
    Datastore::new(storage.clone(), DatastoreConfig::file(DATAFILE)).unwrap()
}

/// Insert five fixed documents.
pub fn seed(db: &Datastore<MemoryStorage>) {
    db.insert_many(vec![
        doc! { "_id": "acct-1", "name": "Acme Corp", "revenue": 50000.0, "status": "active" },
        doc! { "_id": "acct-2", "name": "Globex", "revenue": 80000.0, "status": "snoozed" },
        doc! { "_id": "acct-3", "name": "Initech", "revenue": 12000.0, "status": "rejected" },
        doc! { "_id": "acct-4", "name": "Umbrella", "revenue": 95000.0, "status": "active" },
        doc! { "_id": "acct-5", "name": "Stark Industries", "revenue": 200000.0, "status": "active" },
    ])
    .unwrap();
}
