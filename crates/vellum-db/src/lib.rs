mod compaction;
mod cursor;
mod datastore;
mod error;
mod executor;
mod index;
mod journal;

pub use cursor::{FindOptions, SortDirection, SortKey};
pub use datastore::{Datastore, DatastoreConfig, RemoveOptions, UpdateOptions, UpdateResult};
pub use error::DbError;
pub use index::IndexOptions;
pub use journal::SerializationHook;

pub use vellum_document::{Document, StringComparator, Value};
pub use vellum_query::{Expression, WherePredicate};
