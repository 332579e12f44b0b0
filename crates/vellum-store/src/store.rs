use std::path::Path;

use crate::error::StoreError;

/// The file-system surface the persistence layer is written against.
///
/// Implementations must be movable into the worker thread that owns the
/// datastore state, hence the `Send + 'static` bound.
pub trait Storage: Send + 'static {
    fn mkdir_p(&self, dir: &Path) -> Result<(), StoreError>;
    fn exists(&self, path: &Path) -> bool;
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, StoreError>;
    /// Replace the file contents (creating the file if needed).
    fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), StoreError>;
    /// Append to the file, creating it if needed.
    fn append_file(&self, path: &Path, data: &[u8]) -> Result<(), StoreError>;
    fn rename(&self, src: &Path, dst: &Path) -> Result<(), StoreError>;
    /// Flush a file — or, with `is_dir`, a directory entry — to stable
    /// storage.
    fn fsync(&self, path: &Path, is_dir: bool) -> Result<(), StoreError>;
    fn unlink(&self, path: &Path) -> Result<(), StoreError>;
}
