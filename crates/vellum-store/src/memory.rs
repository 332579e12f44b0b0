use std::collections::HashMap;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::store::Storage;

/// An in-memory file system.
///
/// Clones share the same backing map, so a test can keep a handle while the
/// datastore owns another and inspect what "reached disk" at any point.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Test hook: the raw contents of a file, if present.
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.lock().get(path).cloned()
    }

    /// Test hook: overwrite a file without going through the trait.
    pub fn put(&self, path: &Path, data: &[u8]) {
        self.lock().insert(path.to_path_buf(), data.to_vec());
    }

    /// Test hook: drop a file without going through the trait.
    pub fn delete(&self, path: &Path) {
        self.lock().remove(path);
    }
}

fn not_found(path: &Path) -> StoreError {
    StoreError::Io(Error::new(
        ErrorKind::NotFound,
        format!("no such file: {}", path.display()),
    ))
}

impl Storage for MemoryStorage {
    fn mkdir_p(&self, _dir: &Path) -> Result<(), StoreError> {
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        self.lock().get(path).cloned().ok_or_else(|| not_found(path))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        self.lock().insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    fn append_file(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        self.lock()
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn rename(&self, src: &Path, dst: &Path) -> Result<(), StoreError> {
        let mut files = self.lock();
        let data = files.remove(src).ok_or_else(|| not_found(src))?;
        files.insert(dst.to_path_buf(), data);
        Ok(())
    }

    fn fsync(&self, _path: &Path, _is_dir: bool) -> Result<(), StoreError> {
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<(), StoreError> {
        self.lock().remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }
}
