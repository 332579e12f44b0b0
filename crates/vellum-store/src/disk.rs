use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::StoreError;
use crate::store::Storage;

/// The real file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskStorage;

impl DiskStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Storage for DiskStorage {
    fn mkdir_p(&self, dir: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dir)?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        Ok(fs::read(path)?)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        fs::write(path, data)?;
        Ok(())
    }

    fn append_file(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn rename(&self, src: &Path, dst: &Path) -> Result<(), StoreError> {
        fs::rename(src, dst)?;
        Ok(())
    }

    fn fsync(&self, path: &Path, is_dir: bool) -> Result<(), StoreError> {
        let file = File::open(path)?;
        match file.sync_all() {
            Ok(()) => Ok(()),
            // Some platforms refuse to fsync a directory handle; the
            // rename-based write protocol still holds there.
            Err(_) if is_dir => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn unlink(&self, path: &Path) -> Result<(), StoreError> {
        fs::remove_file(path)?;
        Ok(())
    }
}
