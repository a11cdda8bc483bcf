//! File-backed cache persistence: one JSON document per key.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::entry::Entry;
use super::key::CacheKey;
use super::store::BackingStore;
use crate::core::errors::{DpcError, Result};

const ENTRY_EXTENSION: &str = "json";

/// Directory of `<subject>.<kind>.json` files written with atomic rename.
#[derive(Debug, Clone)]
pub struct JsonFileBackingStore {
    dir: PathBuf,
}

impl JsonFileBackingStore {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| DpcError::io(&dir, source))?;
        Ok(Self { dir })
    }

    /// Directory holding the entry files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{ENTRY_EXTENSION}", key.storage_token()))
    }

    fn read_entry(path: &Path) -> Result<Entry> {
        let raw = fs::read_to_string(path).map_err(|source| DpcError::io(path, source))?;
        serde_json::from_str(&raw).map_err(|error| DpcError::Serialization {
            context: "cache entry",
            details: format!("{}: {error}", path.display()),
        })
    }
}

impl BackingStore for JsonFileBackingStore {
    fn name(&self) -> &'static str {
        "json"
    }

    fn load(&self, key: &CacheKey) -> Result<Option<Entry>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_entry(&path).map(Some)
    }

    /// Store entry using atomic rename for crash safety.
    fn store(&mut self, entry: &Entry) -> Result<()> {
        let path = self.path_for(&entry.key);
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(entry)?;
        fs::write(&tmp_path, data).map_err(|source| DpcError::io(&tmp_path, source))?;
        fs::rename(&tmp_path, &path).map_err(|source| DpcError::io(&path, source))?;
        Ok(())
    }

    fn delete(&mut self, key: &CacheKey) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DpcError::io(&path, source)),
        }
    }

    /// Corrupt files are skipped with a warning so one bad entry cannot block
    /// the warm start.
    fn load_all(&self) -> Result<Vec<Entry>> {
        let read_dir = fs::read_dir(&self.dir).map_err(|source| DpcError::io(&self.dir, source))?;
        let mut entries = Vec::new();
        for item in read_dir {
            let path = item.map_err(|source| DpcError::io(&self.dir, source))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            match Self::read_entry(&path) {
                Ok(entry) => entries.push(entry),
                Err(e) => eprintln!("[DPC-CACHE] skipping unreadable entry: {e}"),
            }
        }
        Ok(entries)
    }
}
