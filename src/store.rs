//! Directory-backed store for finished optimization results
//!
//! One pretty-printed `{id}.json` per result. Writes go through a temporary
//! file and a rename so a crash never leaves a half-written result behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backtest::BacktestResult;
use crate::config::OptimizationConfig;
use crate::error::StoreError;

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Best result of a completed job together with the config that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: String,
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub config: OptimizationConfig,
    pub result: BacktestResult,
}

impl StoredResult {
    pub fn new(job_id: Uuid, config: OptimizationConfig, result: BacktestResult) -> Self {
        StoredResult {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            created_at: Utc::now(),
            config,
            result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        ResultStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids become file names, so only `[A-Za-z0-9_-]` is accepted
    fn path_for(&self, id: &str) -> StoreResult<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn io_error(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn save(&self, stored: &StoredResult) -> StoreResult<()> {
        let path = self.path_for(&stored.id)?;
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;

        let json = serde_json::to_string_pretty(stored)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| Self::io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Self::io_error(&path, e))?;

        debug!(id = %stored.id, path = %path.display(), "Result saved");
        Ok(())
    }

    fn read(path: &Path) -> StoreResult<StoredResult> {
        let contents = fs::read_to_string(path).map_err(|e| Self::io_error(path, e))?;
        serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get(&self, id: &str) -> StoreResult<Option<StoredResult>> {
        let path = self.path_for(id)?;
        match Self::read(&path) {
            Ok(stored) => Ok(Some(stored)),
            Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every readable result, newest first. Files that fail to parse are
    /// logged and skipped; a missing directory is an empty store.
    pub fn list(&self) -> StoreResult<Vec<StoredResult>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error(&self.dir, e)),
        };

        let mut results = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Self::io_error(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path) {
                Ok(stored) => results.push(stored),
                Err(e) => warn!("Skipping unreadable result {}: {}", path.display(), e),
            }
        }

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    /// Returns false when there was nothing to delete
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(id, "Result deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::Backtester;
    use crate::config::SearchMethod;
    use crate::optimizer::test_support::config;
    use chrono::Duration;

    fn temp_store(tag: &str) -> ResultStore {
        let dir = std::env::temp_dir().join(format!("store_{}_{}", tag, Uuid::new_v4()));
        ResultStore::new(dir)
    }

    fn stored() -> StoredResult {
        let cfg = config(SearchMethod::Grid);
        let params = cfg.parameter_ranges.realize(&[2.0, 0.02, 1.0, 0.05, 0.02]);
        let result = Backtester::default().run(&[], 1000.0, &params).unwrap();
        StoredResult::new(Uuid::new_v4(), cfg, result)
    }

    #[test]
    fn test_save_get_delete() {
        let store = temp_store("crud");
        let item = stored();
        store.save(&item).unwrap();

        assert_eq!(store.get(&item.id).unwrap(), Some(item.clone()));
        assert_eq!(store.get(&item.id).unwrap(), Some(item.clone()));
        assert!(store.delete(&item.id).unwrap());
        assert!(!store.delete(&item.id).unwrap());
        assert_eq!(store.get(&item.id).unwrap(), None);

        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_list_newest_first_and_skips_corrupt() {
        let store = temp_store("list");
        let mut older = stored();
        older.created_at = Utc::now() - Duration::hours(2);
        let newer = stored();
        store.save(&older).unwrap();
        store.save(&newer).unwrap();
        fs::write(store.dir().join("broken.json"), "{not json").unwrap();
        fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);

        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let store = temp_store("missing");
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.get("abc").unwrap(), None);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let store = temp_store("ids");
        assert!(matches!(
            store.get("../etc/passwd"),
            Err(StoreError::InvalidId(_))
        ));
        assert!(matches!(store.delete(""), Err(StoreError::InvalidId(_))));
    }

    #[test]
    fn test_corrupt_file_is_an_error_on_get() {
        let store = temp_store("corrupt");
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("bad.json"), "[]").unwrap();
        assert!(matches!(store.get("bad"), Err(StoreError::Corrupt { .. })));
        let _ = fs::remove_dir_all(store.dir());
    }
}
