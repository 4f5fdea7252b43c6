//! Coordination store interface and an in-process implementation.
//!
//! The store is a hierarchical, path-addressed map of [`Record`]s. Paths are
//! `/`-separated; a record's children are the records one segment below it.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::record::Record;

/// How a write combines with an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite the stored record.
    Replace,
    /// Merge into the stored record (see [`Record::merge`]).
    Merge,
}

impl WriteMode {
    /// Parse the driver flag: `"+"` means merge, anything else replaces.
    pub fn from_flag(flag: &str) -> Self {
        if flag == "+" {
            WriteMode::Merge
        } else {
            WriteMode::Replace
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("backend error: {0}")]
    BackendError(String),
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Address this store was connected with, for logging and process factories.
    fn address(&self) -> &str;

    async fn read(&self, path: &str) -> Result<Option<Record>, StoreError>;

    async fn write(&self, path: &str, record: &Record, mode: WriteMode) -> Result<(), StoreError>;

    /// Delete the record at `path` and everything below it.
    async fn delete_recursive(&self, path: &str) -> Result<(), StoreError>;

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Names of the direct children of `path`, sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError>;
}

fn validate_path(path: &str) -> Result<(), StoreError> {
    if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) || path.contains("//") {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn is_under(path: &str, root: &str) -> bool {
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// In-process coordination store.
///
/// Intermediate path segments exist implicitly as soon as a record is written
/// below them. Writes can be switched off with [`MemoryStore::set_read_only`]
/// to inject store failures.
pub struct MemoryStore {
    address: String,
    records: Mutex<BTreeMap<String, Record>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            records: Mutex::new(BTreeMap::new()),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "{} is read-only",
                self.address
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    fn address(&self) -> &str {
        &self.address
    }

    async fn read(&self, path: &str) -> Result<Option<Record>, StoreError> {
        validate_path(path)?;
        Ok(self.records.lock().await.get(path).cloned())
    }

    async fn write(&self, path: &str, record: &Record, mode: WriteMode) -> Result<(), StoreError> {
        validate_path(path)?;
        self.check_writable()?;
        let mut records = self.records.lock().await;
        match (mode, records.get_mut(path)) {
            (WriteMode::Merge, Some(existing)) => existing.merge(record),
            _ => {
                records.insert(path.to_string(), record.clone());
            }
        }
        debug!(path, ?mode, "record written");
        Ok(())
    }

    async fn delete_recursive(&self, path: &str) -> Result<(), StoreError> {
        validate_path(path)?;
        self.check_writable()?;
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|k, _| !is_under(k, path));
        debug!(path, removed = before - records.len(), "deleted recursively");
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        validate_path(path)?;
        let records = self.records.lock().await;
        Ok(records.keys().any(|k| is_under(k, path)))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        validate_path(path)?;
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let records = self.records.lock().await;
        let names: BTreeSet<&str> = records
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| k[prefix.len()..].split('/').next())
            .filter(|name| !name.is_empty())
            .collect();
        Ok(names.into_iter().map(str::to_string).collect())
    }
}
