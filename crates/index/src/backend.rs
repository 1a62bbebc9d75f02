use crate::IndexError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Key-value storage for encoded index rows, keyed by member id.
///
/// Every method is a single atomic operation; the index never needs
/// multi-key transactions because each member owns exactly one row.
pub trait IndexBackend: Send + Sync {
    /// Insert or replace the row stored under `key`.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError>;
    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), IndexError>;
    /// Visit every stored `(key, value)` pair.
    fn scan(
        &self,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError>;
    fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Selects the storage backend for the match index.
///
/// ```
/// use index::BackendConfig;
///
/// let config = BackendConfig::in_memory();
/// let persistent = BackendConfig::redb("/var/lib/addrmatch/index.redb");
/// # let _ = (config, persistent);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Persistent redb file. Requires the `backend-redb` feature (on by default).
    Redb { path: String },
    /// Process-local map; contents are lost on drop.
    #[default]
    InMemory,
}

impl BackendConfig {
    pub fn in_memory() -> Self {
        BackendConfig::InMemory
    }

    pub fn redb<P: Into<String>>(path: P) -> Self {
        BackendConfig::Redb { path: path.into() }
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        match self {
            BackendConfig::Redb { path } if path.trim().is_empty() => Err(
                IndexError::InvalidConfig("redb backend requires a non-empty path".into()),
            ),
            _ => Ok(()),
        }
    }

    pub fn build(&self) -> Result<Box<dyn IndexBackend>, IndexError> {
        self.validate()?;
        match self {
            BackendConfig::InMemory => Ok(Box::new(InMemoryBackend::new())),
            BackendConfig::Redb { path } => {
                #[cfg(feature = "backend-redb")]
                {
                    Ok(Box::new(RedbBackend::open(path)?))
                }
                #[cfg(not(feature = "backend-redb"))]
                {
                    let _ = path;
                    Err(IndexError::backend("redb backend disabled at compile time"))
                }
            }
        }
    }
}

/// Member rows in a `RwLock`ed `HashMap`.
#[derive(Default)]
pub struct InMemoryBackend {
    rows: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexBackend for InMemoryBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        self.rows
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let guard = self
            .rows
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        Ok(guard.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), IndexError> {
        self.rows
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .remove(key);
        Ok(())
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let guard = self
            .rows
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for (key, value) in guard.iter() {
            visitor(key, value)?;
        }
        Ok(())
    }
}

#[cfg(feature = "backend-redb")]
pub mod redb;

#[cfg(feature = "backend-redb")]
pub use redb::RedbBackend;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_put_get_delete() {
        let backend = InMemoryBackend::new();
        backend.put("m-1", b"row").unwrap();
        assert_eq!(backend.get("m-1").unwrap(), Some(b"row".to_vec()));
        backend.delete("m-1").unwrap();
        backend.delete("m-1").unwrap();
        assert_eq!(backend.get("m-1").unwrap(), None);
    }

    #[test]
    fn scan_sees_keys() {
        let backend = InMemoryBackend::new();
        backend.put("a", b"1").unwrap();
        backend.put("b", b"2").unwrap();
        let mut keys = Vec::new();
        backend
            .scan(&mut |key, _| {
                keys.push(key.to_string());
                Ok(())
            })
            .unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn redb_config_requires_path() {
        assert!(BackendConfig::redb("  ").validate().is_err());
        assert!(BackendConfig::in_memory().validate().is_ok());
    }
}
