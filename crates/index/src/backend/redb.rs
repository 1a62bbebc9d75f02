//! redb-backed row storage.
//!
//! One table, `member_address_rows`, maps member id to the encoded
//! [`IndexRow`](crate::IndexRow). Each write is its own transaction, so a
//! row update is atomic and durable once `put` returns.
//!
//! ```yaml
//! index:
//!   backend:
//!     kind: redb
//!     path: /var/lib/addrmatch/index.redb
//! ```

use crate::{IndexBackend, IndexError};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const ROWS: TableDefinition<&str, &[u8]> = TableDefinition::new("member_address_rows");

fn backend_err<E: std::fmt::Display>(err: E) -> IndexError {
    IndexError::backend(err)
}

pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open or create the database file and make sure the row table exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let db = Database::create(path).map_err(backend_err)?;
        let txn = db.begin_write().map_err(backend_err)?;
        {
            let _rows = txn.open_table(ROWS).map_err(backend_err)?;
        }
        txn.commit().map_err(backend_err)?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl IndexBackend for RedbBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut rows = txn.open_table(ROWS).map_err(backend_err)?;
            rows.insert(key, value).map_err(backend_err)?;
        }
        txn.commit().map_err(backend_err)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let rows = txn.open_table(ROWS).map_err(backend_err)?;
        let value = rows.get(key).map_err(backend_err)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn delete(&self, key: &str) -> Result<(), IndexError> {
        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut rows = txn.open_table(ROWS).map_err(backend_err)?;
            rows.remove(key).map_err(backend_err)?;
        }
        txn.commit().map_err(backend_err)
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let rows = txn.open_table(ROWS).map_err(backend_err)?;
        for item in rows.iter().map_err(backend_err)? {
            let (key, value) = item.map_err(backend_err)?;
            visitor(key.value(), value.value())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn redb_put_get_delete() {
        let file = NamedTempFile::new().unwrap();
        let backend = RedbBackend::open(file.path()).unwrap();

        backend.put("m-1", b"row-1").unwrap();
        assert_eq!(backend.get("m-1").unwrap(), Some(b"row-1".to_vec()));
        assert_eq!(backend.get("m-2").unwrap(), None);

        backend.delete("m-1").unwrap();
        assert_eq!(backend.get("m-1").unwrap(), None);
    }

    #[test]
    fn redb_rows_survive_reopen() {
        let file = NamedTempFile::new().unwrap();
        {
            let backend = RedbBackend::open(file.path()).unwrap();
            backend.put("m-1", b"row-1").unwrap();
            backend.put("m-2", b"row-2").unwrap();
        }

        let backend = RedbBackend::open(file.path()).unwrap();
        let mut seen = Vec::new();
        backend
            .scan(&mut |key, value| {
                seen.push((key.to_string(), value.to_vec()));
                Ok(())
            })
            .unwrap();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("m-1".to_string(), b"row-1".to_vec()),
                ("m-2".to_string(), b"row-2".to_vec()),
            ]
        );
    }
}
