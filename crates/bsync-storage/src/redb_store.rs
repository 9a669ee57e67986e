use crate::backend::ByteStore;
use crate::error::{Result, StorageError};
use redb::{ReadableTable, ReadableTableMetadata};
use std::path::Path;

const ENTRIES: redb::TableDefinition<&[u8], &[u8]> = redb::TableDefinition::new("entries");

fn backend(err: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Embedded B-tree backend (redb). Every write is its own committed transaction.
pub struct RedbStore {
    db: redb::Database,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = redb::Database::create(path).map_err(backend)?;
        let write_txn = db.begin_write().map_err(backend)?;
        write_txn.open_table(ENTRIES).map_err(backend)?;
        write_txn.commit().map_err(backend)?;
        Ok(Self { db })
    }
}

impl ByteStore for RedbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(ENTRIES).map_err(backend)?;
        let value = table.get(key).map_err(backend)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = write_txn.open_table(ENTRIES).map_err(backend)?;
            table.insert(key, value).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let write_txn = self.db.begin_write().map_err(backend)?;
        let previous;
        {
            let mut table = write_txn.open_table(ENTRIES).map_err(backend)?;
            previous = table
                .remove(key)
                .map_err(backend)?
                .map(|v| v.value().to_vec());
        }
        write_txn.commit().map_err(backend)?;
        Ok(previous)
    }

    fn clear(&self) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(backend)?;
        write_txn.delete_table(ENTRIES).map_err(backend)?;
        write_txn.open_table(ENTRIES).map_err(backend)?;
        write_txn.commit().map_err(backend)
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(ENTRIES).map_err(backend)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(backend)? {
            let (key, value) = entry.map_err(backend)?;
            out.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(out)
    }

    fn len(&self) -> Result<usize> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(ENTRIES).map_err(backend)?;
        Ok(table.len().map_err(backend)? as usize)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
