use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use super::{immediate_children, Storage};

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Database file kept under the storage root.
pub const DB_FILE_NAME: &str = "kasa.db";

/// Disk-backed storage: a redb database under the storage root.
#[derive(Clone)]
pub struct FileStorage {
    db: Arc<Database>,
}

impl FileStorage {
    /// Open (or create) `kasa.db` under `root`, creating `root` if needed.
    pub fn open(root: &Path) -> crate::Result<Self> {
        Ok(Self::open_inner(root)?)
    }

    fn open_inner(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("create storage root {}", root.display()))?;
        let db = Database::create(root.join(DB_FILE_NAME)).context("open redb database")?;

        let write_txn = db.begin_write()?;
        write_txn.open_table(ENTRIES)?;
        write_txn.commit()?;

        debug!(root = %root.display(), "opened file storage");
        Ok(Self { db: Arc::new(db) })
    }

    fn get_inner(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    fn put_inner(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete_inner(&self, key: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn list_inner(&self, prefix: &str) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;

        let mut keys = Vec::new();
        for item in table.range(prefix..)? {
            let (k, _) = item?;
            let k = k.value();
            if !k.starts_with(prefix) {
                break;
            }
            keys.push(k.to_owned());
        }
        Ok(immediate_children(prefix, keys.iter().map(String::as_str)))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> crate::Result<Option<Vec<u8>>> {
        Ok(self.get_inner(key).with_context(|| format!("get {key}"))?)
    }

    fn put(&self, key: &str, value: &[u8]) -> crate::Result<()> {
        Ok(self.put_inner(key, value).with_context(|| format!("put {key}"))?)
    }

    fn delete(&self, key: &str) -> crate::Result<()> {
        Ok(self.delete_inner(key).with_context(|| format!("delete {key}"))?)
    }

    fn list(&self, prefix: &str) -> crate::Result<Vec<String>> {
        Ok(self
            .list_inner(prefix)
            .with_context(|| format!("list {prefix}"))?)
    }
}
