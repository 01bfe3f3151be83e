use serde_json::{Map, Value};

use crate::storage::{ScopedStorage, Storage};
use crate::{Error, Result};

/// A secret engine mounted into the namespace. Paths are relative to the
/// mount point.
pub trait SecretBackend: Send + Sync {
    /// Short type name reported in mount listings.
    fn kind(&self) -> &'static str;
    fn read(&self, path: &str) -> Result<Option<Map<String, Value>>>;
    fn write(&self, path: &str, data: Map<String, Value>) -> Result<()>;
    fn delete(&self, path: &str) -> Result<()>;
    fn list(&self, path: &str) -> Result<Vec<String>>;
}

/// Generic key-value engine: each path holds one JSON object.
pub struct KvBackend {
    storage: ScopedStorage,
}

impl KvBackend {
    pub const KIND: &'static str = "kv";

    pub fn new(storage: ScopedStorage) -> Self {
        Self { storage }
    }
}

/// Entry paths must name a leaf; a trailing `/` is tolerated.
fn leaf(path: &str) -> Result<&str> {
    let key = path.trim_end_matches('/');
    if key.is_empty() {
        return Err(Error::malformed("missing secret path below mount"));
    }
    Ok(key)
}

impl SecretBackend for KvBackend {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn read(&self, path: &str) -> Result<Option<Map<String, Value>>> {
        let key = leaf(path)?;
        match self.storage.get(key)? {
            None => Ok(None),
            Some(bytes) => {
                let data = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::InternalInvariantViolation(format!("kv entry {key}: {e}")))?;
                Ok(Some(data))
            }
        }
    }

    fn write(&self, path: &str, data: Map<String, Value>) -> Result<()> {
        let key = leaf(path)?;
        let bytes = serde_json::to_vec(&data)
            .map_err(|e| Error::InternalInvariantViolation(format!("encode kv entry: {e}")))?;
        self.storage.put(key, &bytes)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.storage.delete(leaf(path)?)
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let prefix = path.trim_matches('/');
        if prefix.is_empty() {
            self.storage.list("")
        } else {
            self.storage.list(&format!("{prefix}/"))
        }
    }
}
