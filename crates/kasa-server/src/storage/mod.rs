//! Key-value byte storage used by secret backends and the core.
//!
//! Keys are `/`-separated paths. [`Storage::list`] returns the immediate
//! children of a prefix; a child with descendants is reported with a trailing
//! `/` (`app/` for `app/db`). [`ScopedStorage`] confines a backend to its own
//! prefix of a shared physical store.

pub mod file;
pub mod memory;
pub mod state;

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::{Error, Result};

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use state::{JsonStateFile, MemoryStateStore, StateStore};

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// A view of `inner` under a fixed prefix. Callers never see the prefix.
#[derive(Clone)]
pub struct ScopedStorage {
    inner: Arc<dyn Storage>,
    prefix: String,
}

impl ScopedStorage {
    pub fn new(inner: Arc<dyn Storage>, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { inner, prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl Storage for ScopedStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.full(key))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.put(&self.full(key), value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(&self.full(key))
    }

    // Children are already relative to the queried prefix, so nothing to strip.
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(&self.full(prefix))
    }
}

/// Collapse `keys` (all starting with `prefix`) into immediate child names.
pub(crate) fn immediate_children<'a>(
    prefix: &str,
    keys: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut out = BTreeSet::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        match rest.find('/') {
            Some(i) => out.insert(rest[..=i].to_owned()),
            None => out.insert(rest.to_owned()),
        };
    }
    out.into_iter().collect()
}

/// Physical storage selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    File,
    InMemory,
}

impl FromStr for StorageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "inmem" | "memory" => Ok(Self::InMemory),
            other => Err(Error::UnsupportedConfiguration(format!(
                "unknown storage type '{other}' (expected 'file' or 'inmem')"
            ))),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::InMemory => "inmem",
        })
    }
}

/// The physical key-value store and durable-state store the core runs on.
#[derive(Clone)]
pub struct Physical {
    pub storage: Arc<dyn Storage>,
    pub state: Arc<dyn StateStore>,
    /// Storage root directory, if any.
    pub root: Option<PathBuf>,
}

impl Physical {
    pub fn in_memory() -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
            state: Arc::new(MemoryStateStore::default()),
            root: None,
        }
    }

    /// Open the file-backed layout under `root`: `kasa.db` plus `kasa.json`.
    pub fn open_file(root: PathBuf) -> Result<Self> {
        let storage = FileStorage::open(&root)?;
        let state = JsonStateFile::new(root.join(state::STATE_FILE_NAME));
        Ok(Self {
            storage: Arc::new(storage),
            state: Arc::new(state),
            root: Some(root),
        })
    }

    pub fn open(kind: StorageKind, root: Option<PathBuf>) -> Result<Self> {
        match (kind, root) {
            (StorageKind::InMemory, _) => Ok(Self::in_memory()),
            (StorageKind::File, Some(root)) => Self::open_file(root),
            (StorageKind::File, None) => Err(Error::UnsupportedConfiguration(
                "file storage requires a data directory".into(),
            )),
        }
    }
}
