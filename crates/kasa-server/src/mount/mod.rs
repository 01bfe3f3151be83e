//! Mount namespace: which backend owns which path prefix.
//!
//! Two tables are kept. The reserved table holds fixed system prefixes that
//! are intercepted before any backend sees them; the general table holds
//! user-visible secret mounts. Resolution consults the reserved table first.

pub mod table;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{KvBackend, SecretBackend};
use crate::storage::{ScopedStorage, Storage};
use crate::{Error, Result};

pub use table::{normalize, MountTable};

/// Storage key holding the persisted general mount list.
const MOUNTS_KEY: &str = "core/mounts";

/// Mount created on first start.
pub const DEFAULT_MOUNT: &str = "secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedMount {
    /// System control namespace (`sys`).
    System,
    /// Per-token private namespace (`cubbyhole`).
    Cubbyhole,
}

impl ReservedMount {
    pub const ALL: [ReservedMount; 2] = [ReservedMount::System, ReservedMount::Cubbyhole];

    pub fn path(self) -> &'static str {
        match self {
            Self::System => "sys",
            Self::Cubbyhole => "cubbyhole",
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Cubbyhole => "cubbyhole",
        }
    }
}

/// What a mount path is bound to.
#[derive(Clone)]
pub enum MountEntry {
    /// Occupies a namespace slot; never dispatched to a backend.
    Reserved(ReservedMount),
    Backend {
        backend: Arc<dyn SecretBackend>,
        /// Identifier of the backend's storage namespace.
        uuid: String,
    },
}

impl MountEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reserved(r) => r.kind(),
            Self::Backend { backend, .. } => backend.kind(),
        }
    }
}

/// One row of a mount listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MountInfo {
    /// Mount path with a trailing `/`.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub reserved: bool,
}

/// Outcome of resolving a request path.
pub enum Resolved {
    Reserved {
        mount: ReservedMount,
        remainder: String,
    },
    Backend {
        mount: String,
        backend: Arc<dyn SecretBackend>,
        remainder: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedMount {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    uuid: String,
}

pub struct Mounts {
    physical: Arc<dyn Storage>,
    reserved: MountTable<MountEntry>,
    general: MountTable<MountEntry>,
}

impl Mounts {
    /// Build the tables, restoring general mounts persisted in `physical`.
    /// A fresh store gets the default `secret` kv mount.
    pub fn load(physical: Arc<dyn Storage>) -> Result<Self> {
        let mut reserved = MountTable::new();
        for r in ReservedMount::ALL {
            reserved.set(r.path(), MountEntry::Reserved(r))?;
        }

        let mut mounts = Self {
            physical,
            reserved,
            general: MountTable::new(),
        };

        match mounts.physical.get(MOUNTS_KEY)? {
            Some(bytes) => {
                let persisted: Vec<PersistedMount> = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::InternalInvariantViolation(format!("{MOUNTS_KEY}: {e}")))?;
                for m in persisted {
                    let entry = mounts.build(&m.path, &m.kind, m.uuid)?;
                    mounts.general.set(&m.path, entry)?;
                }
                debug!(count = mounts.general.len(), "restored mount table");
            }
            None => {
                let entry = mounts.build(DEFAULT_MOUNT, KvBackend::KIND, new_uuid())?;
                mounts.general.set(DEFAULT_MOUNT, entry)?;
                mounts.persist()?;
                info!(path = DEFAULT_MOUNT, "created default mount");
            }
        }
        Ok(mounts)
    }

    fn build(&self, path: &str, kind: &str, uuid: String) -> Result<MountEntry> {
        let backend: Arc<dyn SecretBackend> = match kind {
            KvBackend::KIND => Arc::new(KvBackend::new(ScopedStorage::new(
                self.physical.clone(),
                format!("logical/{uuid}/"),
            ))),
            other => {
                return Err(Error::malformed(format!(
                    "unknown mount type '{other}' for '{path}'"
                )))
            }
        };
        Ok(MountEntry::Backend { backend, uuid })
    }

    /// Register a new backend of `kind` at `path` and persist the table.
    pub fn mount(&mut self, path: &str, kind: &str) -> Result<MountInfo> {
        let path = normalize(path)?;
        if path.is_empty() {
            return Err(Error::malformed("mount path must not be empty"));
        }
        if self.reserved.resolve(&path).is_some() {
            return Err(Error::malformed(format!("'{path}' is a reserved path")));
        }
        if self.general.exists(&path) {
            return Err(Error::malformed(format!("path '{path}' is already in use")));
        }

        let entry = self.build(&path, kind, new_uuid())?;
        self.general.set(&path, entry)?;
        if let Err(e) = self.persist() {
            self.general.remove(&path);
            return Err(e);
        }

        info!(path = %path, kind, "mounted secret backend");
        Ok(MountInfo {
            path: format!("{path}/"),
            kind: kind.to_owned(),
            reserved: false,
        })
    }

    fn persist(&self) -> Result<()> {
        let rows: Vec<PersistedMount> = self
            .general
            .iter()
            .filter_map(|(path, entry)| match entry {
                MountEntry::Backend { backend, uuid } => Some(PersistedMount {
                    path: path.to_owned(),
                    kind: backend.kind().to_owned(),
                    uuid: uuid.clone(),
                }),
                MountEntry::Reserved(_) => None,
            })
            .collect();
        let bytes = serde_json::to_vec(&rows)
            .map_err(|e| Error::InternalInvariantViolation(format!("encode mounts: {e}")))?;
        self.physical.put(MOUNTS_KEY, &bytes)
    }

    /// Resolve `path` against the reserved table, then the general one.
    pub fn resolve(&self, path: &str) -> Result<Resolved> {
        let normalized = normalize(path)?;
        if let Some((_, entry, remainder)) = self.reserved.resolve(&normalized) {
            if let MountEntry::Reserved(mount) = entry {
                return Ok(Resolved::Reserved {
                    mount: *mount,
                    remainder,
                });
            }
        }
        match self.general.resolve(&normalized) {
            Some((mount, MountEntry::Backend { backend, .. }, remainder)) => Ok(Resolved::Backend {
                mount: mount.to_owned(),
                backend: backend.clone(),
                remainder,
            }),
            Some((mount, MountEntry::Reserved(_), _)) => Err(Error::InternalInvariantViolation(
                format!("reserved entry '{mount}' in general mount table"),
            )),
            None => Err(Error::NotFound(normalized)),
        }
    }

    /// User-facing mounts only.
    pub fn list_secret_mounts(&self) -> Vec<MountInfo> {
        Self::rows(&self.general, false)
    }

    /// Reserved and user mounts together.
    pub fn list_all(&self) -> Vec<MountInfo> {
        let mut rows = Self::rows(&self.reserved, true);
        rows.extend(Self::rows(&self.general, false));
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        rows
    }

    fn rows(table: &MountTable<MountEntry>, reserved: bool) -> Vec<MountInfo> {
        table
            .iter()
            .map(|(path, entry)| MountInfo {
                path: format!("{path}/"),
                kind: entry.kind().to_owned(),
                reserved,
            })
            .collect()
    }
}

fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
