use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::Mutex;
use tracing::debug;

use crate::seal::DurableServerState;
use crate::Result;

/// Durable-state file kept under the storage root.
pub const STATE_FILE_NAME: &str = "kasa.json";

/// Where the durable server record lives.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<Option<DurableServerState>>;
    fn save(&self, state: &DurableServerState) -> Result<()>;
    /// Remove any persisted record. Removing nothing is not an error.
    fn discard(&self) -> Result<()>;
    /// Path of the backing file, if there is one.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// One JSON document on disk, replaced atomically on save.
pub struct JsonStateFile {
    path: PathBuf,
}

impl JsonStateFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl StateStore for JsonStateFile {
    fn load(&self) -> Result<Option<DurableServerState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let state: DurableServerState = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", self.path.display()))?;
        Ok(Some(state))
    }

    fn save(&self, state: &DurableServerState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state).context("encode durable state")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename into {}", self.path.display()))?;
        debug!(path = %self.path.display(), "saved durable state");
        Ok(())
    }

    fn discard(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("remove {}", self.path.display()))
                .into()),
        }
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Keeps the record in process memory only.
#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<DurableServerState>>,
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<DurableServerState>> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &DurableServerState) -> Result<()> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    fn discard(&self) -> Result<()> {
        *self.state.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> DurableServerState {
        DurableServerState {
            secret_shares: 5,
            secret_threshold: 3,
            root_key_term: 1,
            root_key_install_time: 1_700_000_000,
            root_key_encrypted: vec![1, 2, 3],
            root_key_hash: vec![0xab; 32],
            root_token_hash: vec![0xcd; 32],
            cluster_name: "kasa-cluster-test".into(),
            cluster_id: "00000000-0000-4000-8000-000000000000".into(),
        }
    }

    #[test]
    fn json_file_round_trips_and_discards() {
        let dir = tempdir().unwrap();
        let store = JsonStateFile::new(dir.path().join(STATE_FILE_NAME));
        assert!(store.load().unwrap().is_none());

        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap().unwrap(), sample());
        assert!(!dir.path().join("kasa.json.tmp").exists());

        store.discard().unwrap();
        assert!(store.load().unwrap().is_none());
        store.discard().unwrap();
    }

    #[test]
    fn missing_fields_load_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);
        std::fs::write(&path, r#"{"secret_shares": 3, "secret_threshold": 2}"#).unwrap();
        let state = JsonStateFile::new(path).load().unwrap().unwrap();
        assert_eq!(state.secret_shares, 3);
        assert_eq!(state.root_key_term, 0);
        assert!(state.cluster_id.is_empty());
    }

    #[test]
    fn corrupt_file_is_a_storage_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            JsonStateFile::new(path).load(),
            Err(crate::Error::StorageFailure(_))
        ));
    }
}
