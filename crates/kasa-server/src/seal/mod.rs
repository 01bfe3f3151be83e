//! Initialization, sealing and unsealing.
//!
//! [`Core`] owns the durable server record, the transient unseal state and the
//! mount tables. Initialization generates a root key, splits it into shares and
//! persists only digests plus the split representation. Unsealing accumulates
//! submitted shares until the threshold is reached, then combines them and
//! checks the result against the stored digest.

pub mod keys;
pub mod state;
pub mod status;

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use constant_time_eq::constant_time_eq;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::mount::{MountInfo, Mounts, Resolved};
use crate::shamir;
use crate::storage::Physical;
use crate::{Error, Result};

pub use keys::RootKey;
pub use state::{DurableServerState, ServerState};
pub use status::{
    HealthStatus, InitResponse, KeyStatus, LeaderStatus, Phase, SealStatus, VERSION,
};

struct Inner {
    durable: Option<DurableServerState>,
    state: ServerState,
}

/// One server instance. Share it behind an `Arc`.
pub struct Core {
    physical: Physical,
    cluster_name: Option<String>,
    inner: RwLock<Inner>,
    mounts: RwLock<Mounts>,
}

impl Core {
    /// Load the durable record and mount table from `physical`. The server
    /// always starts sealed.
    pub fn new(physical: Physical, cluster_name: Option<String>) -> Result<Self> {
        let durable = physical.state.load()?;
        if let Some(ref d) = durable {
            check_durable(d)?;
        }
        let mounts = Mounts::load(physical.storage.clone())?;

        let state = ServerState {
            storage_root: physical.root.clone(),
            state_file: physical.state.location().map(|p| p.to_path_buf()),
            ..Default::default()
        };

        match &durable {
            Some(d) => info!(cluster_id = %d.cluster_id, "loaded server state; sealed"),
            None => info!("server is not initialized"),
        }

        Ok(Self {
            physical,
            cluster_name,
            inner: RwLock::new(Inner { durable, state }),
            mounts: RwLock::new(mounts),
        })
    }

    pub fn phase(&self) -> Phase {
        let inner = self.inner.read();
        match &inner.durable {
            None => Phase::Uninitialized,
            Some(_) if inner.state.is_unsealed() => Phase::Unsealed,
            Some(_) if inner.state.unseal_nonce.is_some() => Phase::Unsealing {
                progress: inner.state.unseal_keys.len(),
            },
            Some(_) => Phase::Sealed,
        }
    }

    // ── Initialize ───────────────────────────────────────────────────────────

    /// Generate and split a new root key. The shares and root token in the
    /// response are never available again.
    pub fn initialize(&self, secret_shares: u32, secret_threshold: u32) -> Result<InitResponse> {
        let mut inner = self.inner.write();
        if inner.durable.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let n = u8::try_from(secret_shares)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| Error::malformed("secret_shares must be between 1 and 255"))?;
        let t = u8::try_from(secret_threshold)
            .ok()
            .filter(|t| *t >= 1 && *t <= n)
            .ok_or_else(|| {
                Error::malformed(format!("secret_threshold must be between 1 and {n}"))
            })?;

        let root_key = RootKey::generate();
        let root_token = keys::generate_root_token();
        let (combined, shares) = shamir::split(root_key.as_bytes(), n, t)?;
        let shares = Zeroizing::new(shares);

        let durable = DurableServerState {
            secret_shares: n,
            secret_threshold: t,
            root_key_term: 1,
            root_key_install_time: now(),
            root_key_encrypted: combined,
            root_key_hash: keys::digest(root_key.as_bytes()),
            root_token_hash: keys::digest(root_token.as_bytes()),
            cluster_name: self
                .cluster_name
                .clone()
                .unwrap_or_else(keys::generate_cluster_name),
            cluster_id: uuid::Uuid::new_v4().to_string(),
        };

        inner.durable = Some(durable.clone());
        if let Err(e) = self.physical.state.save(&durable) {
            inner.durable = None;
            if let Err(discard) = self.physical.state.discard() {
                warn!(error = %discard, "could not remove partial server state");
            }
            error!(error = %e, "initialization failed; server remains uninitialized");
            return Err(e);
        }

        info!(
            shares = n,
            threshold = t,
            cluster_id = %durable.cluster_id,
            "server initialized"
        );

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(InitResponse {
            keys: shares.iter().map(hex::encode).collect(),
            keys_base64: shares.iter().map(|s| b64.encode(s)).collect(),
            root_token,
        })
    }

    // ── Unseal / seal ────────────────────────────────────────────────────────

    /// Submit one key share (hex, or base64) toward unsealing, or abandon the
    /// current attempt with `reset`.
    ///
    /// When the threshold is reached the attempt ends whatever the outcome:
    /// submitted shares are cleared before they are combined.
    pub fn unseal(&self, key: &str, reset: bool) -> Result<SealStatus> {
        let mut inner = self.inner.write();
        let durable = inner.durable.clone().ok_or(Error::NotInitialized)?;

        if reset {
            inner.state.reset_attempt();
            debug!("unseal attempt reset");
            return seal_status_of(&inner);
        }
        if inner.state.is_unsealed() {
            return seal_status_of(&inner);
        }

        let share = Zeroizing::new(decode_key(key)?);
        if inner
            .state
            .unseal_keys
            .iter()
            .any(|k| constant_time_eq(k, &share))
        {
            warn!("duplicate unseal key ignored");
            return seal_status_of(&inner);
        }

        if inner.state.unseal_nonce.is_none() {
            inner.state.unseal_nonce = Some(uuid::Uuid::new_v4().to_string());
        }
        inner.state.unseal_keys.push(share);

        let progress = inner.state.unseal_keys.len();
        let threshold = durable.secret_threshold as usize;
        if progress < threshold {
            debug!(progress, threshold, "unseal key accepted");
            return seal_status_of(&inner);
        }

        let submitted = std::mem::take(&mut inner.state.unseal_keys);
        inner.state.reset_attempt();

        let recovered = shamir::combine(&submitted, &durable.root_key_encrypted).map_err(|e| {
            warn!(error = %e, "unseal keys could not be combined");
            Error::from(e)
        })?;
        if !constant_time_eq(&keys::digest(&recovered), &durable.root_key_hash) {
            warn!("unseal keys failed verification");
            return Err(Error::VerificationFailed);
        }
        let root_key = RootKey::from_slice(&recovered).ok_or_else(|| {
            Error::InternalInvariantViolation("recovered root key has the wrong length".into())
        })?;

        inner.state.root_key = Some(root_key);
        info!(cluster_id = %durable.cluster_id, "server unsealed");
        seal_status_of(&inner)
    }

    /// Drop the in-memory root key. Sealing a sealed server is a no-op.
    pub fn seal(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.durable.is_none() {
            return Err(Error::NotInitialized);
        }
        inner.state.reset_attempt();
        if inner.state.root_key.take().is_some() {
            info!("server sealed");
        }
        Ok(())
    }

    // ── Status projections ───────────────────────────────────────────────────

    pub fn health(&self) -> HealthStatus {
        let inner = self.inner.read();
        HealthStatus {
            initialized: inner.durable.is_some(),
            sealed: !inner.state.is_unsealed(),
            standby: false,
            server_time_utc: now(),
            version: VERSION.to_owned(),
            cluster_name: inner.durable.as_ref().map(|d| d.cluster_name.clone()),
            cluster_id: inner.durable.as_ref().map(|d| d.cluster_id.clone()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.read().durable.is_some()
    }

    pub fn seal_status(&self) -> Result<SealStatus> {
        seal_status_of(&self.inner.read())
    }

    pub fn key_status(&self) -> Result<KeyStatus> {
        let inner = self.inner.read();
        let durable = unsealed(&inner)?;
        Ok(KeyStatus {
            term: durable.root_key_term,
            install_time: durable.root_key_install_time,
        })
    }

    pub fn leader_status(&self) -> Result<LeaderStatus> {
        unsealed(&self.inner.read())?;
        Ok(LeaderStatus::standalone())
    }

    /// Ok when initialized and unsealed, otherwise the reason it is not.
    pub fn require_unsealed(&self) -> Result<()> {
        unsealed(&self.inner.read()).map(|_| ())
    }

    /// Check `token` against the stored root token digest.
    pub fn verify_root_token(&self, token: &str) -> Result<()> {
        let inner = self.inner.read();
        let durable = inner.durable.as_ref().ok_or(Error::NotInitialized)?;
        if constant_time_eq(&keys::digest(token.as_bytes()), &durable.root_token_hash) {
            Ok(())
        } else {
            Err(Error::PermissionDenied)
        }
    }

    // ── Mounts and secrets ───────────────────────────────────────────────────

    pub fn list_secret_mounts(&self) -> Result<Vec<MountInfo>> {
        self.require_unsealed()?;
        Ok(self.mounts.read().list_secret_mounts())
    }

    pub fn list_all_mounts(&self) -> Result<Vec<MountInfo>> {
        self.require_unsealed()?;
        Ok(self.mounts.read().list_all())
    }

    pub fn mount(&self, path: &str, kind: &str) -> Result<MountInfo> {
        self.require_unsealed()?;
        self.mounts.write().mount(path, kind)
    }

    pub fn resolve_secret_mount(&self, path: &str) -> Result<Resolved> {
        self.require_unsealed()?;
        self.mounts.read().resolve(path)
    }

    pub fn read_secret(&self, path: &str) -> Result<Map<String, Value>> {
        let (backend, rest) = self.dispatch(path)?;
        backend
            .read(&rest)?
            .ok_or_else(|| Error::NotFound(path.trim_matches('/').to_owned()))
    }

    pub fn write_secret(&self, path: &str, data: Map<String, Value>) -> Result<()> {
        let (backend, rest) = self.dispatch(path)?;
        backend.write(&rest, data)
    }

    pub fn delete_secret(&self, path: &str) -> Result<()> {
        let (backend, rest) = self.dispatch(path)?;
        backend.delete(&rest)
    }

    pub fn list_secrets(&self, path: &str) -> Result<Vec<String>> {
        let (backend, rest) = self.dispatch(path)?;
        backend.list(&rest)
    }

    fn dispatch(
        &self,
        path: &str,
    ) -> Result<(std::sync::Arc<dyn crate::backend::SecretBackend>, String)> {
        match self.resolve_secret_mount(path)? {
            Resolved::Backend {
                backend, remainder, ..
            } => Ok((backend, remainder)),
            Resolved::Reserved { mount, .. } => Err(Error::NotFound(format!(
                "{}: reserved namespace",
                mount.path()
            ))),
        }
    }
}

fn check_durable(d: &DurableServerState) -> Result<()> {
    if d.secret_threshold == 0 || d.secret_threshold > d.secret_shares {
        return Err(Error::InternalInvariantViolation(format!(
            "stored threshold {} of {} shares is out of range",
            d.secret_threshold, d.secret_shares
        )));
    }
    Ok(())
}

fn seal_status_of(inner: &Inner) -> Result<SealStatus> {
    let durable = inner.durable.as_ref().ok_or(Error::NotInitialized)?;
    Ok(SealStatus {
        kind: "shamir".into(),
        initialized: true,
        sealed: !inner.state.is_unsealed(),
        t: durable.secret_threshold,
        n: durable.secret_shares,
        progress: inner.state.unseal_keys.len(),
        nonce: inner.state.unseal_nonce.clone().unwrap_or_default(),
        version: VERSION.to_owned(),
        cluster_name: durable.cluster_name.clone(),
        cluster_id: durable.cluster_id.clone(),
    })
}

fn unsealed(inner: &Inner) -> Result<&DurableServerState> {
    let durable = inner.durable.as_ref().ok_or(Error::NotInitialized)?;
    if !inner.state.is_unsealed() {
        return Err(Error::Sealed);
    }
    Ok(durable)
}

/// Decode an unseal key from hex, falling back to standard base64.
fn decode_key(key: &str) -> Result<Vec<u8>> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::malformed("missing unseal key"));
    }
    if let Ok(bytes) = hex::decode(key) {
        return Ok(bytes);
    }
    base64::engine::general_purpose::STANDARD
        .decode(key)
        .map_err(|_| Error::malformed("unseal key is neither hex nor base64"))
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests;
