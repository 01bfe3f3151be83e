use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::keys::RootKey;

/// The persisted server record. Written once by initialization.
///
/// Every field defaults so that an older or partial file still loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableServerState {
    pub secret_shares: u8,
    pub secret_threshold: u8,
    /// Generation counter of the root key; 1 after initialization.
    pub root_key_term: u64,
    /// Unix timestamp (seconds) when the root key was installed.
    pub root_key_install_time: i64,
    /// Combined split representation of the root key (see `shamir::split`).
    #[serde(with = "hex::serde")]
    pub root_key_encrypted: Vec<u8>,
    /// SHA-256 of the cleartext root key.
    #[serde(with = "hex::serde")]
    pub root_key_hash: Vec<u8>,
    /// SHA-256 of the root token.
    #[serde(with = "hex::serde")]
    pub root_token_hash: Vec<u8>,
    pub cluster_name: String,
    pub cluster_id: String,
}

/// Process-local state. Lost on restart, which leaves the server sealed.
#[derive(Default)]
pub struct ServerState {
    /// Present only while unsealed.
    pub root_key: Option<RootKey>,
    /// Identifies the unseal attempt in progress.
    pub unseal_nonce: Option<String>,
    /// Shares submitted in the current attempt, in order.
    pub unseal_keys: Vec<Zeroizing<Vec<u8>>>,
    pub storage_root: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
}

impl ServerState {
    /// Abandon the unseal attempt in progress, if any.
    pub fn reset_attempt(&mut self) {
        self.unseal_nonce = None;
        self.unseal_keys.clear();
    }

    pub fn is_unsealed(&self) -> bool {
        self.root_key.is_some()
    }
}
