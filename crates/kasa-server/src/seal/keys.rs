use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::ZeroizeOnDrop;

/// Length of the root key in bytes (256 bits).
pub const ROOT_KEY_LEN: usize = 32;

/// Cleartext root key. Only ever held in memory; zeroed on drop.
#[derive(ZeroizeOnDrop)]
pub struct RootKey([u8; ROOT_KEY_LEN]);

impl RootKey {
    pub fn generate() -> Self {
        let mut key = [0u8; ROOT_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let key: [u8; ROOT_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; ROOT_KEY_LEN] {
        &self.0
    }
}

/// Generate a root token in the format `kasa_root_<32 hex chars>` (128 bits).
pub fn generate_root_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("kasa_root_{}", hex::encode(bytes))
}

/// Default cluster name: `kasa-cluster-<8 hex chars>`.
pub fn generate_cluster_name() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("kasa-cluster-{}", hex::encode(bytes))
}

/// SHA-256 digest used for the stored root key and root token hashes.
pub fn digest(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}
