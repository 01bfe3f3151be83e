use serde::{Deserialize, Serialize};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where the server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Sealed,
    Unsealing { progress: usize },
    Unsealed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub initialized: bool,
    pub sealed: bool,
    pub standby: bool,
    pub server_time_utc: i64,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealStatus {
    #[serde(rename = "type")]
    pub kind: String,
    pub initialized: bool,
    pub sealed: bool,
    /// Threshold.
    pub t: u8,
    /// Configured share count.
    pub n: u8,
    /// Shares accepted so far in the current attempt.
    pub progress: usize,
    /// Current attempt, empty when none is in progress.
    pub nonce: String,
    pub version: String,
    pub cluster_name: String,
    pub cluster_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStatus {
    pub term: u64,
    pub install_time: i64,
}

/// HA is not supported; every server reports itself as an active, non-HA node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderStatus {
    pub ha_enabled: bool,
    pub is_self: bool,
    pub leader_address: String,
}

impl LeaderStatus {
    pub fn standalone() -> Self {
        Self {
            ha_enabled: false,
            is_self: true,
            leader_address: String::new(),
        }
    }
}

/// Returned exactly once by initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResponse {
    /// Hex-encoded key shares.
    pub keys: Vec<String>,
    /// The same shares, base64-encoded.
    pub keys_base64: Vec<String>,
    pub root_token: String,
}
