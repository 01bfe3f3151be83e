use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use super::*;
use crate::storage::{MemoryStorage, StateStore};

fn core() -> Core {
    Core::new(Physical::in_memory(), Some("test-cluster".into())).unwrap()
}

/// Flip one bit in the last byte of a hex-encoded share.
fn tamper(share_hex: &str) -> String {
    let mut bytes = hex::decode(share_hex).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    hex::encode(bytes)
}

#[test]
fn end_to_end_five_of_three() {
    let core = core();
    assert_eq!(core.phase(), Phase::Uninitialized);

    let init = core.initialize(5, 3).unwrap();
    assert_eq!(init.keys.len(), 5);
    assert_eq!(init.keys_base64.len(), 5);
    assert!(init.root_token.starts_with("kasa_root_"));

    let status = core.seal_status().unwrap();
    assert!(status.sealed);
    assert_eq!((status.n, status.t, status.progress), (5, 3, 0));
    assert!(status.nonce.is_empty());
    assert!(core.health().initialized);

    let s = core.unseal(&init.keys[0], false).unwrap();
    assert_eq!((s.progress, s.sealed), (1, true));
    let nonce = s.nonce.clone();
    assert!(!nonce.is_empty());

    let s = core.unseal(&init.keys[3], false).unwrap();
    assert_eq!((s.progress, s.sealed), (2, true));
    assert_eq!(s.nonce, nonce);
    assert_eq!(core.phase(), Phase::Unsealing { progress: 2 });

    let s = core.unseal(&init.keys[4], false).unwrap();
    assert!(!s.sealed);
    assert_eq!(s.progress, 0);
    assert!(s.nonce.is_empty());
    assert_eq!(core.phase(), Phase::Unsealed);

    let keys = core.key_status().unwrap();
    assert_eq!(keys.term, 1);
    assert!(keys.install_time > 0);
    assert!(!core.leader_status().unwrap().ha_enabled);
}

#[test]
fn second_initialize_is_rejected_and_changes_nothing() {
    let physical = Physical::in_memory();
    let state = physical.state.clone();
    let core = Core::new(physical, None).unwrap();

    core.initialize(3, 2).unwrap();
    let before = state.load().unwrap().unwrap();
    assert!(before.cluster_name.starts_with("kasa-cluster-"));

    assert!(matches!(
        core.initialize(5, 3),
        Err(Error::AlreadyInitialized)
    ));
    assert_eq!(state.load().unwrap().unwrap(), before);
    let status = core.seal_status().unwrap();
    assert_eq!((status.n, status.t), (3, 2));
}

#[test]
fn initialize_validates_parameters() {
    let core = core();
    for (n, t) in [(0, 0), (3, 0), (3, 4), (256, 2)] {
        assert!(
            matches!(core.initialize(n, t), Err(Error::MalformedInput(_))),
            "n={n} t={t}"
        );
    }
    assert!(!core.is_initialized());
    core.initialize(1, 1).unwrap();
}

#[test]
fn durable_state_never_holds_cleartext() {
    let physical = Physical::in_memory();
    let state = physical.state.clone();
    let core = Core::new(physical, None).unwrap();
    let init = core.initialize(3, 2).unwrap();

    let d = state.load().unwrap().unwrap();
    assert_eq!(d.root_key_term, 1);
    assert_eq!(d.root_key_hash.len(), 32);
    assert_eq!(d.root_token_hash, keys::digest(init.root_token.as_bytes()));
    let json = serde_json::to_string(&d).unwrap();
    assert!(!json.contains(&init.root_token));
    for k in &init.keys {
        assert!(!json.contains(k.as_str()));
    }
}

#[test]
fn progress_counts_one_per_share_and_resets_after_success() {
    let core = core();
    let init = core.initialize(4, 4).unwrap();
    for (i, key) in init.keys.iter().enumerate().take(3) {
        assert_eq!(core.unseal(key, false).unwrap().progress, i + 1);
    }
    let s = core.unseal(&init.keys[3], false).unwrap();
    assert_eq!(s.progress, 0);
    assert!(!s.sealed);
}

#[test]
fn reset_clears_progress_and_stays_sealed() {
    let core = core();
    let init = core.initialize(5, 3).unwrap();
    core.unseal(&init.keys[0], false).unwrap();
    core.unseal(&init.keys[1], false).unwrap();

    let s = core.unseal("", true).unwrap();
    assert_eq!(s.progress, 0);
    assert!(s.sealed);
    assert!(s.nonce.is_empty());
    assert_eq!(core.phase(), Phase::Sealed);

    // Idempotent.
    assert_eq!(core.unseal("", true).unwrap().progress, 0);

    // A fresh attempt needs the full threshold again.
    core.unseal(&init.keys[2], false).unwrap();
    core.unseal(&init.keys[3], false).unwrap();
    assert!(!core.unseal(&init.keys[4], false).unwrap().sealed);
}

#[test]
fn tampered_share_fails_verification() {
    let core = core();
    let init = core.initialize(5, 3).unwrap();
    core.unseal(&init.keys[0], false).unwrap();
    core.unseal(&tamper(&init.keys[1]), false).unwrap();

    assert!(matches!(
        core.unseal(&init.keys[2], false),
        Err(Error::VerificationFailed)
    ));
    let s = core.seal_status().unwrap();
    assert!(s.sealed);
    assert_eq!(s.progress, 0);
    assert!(s.nonce.is_empty());
    assert!(matches!(core.key_status(), Err(Error::Sealed)));

    // The next attempt starts from zero and succeeds with genuine shares.
    core.unseal(&init.keys[0], false).unwrap();
    core.unseal(&init.keys[1], false).unwrap();
    assert!(!core.unseal(&init.keys[2], false).unwrap().sealed);
}

/// Overwrite the index byte of a hex-encoded share.
fn with_index(share_hex: &str, x: u8) -> String {
    let mut bytes = hex::decode(share_hex).unwrap();
    bytes[0] = x;
    hex::encode(bytes)
}

#[test]
fn tampered_index_byte_fails_verification() {
    let core = core();
    let init = core.initialize(5, 3).unwrap();

    core.unseal(&init.keys[0], false).unwrap();
    core.unseal(&with_index(&init.keys[1], 0), false).unwrap();
    assert!(matches!(
        core.unseal(&init.keys[2], false),
        Err(Error::VerificationFailed)
    ));
    let s = core.seal_status().unwrap();
    assert!(s.sealed);
    assert_eq!(s.progress, 0);

    // Index of a share already submitted in this attempt.
    let first_x = hex::decode(&init.keys[0]).unwrap()[0];
    core.unseal(&init.keys[0], false).unwrap();
    core.unseal(&with_index(&init.keys[1], first_x), false).unwrap();
    assert!(matches!(
        core.unseal(&init.keys[2], false),
        Err(Error::VerificationFailed)
    ));
    assert_eq!(core.seal_status().unwrap().progress, 0);

    core.unseal(&init.keys[0], false).unwrap();
    core.unseal(&init.keys[1], false).unwrap();
    assert!(!core.unseal(&init.keys[2], false).unwrap().sealed);
}

#[test]
fn malformed_key_is_not_counted() {
    let core = core();
    let init = core.initialize(3, 2).unwrap();
    core.unseal(&init.keys[0], false).unwrap();

    assert!(matches!(
        core.unseal("zz-not-a-key!", false),
        Err(Error::MalformedInput(_))
    ));
    assert!(matches!(
        core.unseal("   ", false),
        Err(Error::MalformedInput(_))
    ));
    assert_eq!(core.seal_status().unwrap().progress, 1);
}

#[test]
fn mismatched_share_shape_ends_attempt() {
    let core = core();
    let init = core.initialize(3, 2).unwrap();
    core.unseal(&init.keys[0], false).unwrap();
    assert!(matches!(
        core.unseal("abcd", false),
        Err(Error::MalformedInput(_))
    ));
    assert_eq!(core.seal_status().unwrap().progress, 0);
}

#[test]
fn duplicate_share_is_ignored() {
    let core = core();
    let init = core.initialize(3, 2).unwrap();
    assert_eq!(core.unseal(&init.keys[1], false).unwrap().progress, 1);
    assert_eq!(core.unseal(&init.keys[1], false).unwrap().progress, 1);
    assert!(!core.unseal(&init.keys[2], false).unwrap().sealed);
}

#[test]
fn base64_shares_unseal() {
    let core = core();
    let init = core.initialize(3, 2).unwrap();
    core.unseal(&init.keys_base64[0], false).unwrap();
    assert!(!core.unseal(&init.keys_base64[2], false).unwrap().sealed);
}

#[test]
fn unseal_when_unsealed_is_a_no_op() {
    let core = core();
    let init = core.initialize(1, 1).unwrap();
    assert!(!core.unseal(&init.keys[0], false).unwrap().sealed);
    let s = core.unseal("not even hex", false).unwrap();
    assert!(!s.sealed);
    assert_eq!(s.progress, 0);
}

#[test]
fn projections_report_unavailable() {
    let core = core();
    assert!(matches!(core.seal_status(), Err(Error::NotInitialized)));
    assert!(matches!(core.key_status(), Err(Error::NotInitialized)));
    assert!(matches!(core.leader_status(), Err(Error::NotInitialized)));
    assert!(matches!(core.unseal("00", false), Err(Error::NotInitialized)));
    assert!(matches!(core.seal(), Err(Error::NotInitialized)));

    let health = core.health();
    assert!(!health.initialized);
    assert!(health.sealed);
    assert!(!health.standby);
    assert!(health.cluster_id.is_none());

    core.initialize(2, 2).unwrap();
    assert!(core.seal_status().is_ok());
    assert!(matches!(core.key_status(), Err(Error::Sealed)));
    assert!(matches!(core.leader_status(), Err(Error::Sealed)));
}

#[test]
fn seal_drops_root_key() {
    let core = core();
    let init = core.initialize(3, 2).unwrap();
    core.unseal(&init.keys[0], false).unwrap();
    core.unseal(&init.keys[1], false).unwrap();
    assert_eq!(core.phase(), Phase::Unsealed);

    core.seal().unwrap();
    assert_eq!(core.phase(), Phase::Sealed);
    assert!(matches!(core.key_status(), Err(Error::Sealed)));
    core.seal().unwrap();
}

#[test]
fn root_token_verification() {
    let core = core();
    assert!(matches!(
        core.verify_root_token("x"),
        Err(Error::NotInitialized)
    ));
    let init = core.initialize(1, 1).unwrap();
    core.verify_root_token(&init.root_token).unwrap();
    assert!(matches!(
        core.verify_root_token("kasa_root_00000000000000000000000000000000"),
        Err(Error::PermissionDenied)
    ));
}

struct FailingState;

impl StateStore for FailingState {
    fn load(&self) -> Result<Option<DurableServerState>> {
        Ok(None)
    }

    fn save(&self, _: &DurableServerState) -> Result<()> {
        Err(anyhow::anyhow!("disk full").into())
    }

    fn discard(&self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn failed_persistence_rolls_back_initialize() {
    let physical = Physical {
        storage: Arc::new(MemoryStorage::new()),
        state: Arc::new(FailingState),
        root: None,
    };
    let core = Core::new(physical, None).unwrap();

    assert!(matches!(
        core.initialize(3, 2),
        Err(Error::StorageFailure(_))
    ));
    assert!(!core.is_initialized());
    assert_eq!(core.phase(), Phase::Uninitialized);
    assert!(matches!(core.seal_status(), Err(Error::NotInitialized)));
}

#[test]
fn restart_comes_back_sealed() {
    let dir = tempdir().unwrap();
    let init = {
        let core = Core::new(Physical::open_file(dir.path().to_path_buf()).unwrap(), None).unwrap();
        let init = core.initialize(3, 2).unwrap();
        core.unseal(&init.keys[0], false).unwrap();
        core.unseal(&init.keys[1], false).unwrap();
        core.write_secret("secret/app/db", json!({"password": "hunter2"}).as_object().cloned().unwrap())
            .unwrap();
        init
    };
    assert!(dir.path().join("kasa.json").exists());

    let core = Core::new(Physical::open_file(dir.path().to_path_buf()).unwrap(), None).unwrap();
    assert_eq!(core.phase(), Phase::Sealed);
    assert!(matches!(core.read_secret("secret/app/db"), Err(Error::Sealed)));

    core.unseal(&init.keys[2], false).unwrap();
    core.unseal(&init.keys[1], false).unwrap();
    assert_eq!(
        core.read_secret("secret/app/db").unwrap()["password"],
        json!("hunter2")
    );
}

#[test]
fn default_mount_data_survives_restart() {
    let dir = tempdir().unwrap();
    let key = {
        let core = Core::new(Physical::open_file(dir.path().to_path_buf()).unwrap(), None).unwrap();
        let init = core.initialize(1, 1).unwrap();
        core.unseal(&init.keys[0], false).unwrap();
        core.write_secret("secret/x", json!({"v": 1}).as_object().cloned().unwrap())
            .unwrap();
        init.keys[0].clone()
    };

    let core = Core::new(Physical::open_file(dir.path().to_path_buf()).unwrap(), None).unwrap();
    core.unseal(&key, false).unwrap();
    assert_eq!(core.read_secret("secret/x").unwrap()["v"], json!(1));
    assert_eq!(core.list_secrets("secret/").unwrap(), vec!["x"]);
}

#[test]
fn secret_operations_route_through_mounts() {
    let core = core();
    let init = core.initialize(1, 1).unwrap();
    assert!(matches!(core.list_secret_mounts(), Err(Error::Sealed)));
    core.unseal(&init.keys[0], false).unwrap();

    core.mount("team", "kv").unwrap();
    let paths: Vec<String> = core
        .list_secret_mounts()
        .unwrap()
        .into_iter()
        .map(|m| m.path)
        .collect();
    assert_eq!(paths, vec!["secret/", "team/"]);
    assert_eq!(core.list_all_mounts().unwrap().len(), 4);

    core.write_secret("team/ci/token", json!({"v": "abc"}).as_object().cloned().unwrap())
        .unwrap();
    assert_eq!(core.list_secrets("team/").unwrap(), vec!["ci/"]);
    assert_eq!(core.list_secrets("team/ci").unwrap(), vec!["token"]);
    assert_eq!(core.read_secret("team/ci/token").unwrap()["v"], json!("abc"));

    core.delete_secret("team/ci/token").unwrap();
    assert!(matches!(
        core.read_secret("team/ci/token"),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(core.read_secret("nomount/x"), Err(Error::NotFound(_))));
    assert!(matches!(core.read_secret("sys/health"), Err(Error::NotFound(_))));
    assert!(matches!(
        core.read_secret("cubbyhole/mine"),
        Err(Error::NotFound(_))
    ));
}
