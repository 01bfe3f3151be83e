//! Threshold secret sharing of the root key.
//!
//! A secret is split with Shamir's scheme over GF(256): each byte gets its own
//! random polynomial of degree `threshold - 1`, and share `x` holds the
//! evaluations at `x`. Any `threshold` shares interpolate back to the secret;
//! fewer reveal nothing about it.
//!
//! Shares are opaque byte blobs laid out as `[x, y_0, .., y_{len-1}]`, so they
//! can be combined without any outside index bookkeeping. [`split`] also
//! returns a small combined representation (threshold, share count and secret
//! length) that [`combine`] uses to validate share shape before interpolating.

use serde::{Deserialize, Serialize};
use sharks::{Share, Sharks};
use thiserror::Error;
use zeroize::Zeroizing;

/// Marker byte for the v1 combined representation.
const SPLIT_V1_MARKER: u8 = 0x01;

#[derive(Debug, Error, PartialEq)]
pub enum SharingError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("malformed share: {0}")]
    Malformed(String),

    /// Shares of the right shape that cannot belong to one split.
    #[error("inconsistent shares: {0}")]
    Inconsistent(String),
}

impl From<SharingError> for crate::Error {
    fn from(e: SharingError) -> Self {
        match e {
            SharingError::Inconsistent(_) => crate::Error::VerificationFailed,
            other => crate::Error::MalformedInput(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct SplitHeader {
    threshold: u8,
    shares: u8,
    secret_len: u32,
}

/// Split `secret` into `n` shares, any `t` of which recover it.
/// Returns `(combined, shares)`.
pub fn split(secret: &[u8], n: u8, t: u8) -> Result<(Vec<u8>, Vec<Vec<u8>>), SharingError> {
    if secret.is_empty() {
        return Err(SharingError::InvalidParameters("secret is empty".into()));
    }
    if t == 0 || t > n {
        return Err(SharingError::InvalidParameters(format!(
            "threshold must be between 1 and {n}, got {t}"
        )));
    }

    let shares: Vec<Vec<u8>> = Sharks(t)
        .dealer(secret)
        .take(n as usize)
        .map(|s| Vec::from(&s))
        .collect();

    let header = SplitHeader {
        threshold: t,
        shares: n,
        secret_len: secret.len() as u32,
    };
    Ok((encode_header(&header)?, shares))
}

/// Recover the secret from exactly `threshold` shares.
///
/// A share that is well formed but wrong yields a different secret rather than
/// an error; callers verify the result against a stored digest.
pub fn combine<S: AsRef<[u8]>>(
    shares: &[S],
    combined: &[u8],
) -> Result<Zeroizing<Vec<u8>>, SharingError> {
    let header = decode_header(combined)?;

    if shares.len() != header.threshold as usize {
        return Err(SharingError::InvalidParameters(format!(
            "expected {} shares, got {}",
            header.threshold,
            shares.len()
        )));
    }

    let mut seen = [false; 256];
    let mut parts = Vec::with_capacity(shares.len());
    for raw in shares {
        let raw = raw.as_ref();
        if raw.len() != header.secret_len as usize + 1 {
            return Err(SharingError::Malformed(format!(
                "expected {} bytes, got {}",
                header.secret_len + 1,
                raw.len()
            )));
        }
        let x = raw[0];
        if x == 0 {
            return Err(SharingError::Inconsistent("share index is zero".into()));
        }
        if seen[x as usize] {
            return Err(SharingError::Inconsistent(format!(
                "duplicate share index {x}"
            )));
        }
        seen[x as usize] = true;

        let share = Share::try_from(raw)
            .map_err(|e| SharingError::Malformed(e.to_string()))?;
        parts.push(share);
    }

    let secret = Sharks(header.threshold)
        .recover(parts.as_slice())
        .map_err(|e| SharingError::Malformed(e.to_string()))?;
    Ok(Zeroizing::new(secret))
}

fn encode_header(header: &SplitHeader) -> Result<Vec<u8>, SharingError> {
    let payload = bincode::serde::encode_to_vec(header, bincode::config::standard())
        .map_err(|e| SharingError::InvalidParameters(format!("encode split header: {e}")))?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(SPLIT_V1_MARKER);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode_header(bytes: &[u8]) -> Result<SplitHeader, SharingError> {
    match bytes.split_first() {
        Some((&SPLIT_V1_MARKER, payload)) => {
            let (header, _): (SplitHeader, usize) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())
                    .map_err(|e| SharingError::Malformed(format!("split header: {e}")))?;
            if header.threshold == 0 || header.threshold > header.shares || header.secret_len == 0
            {
                return Err(SharingError::Malformed("split header out of range".into()));
            }
            Ok(header)
        }
        _ => Err(SharingError::Malformed("unknown split header format".into())),
    }
}
