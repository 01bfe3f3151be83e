use std::collections::BTreeMap;

use crate::{Error, Result};

/// Canonical form of a mount or request path: no leading or trailing `/`,
/// no empty, `.` or `..` segments.
pub fn normalize(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::malformed(format!("invalid path '{path}'")));
        }
    }
    Ok(trimmed.to_owned())
}

/// Mount paths mapped to handles, resolved by longest `/`-segment prefix.
#[derive(Debug, Clone)]
pub struct MountTable<H> {
    entries: BTreeMap<String, H>,
}

impl<H> Default for MountTable<H> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<H> MountTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handle at `path`.
    pub fn set(&mut self, path: &str, handle: H) -> Result<()> {
        let path = normalize(path)?;
        if path.is_empty() {
            return Err(Error::malformed("mount path must not be empty"));
        }
        self.entries.insert(path, handle);
        Ok(())
    }

    /// Drop the handle registered at exactly `path`.
    pub fn remove(&mut self, path: &str) -> Option<H> {
        normalize(path).ok().and_then(|p| self.entries.remove(&p))
    }

    /// Exact match only.
    pub fn exists(&self, path: &str) -> bool {
        normalize(path).is_ok_and(|p| self.entries.contains_key(&p))
    }

    pub fn get(&self, path: &str) -> Option<&H> {
        normalize(path).ok().and_then(|p| self.entries.get(&p))
    }

    /// Registered paths in lexical order.
    pub fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &H)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the mount owning `full_path` and the path left below it.
    ///
    /// Segments are peeled off the end one at a time until the remaining
    /// prefix is a registered mount. The remainder keeps a trailing `/` when
    /// non-empty: `secret/app/db` against a mount at `secret` yields
    /// `("app/db/")`. Returns `None` when no mount owns the path.
    pub fn resolve(&self, full_path: &str) -> Option<(&str, &H, String)> {
        let mut candidate = normalize(full_path).ok()?;
        let mut remainder = String::new();

        loop {
            if let Some((path, handle)) = self.entries.get_key_value(&candidate) {
                return Some((path.as_str(), handle, remainder));
            }
            let idx = match candidate.rfind('/') {
                Some(0) | None => return None,
                Some(i) => i,
            };
            remainder = format!("{}/{}", &candidate[idx + 1..], remainder);
            candidate.truncate(idx);
        }
    }
}
