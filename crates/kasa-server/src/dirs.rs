use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Resolve and create the storage root holding `kasa.db` and `kasa.json`.
///
/// Priority:
/// 1. `explicit` (the `--data-dir` flag or `ServerConfig::data_dir`)
/// 2. `KASA_DATA_DIR` environment variable
/// 3. Platform-specific app data dir (`~/.local/share/kasa/`, etc.)
pub fn data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let path = match explicit {
        Some(dir) => dir.to_path_buf(),
        None => match std::env::var_os("KASA_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("", "", "kasa")
                .context("could not determine platform data directory")?
                .data_dir()
                .to_owned(),
        },
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create data dir {}", path.display()))?;
    Ok(path)
}
