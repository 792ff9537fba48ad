use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;
use tokio::fs;

/// Creates `path` and any missing parents. Succeeds if it already exists.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory at {:?}", path))?;
    debug!("Created directory at: {:?}", path);
    Ok(())
}

/// Writes `value` as pretty JSON to `dir/file_name`, going through a temporary
/// file so a crash never leaves a truncated config behind.
pub async fn write_json_file<T: Serialize>(dir: &Path, file_name: &str, value: &T) -> Result<()> {
    ensure_directory_exists(dir).await?;
    let json = serde_json::to_string_pretty(value).context("Failed to serialize config to JSON")?;

    let target = dir.join(file_name);
    let staging = dir.join(format!(".{}.tmp", file_name));
    fs::write(&staging, json)
        .await
        .with_context(|| format!("Failed to write {:?}", staging))?;
    fs::rename(&staging, &target)
        .await
        .with_context(|| format!("Failed to move config into place at {:?}", target))?;
    Ok(())
}
