use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use uuid::Uuid;

pub async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory {}", path.display()))
}

pub fn job_file_path(jobs_root: &Path, job_id: &str) -> PathBuf {
    jobs_root.join(format!("{job_id}.json"))
}

/// Writes `bytes` to a sibling temp file and renames it over `path`, so
/// readers never observe a half-written snapshot.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    fs::write(&tmp_path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;

    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err).with_context(|| format!("Failed to replace {}", path.display()));
    }
    Ok(())
}

pub async fn delete_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to delete {}", path.display())),
    }
}
