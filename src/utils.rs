use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use tokio::fs;

/// Creates the directory a file will be written into, if it has one and it
/// is missing. Safe to call repeatedly.
pub async fn ensure_parent_dir(file: &Path) -> Result<()> {
    let Some(dir) = file.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    info!("Created directory {:?}", dir);
    Ok(())
}
