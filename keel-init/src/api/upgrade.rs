//! Upgrade artifact staging.

use std::path::{Path, PathBuf};

use log::info;

use crate::error::UpgradeError;

/// Downloads the artifact at `url` into `staging_dir` and returns the
/// staged path. The caller triggers the reboot once this succeeds.
pub async fn fetch(url: &str, staging_dir: &Path) -> Result<PathBuf, UpgradeError> {
    tokio::fs::create_dir_all(staging_dir)
        .await
        .map_err(|source| UpgradeError::Stage {
            path: staging_dir.to_path_buf(),
            source,
        })?;

    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| UpgradeError::Fetch {
            url: url.to_string(),
            source,
        })?;

    let name = url
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("artifact");
    let path = staging_dir.join(name);

    let body = response.bytes().await.map_err(|source| UpgradeError::Fetch {
        url: url.to_string(),
        source,
    })?;

    tokio::fs::write(&path, &body)
        .await
        .map_err(|source| UpgradeError::Stage {
            path: path.clone(),
            source,
        })?;

    info!("staged upgrade artifact at {}", path.display());
    Ok(path)
}
