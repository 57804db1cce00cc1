//! Agent installation
//!
//! An [`Installer`] materializes an agent version directory from a download.
//! [`update_current_link`] then makes it the active version.

mod tarball;

pub use tarball::{extract_executable, verify_checksum, TarballInstaller};

use crate::agent::CURRENT_VERSION_LINK;
use crate::error::{InstallError, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// Fetches an agent archive and extracts its executable
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Installer: Send + Sync {
    /// Download `url`, verify `checksum` and extract `exe` under `output_path`.
    ///
    /// An empty checksum skips verification.
    async fn download_and_extract(
        &self,
        output_path: &Path,
        url: &str,
        checksum: &str,
        exe: &str,
    ) -> Result<()>;
}

/// Point `CURRENT` under `agent_base_path` at `version`.
///
/// The link is built under a temporary name and renamed over the old one, so
/// readers see either the old or the new target.
pub async fn update_current_link(agent_base_path: &Path, version: &str) -> Result<()> {
    let link_path = agent_base_path.join(CURRENT_VERSION_LINK);
    let tmp_path = agent_base_path.join(format!(
        ".{}.{}",
        CURRENT_VERSION_LINK,
        uuid::Uuid::new_v4().simple()
    ));
    let symlink_err = |e: std::io::Error| InstallError::Symlink {
        path: link_path.display().to_string(),
        reason: e.to_string(),
    };

    tokio::fs::symlink(version, &tmp_path)
        .await
        .map_err(symlink_err)?;

    if let Err(e) = tokio::fs::rename(&tmp_path, &link_path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(symlink_err(e).into());
    }

    debug!(path = %link_path.display(), version, "updated current version link");
    Ok(())
}
