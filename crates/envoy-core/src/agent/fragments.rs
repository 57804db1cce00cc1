//! Configuration fragment files under `config.d`

use super::{CONFIG_FILE_PERMS, DIR_PERMS};
use crate::types::{ConfigurationOp, ConfigurationOpType};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Whether `path` exists, following symlinks
pub(crate) async fn path_exists(path: &Path) -> bool {
    match fs::metadata(path).await {
        Ok(_) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unable to stat path");
            false
        }
    }
}

pub(crate) async fn create_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_PERMS);
    builder.create(path).await
}

/// Write a config file readable only by the envoy's user
pub(crate) async fn write_config_file(path: &Path, content: &str) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(CONFIG_FILE_PERMS);

    let mut file = options.open(path).await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

/// Whether `name` can be used as a single path component
pub(crate) fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// File a fragment id is stored in, or `None` if the id is not a plain file name
pub(crate) fn fragment_path(configs_path: &Path, id: &str, extension: &str) -> Option<PathBuf> {
    is_plain_name(id).then(|| configs_path.join(format!("{}.{}", id, extension)))
}

/// Apply operations in order, returning how many succeeded
pub(crate) async fn apply_operations(
    configs_path: &Path,
    extension: &str,
    operations: &[ConfigurationOp],
) -> usize {
    let mut applied = 0;

    for op in operations {
        debug!(id = %op.id, op_type = ?op.op_type, "processing config operation");

        let Some(path) = fragment_path(configs_path, &op.id, extension) else {
            warn!(id = %op.id, "ignoring config operation with invalid id");
            continue;
        };

        let result = match op.op_type {
            ConfigurationOpType::Create | ConfigurationOpType::Modify => {
                write_config_file(&path, &op.content).await
            }
            ConfigurationOpType::Remove => match fs::remove_file(&path).await {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };

        match result {
            Ok(()) => applied += 1,
            Err(e) => {
                warn!(id = %op.id, path = %path.display(), error = %e, "failed to process config operation")
            }
        }
    }

    applied
}

/// Number of fragment files with `extension` in `configs_path`
pub(crate) fn count_fragments(configs_path: &Path, extension: &str) -> usize {
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&configs_path.to_string_lossy()),
        extension
    );

    match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|entry| entry.ok()).filter(|p| p.is_file()).count(),
        Err(e) => {
            warn!(path = %configs_path.display(), error = %e, "unable to list config files");
            0
        }
    }
}
