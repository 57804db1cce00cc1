//! Installer for gzip tarball agent distributions

use super::Installer;
use crate::agent::BIN_SUBPATH;
use crate::error::{Error, InstallError, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256, Sha512};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Downloads `.tar.gz` archives over http(s), or reads them from `file://` URLs
#[derive(Debug, Clone, Default)]
pub struct TarballInstaller {
    client: reqwest::Client,
}

impl TarballInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let download_err = |reason: String| InstallError::Download {
            url: url.to_string(),
            reason,
        };

        if let Some(path) = url.strip_prefix("file://") {
            return tokio::fs::read(path)
                .await
                .map_err(|e| download_err(e.to_string()).into());
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_err(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| download_err(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Installer for TarballInstaller {
    async fn download_and_extract(
        &self,
        output_path: &Path,
        url: &str,
        checksum: &str,
        exe: &str,
    ) -> Result<()> {
        debug!(url, "downloading agent");
        let archive = self.fetch(url).await?;
        verify_checksum(&archive, checksum)?;

        let output_path = output_path.to_path_buf();
        let exe = exe.to_string();
        let installed =
            tokio::task::spawn_blocking(move || extract_executable(&archive, &output_path, &exe))
                .await
                .map_err(|e| Error::Internal(format!("extract task failed: {}", e)))??;

        info!(path = %installed.display(), "extracted agent executable");
        Ok(())
    }
}

/// Check `data` against a hex SHA-256 or SHA-512 digest. Empty skips the check.
pub fn verify_checksum(data: &[u8], checksum: &str) -> Result<()> {
    let expected = checksum.trim().to_ascii_lowercase();
    if expected.is_empty() {
        debug!("no checksum given, skipping verification");
        return Ok(());
    }

    let actual = match expected.len() {
        64 => hex::encode(Sha256::digest(data)),
        128 => hex::encode(Sha512::digest(data)),
        _ => return Err(InstallError::UnsupportedChecksum(checksum.to_string()).into()),
    };

    if actual != expected {
        return Err(InstallError::ChecksumMismatch { expected, actual }.into());
    }
    Ok(())
}

fn normalize_entry(path: &str) -> &str {
    let mut path = path;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path
}

/// Extract the `exe` entry of a gzip tarball into `<output_path>/bin`.
///
/// Only that entry is written, keeping its mode from the archive.
pub fn extract_executable(archive: &[u8], output_path: &Path, exe: &str) -> Result<PathBuf> {
    let wanted = normalize_entry(exe);
    let file_name = Path::new(wanted)
        .file_name()
        .ok_or_else(|| InstallError::ExecutableNotFound(exe.to_string()))?;

    let bin_path = output_path.join(BIN_SUBPATH);
    fs::create_dir_all(&bin_path)?;
    let dest = bin_path.join(file_name);

    let extract_err = |e: io::Error| InstallError::Extract(e.to_string());
    let mut tar = tar::Archive::new(GzDecoder::new(archive));

    for entry in tar.entries().map_err(extract_err)? {
        let mut entry = entry.map_err(extract_err)?;
        let entry_path = entry.path().map_err(extract_err)?;
        if normalize_entry(&entry_path.to_string_lossy()) != wanted {
            continue;
        }

        let mode = entry.header().mode().unwrap_or(0o755);
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        let mut file = options.open(&dest)?;
        io::copy(&mut entry, &mut file).map_err(extract_err)?;
        return Ok(dest);
    }

    Err(InstallError::ExecutableNotFound(exe.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;

    fn tarball(entries: &[(&str, &str, u32)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, path, data.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_extracts_only_the_executable() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tarball(&[
            ("./telegraf/etc/telegraf.conf", "sample", 0o644),
            ("./telegraf/usr/bin/telegraf", "#!/bin/sh\necho hi\n", 0o755),
        ]);

        let dest = extract_executable(&archive, dir.path(), "./telegraf/usr/bin/telegraf").unwrap();
        assert_eq!(dest, dir.path().join("bin").join("telegraf"));
        assert_eq!(fs::read(&dest).unwrap(), b"#!/bin/sh\necho hi\n");

        let files: Vec<_> = walkdir::WalkDir::new(dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        assert_eq!(files, vec![dest.clone()]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_exe_path_without_dot_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tarball(&[("filebeat-6.4.1/filebeat", "bin", 0o755)]);

        let dest = extract_executable(&archive, dir.path(), "filebeat-6.4.1/filebeat").unwrap();
        assert!(dest.ends_with("bin/filebeat"));
    }

    #[test]
    fn test_missing_executable_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tarball(&[("other/file", "x", 0o644)]);

        let err = extract_executable(&archive, dir.path(), "telegraf/usr/bin/telegraf").unwrap_err();
        assert!(matches!(err, Error::Install(InstallError::ExecutableNotFound(_))));
    }

    #[test]
    fn test_corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_executable(b"not a tarball", dir.path(), "telegraf").unwrap_err();
        assert!(matches!(err, Error::Install(InstallError::Extract(_))));
    }

    #[test]
    fn test_verify_checksum() {
        let data = b"agent archive";
        let sha256 = hex::encode(Sha256::digest(data));
        let sha512 = hex::encode(Sha512::digest(data));

        verify_checksum(data, "").unwrap();
        verify_checksum(data, &sha256).unwrap();
        verify_checksum(data, &sha256.to_uppercase()).unwrap();
        verify_checksum(data, &sha512).unwrap();

        let err = verify_checksum(b"tampered", &sha256).unwrap_err();
        assert!(matches!(err, Error::Install(InstallError::ChecksumMismatch { .. })));

        let err = verify_checksum(data, "abc123").unwrap_err();
        assert!(matches!(err, Error::Install(InstallError::UnsupportedChecksum(_))));
    }

    #[tokio::test]
    async fn test_install_from_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tarball(&[("telegraf/telegraf", "bin", 0o755)]);
        let archive_path = dir.path().join("telegraf.tar.gz");
        fs::write(&archive_path, &archive).unwrap();
        let checksum = hex::encode(Sha256::digest(&archive));

        let output = dir.path().join("1.8.0");
        TarballInstaller::new()
            .download_and_extract(
                &output,
                &format!("file://{}", archive_path.display()),
                &checksum,
                "telegraf/telegraf",
            )
            .await
            .unwrap();

        assert_eq!(fs::read(output.join("bin/telegraf")).unwrap(), b"bin");
    }

    #[tokio::test]
    async fn test_install_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = TarballInstaller::new()
            .download_and_extract(dir.path(), "file:///nonexistent/agent.tar.gz", "", "agent")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Install(InstallError::Download { .. })));
    }
}
