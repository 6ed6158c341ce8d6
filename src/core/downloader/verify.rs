use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};

/// Verification hook run by the pipeline after extraction.
///
/// `Ok(false)` is a verification failure (terminal, archive kept);
/// `Err` is reserved for the check itself being unable to run.
#[async_trait]
pub trait ArtifactVerifier: Send + Sync {
    async fn verify(&self, install_dir: &Path) -> LauncherResult<bool>;
}

#[async_trait]
impl<F> ArtifactVerifier for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    async fn verify(&self, install_dir: &Path) -> LauncherResult<bool> {
        Ok(self(install_dir))
    }
}

/// Passes when the launch executable exists inside the install.
pub struct EntryPointVerifier {
    relative: PathBuf,
}

impl EntryPointVerifier {
    pub fn new(relative: impl Into<PathBuf>) -> Self {
        Self {
            relative: relative.into(),
        }
    }
}

#[async_trait]
impl ArtifactVerifier for EntryPointVerifier {
    async fn verify(&self, install_dir: &Path) -> LauncherResult<bool> {
        let entry_point = install_dir.join(&self.relative);
        let present = tokio::fs::metadata(&entry_point)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !present {
            warn!("Entry point {:?} missing after extraction", entry_point);
        }
        Ok(present)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
    Md5,
}

/// Compares the digest of one file inside the install with a known value.
pub struct ChecksumVerifier {
    relative: PathBuf,
    algorithm: ChecksumAlgorithm,
    expected: String,
}

impl ChecksumVerifier {
    pub fn new(relative: impl Into<PathBuf>, algorithm: ChecksumAlgorithm, expected: &str) -> Self {
        Self {
            relative: relative.into(),
            algorithm,
            expected: expected.trim().to_ascii_lowercase(),
        }
    }
}

#[async_trait]
impl ArtifactVerifier for ChecksumVerifier {
    async fn verify(&self, install_dir: &Path) -> LauncherResult<bool> {
        let path = install_dir.join(&self.relative);
        if !path.is_file() {
            warn!("Checksum target {:?} missing", path);
            return Ok(false);
        }

        let algorithm = self.algorithm;
        let target = path.clone();
        let actual = tokio::task::spawn_blocking(move || hash_file(&target, algorithm))
            .await
            .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))??;

        debug!("{:?} digest of {:?}: {}", algorithm, path, actual);
        Ok(actual == self.expected)
    }
}

pub fn hash_file(path: &Path, algorithm: ChecksumAlgorithm) -> LauncherResult<String> {
    match algorithm {
        ChecksumAlgorithm::Sha1 => digest_file::<Sha1>(path),
        ChecksumAlgorithm::Sha256 => digest_file::<Sha256>(path),
        ChecksumAlgorithm::Md5 => digest_file::<Md5>(path),
    }
}

fn digest_file<D: Digest>(path: &Path) -> LauncherResult<String> {
    let mut file = std::fs::File::open(path).map_err(|e| LauncherError::io(path, e))?;
    let mut hasher = D::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|e| LauncherError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
