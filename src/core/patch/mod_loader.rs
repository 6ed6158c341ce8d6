use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::downloader::ArtifactFetcher;
use crate::core::error::{LauncherError, LauncherResult};

use super::{fetch_file, Patch, PatchId};

pub const MOD_LOADER_DLL: &str = "dinput8.dll";
pub const MODS_DIR: &str = "mods";

/// Drops the `dinput8.dll` mod loader next to the client executable.
pub struct ModLoaderPatch {
    client_dir: PathBuf,
    fetcher: Arc<dyn ArtifactFetcher>,
    url: String,
}

impl ModLoaderPatch {
    pub fn new(client_dir: &Path, fetcher: Arc<dyn ArtifactFetcher>, url: &str) -> Self {
        Self {
            client_dir: client_dir.to_path_buf(),
            fetcher,
            url: url.to_string(),
        }
    }

    fn dll_path(&self) -> PathBuf {
        self.client_dir.join(MOD_LOADER_DLL)
    }
}

#[async_trait]
impl Patch for ModLoaderPatch {
    fn id(&self) -> PatchId {
        PatchId::ModLoader
    }

    fn is_installed(&self) -> bool {
        self.dll_path().is_file() && self.client_dir.join(MODS_DIR).is_dir()
    }

    async fn install(&self) -> LauncherResult<()> {
        if self.is_installed() {
            return Ok(());
        }
        let mods = self.client_dir.join(MODS_DIR);
        tokio::fs::create_dir_all(&mods)
            .await
            .map_err(|e| LauncherError::io(&mods, e))?;
        if !self.dll_path().is_file() {
            fetch_file(self.fetcher.as_ref(), &self.url, &self.dll_path()).await?;
        }
        info!("Installed mod loader into {:?}", self.client_dir);
        Ok(())
    }

    async fn uninstall(&self) -> LauncherResult<()> {
        let dll = self.dll_path();
        match tokio::fs::remove_file(&dll).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LauncherError::io(&dll, e)),
        }
    }
}
