use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::downloader::ArtifactFetcher;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::launch::LaunchTarget;

use super::mod_loader::MODS_DIR;
use super::{fetch_file, Patch, PatchId};

const SHIM_DIR: &str = "tcpudp";
const SHIM_DLL: &str = "tcpudp.dll";
const SHIM_DLL_DISABLED: &str = "tcpudp.dll.disabled";

/// Shim mod that swaps the client's RakNet transport for TCP/UDP. Loaded
/// by the mod loader, so it is only enabled for servers that expect it.
pub struct TcpUdpPatch {
    shim_dir: PathBuf,
    fetcher: Arc<dyn ArtifactFetcher>,
    url: String,
}

impl TcpUdpPatch {
    pub fn new(client_dir: &Path, fetcher: Arc<dyn ArtifactFetcher>, url: &str) -> Self {
        Self {
            shim_dir: client_dir.join(MODS_DIR).join(SHIM_DIR),
            fetcher,
            url: url.to_string(),
        }
    }

    fn enabled_path(&self) -> PathBuf {
        self.shim_dir.join(SHIM_DLL)
    }

    fn disabled_path(&self) -> PathBuf {
        self.shim_dir.join(SHIM_DLL_DISABLED)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled_path().is_file()
    }
}

#[async_trait]
impl Patch for TcpUdpPatch {
    fn id(&self) -> PatchId {
        PatchId::TcpUdp
    }

    fn is_installed(&self) -> bool {
        self.enabled_path().is_file() || self.disabled_path().is_file()
    }

    async fn install(&self) -> LauncherResult<()> {
        if self.is_installed() {
            return Ok(());
        }
        fetch_file(self.fetcher.as_ref(), &self.url, &self.disabled_path()).await?;
        info!("Installed TCP/UDP shim into {:?}", self.shim_dir);
        Ok(())
    }

    async fn uninstall(&self) -> LauncherResult<()> {
        match tokio::fs::remove_dir_all(&self.shim_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LauncherError::io(&self.shim_dir, e)),
        }
    }

    fn dependencies(&self) -> &'static [PatchId] {
        &[PatchId::ModLoader]
    }

    fn is_pre_launch(&self) -> bool {
        true
    }

    /// Enables the shim only when the selected server speaks TCP/UDP.
    async fn on_launch(&self, target: &LaunchTarget) -> LauncherResult<()> {
        let (from, to) = if target.tcp_udp {
            (self.disabled_path(), self.enabled_path())
        } else {
            (self.enabled_path(), self.disabled_path())
        };
        if from.is_file() {
            tokio::fs::rename(&from, &to)
                .await
                .map_err(|e| LauncherError::io(&to, e))?;
        }
        debug!(
            "TCP/UDP shim {} for {}",
            if target.tcp_udp { "enabled" } else { "disabled" },
            target.name
        );
        Ok(())
    }
}
