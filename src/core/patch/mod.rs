// ─── Client Patches ───
// File-level patches applied to an installed client.
//
//   manifest.rs      persisted record of applied patches
//   patcher.rs       ordered patch set + manifest owner
//   mod_loader.rs    dinput8.dll mod loader
//   remove_dlu_ad.rs loading-tip text substitution
//   tcp_udp.rs       TCP/UDP transport shim (pre-launch)

pub mod manifest;
pub mod mod_loader;
pub mod patcher;
pub mod remove_dlu_ad;
pub mod tcp_udp;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::downloader::{ArtifactFetcher, DownloadProgress};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::launch::LaunchTarget;

pub use manifest::{PatchManifest, PatchManifestEntry, MANIFEST_FILE};
pub use mod_loader::ModLoaderPatch;
pub use patcher::ClientPatcher;
pub use remove_dlu_ad::RemoveDluAdPatch;
pub use tcp_udp::TcpUdpPatch;

/// Stable patch identifiers, as stored in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchId {
    ModLoader,
    RemoveDluAd,
    TcpUdp,
}

impl PatchId {
    pub const ALL: [PatchId; 3] = [PatchId::ModLoader, PatchId::RemoveDluAd, PatchId::TcpUdp];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchId::ModLoader => "ModLoader",
            PatchId::RemoveDluAd => "RemoveDLUAd",
            PatchId::TcpUdp => "TCPUDP",
        }
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchId {
    type Err = LauncherError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        PatchId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| LauncherError::PatchNotFound(value.to_string()))
    }
}

/// Download locations for patches that ship binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSources {
    pub mod_loader_url: String,
    pub tcp_udp_url: String,
}

impl Default for PatchSources {
    fn default() -> Self {
        Self {
            mod_loader_url: "https://github.com/lcdr/lu_mod_loader/releases/latest/download/dinput8.dll"
                .to_string(),
            tcp_udp_url: "https://github.com/lcdr/raknet_shim_dll/releases/latest/download/tcpudp.dll"
                .to_string(),
        }
    }
}

/// Installation status is read from the client files, never from the
/// manifest alone. Install and uninstall are no-ops when already in the
/// requested state.
#[async_trait]
pub trait Patch: Send + Sync {
    fn id(&self) -> PatchId;

    fn is_installed(&self) -> bool;

    async fn install(&self) -> LauncherResult<()>;

    async fn uninstall(&self) -> LauncherResult<()>;

    /// Patches that must be installed first.
    fn dependencies(&self) -> &'static [PatchId] {
        &[]
    }

    fn is_pre_launch(&self) -> bool {
        false
    }

    /// Runs right before the client process starts.
    async fn on_launch(&self, _target: &LaunchTarget) -> LauncherResult<()> {
        Ok(())
    }
}

pub enum ClientPatch {
    ModLoader(ModLoaderPatch),
    RemoveDluAd(RemoveDluAdPatch),
    TcpUdp(TcpUdpPatch),
}

impl ClientPatch {
    /// The full patch set for a client install, in application order.
    pub fn all(client_dir: &Path, fetcher: Arc<dyn ArtifactFetcher>, sources: &PatchSources) -> Vec<Self> {
        vec![
            Self::ModLoader(ModLoaderPatch::new(
                client_dir,
                fetcher.clone(),
                &sources.mod_loader_url,
            )),
            Self::RemoveDluAd(RemoveDluAdPatch::new(client_dir)),
            Self::TcpUdp(TcpUdpPatch::new(client_dir, fetcher, &sources.tcp_udp_url)),
        ]
    }

    fn inner(&self) -> &dyn Patch {
        match self {
            ClientPatch::ModLoader(p) => p,
            ClientPatch::RemoveDluAd(p) => p,
            ClientPatch::TcpUdp(p) => p,
        }
    }

    pub fn id(&self) -> PatchId {
        self.inner().id()
    }

    pub fn is_installed(&self) -> bool {
        self.inner().is_installed()
    }

    pub async fn install(&self) -> LauncherResult<()> {
        self.inner().install().await
    }

    pub async fn uninstall(&self) -> LauncherResult<()> {
        self.inner().uninstall().await
    }

    pub fn dependencies(&self) -> &'static [PatchId] {
        self.inner().dependencies()
    }

    pub fn is_pre_launch(&self) -> bool {
        self.inner().is_pre_launch()
    }

    pub async fn on_launch(&self, target: &LaunchTarget) -> LauncherResult<()> {
        self.inner().on_launch(target).await
    }
}

/// Downloads a single patch file into place through a sibling temp file.
pub(crate) async fn fetch_file(
    fetcher: &dyn ArtifactFetcher,
    url: &str,
    dest: &Path,
) -> LauncherResult<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| LauncherError::io(parent, e))?;
    }
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = std::path::PathBuf::from(partial);

    fetcher.fetch(url, &partial, &DownloadProgress::new()).await?;
    tokio::fs::rename(&partial, dest)
        .await
        .map_err(|e| LauncherError::io(dest, e))
}
