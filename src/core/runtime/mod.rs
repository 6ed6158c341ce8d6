// ─── Client Runtimes ───
// Compatibility layers used to execute the Windows client.
//
//   native.rs         Windows, runs the executable directly
//   wine_crossover.rs macOS, self-installed WINE Crossover build
//   system_wine.rs    Linux/other Unix, WINE from the user's PATH

pub mod native;
pub mod system_wine;
pub mod wine_crossover;

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::downloader::ArtifactFetcher;
use crate::core::error::LauncherResult;

pub use native::NativeRuntime;
pub use system_wine::SystemWineRuntime;
pub use wine_crossover::WineCrossoverRuntime;

/// DLL override so WINE loads the client's bundled mod loader.
pub const WINE_DLL_OVERRIDES: (&str, &str) = ("WINEDLLOVERRIDES", "dinput8.dll=n,b");

#[async_trait]
pub trait RuntimeLayer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Platform check only, no side effects.
    fn is_supported(&self) -> bool;

    fn can_install(&self) -> bool;

    fn is_installed(&self) -> bool;

    /// Idempotent; a no-op when already installed.
    async fn install(&self) -> LauncherResult<()>;

    /// Builds (but does not start) the command that runs `executable`.
    fn run_application(&self, executable: &Path, working_dir: &Path) -> Command;

    /// Shown when the layer is missing and cannot be installed automatically.
    fn manual_install_message(&self) -> Option<&'static str> {
        None
    }
}

/// Capability snapshot, computed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeDescriptor {
    pub name: String,
    pub is_supported: bool,
    pub can_install: bool,
    pub is_installed: bool,
}

/// Closed set of runtime layers.
pub enum ClientRuntime {
    Native(NativeRuntime),
    WineCrossover(WineCrossoverRuntime),
    SystemWine(SystemWineRuntime),
}

impl ClientRuntime {
    /// Every known layer, in preference order.
    pub fn candidates(system_dir: &Path, fetcher: Arc<dyn ArtifactFetcher>) -> Vec<Self> {
        vec![
            Self::Native(NativeRuntime),
            Self::WineCrossover(WineCrossoverRuntime::new(system_dir, fetcher)),
            Self::SystemWine(SystemWineRuntime::new()),
        ]
    }

    /// First layer supported on this host. Hosts no layer claims fall back
    /// to the PATH WINE layer, which at least reports a remediation message.
    pub fn detect(system_dir: &Path, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self::candidates(system_dir, fetcher)
            .into_iter()
            .find(|runtime| runtime.is_supported())
            .unwrap_or_else(|| Self::SystemWine(SystemWineRuntime::new()))
    }

    fn layer(&self) -> &dyn RuntimeLayer {
        match self {
            ClientRuntime::Native(r) => r,
            ClientRuntime::WineCrossover(r) => r,
            ClientRuntime::SystemWine(r) => r,
        }
    }

    pub fn name(&self) -> &'static str {
        self.layer().name()
    }

    pub fn is_supported(&self) -> bool {
        self.layer().is_supported()
    }

    pub fn can_install(&self) -> bool {
        self.layer().can_install()
    }

    pub fn is_installed(&self) -> bool {
        self.layer().is_installed()
    }

    pub async fn install(&self) -> LauncherResult<()> {
        self.layer().install().await
    }

    pub fn run_application(&self, executable: &Path, working_dir: &Path) -> Command {
        self.layer().run_application(executable, working_dir)
    }

    pub fn manual_install_message(&self) -> Option<&'static str> {
        self.layer().manual_install_message()
    }

    /// Missing and not installable: launching has to stop here.
    pub fn is_missing_uninstallable(&self) -> bool {
        !self.is_installed() && !self.can_install()
    }

    pub fn descriptor(&self) -> RuntimeDescriptor {
        RuntimeDescriptor {
            name: self.name().to_string(),
            is_supported: self.is_supported(),
            can_install: self.can_install(),
            is_installed: self.is_installed(),
        }
    }
}
