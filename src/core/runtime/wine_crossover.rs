use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::core::downloader::extract::{extract_archive, move_dir};
use crate::core::downloader::{ArtifactFetcher, DownloadProgress};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::source::SourceMethod;

use super::{RuntimeLayer, WINE_DLL_OVERRIDES};

pub const WINE_CROSSOVER_URL: &str =
    "https://github.com/Gcenx/homebrew-wine/releases/download/20.0.2/wine-crossover-20.0.2-osx64.tar.xz";

const ARCHIVE_NAME: &str = "wine-crossover.tar.xz";
const EXTRACT_DIR_NAME: &str = "wine-crossover-extracted";
const INSTALL_DIR_NAME: &str = "Wine";

/// WINE Crossover build unpacked into the launcher's system directory.
pub struct WineCrossoverRuntime {
    system_dir: PathBuf,
    fetcher: Arc<dyn ArtifactFetcher>,
    binary: &'static str,
}

impl WineCrossoverRuntime {
    pub fn new(system_dir: &Path, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        let os_version = sysinfo::System::os_version();
        Self {
            system_dir: system_dir.to_path_buf(),
            fetcher,
            binary: wine_binary_for(os_version.as_deref()),
        }
    }

    pub fn install_dir(&self) -> PathBuf {
        self.system_dir.join(INSTALL_DIR_NAME)
    }

    pub fn binary_path(&self) -> PathBuf {
        self.install_dir().join("bin").join(self.binary)
    }
}

/// `wine32on64` only exists from macOS 10.15 on; older releases need `wine`.
pub fn wine_binary_for(os_version: Option<&str>) -> &'static str {
    let mut parts = os_version
        .unwrap_or_default()
        .split('.')
        .map(|part| part.trim().parse::<u32>().ok());
    match (parts.next().flatten(), parts.next().flatten()) {
        (Some(major), minor) if (major, minor.unwrap_or(0)) <= (10, 14) => "wine",
        _ => "wine32on64",
    }
}

#[async_trait]
impl RuntimeLayer for WineCrossoverRuntime {
    fn name(&self) -> &'static str {
        "WINE Crossover"
    }

    fn is_supported(&self) -> bool {
        cfg!(target_os = "macos")
    }

    fn can_install(&self) -> bool {
        true
    }

    fn is_installed(&self) -> bool {
        self.binary_path().is_file()
    }

    #[instrument(skip(self), fields(system_dir = ?self.system_dir))]
    async fn install(&self) -> LauncherResult<()> {
        if self.is_installed() {
            return Ok(());
        }

        let archive = self.system_dir.join(ARCHIVE_NAME);
        if !archive.exists() {
            info!("Downloading {} from {}", self.name(), WINE_CROSSOVER_URL);
            self.fetcher
                .fetch(WINE_CROSSOVER_URL, &archive, &DownloadProgress::new())
                .await?;
        }

        let extracted = self.system_dir.join(EXTRACT_DIR_NAME);
        let target = self.install_dir();
        tokio::task::spawn_blocking(move || -> LauncherResult<()> {
            extract_archive(SourceMethod::TarXz, &archive, &extracted)?;

            let wine_dir = extracted
                .join("Wine Crossover.app")
                .join("Contents")
                .join("Resources")
                .join("wine");
            if !wine_dir.is_dir() {
                return Err(LauncherError::CorruptArchive {
                    path: archive,
                    reason: format!("missing {:?}", wine_dir),
                });
            }

            if target.exists() {
                std::fs::remove_dir_all(&target).map_err(|e| LauncherError::io(&target, e))?;
            }
            move_dir(&wine_dir, &target)?;

            std::fs::remove_file(&archive).map_err(|e| LauncherError::io(&archive, e))?;
            std::fs::remove_dir_all(&extracted).map_err(|e| LauncherError::io(&extracted, e))
        })
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))??;

        info!("{} installed to {:?}", self.name(), self.install_dir());
        Ok(())
    }

    fn run_application(&self, executable: &Path, working_dir: &Path) -> Command {
        let mut cmd = Command::new(self.binary_path());
        cmd.arg(executable)
            .current_dir(working_dir)
            .env(WINE_DLL_OVERRIDES.0, WINE_DLL_OVERRIDES.1);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::write_tar_xz;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct BundleFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactFetcher for BundleFetcher {
        async fn fetch(&self, url: &str, dest: &Path, _: &DownloadProgress) -> LauncherResult<()> {
            assert_eq!(url, WINE_CROSSOVER_URL);
            self.calls.fetch_add(1, Ordering::SeqCst);
            write_tar_xz(
                dest,
                &[
                    ("Wine Crossover.app/Contents/Resources/wine/bin/wine", "#!/bin/sh\n"),
                    ("Wine Crossover.app/Contents/Resources/wine/bin/wine32on64", "#!/bin/sh\n"),
                    ("Wine Crossover.app/Contents/Info.plist", "<plist/>"),
                ],
            );
            Ok(())
        }
    }

    #[test]
    fn binary_depends_on_macos_release() {
        assert_eq!(wine_binary_for(Some("10.14.6")), "wine");
        assert_eq!(wine_binary_for(Some("10.13")), "wine");
        assert_eq!(wine_binary_for(Some("10.15.7")), "wine32on64");
        assert_eq!(wine_binary_for(Some("11.0")), "wine32on64");
        assert_eq!(wine_binary_for(Some("14")), "wine32on64");
        assert_eq!(wine_binary_for(None), "wine32on64");
    }

    #[tokio::test]
    async fn install_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(BundleFetcher::default());
        let runtime = WineCrossoverRuntime::new(dir.path(), fetcher.clone());
        assert!(!runtime.is_installed());

        runtime.install().await.unwrap();
        runtime.install().await.unwrap();

        assert!(runtime.is_installed());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join(ARCHIVE_NAME).exists());
        assert!(!dir.path().join(EXTRACT_DIR_NAME).exists());
    }

    #[test]
    fn command_targets_bundled_wine() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = WineCrossoverRuntime::new(dir.path(), Arc::new(BundleFetcher::default()));
        let cmd = runtime.run_application(Path::new("legouniverse.exe"), dir.path());

        assert!(Path::new(cmd.get_program()).starts_with(dir.path().join("Wine").join("bin")));
        assert_eq!(cmd.get_current_dir(), Some(dir.path()));
    }
}
