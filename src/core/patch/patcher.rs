use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::core::downloader::ArtifactFetcher;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::launch::LaunchTarget;

use super::manifest::PatchManifest;
use super::{ClientPatch, PatchId, PatchSources};

/// Installed right after a fresh download.
pub const DEFAULT_PATCHES: [PatchId; 1] = [PatchId::ModLoader];

/// Owns the ordered patch set of one client install and its manifest.
pub struct ClientPatcher {
    client_dir: PathBuf,
    manifest: PatchManifest,
    fetcher: Arc<dyn ArtifactFetcher>,
    sources: PatchSources,
    patches: Vec<ClientPatch>,
}

impl ClientPatcher {
    pub fn load(
        client_dir: &Path,
        manifest_path: &Path,
        fetcher: Arc<dyn ArtifactFetcher>,
        sources: PatchSources,
    ) -> LauncherResult<Self> {
        let manifest = PatchManifest::load(manifest_path)?;
        let patches = ClientPatch::all(client_dir, fetcher.clone(), &sources);
        Ok(Self {
            client_dir: client_dir.to_path_buf(),
            manifest,
            fetcher,
            sources,
            patches,
        })
    }

    pub fn client_dir(&self) -> &Path {
        &self.client_dir
    }

    pub fn manifest(&self) -> &PatchManifest {
        &self.manifest
    }

    pub fn patches(&self) -> &[ClientPatch] {
        &self.patches
    }

    fn patch(&self, id: PatchId) -> LauncherResult<&ClientPatch> {
        self.patches
            .iter()
            .find(|p| p.id() == id)
            .ok_or_else(|| LauncherError::PatchNotFound(id.to_string()))
    }

    /// On-disk truth for one patch.
    pub fn is_installed(&self, id: PatchId) -> LauncherResult<bool> {
        Ok(self.patch(id)?.is_installed())
    }

    /// Installs `id` after its dependencies.
    #[instrument(skip(self))]
    pub async fn install(&mut self, id: PatchId) -> LauncherResult<()> {
        let mut order = Vec::new();
        self.resolve(id, &mut order)?;

        for id in order {
            let patch = self.patch(id)?;
            if patch.is_installed() {
                debug!("Patch {} already installed", id);
            } else {
                patch.install().await?;
                info!("Installed patch {}", id);
            }
            let client_dir = self.client_dir.clone();
            self.manifest.record(id.as_str(), &client_dir, true)?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn uninstall(&mut self, id: PatchId) -> LauncherResult<()> {
        let patch = self.patch(id)?;
        if patch.is_installed() {
            patch.uninstall().await?;
            info!("Uninstalled patch {}", id);
        }
        let client_dir = self.client_dir.clone();
        self.manifest.record(id.as_str(), &client_dir, false)
    }

    pub async fn install_defaults(&mut self) -> LauncherResult<()> {
        for id in DEFAULT_PATCHES {
            self.install(id).await?;
        }
        Ok(())
    }

    /// Runs the launch hook of every currently installed pre-launch patch.
    pub async fn run_pre_launch_hooks(&self, target: &LaunchTarget) -> LauncherResult<()> {
        for patch in self.patches.iter().filter(|p| p.is_pre_launch()) {
            if patch.is_installed() {
                debug!("Running pre-launch hook of {}", patch.id());
                patch.on_launch(target).await?;
            }
        }
        Ok(())
    }

    /// Moves the install from `old_parent` to `new_parent`.
    ///
    /// The manifest is rewritten and persisted first; `move_files` runs on
    /// the blocking pool only after that succeeded, and the patcher then
    /// reloads against the new client directory.
    #[instrument(skip(self, move_files))]
    pub async fn relocate<F>(&mut self, old_parent: &Path, new_parent: &Path, move_files: F) -> LauncherResult<()>
    where
        F: FnOnce() -> LauncherResult<()> + Send + 'static,
    {
        self.manifest.relocate(old_parent, new_parent)?;
        tokio::task::spawn_blocking(move_files)
            .await
            .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))??;

        let client_dir = match self.client_dir.strip_prefix(old_parent) {
            Ok(rest) => new_parent.join(rest),
            Err(_) => {
                warn!(
                    "Client dir {:?} is not under {:?}; keeping it",
                    self.client_dir, old_parent
                );
                self.client_dir.clone()
            }
        };
        self.reload(&client_dir)
    }

    /// Switches to the manifest at `manifest_path` after a data dir move,
    /// rewriting its entries from `old_parent` to `new_parent` before the
    /// patch set is rebuilt for `client_dir`.
    pub fn reopen(
        &mut self,
        manifest_path: &Path,
        old_parent: &Path,
        new_parent: &Path,
        client_dir: &Path,
    ) -> LauncherResult<()> {
        let mut manifest = PatchManifest::load(manifest_path)?;
        manifest.relocate(old_parent, new_parent)?;
        self.manifest = manifest;
        self.reload(client_dir)
    }

    /// Rebuilds the patch set for `client_dir` and re-reads the manifest.
    pub fn reload(&mut self, client_dir: &Path) -> LauncherResult<()> {
        self.manifest = PatchManifest::load(self.manifest.path())?;
        self.patches = ClientPatch::all(client_dir, self.fetcher.clone(), &self.sources);
        self.client_dir = client_dir.to_path_buf();
        Ok(())
    }

    fn resolve(&self, id: PatchId, order: &mut Vec<PatchId>) -> LauncherResult<()> {
        if order.contains(&id) {
            return Ok(());
        }
        for dependency in self.patch(id)?.dependencies() {
            self.resolve(*dependency, order)?;
        }
        order.push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::patch::MANIFEST_FILE;
    use crate::core::test_support::EchoFetcher;

    struct Fixture {
        dir: tempfile::TempDir,
        fetcher: Arc<EchoFetcher>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("games").join("Client")).unwrap();
            Self {
                dir,
                fetcher: Arc::new(EchoFetcher::default()),
            }
        }

        fn parent(&self) -> PathBuf {
            self.dir.path().join("games")
        }

        fn patcher(&self) -> ClientPatcher {
            ClientPatcher::load(
                &self.parent().join("Client"),
                &self.dir.path().join(MANIFEST_FILE),
                self.fetcher.clone(),
                PatchSources::default(),
            )
            .unwrap()
        }
    }

    #[tokio::test]
    async fn install_pulls_in_dependencies_once() {
        let fixture = Fixture::new();
        let mut patcher = fixture.patcher();

        patcher.install(PatchId::TcpUdp).await.unwrap();
        patcher.install(PatchId::TcpUdp).await.unwrap();

        assert!(patcher.is_installed(PatchId::ModLoader).unwrap());
        assert!(patcher.is_installed(PatchId::TcpUdp).unwrap());
        assert_eq!(fixture.fetcher.calls(), 2);
        let ids: Vec<_> = patcher
            .manifest()
            .entries()
            .iter()
            .map(|e| e.patch_id.as_str())
            .collect();
        assert_eq!(ids, vec!["ModLoader", "TCPUDP"]);
    }

    #[tokio::test]
    async fn uninstalling_an_absent_patch_is_a_no_op() {
        let fixture = Fixture::new();
        let mut patcher = fixture.patcher();

        patcher.uninstall(PatchId::ModLoader).await.unwrap();
        assert!(!patcher.is_installed(PatchId::ModLoader).unwrap());
        assert!(!patcher.manifest().get("ModLoader").unwrap().installed);
    }

    #[tokio::test]
    async fn file_state_wins_over_the_manifest() {
        let fixture = Fixture::new();
        let mut patcher = fixture.patcher();
        patcher.install_defaults().await.unwrap();

        std::fs::remove_file(fixture.parent().join("Client").join("dinput8.dll")).unwrap();
        assert!(patcher.manifest().get("ModLoader").unwrap().installed);
        assert!(!patcher.is_installed(PatchId::ModLoader).unwrap());
    }

    #[tokio::test]
    async fn relocation_persists_manifest_before_moving_files() {
        let fixture = Fixture::new();
        let mut patcher = fixture.patcher();
        patcher.install_defaults().await.unwrap();

        let old_parent = fixture.parent();
        let new_parent = fixture.dir.path().join("moved");
        let manifest_path = patcher.manifest().path().to_path_buf();
        let expected_dir = new_parent.join("Client");

        let (from, to, expected) = (old_parent.clone(), new_parent.clone(), expected_dir.clone());
        patcher
            .relocate(&old_parent, &new_parent, move || {
                let on_disk = PatchManifest::load(&manifest_path)?;
                assert!(on_disk
                    .entries()
                    .iter()
                    .all(|e| e.install_directory == expected));
                std::fs::rename(&from, &to)?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(patcher.client_dir(), expected_dir.as_path());
        assert!(patcher.is_installed(PatchId::ModLoader).unwrap());
    }

    #[tokio::test]
    async fn relocation_moves_files_off_the_async_thread() {
        let fixture = Fixture::new();
        let mut patcher = fixture.patcher();
        let caller = std::thread::current().id();
        let (tx, rx) = std::sync::mpsc::channel();

        patcher
            .relocate(&fixture.parent(), &fixture.dir.path().join("moved"), move || {
                tx.send(std::thread::current().id()).unwrap();
                Ok(())
            })
            .await
            .unwrap();

        assert_ne!(rx.recv().unwrap(), caller);
    }

    #[tokio::test]
    async fn failed_move_keeps_the_old_client_dir() {
        let fixture = Fixture::new();
        let mut patcher = fixture.patcher();
        let old_parent = fixture.parent();
        let new_parent = fixture.dir.path().join("moved");

        let err = patcher
            .relocate(&old_parent, &new_parent, || {
                Err(LauncherError::Other("disk full".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LauncherError::Other(_)));
        assert_eq!(patcher.client_dir(), old_parent.join("Client").as_path());
    }

    #[tokio::test]
    async fn reopen_switches_to_a_copied_manifest() {
        let fixture = Fixture::new();
        let mut patcher = fixture.patcher();
        patcher.install_defaults().await.unwrap();

        let copy_root = fixture.dir.path().join("copy");
        std::fs::create_dir_all(&copy_root).unwrap();
        let copied = copy_root.join(MANIFEST_FILE);
        std::fs::copy(patcher.manifest().path(), &copied).unwrap();

        patcher
            .reopen(&copied, &fixture.parent(), &copy_root, &copy_root.join("Client"))
            .unwrap();

        assert_eq!(patcher.manifest().path(), copied.as_path());
        assert_eq!(
            patcher.manifest().get("ModLoader").unwrap().install_directory,
            copy_root.join("Client")
        );
        let original = PatchManifest::load(&fixture.dir.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(
            original.get("ModLoader").unwrap().install_directory,
            fixture.parent().join("Client")
        );
    }

    #[tokio::test]
    async fn pre_launch_hooks_skip_uninstalled_patches() {
        let fixture = Fixture::new();
        let patcher = fixture.patcher();
        let target = LaunchTarget::new("Local", "localhost").with_tcp_udp(true);

        patcher.run_pre_launch_hooks(&target).await.unwrap();
        assert!(!fixture
            .parent()
            .join("Client")
            .join("mods")
            .join("tcpudp")
            .exists());
    }
}
