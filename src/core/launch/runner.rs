// ─── Client Runner ───
// Download → patch → launch flow over one launcher context. All state
// changes go through the provisioning state owner.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::core::downloader::extract::{copy_dir_recursive, move_dir};
use crate::core::downloader::{
    spawn_progress_sampler, AcquireOutcome, ArtifactFetcher, ArtifactPipeline, DownloadEstimate,
    EntryPointVerifier, HttpFetcher, PipelinePaths, PipelinePhase,
};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::patch::{ClientPatcher, PatchSources};
use crate::core::runtime::ClientRuntime;
use crate::core::source::SourceMethod;
use crate::core::state::{
    AppState, EnvironmentProbe, EnvironmentSnapshot, ProvisioningState, StateChange, StateHandle,
};

use super::boot_config;
use super::LaunchTarget;

/// Client executable, relative to the client directory.
pub const CLIENT_EXECUTABLE: &str = "legouniverse.exe";

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum LaunchOutcome {
    Started {
        pid: u32,
        /// Resolves once the client exits and the state was recomputed.
        exit: JoinHandle<Option<ExitStatus>>,
    },
    /// The runtime layer is absent and cannot be installed; nothing ran.
    RuntimeMissing { message: String },
}

pub struct ClientRunner {
    app: Arc<Mutex<AppState>>,
    fetcher: Arc<dyn ArtifactFetcher>,
    runtime: Arc<ClientRuntime>,
    patcher: Arc<Mutex<ClientPatcher>>,
    state: StateHandle,
    /// Serializes download, source change and directory moves.
    maintenance: Mutex<()>,
}

struct ClientProbe {
    app: Arc<Mutex<AppState>>,
    runtime: Arc<ClientRuntime>,
}

#[async_trait]
impl EnvironmentProbe for ClientProbe {
    async fn snapshot(&self) -> EnvironmentSnapshot {
        let app = self.app.lock().await;
        EnvironmentSnapshot {
            runtime_missing: self.runtime.is_missing_uninstallable(),
            entry_point_present: app.client_dir().join(CLIENT_EXECUTABLE).is_file(),
            target_selected: app.selected_target().is_some(),
        }
    }
}

impl ClientRunner {
    /// Runner with the streaming HTTP fetcher and the host's runtime layer.
    pub fn new(app: AppState) -> LauncherResult<Self> {
        let fetcher: Arc<dyn ArtifactFetcher> = Arc::new(HttpFetcher::new(app.http_client.clone()));
        let runtime = ClientRuntime::detect(&app.data_dir, fetcher.clone());
        info!("Using runtime {}", runtime.name());
        Self::with_parts(app, fetcher, runtime)
    }

    pub fn with_parts(
        app: AppState,
        fetcher: Arc<dyn ArtifactFetcher>,
        runtime: ClientRuntime,
    ) -> LauncherResult<Self> {
        let patcher = ClientPatcher::load(
            &app.client_dir(),
            &app.patch_manifest_path(),
            fetcher.clone(),
            PatchSources::default(),
        )?;
        let app = Arc::new(Mutex::new(app));
        let runtime = Arc::new(runtime);
        let (state, _owner) = StateHandle::spawn(Arc::new(ClientProbe {
            app: app.clone(),
            runtime: runtime.clone(),
        }));

        Ok(Self {
            app,
            fetcher,
            runtime,
            patcher: Arc::new(Mutex::new(patcher)),
            state,
            maintenance: Mutex::new(()),
        })
    }

    pub fn app(&self) -> Arc<Mutex<AppState>> {
        self.app.clone()
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn subscribe(&self) -> LauncherResult<tokio::sync::mpsc::UnboundedReceiver<StateChange>> {
        self.state.subscribe()
    }

    pub fn runtime(&self) -> &ClientRuntime {
        &self.runtime
    }

    pub async fn refresh(&self) -> LauncherResult<ProvisioningState> {
        self.state.recompute().await
    }

    /// Back to a re-derivable state after a pipeline action.
    async fn settle(&self) -> LauncherResult<ProvisioningState> {
        self.state.set_state(ProvisioningState::Uninitialized)?;
        self.state.recompute().await
    }

    /// Downloads, extracts, verifies and patches the client. `on_progress`
    /// receives an advisory estimate every 100 ms while downloading.
    #[instrument(skip(self, on_progress))]
    pub async fn download_client<P>(&self, force: bool, on_progress: P) -> LauncherResult<AcquireOutcome>
    where
        P: Fn(DownloadEstimate) + Clone + Send + Sync + 'static,
    {
        let _maintenance = self.maintenance.lock().await;
        self.state.set_state(ProvisioningState::DownloadingArtifact)?;

        let pipeline = match self.build_pipeline().await {
            Ok(pipeline) => pipeline,
            Err(err) => {
                self.settle().await?;
                return Err(err);
            }
        };

        let state = self.state.clone();
        let archive = pipeline.paths().archive.clone();
        let progress = pipeline.progress();
        let phase_watch = pipeline.phase_watch();
        let on_phase = move |phase: PipelinePhase| {
            let next = match phase {
                PipelinePhase::Download => {
                    spawn_progress_sampler(
                        archive.clone(),
                        progress.clone(),
                        phase_watch.clone(),
                        PROGRESS_INTERVAL,
                        on_progress.clone(),
                    );
                    ProvisioningState::DownloadingArtifact
                }
                PipelinePhase::Extract | PipelinePhase::Verify => {
                    ProvisioningState::ExtractingArtifact
                }
                PipelinePhase::VerifyFailed => ProvisioningState::VerifyFailed,
                PipelinePhase::Done => return,
            };
            if let Err(err) = state.set_state(next) {
                warn!("Dropped state update {:?}: {}", next, err);
            }
        };

        match pipeline.acquire(force, on_phase).await {
            Ok(AcquireOutcome::VerifyFailed) => {
                error!("Client verification failed; archive kept for inspection");
                Ok(AcquireOutcome::VerifyFailed)
            }
            Ok(outcome) => {
                self.state.set_state(ProvisioningState::PatchingArtifact)?;
                let patched = self.patcher.lock().await.install_defaults().await;
                self.settle().await?;
                patched?;
                Ok(outcome)
            }
            Err(err) => {
                error!("Client download failed: {}", err);
                self.settle().await?;
                Err(err)
            }
        }
    }

    async fn build_pipeline(&self) -> LauncherResult<ArtifactPipeline> {
        let app = self.app.lock().await;
        let source = app.current_source()?.clone();
        let method = source.method()?;
        let paths = PipelinePaths::new(&app.client_parent_dir(), &app.client_dir(), method);
        ArtifactPipeline::new(
            source,
            paths,
            self.fetcher.clone(),
            Arc::new(EntryPointVerifier::new(CLIENT_EXECUTABLE)),
        )
    }

    /// Launches the client against the selected server.
    pub async fn launch_selected(&self) -> LauncherResult<LaunchOutcome> {
        let target = self
            .app
            .lock()
            .await
            .selected_target()
            .cloned()
            .ok_or_else(|| LauncherError::Other("No server selected".into()))?;
        self.launch(&target).await
    }

    #[instrument(skip(self), fields(server = %target.name))]
    pub async fn launch(&self, target: &LaunchTarget) -> LauncherResult<LaunchOutcome> {
        self.state.set_state(ProvisioningState::Launching)?;

        match self.prepare_launch(target).await {
            Ok(Some(child)) => {
                let pid = child.id();
                info!("Client started (pid {})", pid);
                let exit = self.watch_exit(child);
                Ok(LaunchOutcome::Started { pid, exit })
            }
            Ok(None) => {
                let message = self
                    .runtime
                    .manual_install_message()
                    .unwrap_or("The runtime required to run the client is not installed.")
                    .to_string();
                warn!("Launch aborted: {}", message);
                self.settle().await?;
                Ok(LaunchOutcome::RuntimeMissing { message })
            }
            Err(err) => {
                error!("Launch failed: {}", err);
                self.settle().await?;
                Err(err)
            }
        }
    }

    /// `None` when the runtime is missing and cannot be installed.
    async fn prepare_launch(&self, target: &LaunchTarget) -> LauncherResult<Option<std::process::Child>> {
        if !self.runtime.is_installed() {
            if !self.runtime.can_install() {
                return Ok(None);
            }
            info!("Installing runtime {}", self.runtime.name());
            self.runtime.install().await?;
        }

        let client_dir = self.app.lock().await.client_dir();
        let config_dir = client_dir.clone();
        let config_target = target.clone();
        tokio::task::spawn_blocking(move || boot_config::apply(&config_dir, &config_target))
            .await
            .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))??;

        self.patcher.lock().await.run_pre_launch_hooks(target).await?;

        let executable = client_dir.join(CLIENT_EXECUTABLE);
        let mut command = self.runtime.run_application(&executable, &client_dir);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = command.spawn().map_err(|source| LauncherError::ProcessSpawn {
            path: executable,
            source,
        })?;
        Ok(Some(child))
    }

    fn watch_exit(&self, mut child: std::process::Child) -> JoinHandle<Option<ExitStatus>> {
        let state = self.state.clone();
        tokio::spawn(async move {
            let status = match tokio::task::spawn_blocking(move || child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(err)) => {
                    warn!("Failed waiting for client: {}", err);
                    None
                }
                Err(err) => {
                    warn!("Client wait task failed: {}", err);
                    None
                }
            };
            info!("Client closed ({:?})", status);

            let settled = match state.set_state(ProvisioningState::Uninitialized) {
                Ok(()) => state.recompute().await.map(|_| ()),
                Err(err) => Err(err),
            };
            if let Err(err) = settled {
                warn!("Could not recompute state after client exit: {}", err);
            }
            status
        })
    }

    /// Switches the client source. The current client is deleted because it
    /// came from the previous source.
    pub async fn change_source(&self, name_or_label: &str) -> LauncherResult<ProvisioningState> {
        let _maintenance = self.maintenance.lock().await;
        let changed = {
            let mut app = self.app.lock().await;
            let entry = app
                .sources
                .find_by_label(name_or_label)
                .or_else(|| app.sources.find(name_or_label))
                .cloned()
                .ok_or_else(|| LauncherError::SourceNotFound(name_or_label.to_string()))?;
            entry.method()?;

            let current = app.current_source().ok().map(|s| s.name.clone());
            if current.as_deref() == Some(entry.name.as_str()) {
                false
            } else {
                remove_client_files(&app.client_parent_dir(), &app.client_dir()).await?;
                app.settings.source_name = Some(entry.name.clone());
                app.save_settings()?;
                info!("Client source changed to {}", entry.display_label());
                true
            }
        };

        if changed {
            self.settle().await
        } else {
            self.state.recompute().await
        }
    }

    /// Moves the client install to `new_parent`, keeping the patch manifest
    /// consistent with the new location.
    pub async fn change_parent_directory(&self, new_parent: PathBuf) -> LauncherResult<ProvisioningState> {
        let _maintenance = self.maintenance.lock().await;
        let (old_parent, old_client) = {
            let app = self.app.lock().await;
            (app.client_parent_dir(), app.client_dir())
        };
        if old_parent == new_parent {
            return self.state.recompute().await;
        }

        let new_client = new_parent.join(
            old_client
                .file_name()
                .ok_or_else(|| LauncherError::Other("Client dir has no name".into()))?,
        );
        let target = new_parent.clone();
        self.patcher
            .lock()
            .await
            .relocate(&old_parent, &new_parent, move || {
                std::fs::create_dir_all(&target).map_err(|e| LauncherError::io(&target, e))?;
                if old_client.exists() {
                    move_dir(&old_client, &new_client)?;
                }
                Ok(())
            })
            .await?;

        {
            let mut app = self.app.lock().await;
            app.settings.client_parent_directory = Some(new_parent.clone());
            app.save_settings()?;
        }
        info!("Client moved {:?} -> {:?}", old_parent, new_parent);
        self.state.recompute().await
    }

    /// Copies the data dir into `target_dir` and switches to the copy. A
    /// client living in the data dir comes along and the patcher follows it.
    #[instrument(skip(self))]
    pub async fn migrate_data_dir(&self, target_dir: PathBuf) -> LauncherResult<PathBuf> {
        let _maintenance = self.maintenance.lock().await;
        let destination = {
            let mut app = self.app.lock().await;
            let Some(destination) = app.migration_target(&target_dir)? else {
                return Ok(app.data_dir.clone());
            };

            let old_parent = app.client_parent_dir();
            let source = app.data_dir.clone();
            let copy_to = destination.clone();
            tokio::task::spawn_blocking(move || copy_dir_recursive(&source, &copy_to))
                .await
                .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))??;
            app.adopt_data_dir(destination.clone())?;

            self.patcher.lock().await.reopen(
                &app.patch_manifest_path(),
                &old_parent,
                &app.client_parent_dir(),
                &app.client_dir(),
            )?;
            destination
        };
        self.state.recompute().await?;
        Ok(destination)
    }

    /// Stores `target` and makes it the launch target.
    pub async fn select_server(&self, target: LaunchTarget) -> LauncherResult<ProvisioningState> {
        {
            let mut app = self.app.lock().await;
            app.settings.selected_server = Some(target.name.clone());
            app.upsert_server(target);
            app.save_settings()?;
        }
        self.state.recompute().await
    }
}

/// Deletes the client, the staging dir and any downloaded archive.
async fn remove_client_files(parent: &Path, client_dir: &Path) -> LauncherResult<()> {
    let mut dirs = vec![client_dir.to_path_buf()];
    let mut files = Vec::new();
    for method in [SourceMethod::Zip, SourceMethod::TarXz] {
        let paths = PipelinePaths::new(parent, client_dir, method);
        files.push(paths.archive);
        if !dirs.contains(&paths.staging) {
            dirs.push(paths.staging);
        }
    }

    for dir in dirs {
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => info!("Removed {:?}", dir),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(LauncherError::io(&dir, e)),
        }
    }
    for file in files {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => info!("Removed {:?}", file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(LauncherError::io(&file, e)),
        }
    }
    Ok(())
}
