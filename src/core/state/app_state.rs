use std::path::{Path, PathBuf};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::build_http_client;
use crate::core::launch::LaunchTarget;
use crate::core::patch::manifest::write_atomic;
use crate::core::patch::MANIFEST_FILE;
use crate::core::source::{SourceEntry, SourceRegistry};

const APP_DIR_NAME: &str = "NexusLauncher";
const BOOTSTRAP_FILE: &str = "launcher_bootstrap.json";
const SETTINGS_FILE: &str = "launcher_settings.json";
const CLIENT_DIR_NAME: &str = "Client";
const SERVER_DIR_NAME: &str = "Server";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSettings {
    /// Directory holding `Client/`, the archive and the staging dir.
    /// Defaults to the data dir.
    pub client_parent_directory: Option<PathBuf>,
    pub source_name: Option<String>,
    pub selected_server: Option<String>,
    pub servers: Vec<LaunchTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BootstrapConfig {
    data_dir: PathBuf,
}

/// Explicit launcher context. Built once and handed to whatever needs it;
/// tests build their own with `with_data_dir`.
pub struct AppState {
    pub data_dir: PathBuf,
    /// Where the bootstrap file redirecting the data dir is written.
    bootstrap_dir: PathBuf,
    pub http_client: Client,
    pub settings: LauncherSettings,
    pub sources: SourceRegistry,
}

impl AppState {
    pub fn new() -> LauncherResult<Self> {
        let base = default_base_dir();
        let mut app = Self::with_data_dir(resolve_data_dir(&base))?;
        app.bootstrap_dir = base;
        Ok(app)
    }

    pub fn with_data_dir(data_dir: PathBuf) -> LauncherResult<Self> {
        std::fs::create_dir_all(&data_dir).map_err(|e| LauncherError::io(&data_dir, e))?;
        let http_client = build_http_client()?;
        let settings = load_settings_from_disk(&data_dir).unwrap_or_default();
        let sources = SourceRegistry::load(&data_dir);

        Ok(Self {
            bootstrap_dir: data_dir.clone(),
            data_dir,
            http_client,
            settings,
            sources,
        })
    }

    pub fn client_parent_dir(&self) -> PathBuf {
        self.settings
            .client_parent_directory
            .clone()
            .unwrap_or_else(|| self.data_dir.clone())
    }

    pub fn client_dir(&self) -> PathBuf {
        self.client_parent_dir().join(CLIENT_DIR_NAME)
    }

    pub fn server_dir(&self) -> PathBuf {
        self.data_dir.join(SERVER_DIR_NAME)
    }

    pub fn patch_manifest_path(&self) -> PathBuf {
        self.data_dir.join(MANIFEST_FILE)
    }

    pub fn current_source(&self) -> LauncherResult<&SourceEntry> {
        self.sources.current(self.settings.source_name.as_deref())
    }

    pub fn selected_target(&self) -> Option<&LaunchTarget> {
        let selected = self.settings.selected_server.as_deref()?;
        self.settings.servers.iter().find(|s| s.name == selected)
    }

    /// Adds or replaces a server entry by name.
    pub fn upsert_server(&mut self, target: LaunchTarget) {
        match self.settings.servers.iter_mut().find(|s| s.name == target.name) {
            Some(existing) => *existing = target,
            None => self.settings.servers.push(target),
        }
    }

    pub fn save_settings(&self) -> LauncherResult<()> {
        let json = serde_json::to_vec_pretty(&self.settings)?;
        write_atomic(&self.data_dir.join(SETTINGS_FILE), &json)
    }

    /// Resolves where a migration into `target_dir` lands. `None` when that
    /// is already the data dir.
    pub fn migration_target(&self, target_dir: &Path) -> LauncherResult<Option<PathBuf>> {
        let destination = if target_dir
            .file_name()
            .map(|n| n.to_string_lossy() == APP_DIR_NAME)
            .unwrap_or(false)
        {
            target_dir.to_path_buf()
        } else {
            target_dir.join(APP_DIR_NAME)
        };

        if destination == self.data_dir {
            return Ok(None);
        }
        if destination.starts_with(&self.data_dir) {
            return Err(LauncherError::Other(format!(
                "Cannot migrate {:?} into its own subdirectory {:?}",
                self.data_dir, destination
            )));
        }
        Ok(Some(destination))
    }

    /// Switches to an already populated data dir and points the bootstrap
    /// file at it.
    pub(crate) fn adopt_data_dir(&mut self, destination: PathBuf) -> LauncherResult<()> {
        write_bootstrap(&self.bootstrap_dir, &destination)?;
        info!("Data dir migrated {:?} -> {:?}", self.data_dir, destination);

        self.data_dir = destination;
        self.settings = load_settings_from_disk(&self.data_dir).unwrap_or_default();
        self.sources = SourceRegistry::load(&self.data_dir);
        self.save_settings()
    }
}

fn load_settings_from_disk(data_dir: &Path) -> Option<LauncherSettings> {
    let path = data_dir.join(SETTINGS_FILE);
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(settings) => Some(settings),
        Err(e) => {
            warn!("Ignoring corrupt settings {:?}: {}", path, e);
            None
        }
    }
}

fn write_bootstrap(base_dir: &Path, data_dir: &Path) -> LauncherResult<()> {
    let bootstrap = BootstrapConfig {
        data_dir: data_dir.to_path_buf(),
    };
    write_atomic(
        &base_dir.join(BOOTSTRAP_FILE),
        &serde_json::to_vec_pretty(&bootstrap)?,
    )
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub(crate) fn resolve_data_dir(base: &Path) -> PathBuf {
    let bootstrap_path = base.join(BOOTSTRAP_FILE);
    if let Ok(raw) = std::fs::read_to_string(&bootstrap_path) {
        match serde_json::from_str::<BootstrapConfig>(&raw) {
            Ok(cfg) => return cfg.data_dir,
            Err(e) => warn!("Ignoring corrupt bootstrap {:?}: {}", bootstrap_path, e),
        }
    }
    base.join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip_and_select_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = AppState::with_data_dir(dir.path().to_path_buf()).unwrap();
        assert_eq!(app.client_dir(), dir.path().join("Client"));
        assert!(app.selected_target().is_none());

        app.upsert_server(LaunchTarget::new("Local", "localhost"));
        app.upsert_server(LaunchTarget::new("Local", "127.0.0.1"));
        app.settings.selected_server = Some("Local".into());
        app.save_settings().unwrap();

        let reloaded = AppState::with_data_dir(dir.path().to_path_buf()).unwrap();
        assert_eq!(reloaded.settings.servers.len(), 1);
        assert_eq!(reloaded.selected_target().unwrap().address, "127.0.0.1");
    }

    #[test]
    fn corrupt_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ not json").unwrap();
        let app = AppState::with_data_dir(dir.path().to_path_buf()).unwrap();
        assert_eq!(app.settings, LauncherSettings::default());
        assert_eq!(app.current_source().unwrap().method, "zip");
    }

    #[test]
    fn bootstrap_redirects_the_data_dir() {
        let base = tempfile::tempdir().unwrap();
        assert_eq!(resolve_data_dir(base.path()), base.path().join(APP_DIR_NAME));

        let elsewhere = base.path().join("elsewhere");
        write_bootstrap(base.path(), &elsewhere).unwrap();
        assert_eq!(resolve_data_dir(base.path()), elsewhere);
    }

    #[test]
    fn migration_target_appends_the_app_dir_and_rejects_nesting() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join(APP_DIR_NAME);
        let app = AppState::with_data_dir(data_dir.clone()).unwrap();

        assert_eq!(app.migration_target(dir.path()).unwrap(), None);
        assert_eq!(
            app.migration_target(&dir.path().join("disk")).unwrap(),
            Some(dir.path().join("disk").join(APP_DIR_NAME))
        );
        assert!(app.migration_target(&data_dir.join("inner")).is_err());
    }

    #[test]
    fn adopting_a_data_dir_rewrites_the_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = AppState::with_data_dir(dir.path().join("old")).unwrap();
        let destination = dir.path().join("new");
        std::fs::create_dir_all(&destination).unwrap();
        std::fs::write(
            destination.join(SETTINGS_FILE),
            r#"{"selected_server": "Copied"}"#,
        )
        .unwrap();

        app.adopt_data_dir(destination.clone()).unwrap();

        assert_eq!(app.data_dir, destination);
        assert_eq!(app.settings.selected_server.as_deref(), Some("Copied"));
        assert_eq!(resolve_data_dir(&dir.path().join("old")), destination);
    }
}
