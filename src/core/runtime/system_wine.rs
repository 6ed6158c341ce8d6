use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use tracing::debug;

use crate::core::error::{LauncherError, LauncherResult};

use super::{RuntimeLayer, WINE_DLL_OVERRIDES};

const WINE_BINARY: &str = "wine";

const INSTALL_MESSAGE: &str = "WINE is required to run the client but was not found on your PATH. \
Install it with your distribution's package manager (for example `wine` or `wine-stable`) and restart the launcher.";

/// WINE provided by the host system.
#[derive(Debug, Clone, Default)]
pub struct SystemWineRuntime {
    /// Overrides `$PATH` for the lookup.
    search_path: Option<OsString>,
}

impl SystemWineRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    /// Searches the executable search path for the WINE binary.
    pub fn locate(&self) -> Option<PathBuf> {
        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(WINE_BINARY, Some(paths), cwd)
            }
            None => which::which(WINE_BINARY),
        };
        match found {
            Ok(path) => Some(path),
            Err(err) => {
                debug!("{} not found on PATH: {}", WINE_BINARY, err);
                None
            }
        }
    }
}

#[async_trait]
impl RuntimeLayer for SystemWineRuntime {
    fn name(&self) -> &'static str {
        "WINE"
    }

    fn is_supported(&self) -> bool {
        cfg!(not(any(target_os = "windows", target_os = "macos")))
    }

    fn can_install(&self) -> bool {
        false
    }

    fn is_installed(&self) -> bool {
        self.locate().is_some()
    }

    async fn install(&self) -> LauncherResult<()> {
        if self.is_installed() {
            return Ok(());
        }
        Err(LauncherError::RuntimeUnavailable {
            name: self.name().to_string(),
            message: INSTALL_MESSAGE.to_string(),
        })
    }

    fn run_application(&self, executable: &Path, working_dir: &Path) -> Command {
        let wine = self
            .locate()
            .unwrap_or_else(|| PathBuf::from(WINE_BINARY));
        let mut cmd = Command::new(wine);
        cmd.arg(executable)
            .current_dir(working_dir)
            .env(WINE_DLL_OVERRIDES.0, WINE_DLL_OVERRIDES.1);
        cmd
    }

    fn manual_install_message(&self) -> Option<&'static str> {
        Some(INSTALL_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[cfg(unix)]
    fn fake_wine(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(WINE_BINARY);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn wine_on_search_path_counts_as_installed() {
        let dir = tempfile::tempdir().unwrap();
        let expected = fake_wine(dir.path());
        let runtime = SystemWineRuntime::with_search_path(dir.path());

        assert!(runtime.is_installed());
        let cmd = runtime.run_application(Path::new("legouniverse.exe"), dir.path());
        assert_eq!(cmd.get_program(), expected.as_os_str());
        assert_eq!(
            cmd.get_args().collect::<Vec<_>>(),
            vec![OsStr::new("legouniverse.exe")]
        );
        let overrides = cmd
            .get_envs()
            .find(|(key, _)| *key == OsStr::new("WINEDLLOVERRIDES"))
            .and_then(|(_, value)| value);
        assert_eq!(overrides, Some(OsStr::new("dinput8.dll=n,b")));
    }

    #[tokio::test]
    async fn install_reports_remediation_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = SystemWineRuntime::with_search_path(dir.path());

        let err = runtime.install().await.unwrap_err();
        match err {
            LauncherError::RuntimeUnavailable { message, .. } => {
                assert!(message.contains("package manager"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
