use std::path::Path;
use std::process::Command;

use async_trait::async_trait;

use crate::core::error::LauncherResult;

use super::RuntimeLayer;

/// Windows runs the client as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeRuntime;

#[async_trait]
impl RuntimeLayer for NativeRuntime {
    fn name(&self) -> &'static str {
        "Native"
    }

    fn is_supported(&self) -> bool {
        cfg!(target_os = "windows")
    }

    fn can_install(&self) -> bool {
        false
    }

    fn is_installed(&self) -> bool {
        true
    }

    async fn install(&self) -> LauncherResult<()> {
        Ok(())
    }

    fn run_application(&self, executable: &Path, working_dir: &Path) -> Command {
        let mut cmd = Command::new(executable);
        cmd.current_dir(working_dir);
        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }
}
