use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::patch::manifest::write_atomic;

pub const STATE_FILE: &str = "state.xml";

/// Persisted state of the server install. `process_id == 0` means no
/// process is tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "State", rename_all = "PascalCase")]
pub struct ProcessRecord {
    #[serde(default)]
    pub process_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
}

impl ProcessRecord {
    pub const NO_PROCESS: u32 = 0;

    /// Missing file means a fresh install.
    pub fn load(path: &Path) -> LauncherResult<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(LauncherError::io(path, e)),
        };
        match quick_xml::de::from_str(&raw) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!("Unreadable server state {:?}: {}", path, e);
                Err(e.into())
            }
        }
    }

    pub fn save(&self, path: &Path) -> LauncherResult<()> {
        let xml = quick_xml::se::to_string(self)?;
        write_atomic(path, xml.as_bytes())
    }
}
