use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};

/// Optional override for the built-in source list, read from the data dir.
pub const SOURCES_FILE: &str = "client_sources.json";

/// How an archive from a source is unpacked. Parsed from
/// the free-form `method` string of the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMethod {
    Zip,
    TarXz,
}

impl SourceMethod {
    /// File extension used for the downloaded archive (`client.<ext>`).
    pub fn extension(&self) -> &'static str {
        match self {
            SourceMethod::Zip => "zip",
            SourceMethod::TarXz => "tar.xz",
        }
    }
}

impl FromStr for SourceMethod {
    type Err = LauncherError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(SourceMethod::Zip),
            "tar.xz" | "txz" => Ok(SourceMethod::TarXz),
            other => Err(LauncherError::UnsupportedSourceMethod(other.to_string())),
        }
    }
}

impl fmt::Display for SourceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One way to obtain the client. Immutable value data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    #[serde(rename = "type")]
    pub source_type: String,
    pub name: String,
    pub method: String,
    pub url: String,
}

impl SourceEntry {
    pub fn new(source_type: &str, name: &str, method: &str, url: &str) -> Self {
        Self {
            source_type: source_type.to_string(),
            name: name.to_string(),
            method: method.to_string(),
            url: url.to_string(),
        }
    }

    /// Label shown in source pickers, e.g. `(Unpacked) lcdr`.
    pub fn display_label(&self) -> String {
        format!("({}) {}", self.source_type, self.name)
    }

    pub fn method(&self) -> LauncherResult<SourceMethod> {
        self.method.parse()
    }

    pub fn is_supported(&self) -> bool {
        self.method().is_ok()
    }
}

/// Immutable list of source descriptors. Lookup only.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    entries: Vec<SourceEntry>,
}

impl SourceRegistry {
    pub fn from_entries(entries: Vec<SourceEntry>) -> Self {
        Self { entries }
    }

    pub fn builtin() -> Self {
        Self::from_entries(vec![SourceEntry::new(
            "Unpacked",
            "Humanoid/lcdr's client",
            "zip",
            "https://s3.amazonaws.com/luclient/luclient.zip",
        )])
    }

    /// Reads `client_sources.json` from `data_dir`, falling back to the
    /// built-in list when the file is absent, unreadable or empty.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SOURCES_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::builtin(),
        };

        match serde_json::from_str::<Vec<SourceEntry>>(&raw) {
            Ok(entries) if !entries.is_empty() => {
                debug!("Loaded {} client sources from {:?}", entries.len(), path);
                Self::from_entries(entries)
            }
            Ok(_) => {
                warn!("Source list {:?} is empty, using built-in sources", path);
                Self::builtin()
            }
            Err(e) => {
                warn!("Corrupt source list {:?}: {}", path, e);
                Self::builtin()
            }
        }
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    /// Entries whose method this crate knows how to unpack.
    pub fn supported(&self) -> impl Iterator<Item = &SourceEntry> {
        self.entries.iter().filter(|entry| entry.is_supported())
    }

    pub fn find(&self, name: &str) -> Option<&SourceEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn find_by_label(&self, label: &str) -> Option<&SourceEntry> {
        self.entries
            .iter()
            .find(|entry| entry.display_label() == label)
    }

    /// Resolves the configured source, or the first supported one when no
    /// name is configured.
    pub fn current(&self, configured: Option<&str>) -> LauncherResult<&SourceEntry> {
        match configured {
            Some(name) => self
                .find(name)
                .ok_or_else(|| LauncherError::SourceNotFound(name.to_string())),
            None => self
                .supported()
                .next()
                .ok_or_else(|| LauncherError::SourceNotFound("<default>".to_string())),
        }
    }
}
