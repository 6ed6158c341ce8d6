use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::error::{LauncherError, LauncherResult};

pub const MANIFEST_FILE: &str = "patches.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchManifestEntry {
    pub patch_id: String,
    pub install_directory: PathBuf,
    pub installed: bool,
    /// Last time `installed` was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Persisted, ordered record of applied patches. Only the patcher writes it.
#[derive(Debug, Clone)]
pub struct PatchManifest {
    path: PathBuf,
    entries: Vec<PatchManifestEntry>,
}

impl PatchManifest {
    /// A missing file is an empty manifest.
    pub fn load(path: &Path) -> LauncherResult<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(LauncherError::io(path, e)),
        };
        debug!("Loaded patch manifest {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[PatchManifestEntry] {
        &self.entries
    }

    pub fn get(&self, patch_id: &str) -> Option<&PatchManifestEntry> {
        self.entries.iter().find(|e| e.patch_id == patch_id)
    }

    /// Records the state of one patch and persists the manifest.
    pub fn record(&mut self, patch_id: &str, install_directory: &Path, installed: bool) -> LauncherResult<()> {
        let mut entries = self.entries.clone();
        match entries.iter_mut().find(|e| e.patch_id == patch_id) {
            Some(entry) => {
                entry.install_directory = install_directory.to_path_buf();
                entry.installed = installed;
                entry.updated_at = Some(Utc::now());
            }
            None => entries.push(PatchManifestEntry {
                patch_id: patch_id.to_string(),
                install_directory: install_directory.to_path_buf(),
                installed,
                updated_at: Some(Utc::now()),
            }),
        }
        self.commit(entries)
    }

    /// Rewrites every entry stored under `old_parent` to live under
    /// `new_parent` and persists the result in one write. Returns how many
    /// entries changed; repeating a relocation changes nothing.
    pub fn relocate(&mut self, old_parent: &Path, new_parent: &Path) -> LauncherResult<usize> {
        if old_parent == new_parent {
            return Ok(0);
        }
        // Moving into a subdirectory: entries already there still match
        // `old_parent` and must not be pushed down a second time.
        let nested = new_parent.starts_with(old_parent);

        let mut changed = 0;
        let entries = self
            .entries
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                if nested && entry.install_directory.starts_with(new_parent) {
                    return entry;
                }
                if let Ok(rest) = entry.install_directory.strip_prefix(old_parent) {
                    entry.install_directory = new_parent.join(rest);
                    changed += 1;
                }
                entry
            })
            .collect::<Vec<_>>();

        if changed > 0 {
            self.commit(entries)?;
            info!(
                "Relocated {} patch manifest entries {:?} -> {:?}",
                changed, old_parent, new_parent
            );
        }
        Ok(changed)
    }

    /// Persists `entries` and only then adopts them in memory.
    fn commit(&mut self, entries: Vec<PatchManifestEntry>) -> LauncherResult<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(&entries)?)?;
        self.entries = entries;
        Ok(())
    }
}

/// Writes through a sibling temp file and a rename so readers never see a
/// half-written manifest.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> LauncherResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LauncherError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents).map_err(|e| LauncherError::io(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        warn!("Failed to replace {:?}: {}", path, e);
        let _ = std::fs::remove_file(&tmp);
        return Err(LauncherError::io(path, e));
    }
    Ok(())
}
