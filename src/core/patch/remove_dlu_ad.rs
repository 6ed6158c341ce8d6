use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::error::{LauncherError, LauncherResult};

use super::{Patch, PatchId};

const AD_MARKER: &str = "DLU is coming!";

/// (original, replacement) pairs in `locale/locale.xml`.
const REPLACEMENTS: [(&str, &str); 3] = [
    (AD_MARKER, "Build on Nimbus Isle!"),
    (
        "Follow us on Twitter",
        "Get inspired and build on Nimbus Station&apos;s largest Property!",
    ),
    (
        "@darkflameuniv",
        "Look for the launch pad by the water&apos;s edge in Brick Annexe!",
    ),
];

/// Swaps the "DLU is coming!" loading tips for in-game hints.
pub struct RemoveDluAdPatch {
    locale_file: PathBuf,
}

impl RemoveDluAdPatch {
    pub fn new(client_dir: &Path) -> Self {
        Self {
            locale_file: client_dir.join("locale").join("locale.xml"),
        }
    }

    async fn rewrite(&self, forward: bool) -> LauncherResult<()> {
        let contents = match tokio::fs::read_to_string(&self.locale_file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(LauncherError::io(&self.locale_file, e)),
        };

        let rewritten = REPLACEMENTS.iter().fold(contents, |text, (from, to)| {
            if forward {
                text.replace(from, to)
            } else {
                text.replace(to, from)
            }
        });
        tokio::fs::write(&self.locale_file, rewritten)
            .await
            .map_err(|e| LauncherError::io(&self.locale_file, e))
    }
}

#[async_trait]
impl Patch for RemoveDluAdPatch {
    fn id(&self) -> PatchId {
        PatchId::RemoveDluAd
    }

    /// Nothing to remove when the locale file is absent.
    fn is_installed(&self) -> bool {
        match std::fs::read_to_string(&self.locale_file) {
            Ok(contents) => !contents.contains(AD_MARKER),
            Err(_) => true,
        }
    }

    async fn install(&self) -> LauncherResult<()> {
        if self.is_installed() {
            return Ok(());
        }
        self.rewrite(true).await
    }

    async fn uninstall(&self) -> LauncherResult<()> {
        self.rewrite(false).await
    }
}
