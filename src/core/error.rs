use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the provisioning backend.
/// Every module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // ── Archive ─────────────────────────────────────────
    #[error("Corrupted archive {path:?}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Serialization ───────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),

    // ── Sources ─────────────────────────────────────────
    #[error("Unsupported source method: {0}")]
    UnsupportedSourceMethod(String),

    #[error("Client source not found: {0}")]
    SourceNotFound(String),

    // ── Patches ─────────────────────────────────────────
    #[error("Patch not found: {0}")]
    PatchNotFound(String),

    // ── Runtime ─────────────────────────────────────────
    #[error("Runtime {name} unavailable: {message}")]
    RuntimeUnavailable { name: String, message: String },

    // ── Processes ───────────────────────────────────────
    #[error("Server already running (pid {0})")]
    ServerAlreadyRunning(u32),

    #[error("Failed to spawn {path:?}: {source}")]
    ProcessSpawn {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Launch ──────────────────────────────────────────
    #[error("Launch configuration error at {path:?}: {message}")]
    LaunchConfig { path: PathBuf, message: String },

    // ── State ───────────────────────────────────────────
    #[error("Provisioning state owner has shut down")]
    StateMachineClosed,

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

impl LauncherError {
    /// Whether the error means the archive on disk is malformed, which is the
    /// only failure the acquisition pipeline recovers from on its own.
    pub fn is_corrupt_archive(&self) -> bool {
        matches!(
            self,
            LauncherError::CorruptArchive { .. }
                | LauncherError::Zip(zip::result::ZipError::InvalidArchive(_))
                | LauncherError::Zip(zip::result::ZipError::UnsupportedArchive(_))
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LauncherError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}
