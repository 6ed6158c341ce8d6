// ─── Acquisition Pipeline ───
// Download → Extract → Verify for one client source, with a single
// forced re-download when the archive turns out to be corrupt.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::source::{SourceEntry, SourceMethod};

use super::client::{ArtifactFetcher, DownloadProgress};
use super::extract::{extract_archive, promote_staging};
use super::verify::ArtifactVerifier;

const STAGING_DIR_NAME: &str = "ClientExtract";

/// Discrete pipeline steps. Only the first four are reported through the
/// phase callback; `Done` is observable on the phase watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum PipelinePhase {
    Download,
    Extract,
    Verify,
    VerifyFailed,
    Done,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Download => "Download",
            PipelinePhase::Extract => "Extract",
            PipelinePhase::Verify => "Verify",
            PipelinePhase::VerifyFailed => "VerifyFailed",
            PipelinePhase::Done => "Done",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed `acquire` call. Verification failure is not an
/// error: the pipeline stops in a terminal state and keeps the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    AlreadyInstalled,
    Installed,
    VerifyFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    /// Downloaded archive, `<parent>/client.<ext>`.
    pub archive: PathBuf,
    /// Scratch directory the archive is unpacked into.
    pub staging: PathBuf,
    /// Final install location of the client.
    pub install: PathBuf,
}

impl PipelinePaths {
    pub fn new(parent: &Path, install: &Path, method: SourceMethod) -> Self {
        Self {
            archive: parent.join(format!("client.{}", method.extension())),
            staging: parent.join(STAGING_DIR_NAME),
            install: install.to_path_buf(),
        }
    }
}

pub struct ArtifactPipeline {
    source: SourceEntry,
    method: SourceMethod,
    paths: PipelinePaths,
    fetcher: Arc<dyn ArtifactFetcher>,
    verifier: Arc<dyn ArtifactVerifier>,
    progress: DownloadProgress,
    phase: watch::Sender<Option<PipelinePhase>>,
}

impl ArtifactPipeline {
    pub fn new(
        source: SourceEntry,
        paths: PipelinePaths,
        fetcher: Arc<dyn ArtifactFetcher>,
        verifier: Arc<dyn ArtifactVerifier>,
    ) -> LauncherResult<Self> {
        let method = source.method()?;
        let (phase, _) = watch::channel(None);
        Ok(Self {
            source,
            method,
            paths,
            fetcher,
            verifier,
            progress: DownloadProgress::new(),
            phase,
        })
    }

    pub fn source(&self) -> &SourceEntry {
        &self.source
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    /// Handle for advisory progress readers.
    pub fn progress(&self) -> DownloadProgress {
        self.progress.clone()
    }

    /// Latest phase; `None` before the first run and after a fatal error.
    pub fn phase_watch(&self) -> watch::Receiver<Option<PipelinePhase>> {
        self.phase.subscribe()
    }

    /// Extracted and passing verification. An install left behind by a
    /// failed verification does not count.
    pub async fn is_installed(&self) -> LauncherResult<bool> {
        if !self.paths.install.is_dir() {
            return Ok(false);
        }
        self.verifier.verify(&self.paths.install).await
    }

    /// Acquires the client. `on_phase` runs synchronously on this task
    /// before each phase starts its work.
    #[instrument(skip(self, on_phase), fields(source = %self.source.name))]
    pub async fn acquire<F>(&self, force: bool, mut on_phase: F) -> LauncherResult<AcquireOutcome>
    where
        F: FnMut(PipelinePhase) + Send,
    {
        if !force && self.is_installed().await? {
            info!("Client already extracted at {:?}", self.paths.install);
            return Ok(AcquireOutcome::AlreadyInstalled);
        }

        let result = self.run(force, &mut on_phase).await;
        if result.is_err() {
            self.phase.send_replace(None);
        }
        result
    }

    async fn run<F>(&self, force: bool, on_phase: &mut F) -> LauncherResult<AcquireOutcome>
    where
        F: FnMut(PipelinePhase) + Send,
    {
        self.enter(PipelinePhase::Download, on_phase);
        self.download(force).await?;

        self.enter(PipelinePhase::Extract, on_phase);
        match self.extract(force).await {
            Ok(()) => {}
            Err(err) if err.is_corrupt_archive() => {
                warn!("Failed to extract the client ({}); retrying download", err);
                self.enter(PipelinePhase::Download, on_phase);
                self.download(true).await?;
                self.enter(PipelinePhase::Extract, on_phase);
                self.extract(force).await?;
            }
            Err(err) => return Err(err),
        }

        self.enter(PipelinePhase::Verify, on_phase);
        if !self.verifier.verify(&self.paths.install).await? {
            warn!(
                "Verification failed for {:?}; keeping {:?}",
                self.paths.install, self.paths.archive
            );
            self.enter(PipelinePhase::VerifyFailed, on_phase);
            return Ok(AcquireOutcome::VerifyFailed);
        }

        remove_file_if_exists(&self.paths.archive).await?;
        self.phase.send_replace(Some(PipelinePhase::Done));
        info!("Client installed at {:?}", self.paths.install);
        Ok(AcquireOutcome::Installed)
    }

    fn enter<F>(&self, phase: PipelinePhase, on_phase: &mut F)
    where
        F: FnMut(PipelinePhase),
    {
        debug!("Pipeline phase -> {}", phase);
        self.phase.send_replace(Some(phase));
        on_phase(phase);
    }

    async fn download(&self, force: bool) -> LauncherResult<()> {
        let archive = &self.paths.archive;
        if !force && archive.exists() {
            info!("Client archive already downloaded at {:?}", archive);
            return Ok(());
        }

        remove_file_if_exists(archive).await?;
        self.fetcher
            .fetch(&self.source.url, archive, &self.progress)
            .await
    }

    async fn extract(&self, force: bool) -> LauncherResult<()> {
        if force {
            remove_dir_if_exists(&self.paths.staging).await?;
            remove_dir_if_exists(&self.paths.install).await?;
        }

        let method = self.method;
        let paths = self.paths.clone();
        tokio::task::spawn_blocking(move || {
            extract_archive(method, &paths.archive, &paths.staging)?;
            promote_staging(&paths.staging, &paths.install)
        })
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
    }
}

async fn remove_file_if_exists(path: &Path) -> LauncherResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LauncherError::io(path, e)),
    }
}

async fn remove_dir_if_exists(path: &Path) -> LauncherResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LauncherError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::write_zip;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Payload {
        Corrupt,
        Valid,
        /// Well-formed archive without the entry point.
        Incomplete,
        Unreachable,
    }

    struct ScriptedFetcher {
        script: Mutex<VecDeque<Payload>>,
        fallback: Payload,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(script: &[Payload], fallback: Payload) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ArtifactFetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            url: &str,
            dest: &Path,
            progress: &DownloadProgress,
        ) -> LauncherResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let payload = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback);
            match payload {
                Payload::Corrupt => {
                    std::fs::write(dest, b"PK\x03\x04 truncated garbage").unwrap();
                    progress.set_total(26);
                }
                Payload::Valid => write_zip(
                    dest,
                    &[
                        ("LCDR Unpacked/legouniverse.exe", "MZ"),
                        ("LCDR Unpacked/boot.cfg", "SERVERNAME=0:Overbuild,"),
                    ],
                ),
                Payload::Incomplete => {
                    write_zip(dest, &[("LCDR Unpacked/boot.cfg", "SERVERNAME=0:Overbuild,")])
                }
                Payload::Unreachable => {
                    return Err(LauncherError::DownloadFailed {
                        url: url.to_string(),
                        status: 503,
                    })
                }
            }
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        paths: PipelinePaths,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let paths = PipelinePaths::new(dir.path(), &dir.path().join("Client"), SourceMethod::Zip);
        Fixture { _dir: dir, paths }
    }

    fn pipeline(
        fixture: &Fixture,
        fetcher: Arc<ScriptedFetcher>,
        verifier: Arc<dyn ArtifactVerifier>,
    ) -> ArtifactPipeline {
        let source = SourceEntry::new("Unpacked", "test", "zip", "https://example.invalid/c.zip");
        ArtifactPipeline::new(source, fixture.paths.clone(), fetcher, verifier).unwrap()
    }

    fn entry_point() -> Arc<dyn ArtifactVerifier> {
        Arc::new(|dir: &Path| dir.join("legouniverse.exe").is_file())
    }

    #[tokio::test]
    async fn already_extracted_client_is_a_no_op() {
        let fixture = fixture();
        std::fs::create_dir_all(&fixture.paths.install).unwrap();
        std::fs::write(fixture.paths.install.join("legouniverse.exe"), b"MZ").unwrap();
        let fetcher = ScriptedFetcher::new(&[], Payload::Valid);
        let pipeline = pipeline(&fixture, fetcher.clone(), entry_point());

        let mut phases = Vec::new();
        let outcome = pipeline.acquire(false, |p| phases.push(p)).await.unwrap();

        assert_eq!(outcome, AcquireOutcome::AlreadyInstalled);
        assert!(phases.is_empty());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn failed_verification_is_not_treated_as_installed() {
        let fixture = fixture();
        let fetcher = ScriptedFetcher::new(&[], Payload::Incomplete);
        let pipeline = pipeline(&fixture, fetcher.clone(), entry_point());

        let first = pipeline.acquire(false, |_| {}).await.unwrap();
        assert_eq!(first, AcquireOutcome::VerifyFailed);
        assert!(fixture.paths.install.is_dir());

        let mut phases = Vec::new();
        let second = pipeline.acquire(false, |p| phases.push(p)).await.unwrap();

        assert_eq!(second, AcquireOutcome::VerifyFailed);
        assert_eq!(
            phases,
            vec![
                PipelinePhase::Download,
                PipelinePhase::Extract,
                PipelinePhase::Verify,
                PipelinePhase::VerifyFailed,
            ]
        );
        assert_eq!(fetcher.calls(), 1);
        assert!(fixture.paths.archive.exists());
    }

    #[tokio::test]
    async fn corrupt_archive_is_downloaded_again_exactly_once() {
        let fixture = fixture();
        let fetcher = ScriptedFetcher::new(&[Payload::Corrupt, Payload::Valid], Payload::Valid);
        let pipeline = pipeline(&fixture, fetcher.clone(), entry_point());

        let mut phases = Vec::new();
        let outcome = pipeline.acquire(false, |p| phases.push(p)).await.unwrap();

        assert_eq!(outcome, AcquireOutcome::Installed);
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(
            phases,
            vec![
                PipelinePhase::Download,
                PipelinePhase::Extract,
                PipelinePhase::Download,
                PipelinePhase::Extract,
                PipelinePhase::Verify,
            ]
        );
        assert!(fixture.paths.install.join("legouniverse.exe").exists());
        assert!(!fixture.paths.archive.exists());
        assert_eq!(*pipeline.phase_watch().borrow(), Some(PipelinePhase::Done));
    }

    #[tokio::test]
    async fn second_corruption_is_fatal() {
        let fixture = fixture();
        let fetcher = ScriptedFetcher::new(&[], Payload::Corrupt);
        let pipeline = pipeline(&fixture, fetcher.clone(), entry_point());

        let mut phases = Vec::new();
        let err = pipeline
            .acquire(false, |p| phases.push(p))
            .await
            .unwrap_err();

        assert!(err.is_corrupt_archive());
        assert_eq!(fetcher.calls(), 2);
        let extract_attempts = phases
            .iter()
            .filter(|p| **p == PipelinePhase::Extract)
            .count();
        assert_eq!(extract_attempts, 2);
        assert_eq!(*pipeline.phase_watch().borrow(), None);
    }

    #[tokio::test]
    async fn failed_verification_keeps_the_archive() {
        let fixture = fixture();
        let fetcher = ScriptedFetcher::new(&[], Payload::Valid);
        let reject: Arc<dyn ArtifactVerifier> = Arc::new(|_: &Path| false);
        let pipeline = pipeline(&fixture, fetcher, reject);

        let mut phases = Vec::new();
        let outcome = pipeline.acquire(false, |p| phases.push(p)).await.unwrap();

        assert_eq!(outcome, AcquireOutcome::VerifyFailed);
        assert_eq!(phases.last(), Some(&PipelinePhase::VerifyFailed));
        assert!(fixture.paths.archive.exists());
    }

    #[tokio::test]
    async fn existing_archive_is_reused_without_force() {
        let fixture = fixture();
        write_zip(&fixture.paths.archive, &[("Client/legouniverse.exe", "MZ")]);
        let fetcher = ScriptedFetcher::new(&[], Payload::Corrupt);
        let pipeline = pipeline(&fixture, fetcher.clone(), entry_point());

        let outcome = pipeline.acquire(false, |_| {}).await.unwrap();

        assert_eq!(outcome, AcquireOutcome::Installed);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn force_replaces_an_existing_install() {
        let fixture = fixture();
        std::fs::create_dir_all(&fixture.paths.install).unwrap();
        std::fs::write(fixture.paths.install.join("stale.txt"), b"old").unwrap();
        let fetcher = ScriptedFetcher::new(&[], Payload::Valid);
        let pipeline = pipeline(&fixture, fetcher.clone(), entry_point());

        let outcome = pipeline.acquire(true, |_| {}).await.unwrap();

        assert_eq!(outcome, AcquireOutcome::Installed);
        assert_eq!(fetcher.calls(), 1);
        assert!(!fixture.paths.install.join("stale.txt").exists());
    }

    #[tokio::test]
    async fn network_failure_is_not_retried() {
        let fixture = fixture();
        let fetcher = ScriptedFetcher::new(&[], Payload::Unreachable);
        let pipeline = pipeline(&fixture, fetcher.clone(), entry_point());

        let err = pipeline.acquire(false, |_| {}).await.unwrap_err();

        assert!(matches!(err, LauncherError::DownloadFailed { status: 503, .. }));
        assert_eq!(fetcher.calls(), 1);
    }
}
