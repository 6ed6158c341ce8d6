pub mod client;
pub mod extract;
pub mod pipeline;
pub mod verify;

pub use client::{
    spawn_progress_sampler, ArtifactFetcher, DownloadEstimate, DownloadProgress, HttpFetcher,
    EXPECTED_CLIENT_ARCHIVE_SIZE,
};
pub use pipeline::{AcquireOutcome, ArtifactPipeline, PipelinePaths, PipelinePhase};
pub use verify::{ArtifactVerifier, ChecksumAlgorithm, ChecksumVerifier, EntryPointVerifier};
