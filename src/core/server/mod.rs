pub mod record;
pub mod tracker;
pub mod version;

pub use record::{ProcessRecord, STATE_FILE};
pub use tracker::ServerProcessTracker;
pub use version::{GitHubCommitLookup, VersionLookup};
