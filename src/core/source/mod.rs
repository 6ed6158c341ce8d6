pub mod registry;

pub use registry::{SourceEntry, SourceMethod, SourceRegistry, SOURCES_FILE};
