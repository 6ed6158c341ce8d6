pub mod boot_config;
pub mod runner;
pub mod target;

pub use runner::{ClientRunner, LaunchOutcome, CLIENT_EXECUTABLE};
pub use target::LaunchTarget;
