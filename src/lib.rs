pub mod core;

use tracing_subscriber::EnvFilter;

/// Installs the `fmt` subscriber. `RUST_LOG` wins over the default filter.
/// Safe to call more than once.
pub fn init_tracing() {
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,nexus_launcher_lib=debug")),
        )
        .try_init();

    if result.is_ok() {
        tracing::info!("Nexus launcher backend starting...");
    }
}
