// ─── Nexus Launcher Core ───
// Backend for provisioning, patching and launching the game client and
// tracking a locally hosted server.
//
// Architecture:
//   core/
//     source/     Client source registry (zip, tar.xz)
//     downloader/ Fetch → extract → verify pipeline + progress sampling
//     runtime/    Native / WINE compatibility layers
//     patch/      Client patches + persisted patch manifest
//     launch/     boot.cfg rewrite + client runner
//     server/     Server process tracker + update lookup
//     state/      Launcher context + provisioning state machine

pub mod downloader;
pub mod error;
pub mod http;
pub mod launch;
pub mod patch;
pub mod runtime;
pub mod server;
pub mod source;
pub mod state;

#[cfg(test)]
pub mod test_support;
