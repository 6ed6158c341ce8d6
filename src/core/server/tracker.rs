use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use sysinfo::{Pid, ProcessStatus, System};
use tracing::{debug, info, warn};

use crate::core::error::{LauncherError, LauncherResult};

use super::record::{ProcessRecord, STATE_FILE};
use super::version::VersionLookup;

/// Tracks the single server process across launcher restarts. Every
/// mutation of the record is persisted before the call returns.
pub struct ServerProcessTracker {
    state_path: PathBuf,
    record: ProcessRecord,
    /// Set when this tracker spawned the server; waited on so it never
    /// lingers as a zombie.
    child: Option<Child>,
}

impl ServerProcessTracker {
    pub fn open(server_dir: &Path) -> LauncherResult<Self> {
        let state_path = server_dir.join(STATE_FILE);
        let record = ProcessRecord::load(&state_path)?;
        Ok(Self {
            state_path,
            record,
            child: None,
        })
    }

    pub fn record(&self) -> &ProcessRecord {
        &self.record
    }

    /// Resolves the stored pid against the live process table. A stale pid
    /// is reset to 0 and persisted before returning `false`.
    pub fn is_running(&mut self) -> LauncherResult<bool> {
        let pid = self.record.process_id;
        if pid == ProcessRecord::NO_PROCESS {
            return Ok(false);
        }

        let reaped = match self.child.as_mut().filter(|child| child.id() == pid) {
            Some(child) => match child.try_wait() {
                Ok(None) => return Ok(true),
                Ok(Some(status)) => {
                    info!("Server (pid {}) exited: {}", pid, status);
                    true
                }
                Err(err) => {
                    warn!("Could not poll server (pid {}): {}", pid, err);
                    false
                }
            },
            None => false,
        };
        if reaped {
            self.child = None;
        } else if process_alive(&System::new_all(), pid) {
            return Ok(true);
        }

        warn!("Server process {} is gone; clearing stale pid", pid);
        self.set_process_id(ProcessRecord::NO_PROCESS)?;
        Ok(false)
    }

    /// Spawns `command` unless a tracked server is still alive.
    pub fn start(&mut self, mut command: Command) -> LauncherResult<u32> {
        if self.is_running()? {
            return Err(LauncherError::ServerAlreadyRunning(self.record.process_id));
        }

        let program = PathBuf::from(command.get_program());
        let child = command.spawn().map_err(|source| LauncherError::ProcessSpawn {
            path: program.clone(),
            source,
        })?;
        let pid = child.id();
        self.set_process_id(pid)?;
        self.child = Some(child);
        info!("Started server {:?} (pid {})", program, pid);
        Ok(pid)
    }

    /// Kills the server and its children. Returns `false` when nothing was
    /// running.
    pub fn stop(&mut self) -> LauncherResult<bool> {
        let stopped = if self.is_running()? {
            let system = System::new_all();
            kill_tree(&system, Pid::from_u32(self.record.process_id));
            if let Some(mut child) = self.child.take() {
                if let Err(err) = child.wait() {
                    warn!("Could not reap server (pid {}): {}", child.id(), err);
                }
            }
            info!("Stopped server (pid {})", self.record.process_id);
            true
        } else {
            info!("Server not running");
            false
        };

        self.set_process_id(ProcessRecord::NO_PROCESS)?;
        Ok(stopped)
    }

    /// Stores the version that was just installed.
    pub fn mark_installed(&mut self, version: &str) -> LauncherResult<()> {
        self.record.current_version = Some(version.to_string());
        self.persist()
    }

    pub fn is_update_available(&self, latest: &str) -> bool {
        self.record.current_version.as_deref() != Some(latest)
    }

    pub async fn check_for_update(&self, lookup: &dyn VersionLookup) -> LauncherResult<bool> {
        let latest = lookup.latest_version().await?;
        let available = self.is_update_available(&latest);
        debug!(
            "Server version {:?}, latest {} (update: {})",
            self.record.current_version, latest, available
        );
        Ok(available)
    }

    fn set_process_id(&mut self, pid: u32) -> LauncherResult<()> {
        self.record.process_id = pid;
        self.persist()
    }

    fn persist(&self) -> LauncherResult<()> {
        self.record.save(&self.state_path)
    }
}

/// Zombies have exited and only wait to be reaped.
fn process_alive(system: &System, pid: u32) -> bool {
    system
        .process(Pid::from_u32(pid))
        .map(|process| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

/// Kills `root` and every descendant, deepest first.
fn kill_tree(system: &System, root: Pid) {
    let mut tree = vec![root];
    let mut index = 0;
    while index < tree.len() {
        let parent = tree[index];
        tree.extend(
            system
                .processes()
                .iter()
                .filter(|(_, process)| process.parent() == Some(parent))
                .map(|(pid, _)| *pid),
        );
        index += 1;
    }

    for pid in tree.into_iter().rev() {
        if let Some(process) = system.process(pid) {
            if !process.kill() {
                warn!("Failed to kill process {}", pid);
            }
        }
    }
}
