// ─── Provisioning State ───
// Observable launcher state. A single owner task holds the value; every
// other task talks to it through `StateHandle`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::core::error::{LauncherError, LauncherResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProvisioningState {
    Uninitialized,
    DownloadArtifact,
    DownloadingArtifact,
    ExtractingArtifact,
    PatchingArtifact,
    NoTarget,
    Ready,
    Launching,
    RuntimeMissing,
    VerifyFailed,
}

impl ProvisioningState {
    /// Set and cleared only by explicit pipeline events; `recompute`
    /// leaves these alone.
    pub fn manual_change_only(&self) -> bool {
        matches!(
            self,
            ProvisioningState::DownloadingArtifact
                | ProvisioningState::ExtractingArtifact
                | ProvisioningState::PatchingArtifact
                | ProvisioningState::Launching
                | ProvisioningState::VerifyFailed
        )
    }

    /// Terminal failures the user has to act on.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProvisioningState::RuntimeMissing | ProvisioningState::VerifyFailed
        )
    }

    pub fn is_busy(&self) -> bool {
        self.manual_change_only() && !self.is_failure()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub previous: ProvisioningState,
    pub current: ProvisioningState,
}

/// What `recompute` needs to know about the machine it runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvironmentSnapshot {
    /// Runtime layer absent and not auto-installable.
    pub runtime_missing: bool,
    pub entry_point_present: bool,
    pub target_selected: bool,
}

#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    async fn snapshot(&self) -> EnvironmentSnapshot;
}

/// Plain state value plus subscribers. Not shared; lives inside the owner
/// task.
#[derive(Debug)]
pub struct ProvisioningStateMachine {
    state: ProvisioningState,
    subscribers: Vec<mpsc::UnboundedSender<StateChange>>,
}

impl Default for ProvisioningStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningStateMachine {
    pub fn new() -> Self {
        Self {
            state: ProvisioningState::Uninitialized,
            subscribers: Vec::new(),
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    pub fn subscribe(&mut self, subscriber: mpsc::UnboundedSender<StateChange>) {
        self.subscribers.push(subscriber);
    }

    /// Returns whether the state changed. Subscribers only hear about
    /// actual changes, in order.
    pub fn set_state(&mut self, next: ProvisioningState) -> bool {
        if next == self.state {
            return false;
        }
        let change = StateChange {
            previous: self.state,
            current: next,
        };
        self.state = next;
        debug!("State {:?} -> {:?}", change.previous, change.current);
        self.subscribers
            .retain(|subscriber| subscriber.send(change).is_ok());
        true
    }

    pub fn recompute(&mut self, env: &EnvironmentSnapshot) -> ProvisioningState {
        if self.state.manual_change_only() {
            trace!("Recompute skipped while {:?}", self.state);
            return self.state;
        }

        let next = if env.runtime_missing {
            ProvisioningState::RuntimeMissing
        } else if !env.entry_point_present {
            ProvisioningState::DownloadArtifact
        } else if !env.target_selected {
            ProvisioningState::NoTarget
        } else {
            ProvisioningState::Ready
        };
        self.set_state(next);
        self.state
    }
}

#[derive(Debug)]
enum StateRequest {
    Set(ProvisioningState),
    Recompute {
        response_tx: oneshot::Sender<ProvisioningState>,
    },
    Subscribe(mpsc::UnboundedSender<StateChange>),
}

/// Cloneable entry point to the owner task. Requests are applied in the
/// order they are sent.
#[derive(Debug, Clone)]
pub struct StateHandle {
    requests: mpsc::UnboundedSender<StateRequest>,
    current: watch::Receiver<ProvisioningState>,
}

impl StateHandle {
    /// Spawns the owner task. It exits once every handle is dropped.
    pub fn spawn(probe: Arc<dyn EnvironmentProbe>) -> (Self, JoinHandle<()>) {
        let (requests, mut inbox) = mpsc::unbounded_channel();
        let (current_tx, current) = watch::channel(ProvisioningState::Uninitialized);

        let owner = tokio::spawn(async move {
            let mut machine = ProvisioningStateMachine::new();
            while let Some(request) = inbox.recv().await {
                let response_tx = match request {
                    StateRequest::Set(next) => {
                        machine.set_state(next);
                        None
                    }
                    StateRequest::Recompute { response_tx } => {
                        if !machine.state().manual_change_only() {
                            let env = probe.snapshot().await;
                            machine.recompute(&env);
                        }
                        Some(response_tx)
                    }
                    StateRequest::Subscribe(subscriber) => {
                        machine.subscribe(subscriber);
                        None
                    }
                };
                current_tx.send_replace(machine.state());
                if let Some(response_tx) = response_tx {
                    let _ = response_tx.send(machine.state());
                }
            }
            debug!("Provisioning state owner stopped");
        });

        (Self { requests, current }, owner)
    }

    pub fn current(&self) -> ProvisioningState {
        *self.current.borrow()
    }

    /// Watch channel carrying the latest state.
    pub fn watch(&self) -> watch::Receiver<ProvisioningState> {
        self.current.clone()
    }

    /// Queues a state change on the owner task.
    pub fn set_state(&self, next: ProvisioningState) -> LauncherResult<()> {
        self.send(StateRequest::Set(next))
    }

    /// Re-derives the state from the environment unless a manual-only
    /// state is active. Resolves to the state after the request ran.
    pub async fn recompute(&self) -> LauncherResult<ProvisioningState> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(StateRequest::Recompute { response_tx })?;
        response_rx
            .await
            .map_err(|_| LauncherError::StateMachineClosed)
    }

    /// Every later change, in transition order.
    pub fn subscribe(&self) -> LauncherResult<mpsc::UnboundedReceiver<StateChange>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(StateRequest::Subscribe(tx))?;
        Ok(rx)
    }

    /// Handle that does not keep the owner task alive.
    pub fn downgrade(&self) -> WeakStateHandle {
        WeakStateHandle {
            requests: self.requests.downgrade(),
            current: self.current.clone(),
        }
    }

    fn send(&self, request: StateRequest) -> LauncherResult<()> {
        self.requests
            .send(request)
            .map_err(|_| LauncherError::StateMachineClosed)
    }
}

#[derive(Debug, Clone)]
pub struct WeakStateHandle {
    requests: mpsc::WeakUnboundedSender<StateRequest>,
    current: watch::Receiver<ProvisioningState>,
}

impl WeakStateHandle {
    /// `None` once every strong handle is gone.
    pub fn upgrade(&self) -> Option<StateHandle> {
        Some(StateHandle {
            requests: self.requests.upgrade()?,
            current: self.current.clone(),
        })
    }
}

/// Calls `recompute` every `interval`. Stops once the last strong handle is
/// dropped, so the ticker never keeps the owner task alive.
pub fn spawn_periodic_recompute(handle: &StateHandle, interval: Duration) -> JoinHandle<()> {
    let weak = handle.downgrade();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(handle) = weak.upgrade() else {
                break;
            };
            if handle.recompute().await.is_err() {
                break;
            }
        }
        debug!("Periodic recompute stopped");
    })
}
