pub mod app_state;
pub mod machine;

pub use app_state::{AppState, LauncherSettings};
pub use machine::{
    spawn_periodic_recompute, EnvironmentProbe, EnvironmentSnapshot, ProvisioningState,
    ProvisioningStateMachine, StateChange, StateHandle, WeakStateHandle,
};
