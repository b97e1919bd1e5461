use crate::emergency::terminate_leftover;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use trout_core::{
    GuardianState, LaunchCommand, ProcessHandle, ProcessId, ProcessManager, ProcessTermination,
    TerminationConfig, TerminationResult,
};

/// Keeps one session-wide coordination process (the ROS master) alive
///
/// The guardian runs through `Uninitialized -> Running -> Stopped` exactly
/// once. Failures are logged, never returned.
pub struct SessionGuardian<M: ProcessManager + 'static> {
    manager: Arc<M>,
    command: LaunchCommand,
    termination: TerminationConfig,
    slot: Mutex<GuardianSlot<M::Handle>>,
}

struct GuardianSlot<H> {
    state: GuardianState,
    handle: Option<H>,
}

impl<M: ProcessManager + 'static> SessionGuardian<M> {
    pub fn new(manager: Arc<M>, command: LaunchCommand, termination: TerminationConfig) -> Self {
        Self {
            manager,
            command,
            termination,
            slot: Mutex::new(GuardianSlot {
                state: GuardianState::Uninitialized,
                handle: None,
            }),
        }
    }

    /// Spawn the coordination process; only the first call does anything
    pub async fn start(&self) -> GuardianState {
        let mut slot = self.slot.lock().await;
        if slot.state != GuardianState::Uninitialized {
            return slot.state;
        }

        match self
            .manager
            .spawn_process(&self.command, None, &HashMap::new())
            .await
        {
            Ok(handle) => {
                info!(pid = %handle.pid(), command = %self.command, "Session guardian started");
                slot.handle = Some(handle);
                slot.state = GuardianState::Running;
            }
            Err(e) => {
                let cause = format!("{e:#}");
                error!(command = %self.command, error = %cause, "Failed to start session guardian");
                slot.state = GuardianState::Stopped;
            }
        }
        slot.state
    }

    /// Terminate the coordination process
    ///
    /// Returns `None` when there was nothing to stop, including every call
    /// after the first.
    pub async fn shutdown(&self) -> Option<TerminationResult> {
        let mut slot = self.slot.lock().await;
        slot.state = GuardianState::Stopped;
        let handle = slot.handle.as_ref()?;

        info!(pid = %handle.pid(), command = %handle.command(), "Stopping session guardian");
        let result = self
            .manager
            .terminate_completely(handle, &self.termination)
            .await;
        slot.handle = None;

        if result.is_success() {
            info!("Session guardian stopped");
        } else {
            warn!(result = %result, "Session guardian did not terminate cleanly");
        }
        Some(result)
    }

    pub async fn state(&self) -> GuardianState {
        self.slot.lock().await.state
    }

    pub async fn pid(&self) -> Option<ProcessId> {
        self.slot.lock().await.handle.as_ref().map(|handle| handle.pid())
    }

    /// Whether the coordination process is still alive
    pub async fn is_alive(&self) -> bool {
        let slot = self.slot.lock().await;
        slot.handle
            .as_ref()
            .and_then(|handle| handle.try_status().ok())
            .is_some_and(|status| status.is_running())
    }
}

impl<M: ProcessManager + 'static> Drop for SessionGuardian<M> {
    fn drop(&mut self) {
        if let Some(handle) = self.slot.get_mut().handle.as_ref() {
            terminate_leftover("session guardian", handle);
        }
    }
}
