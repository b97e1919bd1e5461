//! The process supervisor: start, stop and toggle registered units.
//!
//! Each unit owns a slot guarded by its own async mutex, so operations on one
//! unit run strictly one after another while different units never wait on
//! each other. A slot holds the handle of the unit's process group, or nothing
//! when the unit is stopped.

mod watcher;

use crate::emergency::terminate_leftover;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trout_core::{
    ChangeCause, LaunchRegistry, ProcessHandle, ProcessId, ProcessManager, ProcessStatus,
    ProcessTermination, Result, StateChange, SupervisorError, TerminationConfig, Unit, UnitAction,
    UnitId, UnitState,
};

/// Capacity of the state change channel; slow subscribers see `Lagged`
const EVENT_CAPACITY: usize = 64;

/// Outcome of a batch operation, one entry per unit in declaration order
pub type BatchResult = Vec<(UnitId, Result<UnitState>)>;

type Slot<H> = Mutex<Option<H>>;

/// Owns every active unit process and serializes the operations on each unit
///
/// Cloning is cheap and every clone drives the same set of processes.
pub struct ProcessSupervisor<M: ProcessManager + 'static> {
    inner: Arc<SupervisorInner<M>>,
}

impl<M: ProcessManager + 'static> Clone for ProcessSupervisor<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct SupervisorInner<M: ProcessManager + 'static> {
    registry: LaunchRegistry,
    manager: Arc<M>,
    slots: HashMap<UnitId, Slot<M::Handle>>,
    termination: TerminationConfig,
    events: broadcast::Sender<StateChange>,
    cancellation_token: CancellationToken,
}

impl<M: ProcessManager + 'static> ProcessSupervisor<M> {
    /// Create a supervisor for the units of `registry` and start its exit watcher
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        registry: LaunchRegistry,
        manager: Arc<M>,
        termination: TerminationConfig,
        watch_interval: Duration,
    ) -> Self {
        let slots = registry
            .units()
            .map(|unit| (unit.id.clone(), Mutex::new(None)))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(SupervisorInner {
            registry,
            manager,
            slots,
            termination,
            events,
            cancellation_token: CancellationToken::new(),
        });

        watcher::spawn(
            Arc::downgrade(&inner),
            inner.cancellation_token.clone(),
            watch_interval,
        );

        info!(units = inner.registry.len(), "Process supervisor started");
        Self { inner }
    }

    pub fn registry(&self) -> &LaunchRegistry {
        &self.inner.registry
    }

    /// Receive every state change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.events.subscribe()
    }

    /// Start a unit; returns the current state if it is already running
    pub async fn start(&self, unit_id: &str) -> Result<UnitState> {
        let (unit, slot) = self.inner.resolve(unit_id)?;
        let mut slot = slot.lock().await;
        self.inner.start_locked(unit, &mut slot).await
    }

    /// Stop a unit and everything it started; stopping a stopped unit is a no-op
    pub async fn stop(&self, unit_id: &str) -> Result<UnitState> {
        let (unit, slot) = self.inner.resolve(unit_id)?;
        let mut slot = slot.lock().await;
        self.inner.stop_locked(unit, &mut slot).await
    }

    /// Stop a running unit or start a stopped one, as a single step
    pub async fn toggle(&self, unit_id: &str) -> Result<UnitState> {
        let (unit, slot) = self.inner.resolve(unit_id)?;
        let mut slot = slot.lock().await;
        if self.inner.refresh(unit, &mut slot).await.is_some() {
            self.inner.stop_locked(unit, &mut slot).await
        } else {
            self.inner.start_locked(unit, &mut slot).await
        }
    }

    /// Liveness-checked state of a unit
    pub async fn query(&self, unit_id: &str) -> Result<UnitState> {
        let (unit, slot) = self.inner.resolve(unit_id)?;
        let mut slot = slot.lock().await;
        Ok(match self.inner.refresh(unit, &mut slot).await {
            Some(pid) => UnitState::Running { pid },
            None => UnitState::Stopped,
        })
    }

    /// Whether the unit's process is alive; unknown units are never running
    pub async fn is_running(&self, unit_id: &str) -> bool {
        self.query(unit_id)
            .await
            .is_ok_and(|state| state.is_running())
    }

    /// Ids of all live units in declaration order
    pub async fn running_units(&self) -> Vec<UnitId> {
        let mut running = Vec::new();
        for unit in self.inner.registry.units() {
            if self.is_running(unit.id.as_str()).await {
                running.push(unit.id.clone());
            }
        }
        running
    }

    /// Run `action` on a background task so the caller never waits on a stop
    pub fn dispatch(
        &self,
        action: UnitAction,
        unit_id: impl Into<UnitId>,
    ) -> JoinHandle<Result<UnitState>> {
        let supervisor = self.clone();
        let unit_id = unit_id.into();
        tokio::spawn(async move { supervisor.apply(action, unit_id.as_str()).await })
    }

    pub async fn apply(&self, action: UnitAction, unit_id: &str) -> Result<UnitState> {
        match action {
            UnitAction::Start => self.start(unit_id).await,
            UnitAction::Stop => self.stop(unit_id).await,
            UnitAction::Toggle => self.toggle(unit_id).await,
        }
    }

    /// Start every unit of a group; failures are reported per unit
    pub async fn start_group(&self, group: &str) -> Result<BatchResult> {
        let ids = self.group_ids(group)?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.start(id.as_str()).await;
            results.push((id, result));
        }
        Ok(results)
    }

    /// Stop every unit of a group concurrently
    pub async fn stop_group(&self, group: &str) -> Result<BatchResult> {
        let ids = self.group_ids(group)?;
        Ok(self.stop_each(ids).await)
    }

    /// Stop the whole group if any member is running, otherwise start it
    pub async fn toggle_group(&self, group: &str) -> Result<BatchResult> {
        let ids = self.group_ids(group)?;
        let mut any_running = false;
        for id in &ids {
            if self.is_running(id.as_str()).await {
                any_running = true;
                break;
            }
        }

        if any_running {
            self.stop_group(group).await
        } else {
            self.start_group(group).await
        }
    }

    /// Stop every unit that still holds a process
    pub async fn stop_all(&self) -> BatchResult {
        let mut active = Vec::new();
        for (id, slot) in &self.inner.slots {
            if slot.lock().await.is_some() {
                active.push(id.clone());
            }
        }
        active.sort_by_key(|id| self.inner.registry.position(id.as_str()));

        if !active.is_empty() {
            info!(count = active.len(), "Stopping all active units");
        }
        self.stop_each(active).await
    }

    fn group_ids(&self, group: &str) -> Result<Vec<UnitId>> {
        Ok(self
            .inner
            .registry
            .group(group)?
            .into_iter()
            .map(|unit| unit.id.clone())
            .collect())
    }

    async fn stop_each(&self, ids: Vec<UnitId>) -> BatchResult {
        let tasks: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let task = self.dispatch(UnitAction::Stop, id.clone());
                (id, task)
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for (id, task) in tasks {
            let result = task.await.unwrap_or_else(|e| {
                Err(SupervisorError::TerminationFailed {
                    unit_id: id.clone(),
                    cause: format!("stop task failed: {e}"),
                })
            });
            results.push((id, result));
        }
        results
    }
}

impl<M: ProcessManager + 'static> SupervisorInner<M> {
    fn resolve(&self, unit_id: &str) -> Result<(&Unit, &Slot<M::Handle>)> {
        let unit = self.registry.lookup(unit_id)?;
        let slot = self
            .slots
            .get(unit_id)
            .ok_or_else(|| SupervisorError::UnknownUnit(unit.id.clone()))?;
        Ok((unit, slot))
    }

    fn emit(&self, unit_id: &UnitId, state: UnitState, cause: ChangeCause) {
        // No subscribers is fine
        let _ = self.events.send(StateChange {
            unit_id: unit_id.clone(),
            state,
            cause,
        });
    }

    /// Check the slot's handle and discard it once its whole group is gone
    ///
    /// A leader that exits while group members live on (a wrapper script that
    /// backgrounds its workload) keeps the unit running, so `stop` can still
    /// reach those members.
    async fn refresh(&self, unit: &Unit, slot: &mut Option<M::Handle>) -> Option<ProcessId> {
        let handle = slot.as_ref()?;
        let pid = handle.pid();
        match handle.try_status() {
            Ok(ProcessStatus::Running) => Some(pid),
            Ok(ProcessStatus::Exited { code }) => {
                if !self.manager.group_exited(handle).await {
                    debug!(unit = %unit.id, pid = %pid, "Leader exited, group members still running");
                    return Some(pid);
                }
                info!(unit = %unit.id, pid = %pid, code = ?code, "Unit exited on its own");
                *slot = None;
                self.emit(&unit.id, UnitState::Stopped, ChangeCause::Exited { code });
                None
            }
            Err(e) => {
                // Keep the handle so a live process is never forgotten
                warn!(unit = %unit.id, error = %e, "Failed to query unit status");
                Some(pid)
            }
        }
    }

    async fn start_locked(&self, unit: &Unit, slot: &mut Option<M::Handle>) -> Result<UnitState> {
        if let Some(pid) = self.refresh(unit, slot).await {
            debug!(unit = %unit.id, pid = %pid, "Unit already running");
            return Ok(UnitState::Running { pid });
        }

        info!(unit = %unit.id, command = %unit.command, "Starting unit");
        match self
            .manager
            .spawn_process(&unit.command, unit.working_directory.as_deref(), &unit.env)
            .await
        {
            Ok(handle) => {
                let pid = handle.pid();
                *slot = Some(handle);
                self.emit(&unit.id, UnitState::Running { pid }, ChangeCause::Started);
                Ok(UnitState::Running { pid })
            }
            Err(e) => {
                let cause = format!("{e:#}");
                error!(unit = %unit.id, error = %cause, "Failed to launch unit");
                self.emit(
                    &unit.id,
                    UnitState::Stopped,
                    ChangeCause::LaunchFailed(cause.clone()),
                );
                Err(SupervisorError::LaunchFailed {
                    unit_id: unit.id.clone(),
                    cause,
                })
            }
        }
    }

    async fn stop_locked(&self, unit: &Unit, slot: &mut Option<M::Handle>) -> Result<UnitState> {
        let Some(handle) = slot.as_ref() else {
            debug!(unit = %unit.id, "Unit already stopped");
            return Ok(UnitState::Stopped);
        };

        info!(unit = %unit.id, pid = %handle.pid(), command = %handle.command(), "Stopping unit");
        let result = self
            .manager
            .terminate_completely(handle, &self.termination)
            .await;

        // Only cleared after termination completes, so a cancelled stop keeps the handle
        *slot = None;

        if result.is_success() {
            self.emit(&unit.id, UnitState::Stopped, ChangeCause::Stopped);
            Ok(UnitState::Stopped)
        } else {
            let cause = result.to_string();
            error!(unit = %unit.id, error = %cause, "Unit did not terminate cleanly");
            self.emit(
                &unit.id,
                UnitState::Stopped,
                ChangeCause::TerminationFailed(cause.clone()),
            );
            Err(SupervisorError::TerminationFailed {
                unit_id: unit.id.clone(),
                cause,
            })
        }
    }
}

impl<M: ProcessManager + 'static> Drop for SupervisorInner<M> {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        for (unit_id, slot) in self.slots.iter_mut() {
            if let Some(handle) = slot.get_mut() {
                terminate_leftover(unit_id.as_str(), &*handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{PlatformManager, PlatformProcessManagerFactory};
    use trout_core::{LaunchCommand, ProcessManagerFactory, UnitConfig};

    fn supervisor(units: &[UnitConfig]) -> ProcessSupervisor<PlatformManager> {
        ProcessSupervisor::new(
            LaunchRegistry::from_config(units).unwrap(),
            Arc::new(PlatformProcessManagerFactory::create_process_manager()),
            TerminationConfig::quick(),
            Duration::from_secs(60),
        )
    }

    fn unit(id: &str, line: &str) -> UnitConfig {
        UnitConfig::builder()
            .id(id)
            .command(LaunchCommand::shell(line))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_unit_is_rejected() {
        let supervisor = supervisor(&[unit("sleeper", "sleep 30")]);

        for action in [UnitAction::Start, UnitAction::Stop, UnitAction::Toggle] {
            let error = supervisor.apply(action, "ghost").await.unwrap_err();
            assert!(matches!(error, SupervisorError::UnknownUnit(ref id) if id.as_str() == "ghost"));
        }
        assert!(!supervisor.is_running("ghost").await);
        assert!(supervisor.running_units().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_handle_is_discarded_on_query() {
        let supervisor = supervisor(&[unit("oneshot", "exit 4")]);
        let mut events = supervisor.subscribe();

        supervisor.start("oneshot").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(supervisor.query("oneshot").await.unwrap(), UnitState::Stopped);
        assert_eq!(events.recv().await.unwrap().cause, ChangeCause::Started);
        let exited = events.recv().await.unwrap();
        assert_eq!(exited.cause, ChangeCause::Exited { code: Some(4) });
        assert_eq!(exited.state, UnitState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_all_clears_every_slot() {
        let supervisor = supervisor(&[unit("a", "sleep 30"), unit("b", "sleep 30")]);
        supervisor.start("a").await.unwrap();
        supervisor.start("b").await.unwrap();

        let results = supervisor.stop_all().await;
        let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(results.iter().all(|(_, result)| result.is_ok()));
        assert!(supervisor.running_units().await.is_empty());
    }
}
