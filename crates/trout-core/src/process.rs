use crate::config::TerminationConfig;
use crate::registry::LaunchCommand;
use anyhow::Result;
use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Operating system process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a spawned process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process is currently running
    Running,
    /// Process has exited and been reaped; `code` is `None` when killed by a signal
    Exited { code: Option<i32> },
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }
}

/// Strength of a termination signal (SIGTERM or SIGKILL on Unix)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Graceful,
    Forced,
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Process was successfully terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Process group survived the forced kill
    Timeout,
    /// Operation failed with specific error message
    Failed(String),
}

impl TerminationResult {
    /// Whether the target can be considered gone
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TerminationResult::Success | TerminationResult::ProcessNotFound
        )
    }
}

impl fmt::Display for TerminationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationResult::Success => f.write_str("terminated"),
            TerminationResult::ProcessNotFound => f.write_str("process not found"),
            TerminationResult::AccessDenied => f.write_str("permission denied"),
            TerminationResult::Timeout => f.write_str("process group survived forced kill"),
            TerminationResult::Failed(reason) => f.write_str(reason),
        }
    }
}

/// Handle to a spawned process, exclusively owning the OS child
///
/// The process is the leader of its own process group, so its pid doubles as
/// the group id.
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> ProcessId;

    /// The command that started this process
    fn command(&self) -> &LaunchCommand;

    /// Non-blocking status check; reaps the process once it has exited
    fn try_status(&self) -> Result<ProcessStatus>;
}

/// Spawning of launch commands
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// The type of process handle this lifecycle manager produces
    type Handle: ProcessHandle;

    /// Spawn a command as the leader of a new process group
    async fn spawn_process(
        &self,
        command: &LaunchCommand,
        working_dir: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<Self::Handle>;
}

/// Termination of a spawned process together with everything it started
#[async_trait]
pub trait ProcessTermination: ProcessLifecycle {
    /// Signal every process of the handle's group
    async fn signal_group(
        &self,
        handle: &Self::Handle,
        signal: TerminationSignal,
    ) -> TerminationResult;

    /// Descendants that left the handle's process group, e.g. through `setsid`
    async fn find_detached_descendants(&self, handle: &Self::Handle) -> Result<Vec<ProcessId>>;

    /// Signal individual processes
    async fn signal_processes(
        &self,
        pids: &[ProcessId],
        signal: TerminationSignal,
    ) -> TerminationResult;

    /// True once the leader is reaped and no member of its group is left
    async fn group_exited(&self, handle: &Self::Handle) -> bool;

    /// Poll `group_exited` until it holds or `within` elapses
    async fn wait_for_group_exit(
        &self,
        handle: &Self::Handle,
        within: Duration,
        poll: Duration,
    ) -> bool {
        let attempts = poll_attempts(within, poll);
        let poll_once = || async move {
            if self.group_exited(handle).await {
                Ok(())
            } else {
                Err(())
            }
        };

        poll_once
            .retry(
                ConstantBuilder::default()
                    .with_delay(poll)
                    .with_max_times(attempts),
            )
            .await
            .is_ok()
    }

    /// Complete termination: SIGTERM to the group and detached descendants,
    /// bounded wait, then SIGKILL and a second bounded wait
    async fn terminate_completely(
        &self,
        handle: &Self::Handle,
        config: &TerminationConfig,
    ) -> TerminationResult {
        let pid = handle.pid();

        // Collected first: once the leader is gone its descendants are reparented
        let detached = match self.find_detached_descendants(handle).await {
            Ok(detached) => detached,
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to enumerate detached descendants");
                Vec::new()
            }
        };

        match self.signal_group(handle, TerminationSignal::Graceful).await {
            TerminationResult::Success | TerminationResult::ProcessNotFound => {}
            result => {
                warn!(pid = %pid, result = %result, "Graceful group termination failed");
            }
        }
        if !detached.is_empty() {
            info!(pid = %pid, count = detached.len(), "Terminating detached descendants");
            self.signal_processes(&detached, TerminationSignal::Graceful)
                .await;
        }

        if self
            .wait_for_group_exit(handle, config.grace_period(), config.poll_interval())
            .await
        {
            info!(pid = %pid, "Process group exited gracefully");
            return TerminationResult::Success;
        }

        warn!(
            pid = %pid,
            grace_period_ms = config.grace_period_ms,
            "Process group still alive after grace period, escalating to forced kill"
        );
        let forced = self.signal_group(handle, TerminationSignal::Forced).await;
        if !detached.is_empty() {
            self.signal_processes(&detached, TerminationSignal::Forced)
                .await;
        }

        if self
            .wait_for_group_exit(handle, config.kill_timeout(), config.poll_interval())
            .await
        {
            TerminationResult::Success
        } else if forced.is_success() {
            TerminationResult::Timeout
        } else {
            forced
        }
    }
}

/// Number of polls that fit in `within`, at least one
fn poll_attempts(within: Duration, poll: Duration) -> usize {
    usize::try_from(within.as_millis() / poll.as_millis().max(1))
        .unwrap_or(usize::MAX)
        .max(1)
}

/// Platform process manager combining spawning and termination
pub trait ProcessManager: ProcessTermination {
    /// Create a new process manager instance
    fn new() -> Self
    where
        Self: Sized;
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted process that exits once it receives a given signal strength
    struct FakeHandle {
        command: LaunchCommand,
        exits_on: Option<TerminationSignal>,
        exited: Mutex<bool>,
    }

    impl ProcessHandle for FakeHandle {
        fn pid(&self) -> ProcessId {
            ProcessId(4242)
        }

        fn command(&self) -> &LaunchCommand {
            &self.command
        }

        fn try_status(&self) -> Result<ProcessStatus> {
            if *self.exited.lock().unwrap() {
                Ok(ProcessStatus::Exited { code: None })
            } else {
                Ok(ProcessStatus::Running)
            }
        }
    }

    #[derive(Default)]
    struct FakeManager {
        group_signals: Mutex<Vec<TerminationSignal>>,
        detached_signals: Mutex<Vec<(Vec<ProcessId>, TerminationSignal)>>,
        detached: Vec<ProcessId>,
    }

    #[async_trait]
    impl ProcessLifecycle for FakeManager {
        type Handle = FakeHandle;

        async fn spawn_process(
            &self,
            command: &LaunchCommand,
            _working_dir: Option<&Path>,
            _env: &HashMap<String, String>,
        ) -> Result<FakeHandle> {
            Ok(FakeHandle {
                command: command.clone(),
                exits_on: Some(TerminationSignal::Graceful),
                exited: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl ProcessTermination for FakeManager {
        async fn signal_group(
            &self,
            handle: &FakeHandle,
            signal: TerminationSignal,
        ) -> TerminationResult {
            self.group_signals.lock().unwrap().push(signal);
            let exits = match (handle.exits_on, signal) {
                (Some(TerminationSignal::Graceful), _) => true,
                (Some(TerminationSignal::Forced), TerminationSignal::Forced) => true,
                _ => false,
            };
            if exits {
                *handle.exited.lock().unwrap() = true;
            }
            TerminationResult::Success
        }

        async fn find_detached_descendants(&self, _handle: &FakeHandle) -> Result<Vec<ProcessId>> {
            Ok(self.detached.clone())
        }

        async fn signal_processes(
            &self,
            pids: &[ProcessId],
            signal: TerminationSignal,
        ) -> TerminationResult {
            self.detached_signals
                .lock()
                .unwrap()
                .push((pids.to_vec(), signal));
            TerminationResult::Success
        }

        async fn group_exited(&self, handle: &FakeHandle) -> bool {
            *handle.exited.lock().unwrap()
        }
    }

    fn handle(exits_on: Option<TerminationSignal>) -> FakeHandle {
        FakeHandle {
            command: LaunchCommand::shell("sleep 60"),
            exits_on,
            exited: Mutex::new(false),
        }
    }

    fn config() -> TerminationConfig {
        TerminationConfig {
            grace_period_ms: 40,
            kill_timeout_ms: 40,
            poll_interval_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_graceful_exit_needs_no_escalation() {
        let manager = FakeManager::default();
        let handle = handle(Some(TerminationSignal::Graceful));

        let result = manager.terminate_completely(&handle, &config()).await;

        assert_eq!(result, TerminationResult::Success);
        assert_eq!(
            *manager.group_signals.lock().unwrap(),
            vec![TerminationSignal::Graceful]
        );
    }

    #[tokio::test]
    async fn test_escalates_to_forced_kill() {
        let manager = FakeManager::default();
        let handle = handle(Some(TerminationSignal::Forced));

        let result = manager.terminate_completely(&handle, &config()).await;

        assert_eq!(result, TerminationResult::Success);
        assert_eq!(
            *manager.group_signals.lock().unwrap(),
            vec![TerminationSignal::Graceful, TerminationSignal::Forced]
        );
    }

    #[tokio::test]
    async fn test_unkillable_group_times_out() {
        let manager = FakeManager::default();
        let handle = handle(None);

        let result = manager.terminate_completely(&handle, &config()).await;

        assert_eq!(result, TerminationResult::Timeout);
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_detached_descendants_are_signalled() {
        let manager = FakeManager {
            detached: vec![ProcessId(5000), ProcessId(5001)],
            ..Default::default()
        };
        let handle = handle(Some(TerminationSignal::Forced));

        manager.terminate_completely(&handle, &config()).await;

        let signals = manager.detached_signals.lock().unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].0, vec![ProcessId(5000), ProcessId(5001)]);
        assert_eq!(signals[0].1, TerminationSignal::Graceful);
        assert_eq!(signals[1].1, TerminationSignal::Forced);
    }

    #[tokio::test]
    async fn test_spawn_records_command() {
        let manager = FakeManager::default();
        let handle = manager
            .spawn_process(&LaunchCommand::shell("roscore"), None, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(handle.command(), &LaunchCommand::shell("roscore"));
        assert!(handle.try_status().unwrap().is_running());
    }

    #[test]
    fn test_poll_attempts_saturate() {
        assert_eq!(poll_attempts(Duration::from_millis(100), Duration::from_millis(20)), 5);
        assert_eq!(poll_attempts(Duration::from_millis(10), Duration::from_millis(50)), 1);
        assert_eq!(poll_attempts(Duration::from_millis(30), Duration::ZERO), 30);
        assert_eq!(poll_attempts(Duration::MAX, Duration::from_millis(1)), usize::MAX);
    }

    #[test]
    fn test_termination_result_categorization() {
        assert!(TerminationResult::Success.is_success());
        assert!(TerminationResult::ProcessNotFound.is_success());
        assert!(!TerminationResult::AccessDenied.is_success());
        assert!(!TerminationResult::Failed("boom".to_string()).is_success());
        assert_eq!(TerminationResult::AccessDenied.to_string(), "permission denied");
    }
}
