#[cfg(unix)]
mod unix_impl {
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::{self, Pid as NixPid};
    use std::collections::HashMap;
    use std::path::Path;
    use std::process::Stdio;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::{SystemTime, UNIX_EPOCH};
    use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};
    use trout_core::{
        LaunchCommand, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessStatus,
        ProcessTermination, TerminationResult, TerminationSignal,
    };

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Mutex<Child>,
        pid: ProcessId,
        command: LaunchCommand,
        spawned_at: SystemTime,
    }

    impl UnixProcessHandle {
        fn new(child: Child, pid: ProcessId, command: LaunchCommand) -> Self {
            Self {
                child: Mutex::new(child),
                pid,
                command,
                spawned_at: SystemTime::now(),
            }
        }

        /// The group id; every unit is spawned as its own group leader
        pub fn process_group(&self) -> ProcessId {
            self.pid
        }

        fn spawned_at_secs(&self) -> u64 {
            self.spawned_at
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or(0)
        }

        /// Process start times have one-second resolution
        fn started_after_spawn(&self, start_time: u64) -> bool {
            start_time + 1 >= self.spawned_at_secs()
        }
    }

    impl ProcessHandle for UnixProcessHandle {
        fn pid(&self) -> ProcessId {
            self.pid
        }

        fn command(&self) -> &LaunchCommand {
            &self.command
        }

        fn try_status(&self) -> Result<ProcessStatus> {
            let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
            match child.try_wait()? {
                Some(status) => Ok(ProcessStatus::Exited {
                    code: status.code(),
                }),
                None => Ok(ProcessStatus::Running),
            }
        }
    }

    /// Unix-specific process manager with process group and tree management
    pub struct UnixProcessManager {
        system: Mutex<System>,
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            <Self as ProcessManager>::new()
        }
    }

    fn nix_pid(pid: ProcessId) -> NixPid {
        NixPid::from_raw(pid.0 as i32)
    }

    fn nix_signal(signal: TerminationSignal) -> Signal {
        match signal {
            TerminationSignal::Graceful => Signal::SIGTERM,
            TerminationSignal::Forced => Signal::SIGKILL,
        }
    }

    /// Zombies are already dead and only wait for their parent to reap them
    fn is_live(process: &sysinfo::Process) -> bool {
        process.status() != sysinfo::ProcessStatus::Zombie
    }

    fn leader_alive(handle: &UnixProcessHandle) -> bool {
        match handle.try_status() {
            Ok(status) => status.is_running(),
            Err(e) => {
                warn!(pid = %handle.pid(), error = %e, "Failed to query process status");
                false
            }
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        type Handle = UnixProcessHandle;

        async fn spawn_process(
            &self,
            command: &LaunchCommand,
            working_dir: Option<&Path>,
            env: &HashMap<String, String>,
        ) -> Result<UnixProcessHandle> {
            let mut cmd = match command {
                LaunchCommand::Shell(line) => {
                    let mut cmd = Command::new("sh");
                    cmd.arg("-c").arg(line);
                    cmd
                }
                LaunchCommand::Exec { program, args } => {
                    let mut cmd = Command::new(program);
                    cmd.args(args);
                    cmd
                }
            };

            if let Some(dir) = working_dir {
                cmd.current_dir(dir);
            }
            cmd.envs(env);
            cmd.stdin(Stdio::null());

            // New process group so the whole tree under a shell can be signalled at once
            cmd.process_group(0);

            let child = cmd
                .spawn()
                .with_context(|| format!("Failed to spawn `{command}`"))?;
            let pid = child
                .id()
                .map(ProcessId::from)
                .context("Spawned process has no PID")?;

            info!(pid = %pid, command = %command, "Spawned Unix process group");

            Ok(UnixProcessHandle::new(child, pid, command.clone()))
        }
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        async fn signal_group(
            &self,
            handle: &UnixProcessHandle,
            signal: TerminationSignal,
        ) -> TerminationResult {
            let pgid = handle.process_group();

            // An unreaped leader pins the group id, so signalling the group is safe
            if leader_alive(handle) {
                return Self::kill_group(pgid, nix_signal(signal));
            }

            let members = self.verified_group_members(handle);
            if members.is_empty() {
                debug!(pgid = %pgid, "Process group already empty");
                return TerminationResult::ProcessNotFound;
            }

            info!(
                pgid = %pgid,
                count = members.len(),
                "Leader already exited, signalling remaining group members"
            );
            Self::kill_each(&members, nix_signal(signal))
        }

        async fn find_detached_descendants(
            &self,
            handle: &UnixProcessHandle,
        ) -> Result<Vec<ProcessId>> {
            if !leader_alive(handle) {
                return Ok(Vec::new());
            }

            let pgid = nix_pid(handle.process_group());
            let system = self.refreshed_system();

            let mut descendants = Vec::new();
            Self::find_children_recursive(&system, handle.pid().0, &mut descendants);

            let detached = descendants
                .into_iter()
                .filter(|pid| {
                    let in_group = unistd::getpgid(Some(NixPid::from_raw(*pid as i32))) == Ok(pgid);
                    let ours = system
                        .process(sysinfo::Pid::from_u32(*pid))
                        .is_some_and(|process| {
                            is_live(process) && handle.started_after_spawn(process.start_time())
                        });
                    !in_group && ours
                })
                .map(ProcessId::from)
                .collect();

            Ok(detached)
        }

        async fn signal_processes(
            &self,
            pids: &[ProcessId],
            signal: TerminationSignal,
        ) -> TerminationResult {
            Self::kill_each(pids, nix_signal(signal))
        }

        async fn group_exited(&self, handle: &UnixProcessHandle) -> bool {
            if leader_alive(handle) {
                return false;
            }

            match signal::killpg(nix_pid(handle.process_group()), None) {
                Err(Errno::ESRCH) => true,
                // The id may have been recycled into a new group; only count our own processes
                _ => self.verified_group_members(handle).is_empty(),
            }
        }
    }

    impl UnixProcessManager {
        fn refreshed_system(&self) -> MutexGuard<'_, System> {
            let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing(),
            );
            system
        }

        /// Members of a group whose leader has been reaped
        ///
        /// A live process holding the leader's pid can only be a recycled one,
        /// which means the original group is gone.
        fn verified_group_members(&self, handle: &UnixProcessHandle) -> Vec<ProcessId> {
            let pgid = handle.process_group();
            let system = self.refreshed_system();

            if system.process(sysinfo::Pid::from_u32(pgid.0)).is_some() {
                return Vec::new();
            }

            system
                .processes()
                .iter()
                .filter(|(pid, process)| {
                    is_live(process)
                        && handle.started_after_spawn(process.start_time())
                        && unistd::getpgid(Some(NixPid::from_raw(pid.as_u32() as i32)))
                            == Ok(nix_pid(pgid))
                })
                .map(|(pid, _)| ProcessId(pid.as_u32()))
                .collect()
        }

        fn kill_group(pgid: ProcessId, signal: Signal) -> TerminationResult {
            match signal::killpg(nix_pid(pgid), signal) {
                Ok(()) => {
                    info!(pgid = %pgid, signal = %signal, "Signalled process group");
                    TerminationResult::Success
                }
                Err(Errno::ESRCH) => {
                    info!(pgid = %pgid, "Process group not found (already terminated)");
                    TerminationResult::ProcessNotFound
                }
                Err(Errno::EPERM) => {
                    warn!(pgid = %pgid, "Permission denied to signal process group");
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!(pgid = %pgid, signal = %signal, error = %e, "Failed to signal process group");
                    TerminationResult::Failed(format!("{signal} to process group failed: {e}"))
                }
            }
        }

        fn kill_each(pids: &[ProcessId], signal: Signal) -> TerminationResult {
            let mut outcome = TerminationResult::Success;
            for pid in pids {
                match signal::kill(nix_pid(*pid), signal) {
                    Ok(()) => debug!(pid = %pid, signal = %signal, "Signalled process"),
                    Err(Errno::ESRCH) => debug!(pid = %pid, "Process already terminated"),
                    Err(Errno::EPERM) => {
                        warn!(pid = %pid, "Permission denied to signal process");
                        outcome = TerminationResult::AccessDenied;
                    }
                    Err(e) => {
                        warn!(pid = %pid, signal = %signal, error = %e, "Failed to signal process");
                        outcome = TerminationResult::Failed(format!("{signal} failed: {e}"));
                    }
                }
            }
            outcome
        }

        /// Recursively find all child processes
        fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
            for (pid, process) in system.processes() {
                if process.parent().map(|ppid| ppid.as_u32()) == Some(parent_pid) {
                    let child_pid = pid.as_u32();
                    // Recursively find grandchildren first
                    Self::find_children_recursive(system, child_pid, result);
                    result.push(child_pid);
                }
            }
        }
    }

    impl ProcessManager for UnixProcessManager {
        fn new() -> Self {
            info!("Initializing Unix process manager");
            Self {
                system: Mutex::new(System::new()),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::time::Duration;
        use trout_core::TerminationConfig;

        fn manager() -> UnixProcessManager {
            <UnixProcessManager as ProcessManager>::new()
        }

        fn quick() -> TerminationConfig {
            TerminationConfig {
                grace_period_ms: 500,
                kill_timeout_ms: 2_000,
                poll_interval_ms: 20,
            }
        }

        async fn spawn_shell(manager: &UnixProcessManager, line: &str) -> UnixProcessHandle {
            manager
                .spawn_process(&LaunchCommand::shell(line), None, &HashMap::new())
                .await
                .unwrap()
        }

        async fn wait_for_exit(handle: &UnixProcessHandle) -> ProcessStatus {
            for _ in 0..250 {
                let status = handle.try_status().unwrap();
                if !status.is_running() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("process {} did not exit", handle.pid());
        }

        /// Exited children of init may linger as zombies in containers
        fn alive(pid: ProcessId) -> bool {
            let mut system = System::new();
            system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing(),
            );
            system
                .process(sysinfo::Pid::from_u32(pid.0))
                .is_some_and(is_live)
        }

        #[tokio::test]
        async fn test_spawn_and_terminate() {
            let manager = manager();
            let handle = spawn_shell(&manager, "sleep 30").await;

            assert!(handle.try_status().unwrap().is_running());
            assert_eq!(handle.process_group(), handle.pid());

            let result = manager.terminate_completely(&handle, &quick()).await;
            assert_eq!(result, TerminationResult::Success);
            assert!(!handle.try_status().unwrap().is_running());
        }

        #[tokio::test]
        async fn test_spawn_failure() {
            let manager = manager();
            let result = manager
                .spawn_process(
                    &LaunchCommand::exec("/nonexistent/trout-test-binary", Vec::<String>::new()),
                    None,
                    &HashMap::new(),
                )
                .await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_exit_code_is_reported() {
            let manager = manager();
            let handle = spawn_shell(&manager, "exit 3").await;

            let status = wait_for_exit(&handle).await;
            assert_eq!(status, ProcessStatus::Exited { code: Some(3) });
            assert_eq!(handle.try_status().unwrap(), status);
        }

        #[tokio::test]
        async fn test_working_directory_and_env() {
            let manager = manager();
            let dir = std::fs::canonicalize(std::env::temp_dir()).unwrap();
            let mut env = HashMap::new();
            env.insert("TROUT_TEST_VALUE".to_string(), "7".to_string());
            env.insert("TROUT_EXPECTED_DIR".to_string(), dir.display().to_string());

            let handle = manager
                .spawn_process(
                    &LaunchCommand::shell(
                        r#"test "$TROUT_TEST_VALUE" = 7 && test "$(pwd -P)" = "$TROUT_EXPECTED_DIR""#,
                    ),
                    Some(&dir),
                    &env,
                )
                .await
                .unwrap();

            assert_eq!(
                wait_for_exit(&handle).await,
                ProcessStatus::Exited { code: Some(0) }
            );
        }

        #[tokio::test]
        async fn test_shell_grandchildren_are_terminated() {
            let manager = manager();
            // The trailing command keeps sh from exec'ing into sleep
            let handle = spawn_shell(&manager, "sleep 300; true").await;
            tokio::time::sleep(Duration::from_millis(200)).await;

            let result = manager.terminate_completely(&handle, &quick()).await;
            assert_eq!(result, TerminationResult::Success);
            assert!(manager.group_exited(&handle).await);
        }

        #[tokio::test]
        async fn test_term_ignoring_group_is_killed() {
            let manager = manager();
            let handle = spawn_shell(&manager, "trap '' TERM; sleep 300; true").await;
            tokio::time::sleep(Duration::from_millis(200)).await;

            let started = std::time::Instant::now();
            let result = manager.terminate_completely(&handle, &quick()).await;

            assert_eq!(result, TerminationResult::Success);
            assert!(started.elapsed() >= Duration::from_millis(400));
            assert!(manager.group_exited(&handle).await);
        }

        #[tokio::test]
        async fn test_orphaned_members_are_swept_after_leader_exit() {
            let manager = manager();
            let handle = spawn_shell(&manager, "sleep 300 & exit 0").await;
            tokio::time::sleep(Duration::from_millis(200)).await;

            // Reap the shell; the background sleep stays behind in the group
            assert!(!handle.try_status().unwrap().is_running());
            assert!(!manager.group_exited(&handle).await);

            let result = manager.terminate_completely(&handle, &quick()).await;
            assert_eq!(result, TerminationResult::Success);
            assert!(manager.group_exited(&handle).await);
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_detached_descendants_are_found() {
            if !Path::new("/usr/bin/setsid").exists() && !Path::new("/bin/setsid").exists() {
                return;
            }

            let manager = manager();
            let handle = spawn_shell(&manager, "setsid sleep 300 & wait").await;
            tokio::time::sleep(Duration::from_millis(300)).await;

            let detached = manager.find_detached_descendants(&handle).await.unwrap();
            assert_eq!(detached.len(), 1);

            let result = manager.terminate_completely(&handle, &quick()).await;
            assert_eq!(result, TerminationResult::Success);

            let mut gone = false;
            for _ in 0..50 {
                if !alive(detached[0]) {
                    gone = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert!(gone);
        }
    }
}

// Re-export the Unix implementation when on Unix systems
#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
pub struct UnixProcessManager;
