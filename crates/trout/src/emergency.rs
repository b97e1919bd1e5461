use trout_core::ProcessHandle;
use tracing::warn;

/// Best-effort SIGTERM to the group of a handle that is being dropped while still running
///
/// Only a leader that has not been reaped pins its group id, so nothing is sent
/// once the leader is gone.
pub(crate) fn terminate_leftover<H: ProcessHandle>(owner: &str, handle: &H) {
    match handle.try_status() {
        Ok(status) if status.is_running() => {}
        _ => return,
    }

    warn!(
        owner = owner,
        pid = %handle.pid(),
        "Dropped with a live process group - attempting emergency cleanup"
    );

    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid as NixPid;

        let pgid = NixPid::from_raw(handle.pid().0 as i32);
        if let Err(e) = signal::killpg(pgid, Signal::SIGTERM) {
            warn!(pid = %handle.pid(), error = %e, "Emergency cleanup failed");
        }
    }
}
