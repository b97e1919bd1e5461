use super::SupervisorInner;
use std::sync::Weak;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use trout_core::ProcessManager;

/// Periodically discard handles of units whose process exited on its own
///
/// The task holds only a weak reference, so it never keeps the supervisor alive.
pub(super) fn spawn<M: ProcessManager + 'static>(
    inner: Weak<SupervisorInner<M>>,
    cancellation_token: CancellationToken,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.sweep_exited().await;
        }

        debug!("Exit watcher stopped");
    });
}

impl<M: ProcessManager + 'static> SupervisorInner<M> {
    /// Busy slots are skipped; their owner refreshes them anyway
    async fn sweep_exited(&self) {
        for unit in self.registry.units() {
            let Some(slot) = self.slots.get(&unit.id) else {
                continue;
            };
            if let Ok(mut slot) = slot.try_lock() {
                self.refresh(unit, &mut slot).await;
            }
        }
    }
}
