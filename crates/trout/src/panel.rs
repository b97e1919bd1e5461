use crate::factory::{PlatformManager, PlatformProcessManagerFactory};
use crate::guardian::SessionGuardian;
use crate::supervisor::ProcessSupervisor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use trout_core::{LaunchRegistry, PanelConfig, ProcessManager, ProcessManagerFactory, Result};

/// A control panel session: the supervisor, its units and the session guardian
pub struct ControlPanel<M: ProcessManager + 'static = PlatformManager> {
    supervisor: ProcessSupervisor<M>,
    guardian: Option<SessionGuardian<M>>,
    shut_down: AtomicBool,
}

impl ControlPanel<PlatformManager> {
    /// Boot a session with the process manager of the current platform
    pub async fn boot(config: PanelConfig) -> Result<Self> {
        info!(
            platform = PlatformProcessManagerFactory::platform_name(),
            "Booting control panel"
        );
        Self::boot_with(config, PlatformProcessManagerFactory::create_process_manager()).await
    }
}

impl<M: ProcessManager + 'static> ControlPanel<M> {
    /// Validate the configuration, create the supervisor and start the guardian
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn boot_with(config: PanelConfig, manager: M) -> Result<Self> {
        config.validate()?;
        let registry = LaunchRegistry::from_config(&config.units)?;
        let manager = Arc::new(manager);

        let supervisor = ProcessSupervisor::new(
            registry,
            manager.clone(),
            config.termination.clone(),
            config.watch_interval(),
        );

        let guardian = if config.guardian.enabled {
            let guardian = SessionGuardian::new(
                manager,
                config.guardian.command.clone(),
                config.termination.clone(),
            );
            guardian.start().await;
            Some(guardian)
        } else {
            info!("Session guardian disabled");
            None
        };

        Ok(Self {
            supervisor,
            guardian,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn supervisor(&self) -> &ProcessSupervisor<M> {
        &self.supervisor
    }

    pub fn guardian(&self) -> Option<&SessionGuardian<M>> {
        self.guardian.as_ref()
    }

    /// Stop every unit, then the guardian; later calls do nothing
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down control panel");
        for (unit_id, result) in self.supervisor.stop_all().await {
            if let Err(e) = result {
                warn!(unit = %unit_id, error = %e, "Unit failed to stop during shutdown");
            }
        }

        if let Some(guardian) = &self.guardian {
            guardian.shutdown().await;
        }
        info!("Control panel shut down");
    }
}
