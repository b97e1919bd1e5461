use trout_core::ProcessManagerFactory;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    #[cfg(unix)]
    type Manager = trout_unix::UnixProcessManager;

    fn create_process_manager() -> Self::Manager {
        #[cfg(unix)]
        {
            trout_unix::UnixProcessManagerFactory::create_process_manager()
        }
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        {
            trout_unix::UnixProcessManagerFactory::platform_name()
        }
    }
}

#[cfg(not(unix))]
compile_error!("Unsupported platform: only Unix is currently supported");

/// The process manager used by [`crate::ControlPanel::boot`]
pub type PlatformManager = <PlatformProcessManagerFactory as ProcessManagerFactory>::Manager;
