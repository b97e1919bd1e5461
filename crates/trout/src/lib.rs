//! Trout: a process supervisor for a robot control panel.
//!
//! [`ControlPanel`] ties together the [`ProcessSupervisor`] that starts, stops
//! and toggles registered units and the [`SessionGuardian`] that keeps the
//! session's coordination process alive.

pub mod command;
mod emergency;
mod factory;
mod guardian;
pub mod logging;
mod panel;
mod supervisor;

pub use factory::{PlatformManager, PlatformProcessManagerFactory};
pub use guardian::SessionGuardian;
pub use panel::ControlPanel;
pub use supervisor::{BatchResult, ProcessSupervisor};

// Re-export core functionality
pub use trout_core::*;
