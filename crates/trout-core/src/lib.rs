//! Trout Core - Platform-independent abstractions and configurations
//!
//! This crate provides the unit registry, configuration, error taxonomy and
//! process traits that are shared by the platform-specific process managers
//! and the supervisor.

mod builtin;
mod config;
mod error;
mod process;
mod registry;
mod state;

pub use builtin::{APPS_GROUP, NODES_GROUP, builtin_guardian_command, builtin_units};
pub use config::*;
pub use error::*;
pub use process::*;
pub use registry::*;
pub use state::*;
