use crate::process::ProcessId;
use crate::registry::UnitId;
use std::fmt;

/// Observed state of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Stopped,
    Running { pid: ProcessId },
}

impl UnitState {
    pub fn is_running(&self) -> bool {
        matches!(self, UnitState::Running { .. })
    }

    pub fn pid(&self) -> Option<ProcessId> {
        match self {
            UnitState::Running { pid } => Some(*pid),
            UnitState::Stopped => None,
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Stopped => f.write_str("stopped"),
            UnitState::Running { pid } => write!(f, "running (pid {pid})"),
        }
    }
}

/// Why a unit's state changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeCause {
    Started,
    Stopped,
    /// The process exited without being asked to
    Exited { code: Option<i32> },
    LaunchFailed(String),
    /// The handle was dropped even though termination reported an error
    TerminationFailed(String),
}

/// Notification delivered to subscribers whenever a unit changes state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub unit_id: UnitId,
    pub state: UnitState,
    pub cause: ChangeCause,
}

/// Operations a front end can request for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAction {
    Start,
    Stop,
    Toggle,
}

/// Lifecycle of the session guardian; `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianState {
    Uninitialized,
    Running,
    Stopped,
}
