use crate::registry::UnitId;
use thiserror::Error;

/// Errors surfaced by the supervisor to its callers.
///
/// Every variant is scoped to a single unit (or to configuration loading) and
/// never leaves the supervisor in an unusable state.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Unknown unit: {0}")]
    UnknownUnit(UnitId),

    #[error("Unknown unit group: {0}")]
    UnknownGroup(String),

    #[error("Failed to launch {unit_id}: {cause}")]
    LaunchFailed { unit_id: UnitId, cause: String },

    #[error("Failed to terminate {unit_id}: {cause}")]
    TerminationFailed { unit_id: UnitId, cause: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;

impl SupervisorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SupervisorError::Configuration(message.into())
    }

    /// The unit this error is attributed to, if any
    pub fn unit_id(&self) -> Option<&UnitId> {
        match self {
            SupervisorError::UnknownUnit(id)
            | SupervisorError::LaunchFailed { unit_id: id, .. }
            | SupervisorError::TerminationFailed { unit_id: id, .. } => Some(id),
            SupervisorError::UnknownGroup(_) | SupervisorError::Configuration(_) => None,
        }
    }

    /// Configuration problems are programmer errors rather than runtime failures
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SupervisorError::UnknownUnit(_)
                | SupervisorError::UnknownGroup(_)
                | SupervisorError::Configuration(_)
        )
    }
}
