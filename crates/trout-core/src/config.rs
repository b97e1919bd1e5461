use crate::builtin::{builtin_guardian_command, builtin_units};
use crate::error::{Result, SupervisorError};
use crate::registry::LaunchCommand;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing of the stop protocol: graceful signal, bounded wait, forced kill
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(default)]
pub struct TerminationConfig {
    /// How long the process group gets to exit after SIGTERM (in milliseconds)
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// How long to wait for the group to disappear after SIGKILL (in milliseconds)
    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,

    /// Interval between exit checks while waiting (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            kill_timeout_ms: default_kill_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TerminationConfig {
    pub fn builder() -> TerminationConfigBuilder {
        TerminationConfigBuilder::default()
    }

    /// Short timeouts for units that are known to exit promptly
    pub fn quick() -> Self {
        Self {
            grace_period_ms: 500,
            kill_timeout_ms: 1_000,
            poll_interval_ms: 20,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(SupervisorError::configuration(
                "poll_interval_ms must be greater than zero",
            ));
        }

        if self.poll_interval_ms > self.grace_period_ms {
            return Err(SupervisorError::configuration(
                "poll_interval_ms cannot be greater than grace_period_ms",
            ));
        }

        if self.kill_timeout_ms == 0 {
            return Err(SupervisorError::configuration(
                "kill_timeout_ms must be greater than zero",
            ));
        }

        if self.grace_period_ms > 60_000 || self.kill_timeout_ms > 60_000 {
            return Err(SupervisorError::configuration(
                "termination timeouts should not exceed 60 seconds",
            ));
        }

        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Definition of one launchable unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(setter(into, strip_option))]
pub struct UnitConfig {
    pub id: String,
    #[serde(default)]
    #[builder(default)]
    pub display_name: Option<String>,
    pub command: LaunchCommand,
    #[serde(default)]
    #[builder(default)]
    pub group: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    #[serde(default)]
    #[builder(default)]
    pub open_url: Option<String>,
}

impl UnitConfig {
    pub fn builder() -> UnitConfigBuilder {
        UnitConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SupervisorError::configuration("unit id cannot be empty"));
        }

        if self.id.chars().any(char::is_whitespace) {
            return Err(SupervisorError::configuration(format!(
                "unit id '{}' cannot contain whitespace",
                self.id
            )));
        }

        if self.command.is_blank() {
            return Err(SupervisorError::configuration(format!(
                "unit '{}' has an empty command",
                self.id
            )));
        }

        Ok(())
    }
}

impl UnitConfigBuilder {
    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }
}

/// The session-wide coordination process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GuardianConfig {
    #[serde(default = "default_guardian_enabled")]
    pub enabled: bool,

    #[serde(default = "builtin_guardian_command")]
    pub command: LaunchCommand,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            enabled: default_guardian_enabled(),
            command: builtin_guardian_command(),
        }
    }
}

impl GuardianConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Log output settings; `RUST_LOG` takes precedence over `level`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Complete control panel configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PanelConfig {
    #[serde(default = "builtin_units")]
    pub units: Vec<UnitConfig>,

    #[serde(default)]
    pub guardian: GuardianConfig,

    #[serde(default)]
    pub termination: TerminationConfig,

    /// Interval of the sweep that notices units exiting on their own (in milliseconds)
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,

    #[serde(default)]
    pub log: LogConfig,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            units: builtin_units(),
            guardian: GuardianConfig::default(),
            termination: TerminationConfig::default(),
            watch_interval_ms: default_watch_interval_ms(),
            log: LogConfig::default(),
        }
    }
}

impl PanelConfig {
    /// Load a configuration file; missing sections fall back to defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SupervisorError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| SupervisorError::configuration(format!("invalid configuration: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.termination.validate()?;

        if self.watch_interval_ms == 0 {
            return Err(SupervisorError::configuration(
                "watch_interval_ms must be greater than zero",
            ));
        }

        if self.guardian.enabled && self.guardian.command.is_blank() {
            return Err(SupervisorError::configuration(
                "guardian is enabled but has an empty command",
            ));
        }

        for unit in &self.units {
            unit.validate()?;
        }

        Ok(())
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

// Default value functions for serde
fn default_grace_period_ms() -> u64 {
    3_000
}
fn default_kill_timeout_ms() -> u64 {
    2_000
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_guardian_enabled() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_watch_interval_ms() -> u64 {
    500
}
