use crate::config::UnitConfig;
use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

/// Stable identifier of a launchable unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        UnitId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for UnitId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for UnitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        UnitId(id.to_string())
    }
}

impl From<String> for UnitId {
    fn from(id: String) -> Self {
        UnitId(id)
    }
}

/// How a unit is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LaunchCommand {
    /// A command line handed to `sh -c`, so expansion and pipelines work
    Shell(String),
    /// A program spawned directly with an argument vector
    Exec {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl LaunchCommand {
    pub fn shell(line: impl Into<String>) -> Self {
        LaunchCommand::Shell(line.into())
    }

    pub fn exec<S: ToString, I: IntoIterator<Item = S>>(program: impl Into<String>, args: I) -> Self {
        LaunchCommand::Exec {
            program: program.into(),
            args: args.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            LaunchCommand::Shell(line) => line.trim().is_empty(),
            LaunchCommand::Exec { program, .. } => program.trim().is_empty(),
        }
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchCommand::Shell(line) => f.write_str(line),
            LaunchCommand::Exec { program, args } => {
                f.write_str(program)?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}

/// A launchable entity, immutable once the registry is built
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: UnitId,
    pub display_name: String,
    pub command: LaunchCommand,
    pub group: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Page a front end may open once the unit is up; never opened by the core
    pub open_url: Option<String>,
}

impl From<&UnitConfig> for Unit {
    fn from(config: &UnitConfig) -> Self {
        Unit {
            id: UnitId::new(config.id.clone()),
            display_name: config
                .display_name
                .clone()
                .unwrap_or_else(|| config.id.clone()),
            command: config.command.clone(),
            group: config.group.clone(),
            working_directory: config.working_directory.clone(),
            env: config.env.clone(),
            open_url: config.open_url.clone(),
        }
    }
}

/// Read-only table mapping unit ids to their launch definitions
///
/// Units keep their declaration order so front ends can render them the way
/// they were configured.
#[derive(Debug, Clone)]
pub struct LaunchRegistry {
    units: Vec<Unit>,
    index: HashMap<UnitId, usize>,
}

impl LaunchRegistry {
    /// Build and validate a registry from unit configurations
    pub fn from_config(configs: &[UnitConfig]) -> Result<Self> {
        let mut seen = HashSet::new();
        for config in configs {
            config.validate()?;
            if !seen.insert(config.id.as_str()) {
                return Err(SupervisorError::configuration(format!(
                    "duplicate unit id: {}",
                    config.id
                )));
            }
        }

        Ok(Self::from_units(configs.iter().map(Unit::from).collect()))
    }

    fn from_units(units: Vec<Unit>) -> Self {
        let index = units
            .iter()
            .enumerate()
            .map(|(position, unit)| (unit.id.clone(), position))
            .collect();
        Self { units, index }
    }

    pub fn lookup(&self, unit_id: &str) -> Result<&Unit> {
        self.index
            .get(unit_id)
            .map(|&position| &self.units[position])
            .ok_or_else(|| SupervisorError::UnknownUnit(UnitId::new(unit_id)))
    }

    /// Declaration index of a unit
    pub fn position(&self, unit_id: &str) -> Option<usize> {
        self.index.get(unit_id).copied()
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units of a group, in declaration order
    pub fn group(&self, name: &str) -> Result<Vec<&Unit>> {
        let members: Vec<&Unit> = self
            .units
            .iter()
            .filter(|unit| unit.group.as_deref() == Some(name))
            .collect();

        if members.is_empty() {
            return Err(SupervisorError::UnknownGroup(name.to_string()));
        }
        Ok(members)
    }

    /// Distinct group names, in order of first appearance
    pub fn groups(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for group in self.units.iter().filter_map(|unit| unit.group.as_deref()) {
            if !names.contains(&group) {
                names.push(group);
            }
        }
        names
    }
}
