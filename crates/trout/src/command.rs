//! Line commands understood by the `trout-panel` front end.

use anyhow::{Result, bail};
use trout_core::UnitAction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCommand {
    Unit { action: UnitAction, unit_id: String },
    Group { action: UnitAction, group: String },
    /// State of one unit, or of all of them
    Status(Option<String>),
    Quit,
}

impl PanelCommand {
    /// Parse one input line; blank lines and `#` comments yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        if verb.starts_with('#') {
            return Ok(None);
        }
        let target = words.next().map(str::to_string);
        if let Some(extra) = words.next() {
            bail!("unexpected argument `{extra}`");
        }

        let command = match (verb, target) {
            ("quit" | "exit", None) => PanelCommand::Quit,
            ("status", target) => PanelCommand::Status(target),
            (verb, Some(target)) => match verb {
                "start" => Self::unit(UnitAction::Start, target),
                "stop" => Self::unit(UnitAction::Stop, target),
                "toggle" => Self::unit(UnitAction::Toggle, target),
                "start-group" => Self::group(UnitAction::Start, target),
                "stop-group" => Self::group(UnitAction::Stop, target),
                "toggle-group" => Self::group(UnitAction::Toggle, target),
                _ => bail!("unknown command `{verb}`"),
            },
            ("start" | "stop" | "toggle", None) => bail!("`{verb}` needs a unit id"),
            ("start-group" | "stop-group" | "toggle-group", None) => {
                bail!("`{verb}` needs a group name")
            }
            (verb, None) => bail!("unknown command `{verb}`"),
        };
        Ok(Some(command))
    }

    fn unit(action: UnitAction, unit_id: String) -> Self {
        PanelCommand::Unit { action, unit_id }
    }

    fn group(action: UnitAction, group: String) -> Self {
        PanelCommand::Group { action, group }
    }
}

pub const HELP: &str = "\
commands:
  start <unit>          stop <unit>          toggle <unit>
  start-group <group>   stop-group <group>   toggle-group <group>
  status [unit]         quit";
