//! Topic layout of the bridge.
//!
//! State is published to `<root>/<charger>/<field>`, commands arrive on
//! `<root>/<charger>/<field>/set` and accepted commands are echoed back to
//! `<root>/<charger>/<field>`.

use std::fmt;

/// Command topics the bridge subscribes to, parsed once at message entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandTopic {
    ChargingEnabled,
    ChargingCurrent,
    CableLock,
    SmartChargingEnabled,
    Ping,
}

impl CommandTopic {
    pub const ALL: [CommandTopic; 5] = [
        CommandTopic::CableLock,
        CommandTopic::ChargingEnabled,
        CommandTopic::SmartChargingEnabled,
        CommandTopic::ChargingCurrent,
        CommandTopic::Ping,
    ];

    /// The state field a command sets, which is also its echo suffix.
    pub fn field(self) -> &'static str {
        match self {
            CommandTopic::ChargingEnabled => "charging_enabled",
            CommandTopic::ChargingCurrent => "charging_current",
            CommandTopic::CableLock => "cable_lock",
            CommandTopic::SmartChargingEnabled => "smartcharging_enabled",
            CommandTopic::Ping => "ping",
        }
    }

    fn suffix(self) -> String {
        match self {
            CommandTopic::Ping => self.field().to_string(),
            _ => format!("{}/set", self.field()),
        }
    }
}

impl fmt::Display for CommandTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// Result of splitting an inbound topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedTopic {
    Command {
        charger_id: String,
        command: CommandTopic,
    },
    Ignored,
}

#[derive(Clone, Debug)]
pub struct Topics {
    root: String,
}

impl Topics {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn state(&self, charger_id: &str, field: &str) -> String {
        format!("{}/{}/{}", self.root, charger_id, field)
    }

    pub fn echo(&self, charger_id: &str, command: CommandTopic) -> String {
        self.state(charger_id, command.field())
    }

    pub fn subscriptions(&self, charger_id: &str) -> Vec<String> {
        CommandTopic::ALL
            .iter()
            .map(|command| self.state(charger_id, &command.suffix()))
            .collect()
    }

    pub fn parse(&self, topic: &str) -> ParsedTopic {
        let Some(rest) = topic
            .strip_prefix(self.root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return ParsedTopic::Ignored;
        };
        let Some((charger_id, suffix)) = rest.split_once('/') else {
            return ParsedTopic::Ignored;
        };
        if charger_id.is_empty() {
            return ParsedTopic::Ignored;
        }
        match CommandTopic::ALL
            .into_iter()
            .find(|command| command.suffix() == suffix)
        {
            Some(command) => ParsedTopic::Command {
                charger_id: charger_id.to_string(),
                command,
            },
            None => ParsedTopic::Ignored,
        }
    }
}
