//! Turns messages on the command topics into vendor API calls.

use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    charger_client::{log_outcome, ApiError, ChargerApi},
    models::{ChargerCommand, Setting, TOGGLE_FORBIDDEN_OP_MODES},
    mqtt_wrapper::{InboundMessage, MqttWrapper, QoS},
    state_publisher::StatePublisher,
    topics::{CommandTopic, ParsedTopic, Topics},
};

/// Charging current requests must stay strictly below this many amperes.
pub const CHARGING_CURRENT_LIMIT: f64 = 33.0;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("payload is not valid utf-8")]
    NotUtf8,
    #[error("couldn't identify payload '{0}', 'true' or 'false' are the only supported values")]
    NotBoolean(String),
    #[error("payload '{0}' is not a number")]
    NotNumber(String),
    #[error("charging current {0} is not below 33 A")]
    CurrentTooHigh(f64),
    #[error("charger is in operating mode {0}, which does not allow pausing or resuming")]
    ToggleForbidden(i64),
}

/// A validated command, ready to be sent to the vendor.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Setting(Setting),
    Command(ChargerCommand),
    Refresh,
}

/// Terminal state of one inbound message.
#[derive(Debug)]
pub enum Outcome {
    /// Accepted by the vendor and echoed to the state topic.
    Forwarded,
    /// Sent (or about to be sent) to the vendor, but not accepted.
    Failed(ApiError),
    Rejected(ValidationError),
    Ignored,
    /// A ping triggered an immediate state publish.
    Refreshed,
}

/// Checks `payload` against the rules of `command`.
pub fn validate(command: CommandTopic, payload: &str) -> Result<Request, ValidationError> {
    match command {
        CommandTopic::ChargingEnabled => {
            parse_bool(payload).map(|enabled| Request::Setting(Setting::Enabled(enabled)))
        }
        CommandTopic::SmartChargingEnabled => {
            parse_bool(payload).map(|enabled| Request::Setting(Setting::SmartCharging(enabled)))
        }
        CommandTopic::ChargingCurrent => {
            let current: f64 = payload
                .trim()
                .parse()
                .map_err(|_| ValidationError::NotNumber(payload.to_string()))?;
            // NaN fails this comparison as well
            if current < CHARGING_CURRENT_LIMIT {
                Ok(Request::Setting(Setting::DynamicChargerCurrent(current)))
            } else {
                Err(ValidationError::CurrentTooHigh(current))
            }
        }
        CommandTopic::CableLock => {
            let state = payload.to_string();
            Ok(Request::Command(ChargerCommand::LockState(state)))
        }
        CommandTopic::Ping => Ok(Request::Refresh),
    }
}

fn parse_bool(payload: &str) -> Result<bool, ValidationError> {
    if payload.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if payload.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ValidationError::NotBoolean(payload.to_string()))
    }
}

pub struct CommandRouter<MQTT: MqttWrapper, API: ChargerApi> {
    client: MQTT,
    api: Arc<API>,
    topics: Topics,
    chargers: Vec<String>,
    publisher: StatePublisher<MQTT, API>,
}

impl<MQTT: MqttWrapper, API: ChargerApi> CommandRouter<MQTT, API> {
    pub fn new(client: MQTT, api: Arc<API>, topics: Topics, chargers: Vec<String>) -> Self {
        let publisher = StatePublisher::new(client.clone(), api.clone(), topics.clone());
        Self {
            client,
            api,
            topics,
            chargers,
            publisher,
        }
    }

    pub fn handle(&mut self, message: &InboundMessage) -> Outcome {
        let ParsedTopic::Command {
            charger_id,
            command,
        } = self.topics.parse(&message.topic)
        else {
            debug!("Ignoring message on {}", message.topic);
            return Outcome::Ignored;
        };
        if !self.chargers.contains(&charger_id) {
            debug!("Ignoring message for unconfigured charger {charger_id}");
            return Outcome::Ignored;
        }

        let Ok(payload) = std::str::from_utf8(&message.payload) else {
            warn!("Rejecting non utf-8 payload on {}", message.topic);
            return Outcome::Rejected(ValidationError::NotUtf8);
        };
        info!(
            "Message received on topic: {}, payload: {payload}",
            message.topic
        );

        let request = match validate(command, payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting {command} for {charger_id}: {e}");
                return Outcome::Rejected(e);
            }
        };

        let result = match request {
            Request::Refresh => {
                if let Err(e) = self.publisher.publish(&charger_id) {
                    warn!("Refresh of {charger_id} incomplete: {e}");
                }
                return Outcome::Refreshed;
            }
            Request::Setting(setting) => {
                if let Setting::Enabled(_) = setting {
                    if let Err(outcome) = self.check_toggle_allowed(&charger_id) {
                        return outcome;
                    }
                }
                self.api.set_setting(&charger_id, &setting)
            }
            Request::Command(charger_command) => {
                self.api.send_command(&charger_id, &charger_command)
            }
        };
        log_outcome(command.field(), &charger_id, &result);

        match result {
            Ok(_) => {
                self.echo(&charger_id, command, payload);
                Outcome::Forwarded
            }
            Err(e) => {
                warn!("Failed to send command to charger {charger_id}: {e}");
                Outcome::Failed(e)
            }
        }
    }

    /// Pausing or resuming is refused by the vendor in some operating modes;
    /// check before sending instead of provoking the rejection.
    fn check_toggle_allowed(&self, charger_id: &str) -> Result<(), Outcome> {
        match self.api.get_state(charger_id) {
            Ok(state) if TOGGLE_FORBIDDEN_OP_MODES.contains(&state.charger_op_mode) => {
                let e = ValidationError::ToggleForbidden(state.charger_op_mode);
                warn!("Not toggling charging of {charger_id}: {e}");
                Err(Outcome::Rejected(e))
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Unable to read operating mode of {charger_id}: {e}");
                Err(Outcome::Failed(e))
            }
        }
    }

    fn echo(&mut self, charger_id: &str, command: CommandTopic, payload: &str) {
        info!("Manually publishing setting {command} for {charger_id}");
        let topic = self.topics.echo(charger_id, command);
        if let Err(e) = self
            .client
            .publish(topic, QoS::AtLeastOnce, true, payload.to_string())
        {
            warn!("Couldn't publish manually for {charger_id}: {e:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_commands_accept_any_case() {
        for payload in ["true", "TRUE", "True", "tRuE"] {
            assert_eq!(
                validate(CommandTopic::ChargingEnabled, payload),
                Ok(Request::Setting(Setting::Enabled(true)))
            );
        }
        assert_eq!(
            validate(CommandTopic::SmartChargingEnabled, "False"),
            Ok(Request::Setting(Setting::SmartCharging(false)))
        );
        assert_eq!(
            validate(CommandTopic::ChargingEnabled, "MAYBE"),
            Err(ValidationError::NotBoolean("MAYBE".into()))
        );
        assert_eq!(
            validate(CommandTopic::SmartChargingEnabled, "1"),
            Err(ValidationError::NotBoolean("1".into()))
        );
        // whole payload has to match
        assert_eq!(
            validate(CommandTopic::ChargingEnabled, " true "),
            Err(ValidationError::NotBoolean(" true ".into()))
        );
    }

    #[test]
    fn charging_current_must_stay_below_limit() {
        assert_eq!(
            validate(CommandTopic::ChargingCurrent, "16"),
            Ok(Request::Setting(Setting::DynamicChargerCurrent(16.0)))
        );
        assert_eq!(
            validate(CommandTopic::ChargingCurrent, "32.9"),
            Ok(Request::Setting(Setting::DynamicChargerCurrent(32.9)))
        );
        assert_eq!(
            validate(CommandTopic::ChargingCurrent, "33"),
            Err(ValidationError::CurrentTooHigh(33.0))
        );
        assert_eq!(
            validate(CommandTopic::ChargingCurrent, "40"),
            Err(ValidationError::CurrentTooHigh(40.0))
        );
        assert_eq!(
            validate(CommandTopic::ChargingCurrent, "sixteen"),
            Err(ValidationError::NotNumber("sixteen".into()))
        );
        assert!(matches!(
            validate(CommandTopic::ChargingCurrent, "NaN"),
            Err(ValidationError::CurrentTooHigh(_))
        ));
    }

    #[test]
    fn cable_lock_is_passed_through() {
        assert_eq!(
            validate(CommandTopic::CableLock, "true"),
            Ok(Request::Command(ChargerCommand::LockState("true".into())))
        );
    }
}
