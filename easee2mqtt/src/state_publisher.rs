use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use log::{debug, warn};

use crate::{
    charger_client::{ApiError, ChargerApi},
    models::{ChargerConfig, ChargerState, DisplayState, Session},
    mqtt_wrapper::{MqttWrapper, QoS},
    topics::Topics,
};

/// One of the three reads a poll performs per charger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Read {
    State,
    Config,
    LatestSession,
}

impl fmt::Display for Read {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Read::State => "state",
            Read::Config => "config",
            Read::LatestSession => "latest session",
        })
    }
}

/// Reads of one charger that failed while the others were still published.
#[derive(Debug)]
pub struct PublishError {
    pub charger_id: String,
    pub failures: Vec<(Read, ApiError)>,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to read charger {}:", self.charger_id)?;
        for (read, e) in &self.failures {
            write!(f, " [{read}: {e}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for PublishError {}

pub struct StatePublisher<MQTT: MqttWrapper, API: ChargerApi> {
    client: MQTT,
    api: Arc<API>,
    topics: Topics,
}

impl<MQTT: MqttWrapper, API: ChargerApi> StatePublisher<MQTT, API> {
    pub fn new(client: MQTT, api: Arc<API>, topics: Topics) -> Self {
        Self {
            client,
            api,
            topics,
        }
    }

    /// Fetches state, config and latest session of `charger_id` and publishes
    /// every field that could be derived from the reads that succeeded.
    pub fn publish(&mut self, charger_id: &str) -> Result<(), PublishError> {
        let mut failures = Vec::new();

        match self.api.get_state(charger_id) {
            Ok(state) => {
                debug!("State of {charger_id}: {state:?}");
                let display = DisplayState::from_op_mode(state.charger_op_mode);
                if !display.is_known() {
                    warn!(
                        "Charger {charger_id} reports unknown operating mode {}",
                        state.charger_op_mode
                    );
                }
                if let Some(pulse) = &state.latest_pulse {
                    if local_timestamp(pulse, &Local).is_none() {
                        warn!("Unparsable latest pulse '{pulse}' from {charger_id}");
                    }
                }
                self.publish_fields(charger_id, state_payloads(&state, &Local));
            }
            Err(e) => failures.push((Read::State, e)),
        }

        match self.api.get_config(charger_id) {
            Ok(config) => self.publish_fields(charger_id, config_payloads(&config)),
            Err(e) => failures.push((Read::Config, e)),
        }

        match self.api.get_latest_session(charger_id) {
            Ok(session) => self.publish_fields(charger_id, session_payloads(&session)),
            Err(e) => failures.push((Read::LatestSession, e)),
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PublishError {
                charger_id: charger_id.to_string(),
                failures,
            })
        }
    }

    fn publish_fields(&mut self, charger_id: &str, fields: Vec<(&'static str, String)>) {
        fields.into_iter().for_each(|(field, payload)| {
            let topic = self.topics.state(charger_id, field);
            if let Err(e) = self.client.publish(topic, QoS::AtLeastOnce, true, payload) {
                warn!("mqtt error: {e:?}")
            }
        });
    }
}

/// Payloads derived from `GET /state`. Pure function of its input.
pub fn state_payloads<Tz: TimeZone>(
    state: &ChargerState,
    tz: &Tz,
) -> Vec<(&'static str, String)>
where
    Tz::Offset: fmt::Display,
{
    let mut fields = vec![
        ("energy_consumption", format!("{:.2}", state.lifetime_energy)),
        ("current_session", format!("{:.2}", state.session_energy)),
        ("voltage", format!("{:.1}", state.voltage)),
        ("power", format!("{:.2}", state.total_power)),
        ("cable_lock", state.cable_locked.to_string()),
        ("smartcharging_enabled", state.smart_charging.to_string()),
        ("charging_current", state.dynamic_charger_current.to_string()),
        (
            "chargerOpMode",
            DisplayState::from_op_mode(state.charger_op_mode).to_string(),
        ),
    ];
    if let Some(pulse) = state
        .latest_pulse
        .as_deref()
        .and_then(|pulse| local_timestamp(pulse, tz))
    {
        fields.push(("latest_pulse", pulse));
    }
    fields
}

pub fn config_payloads(config: &ChargerConfig) -> Vec<(&'static str, String)> {
    vec![("charging_enabled", config.is_enabled.to_string())]
}

pub fn session_payloads(session: &Session) -> Vec<(&'static str, String)> {
    vec![("previous_session", format!("{:.2}", session.session_energy))]
}

/// Converts a vendor UTC timestamp to `YYYY-MM-DD HH:MM:SS` in `tz`.
/// Timestamps without an offset are taken as UTC.
pub fn local_timestamp<Tz: TimeZone>(pulse: &str, tz: &Tz) -> Option<String>
where
    Tz::Offset: fmt::Display,
{
    let utc = match DateTime::parse_from_rfc3339(pulse) {
        Ok(datetime) => datetime.with_timezone(&Utc),
        Err(_) => NaiveDateTime::parse_from_str(pulse, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()?
            .and_utc(),
    };
    Some(utc.with_timezone(tz).format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn sample_state() -> ChargerState {
        ChargerState {
            lifetime_energy: 1234.5678,
            session_energy: 3.14159,
            voltage: 231.26,
            total_power: 7.3891,
            cable_locked: true,
            smart_charging: false,
            dynamic_charger_current: 16.0,
            charger_op_mode: 3,
            latest_pulse: Some("2024-03-01T12:34:56Z".into()),
        }
    }

    #[test]
    fn normalizes_state_fields() {
        let fields = state_payloads(&sample_state(), &Utc);
        let get = |name: &str| {
            fields
                .iter()
                .find(|(field, _)| *field == name)
                .map(|(_, payload)| payload.as_str())
        };
        assert_eq!(get("energy_consumption"), Some("1234.57"));
        assert_eq!(get("current_session"), Some("3.14"));
        assert_eq!(get("voltage"), Some("231.3"));
        assert_eq!(get("power"), Some("7.39"));
        assert_eq!(get("cable_lock"), Some("true"));
        assert_eq!(get("smartcharging_enabled"), Some("false"));
        assert_eq!(get("charging_current"), Some("16"));
        assert_eq!(get("chargerOpMode"), Some("C"));
        assert_eq!(get("latest_pulse"), Some("2024-03-01 12:34:56"));
    }

    #[test]
    fn same_state_gives_same_payloads() {
        let state = sample_state();
        assert_eq!(state_payloads(&state, &Utc), state_payloads(&state, &Utc));
    }

    #[test]
    fn unknown_op_mode_is_published_as_marker() {
        let state = ChargerState {
            charger_op_mode: 9,
            ..sample_state()
        };
        let fields = state_payloads(&state, &Utc);
        assert!(fields.contains(&("chargerOpMode", "Unknown state code: 9".to_string())));
    }

    #[test]
    fn converts_pulse_to_local_time() {
        let cet = FixedOffset::east_opt(3600).unwrap();
        assert_eq!(
            local_timestamp("2024-03-01T23:30:00Z", &cet).as_deref(),
            Some("2024-03-02 00:30:00")
        );
        assert_eq!(
            local_timestamp("2024-03-01T23:30:00.123+00:00", &cet).as_deref(),
            Some("2024-03-02 00:30:00")
        );
        // no offset means utc
        assert_eq!(
            local_timestamp("2024-03-01T23:30:00", &cet).as_deref(),
            Some("2024-03-02 00:30:00")
        );
        assert_eq!(local_timestamp("yesterday", &cet), None);
    }

    #[test]
    fn unparsable_pulse_is_left_out() {
        let state = ChargerState {
            latest_pulse: Some("garbage".into()),
            ..sample_state()
        };
        let fields = state_payloads(&state, &Utc);
        assert!(fields.iter().all(|(field, _)| *field != "latest_pulse"));
        assert_eq!(fields.len(), 8);
    }

    #[test]
    fn session_and_config_fields() {
        let session = Session {
            session_energy: 12.346,
            ..Default::default()
        };
        assert_eq!(
            session_payloads(&session),
            vec![("previous_session", "12.35".to_string())]
        );
        let config = ChargerConfig {
            is_enabled: false,
            ..Default::default()
        };
        assert_eq!(
            config_payloads(&config),
            vec![("charging_enabled", "false".to_string())]
        );
    }
}
