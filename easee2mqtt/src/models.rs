//! Request and response bodies of the Easee cloud API, plus the values derived
//! from them.

use std::fmt;

use serde_derive::{Deserialize, Serialize};
use serde_json::json;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginRequest<'a> {
    pub user_name: &'a str,
    pub password: &'a str,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: u64,
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Point in time snapshot of `GET /chargers/{id}/state`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargerState {
    /// kWh over the lifetime of the charger
    pub lifetime_energy: f64,
    /// kWh of the running session
    pub session_energy: f64,
    pub voltage: f64,
    /// kW
    pub total_power: f64,
    pub cable_locked: bool,
    pub smart_charging: bool,
    pub dynamic_charger_current: f64,
    pub charger_op_mode: i64,
    /// UTC timestamp of the last heartbeat, e.g. `2024-03-01T12:34:56Z`.
    #[serde(default)]
    pub latest_pulse: Option<String>,
}

/// `GET /chargers/{id}/config`
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargerConfig {
    pub is_enabled: bool,
    #[serde(default)]
    pub dynamic_charger_current: Option<f64>,
    #[serde(default)]
    pub max_charger_current: Option<f64>,
}

/// `GET /chargers/{id}/sessions/latest`
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_energy: f64,
    #[serde(default)]
    pub session_start: Option<String>,
    #[serde(default)]
    pub session_end: Option<String>,
}

/// Body of `POST /chargers/{id}/settings`.
#[derive(Clone, Debug, PartialEq)]
pub enum Setting {
    Enabled(bool),
    DynamicChargerCurrent(f64),
    SmartCharging(bool),
}

impl Setting {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Setting::Enabled(enabled) => json!({ "enabled": title_case(*enabled) }),
            Setting::DynamicChargerCurrent(current) => {
                json!({ "dynamicChargerCurrent": current.to_string() })
            }
            Setting::SmartCharging(enabled) => json!({ "smartCharging": title_case(*enabled) }),
        }
    }
}

/// `POST /chargers/{id}/commands/{name}`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChargerCommand {
    LockState(String),
}

impl ChargerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ChargerCommand::LockState(_) => "lock_state",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ChargerCommand::LockState(state) => json!({ "state": state }),
        }
    }
}

fn title_case(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Simplified operating mode as shown to bus consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayState {
    /// no vehicle connected (offline or disconnected)
    A,
    /// vehicle connected, waiting to start
    B,
    /// charging
    C,
    Unknown(i64),
}

impl DisplayState {
    pub fn from_op_mode(code: i64) -> Self {
        match code {
            0 | 1 => DisplayState::A,
            2 => DisplayState::B,
            3 => DisplayState::C,
            other => DisplayState::Unknown(other),
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, DisplayState::Unknown(_))
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayState::A => f.write_str("A"),
            DisplayState::B => f.write_str("B"),
            DisplayState::C => f.write_str("C"),
            DisplayState::Unknown(code) => write!(f, "Unknown state code: {code}"),
        }
    }
}

/// Operating modes in which the charger refuses to toggle charging:
/// offline (0), error (5) and deauthenticating (8).
pub const TOGGLE_FORBIDDEN_OP_MODES: [i64; 3] = [0, 5, 8];
