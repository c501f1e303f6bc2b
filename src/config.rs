use std::{env, fs, path::PathBuf, time::Duration};

use easee2mqtt::{
    bridge::DEFAULT_POLLING_INTERVAL,
    charger_client::{DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT},
    mqtt_config::MqttConfig,
};
use log::{error, info, warn};
use serde_derive::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EaseeConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub chargers: Vec<String>,
    pub api_base: Option<String>,
    /// seconds
    pub request_timeout: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub easee: EaseeConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    /// seconds
    pub polling_interval: Option<u64>,
}

impl Config {
    pub fn is_valid(&self) -> bool {
        !self.easee.username.is_empty()
            && !self.easee.password.is_empty()
            && !self.easee.chargers.is_empty()
            && self.mqtt.is_valid()
    }

    /// Logs and returns an error for a configuration the bridge cannot run with.
    pub fn ensure_valid(&self) -> anyhow::Result<()> {
        if self.is_valid() {
            return Ok(());
        }
        error!("Incomplete configuration: Easee username, password, chargers and MQTT host are required");
        anyhow::bail!("incomplete configuration")
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLLING_INTERVAL)
    }

    pub fn request_timeout(&self) -> Duration {
        self.easee
            .request_timeout
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn api_base(&self) -> &str {
        self.easee.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    /// Loads config.toml from the working directory, or next to the executable
    /// if the former does not exist, and applies environment overrides.
    pub fn load() -> Config {
        let contents = match config_path() {
            Some(path) => {
                info!("loading configuration from {}", path.display());
                fs::read_to_string(&path).unwrap_or_else(|e| {
                    warn!("Could not read {}: {e}", path.display());
                    String::new()
                })
            }
            None => {
                info!("no config.toml found, using environment only");
                String::new()
            }
        };
        Self::from_sources(&contents, |key| env::var(key).ok())
    }

    pub fn from_sources(contents: &str, env: impl Fn(&str) -> Option<String>) -> Config {
        let mut config = match toml::from_str::<Config>(contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("toml config unparsable: {e}");
                Config::default()
            }
        };

        if let Some(username) = env("EASEE_USERNAME") {
            config.easee.username = username;
        }
        if let Some(password) = env("EASEE_PASSWORD") {
            config.easee.password = password;
        }
        // $EASEE_CHARGERS, comma separated
        if let Some(chargers) = env("EASEE_CHARGERS") {
            config.easee.chargers = chargers
                .split(',')
                .map(str::trim)
                .filter(|charger| !charger.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(api_base) = env("EASEE_API_BASE") {
            config.easee.api_base = Some(api_base);
        }
        if let Some(timeout) = parse_env(&env, "REQUEST_TIMEOUT") {
            config.easee.request_timeout = Some(timeout);
        }
        if let Some(interval) = parse_env(&env, "POLLING_INTERVAL") {
            config.polling_interval = Some(interval);
        }

        if let Some(host) = env("MQTT_HOST") {
            config.mqtt.host = host;
        }
        if let Some(port) = parse_env(&env, "MQTT_PORT") {
            config.mqtt.port = Some(port);
        }
        if let Some(username) = env("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = env("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Some(root_topic) = env("MQTT_ROOT_TOPIC") {
            config.mqtt.root_topic = Some(root_topic);
        }
        if let Some(tls) = parse_env(&env, "MQTT_TLS") {
            config.mqtt.tls = Some(tls);
        }
        config
    }
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = env(key)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring unparsable ${key}: {value}");
            None
        }
    }
}

fn config_path() -> Option<PathBuf> {
    let mut path = env::current_dir().ok()?;
    path.push("config.toml");
    if path.exists() {
        return Some(path);
    }
    let mut path = env::current_exe().ok()?;
    path.pop();
    path.push("config.toml");
    path.exists().then_some(path)
}
