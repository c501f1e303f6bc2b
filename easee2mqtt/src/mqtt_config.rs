use serde_derive::Deserialize;

pub const DEFAULT_ROOT_TOPIC: &str = "easee2MQTT";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub tls: Option<bool>,
    /// First topic level of everything the bridge publishes or subscribes to.
    pub root_topic: Option<String>,
}

impl MqttConfig {
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty()
    }

    pub fn use_tls(&self) -> bool {
        self.tls.is_some_and(|tls| tls)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.use_tls() { 8883 } else { 1883 })
    }

    pub fn root_topic(&self) -> &str {
        self.root_topic
            .as_deref()
            .filter(|root| !root.is_empty())
            .unwrap_or(DEFAULT_ROOT_TOPIC)
    }
}
