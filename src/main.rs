mod config;
mod logging;
mod rumqttc_wrapper;

use std::env;
use std::sync::{mpsc, Arc};

use anyhow::Context;
use config::Config;
use easee2mqtt::bridge::{Bridge, ShutdownSignal};
use easee2mqtt::charger_client::ChargerClient;
use easee2mqtt::mqtt_wrapper::MqttWrapper;
use easee2mqtt::topics::Topics;
use rumqttc_wrapper::RumqttcWrapper;

use log::{error, info};

fn main() -> anyhow::Result<()> {
    logging::init_logger(env::var("LOGLEVEL").ok().as_deref());
    info!("Running revision: {}", env!("GIT_HASH"));
    if env::args().len() > 1 {
        error!("Arguments passed. Tool is configured by config.toml and environment variables");
    }

    let config = Config::load();
    config.ensure_valid()?;
    info!("using update interval of {}s", config.polling_interval().as_secs());

    let api = ChargerClient::new(
        config.api_base(),
        &config.easee.username,
        &config.easee.password,
        config.request_timeout(),
    )
    .context("unable to create http client")?;

    // nothing can work without a first token, so this is the one fatal failure
    if let Err(e) = api.credentials().ensure_valid() {
        error!("{e}");
        return Err(e).context("initial login to Easee failed");
    }
    info!("Successfully connected to Easee");

    let (inbound_tx, inbound_rx) = mpsc::channel();
    info!("MQTT: Connect to {}:{}", config.mqtt.host, config.mqtt.port());
    let client = RumqttcWrapper::new(&config.mqtt, inbound_tx);

    let mut bridge = Bridge::new(
        client,
        Arc::new(api),
        Topics::new(config.mqtt.root_topic()),
        config.easee.chargers.clone(),
        config.polling_interval(),
    );
    bridge.subscribe()?;
    bridge.run(inbound_rx, ShutdownSignal::new());
    Ok(())
}
