use std::{
    sync::{mpsc::Sender, Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use easee2mqtt::{
    mqtt_config::MqttConfig,
    mqtt_wrapper::{self, InboundMessage},
};
use log::{debug, info, warn};
use rumqttc::{
    tokio_rustls::{self, rustls::ClientConfig},
    Client, Event, MqttOptions, Packet, Transport,
};

const DEFAULT_CLIENT_ID: &str = "easee2mqtt-publisher";

#[derive(Clone)]
pub struct RumqttcWrapper {
    client: Client,
    // replayed after every reconnect, the broker forgets them with a clean session
    subscriptions: Arc<Mutex<Vec<(String, rumqttc::QoS)>>>,
}

fn match_qos(qos: mqtt_wrapper::QoS) -> rumqttc::QoS {
    match qos {
        mqtt_wrapper::QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        mqtt_wrapper::QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        mqtt_wrapper::QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn tls_transport() -> Transport {
    // Use rustls-native-certs to load root certificates from the operating system.
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in native.errors {
        warn!("could not load platform cert: {e}");
    }
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            warn!("skipping invalid platform cert: {e}");
        }
    }

    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Transport::tls_with_config(client_config.into())
}

fn resubscribe(client: &Client, subscriptions: &Mutex<Vec<(String, rumqttc::QoS)>>) {
    let subscriptions = subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
    for (topic, qos) in subscriptions.iter() {
        // try_ variant, blocking here would stall the event loop that drains the queue
        if let Err(e) = client.try_subscribe(topic.clone(), *qos) {
            warn!("resubscription to {topic} failed: {e}");
        }
    }
}

impl mqtt_wrapper::MqttWrapper for RumqttcWrapper {
    fn subscribe(&mut self, topic: &str, qos: mqtt_wrapper::QoS) -> anyhow::Result<()> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((topic.to_string(), match_qos(qos)));
        Ok(self.client.subscribe(topic, match_qos(qos))?)
    }

    fn publish<S, V>(
        &mut self,
        topic: S,
        qos: mqtt_wrapper::QoS,
        retain: bool,
        payload: V,
    ) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>,
    {
        // try publishing up to three times
        for _ in 0..2 {
            if self
                .client
                .try_publish(topic.clone(), match_qos(qos), retain, payload.clone())
                .is_ok()
            {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }
        Ok(self
            .client
            .try_publish(topic, match_qos(qos), retain, payload)?)
    }

    fn new(config: &MqttConfig, inbound: Sender<InboundMessage>) -> Self {
        let mut mqttoptions = MqttOptions::new(
            config
                .client_id
                .clone()
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            &config.host,
            config.port(),
        );
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if config.use_tls() {
            mqttoptions.set_transport(tls_transport());
        }

        //parse the mqtt authentication options
        if let Some((username, password)) = match (&config.username, &config.password) {
            (None, None) => None,
            (None, Some(_)) => None,
            (Some(username), None) => Some((username.clone(), "".into())),
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
        } {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut connection) = Client::new(mqttoptions, 512);
        let subscriptions = Arc::new(Mutex::new(Vec::new()));

        let event_client = client.clone();
        let event_subscriptions = subscriptions.clone();
        thread::spawn(move || {
            // keep polling the event loop to make sure outgoing messages get sent
            // and incoming publications reach the command loop. Iteration only
            // ends once every client handle is gone.
            for notification in connection.iter() {
                match notification {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                        if inbound.send(message).is_err() {
                            debug!("command loop is gone, stopping mqtt event loop");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        resubscribe(&event_client, &event_subscriptions);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {e}");
                        thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        });

        Self {
            client,
            subscriptions,
        }
    }
}
