//! Runs the poll loop and the command loop side by side.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::{
    charger_client::ChargerApi,
    command_router::{CommandRouter, Outcome},
    mqtt_wrapper::{InboundMessage, MqttWrapper, QoS},
    state_publisher::StatePublisher,
    topics::Topics,
};

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(300);

// how often the command loop looks for a shutdown request while idle
const SHUTDOWN_CHECK: Duration = Duration::from_millis(500);

/// Cloneable stop flag shared by both loops.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (stopped, condvar) = &*self.inner;
        *stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `timeout` unless shutdown is requested earlier. Returns true
    /// if the caller should stop.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (stopped, condvar) = &*self.inner;
        let guard = stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

pub struct PollLoop<MQTT: MqttWrapper, API: ChargerApi> {
    publisher: StatePublisher<MQTT, API>,
    chargers: Vec<String>,
    interval: Duration,
}

impl<MQTT: MqttWrapper, API: ChargerApi> PollLoop<MQTT, API> {
    pub fn new(
        publisher: StatePublisher<MQTT, API>,
        chargers: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            publisher,
            chargers,
            interval,
        }
    }

    /// Publishes every configured charger once. Failures are logged per
    /// charger and never abort the cycle.
    pub fn poll_cycle(&mut self) -> usize {
        let mut failed = 0;
        for charger in &self.chargers {
            debug!("Fetching and publishing latest stats of {charger}");
            if let Err(e) = self.publisher.publish(charger) {
                failed += 1;
                error!("{e}");
                error!(
                    "Failed to fetch and publish new stats of {charger}. Will retry in {} seconds",
                    self.interval.as_secs()
                );
            }
        }
        failed
    }

    pub fn run(&mut self, shutdown: &ShutdownSignal) {
        loop {
            self.poll_cycle();
            if shutdown.wait(self.interval) {
                info!("Poll loop stopped");
                return;
            }
        }
    }
}

/// Consumes inbound messages until the bus connection goes away or shutdown is
/// requested.
pub fn run_command_loop<MQTT: MqttWrapper, API: ChargerApi>(
    router: &mut CommandRouter<MQTT, API>,
    inbound: &Receiver<InboundMessage>,
    shutdown: &ShutdownSignal,
) {
    while !shutdown.is_triggered() {
        match inbound.recv_timeout(SHUTDOWN_CHECK) {
            Ok(message) => match router.handle(&message) {
                Outcome::Ignored => debug!("No handler for {}", message.topic),
                outcome => debug!("Handled {}: {outcome:?}", message.topic),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Inbound message stream closed");
                break;
            }
        }
    }
    info!("Command loop stopped");
}

pub struct Bridge<MQTT: MqttWrapper, API: ChargerApi> {
    client: MQTT,
    api: Arc<API>,
    topics: Topics,
    chargers: Vec<String>,
    interval: Duration,
}

impl<MQTT: MqttWrapper + 'static, API: ChargerApi + 'static> Bridge<MQTT, API> {
    pub fn new(
        client: MQTT,
        api: Arc<API>,
        topics: Topics,
        chargers: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            api,
            topics,
            chargers,
            interval,
        }
    }

    pub fn subscribe(&mut self) -> anyhow::Result<()> {
        for charger in &self.chargers {
            info!("Subscribing to topics for charger {charger}.");
            for topic in self.topics.subscriptions(charger) {
                self.client.subscribe(&topic, QoS::AtLeastOnce)?;
            }
        }
        Ok(())
    }

    /// Runs both loops until `shutdown` is triggered. The poll loop gets its
    /// own thread so a slow vendor call on one side never stalls the other.
    pub fn run(self, inbound: Receiver<InboundMessage>, shutdown: ShutdownSignal) {
        let publisher =
            StatePublisher::new(self.client.clone(), self.api.clone(), self.topics.clone());
        let mut poll_loop = PollLoop::new(publisher, self.chargers.clone(), self.interval);
        let mut router = CommandRouter::new(self.client, self.api, self.topics, self.chargers);

        let poll_shutdown = shutdown.clone();
        let poller = thread::Builder::new()
            .name("poll-loop".into())
            .spawn(move || poll_loop.run(&poll_shutdown));
        let poller = match poller {
            Ok(handle) => handle,
            Err(e) => {
                error!("Unable to start poll loop: {e}");
                return;
            }
        };

        run_command_loop(&mut router, &inbound, &shutdown);
        // a closed inbound stream ends the whole bridge
        shutdown.trigger();
        if poller.join().is_err() {
            error!("Poll loop panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn wait_returns_early_on_trigger() {
        let shutdown = ShutdownSignal::new();
        let trigger = shutdown.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });
        let started = Instant::now();
        assert!(shutdown.wait(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn wait_times_out_without_trigger() {
        let shutdown = ShutdownSignal::new();
        assert!(!shutdown.wait(Duration::from_millis(10)));
        assert!(!shutdown.is_triggered());
    }
}
