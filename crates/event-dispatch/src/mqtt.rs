//! MQTT intake and publication

use crate::event::InboundMessage;
use crate::outcome::ResolvedIdentity;
use crate::DispatchError;
use metrics::counter;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// MQTT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client identifier
    pub client_id: String,
    /// Keep-alive interval (seconds)
    pub keep_alive_secs: u64,
    /// Camera metadata topics to subscribe to
    pub topics: Vec<String>,
    /// Prefix for resolved-identity messages (`<prefix>/<source>`); none disables publishing
    pub output_topic: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "face-identity-service".to_string(),
            keep_alive_secs: 30,
            topics: Vec::new(),
            output_topic: None,
        }
    }
}

type Intake = Arc<Mutex<Option<mpsc::Sender<InboundMessage>>>>;

/// Connection to the broker: feeds subscribed messages into an inbox and
/// publishes resolved identities.
pub struct MqttBridge {
    client: AsyncClient,
    output_topic: Option<String>,
    intake: Intake,
    event_loop: JoinHandle<()>,
}

impl MqttBridge {
    /// Connect and start forwarding publishes on `config.topics` to `inbox`.
    ///
    /// Topics are (re)subscribed on every ConnAck, so subscriptions survive
    /// reconnects. The event loop is never blocked on the inbox: a message
    /// that finds it full is shed and counted in `face_events_shed_total`.
    pub fn connect(config: &MqttConfig, inbox: mpsc::Sender<InboundMessage>) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        let intake: Intake = Arc::new(Mutex::new(Some(inbox)));
        let loop_intake = Arc::clone(&intake);
        let topics = config.topics.clone();
        let subscriber = client.clone();
        let event_loop = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        for topic in &topics {
                            match subscriber.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                                Ok(()) => info!("Subscribed to {}", topic),
                                Err(e) => error!("Subscribe to {} failed: {}", topic, e),
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage::new(publish.topic.clone(), publish.payload.to_vec());
                        let Ok(mut guard) = loop_intake.lock() else {
                            error!("MQTT intake lock poisoned; stopping intake");
                            break;
                        };
                        match guard.as_ref() {
                            Some(inbox) => {
                                if forward(inbox, message).is_break() {
                                    info!("Dispatcher inbox closed; stopping MQTT intake");
                                    guard.take();
                                }
                            }
                            None => debug!("Intake stopped; ignoring message on {}", message.topic),
                        }
                    }
                    Ok(Event::Incoming(incoming)) => {
                        debug!("MQTT incoming: {:?}", incoming);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        info!("Connecting to MQTT broker {}:{}", config.host, config.port);
        Self {
            client,
            output_topic: config.output_topic.clone(),
            intake,
            event_loop,
        }
    }

    /// Stop forwarding messages; the inbox closes once queued ones are taken.
    ///
    /// The connection stays up so results still in flight can be published.
    pub fn stop_intake(&self) {
        match self.intake.lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    info!("MQTT intake stopped");
                }
            }
            Err(e) => error!("MQTT intake lock poisoned: {}", e),
        }
    }

    /// Publish a resolved identity to `<output_topic>/<source>`, if configured
    pub async fn publish(&self, resolved: &ResolvedIdentity) -> Result<(), DispatchError> {
        let Some(prefix) = &self.output_topic else {
            return Ok(());
        };

        let payload = serde_json::to_vec(resolved)
            .map_err(|e| DispatchError::Serialization(e.to_string()))?;
        let topic = output_topic(prefix, &resolved.source);

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| DispatchError::Publish(e.to_string()))
    }

    /// Stop intake, disconnect and stop the event loop
    pub async fn shutdown(&self) {
        self.stop_intake();
        if let Err(e) = self.client.disconnect().await {
            warn!("MQTT disconnect failed: {}", e);
        }
        self.event_loop.abort();
    }
}

/// Hand a message to the dispatcher without waiting; `Break` once it is gone
fn forward(inbox: &mpsc::Sender<InboundMessage>, message: InboundMessage) -> ControlFlow<()> {
    match inbox.try_send(message) {
        Ok(()) => ControlFlow::Continue(()),
        Err(TrySendError::Full(message)) => {
            counter!("face_events_shed_total").increment(1);
            warn!("Dispatcher inbox full; dropping message on {}", message.topic);
            ControlFlow::Continue(())
        }
        Err(TrySendError::Closed(_)) => ControlFlow::Break(()),
    }
}

fn output_topic(prefix: &str, source: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_topic() {
        assert_eq!(output_topic("identities", "cam1"), "identities/cam1");
        assert_eq!(output_topic("identities/", "cam1"), "identities/cam1");
    }

    #[tokio::test]
    async fn test_full_inbox_sheds_instead_of_waiting() {
        let (tx, mut rx) = mpsc::channel(1);

        assert!(forward(&tx, InboundMessage::new("a/cam1", "first")).is_continue());
        assert!(forward(&tx, InboundMessage::new("a/cam1", "second")).is_continue());

        assert_eq!(rx.recv().await.unwrap().payload, b"first");
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(forward(&tx, InboundMessage::new("a/cam1", "third")).is_break());
    }

    #[tokio::test]
    async fn test_stop_intake_closes_the_inbox() {
        let config = MqttConfig {
            port: 1,
            topics: vec!["a/#".to_string()],
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::channel(4);
        let bridge = MqttBridge::connect(&config, tx);

        bridge.stop_intake();
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(closed, Ok(None)));

        bridge.stop_intake();
        bridge.shutdown().await;
    }

    #[test]
    fn test_default_config() {
        let config = MqttConfig::default();
        assert_eq!(config.port, 1883);
        assert!(config.output_topic.is_none());
    }
}
