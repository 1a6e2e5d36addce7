//! MQTT client implementation

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS, Transport};

use crate::{
    config::{MqttConfig, MqttTransport},
    errors::TrackerError,
    models::InboundEvent,
};

/// Parsed event together with the packet it arrived in
#[derive(Debug)]
pub struct Delivery {
    pub event: InboundEvent,
    publish: Publish,
}

/// MQTT client for receiving station events
pub struct MqttClientBuilder {
    client: AsyncClient,
    event_loop: EventLoop,
    tx: mpsc::Sender<Delivery>,
    rx: mpsc::Receiver<Delivery>,
}

pub struct MqttClient {
    client: AsyncClient,
    rx: mpsc::Receiver<Delivery>,
    _handle: tokio::task::JoinHandle<Result<(), TrackerError>>,
}

impl MqttClientBuilder {
    /// Create a new MQTT client
    ///
    /// Acknowledgements are manual: a message is acked only once the caller
    /// has stored it, so the broker redelivers anything lost in between.
    pub fn new(config: &MqttConfig) -> Result<Self, TrackerError> {
        config.validate()?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
        match config.transport {
            MqttTransport::Tcp => {}
            MqttTransport::Tls => {
                mqtt_options.set_transport(Transport::tls_with_default_config());
            }
            MqttTransport::Wss => {
                mqtt_options.set_transport(Transport::wss_with_default_config());
            }
        }
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(false);
        mqtt_options.set_manual_acks(true);

        info!(
            "MQTT client {} for {}:{} over {:?}",
            config.client_id, config.host, config.port, config.transport
        );

        let (client, event_loop) = AsyncClient::new(mqtt_options, 100);

        // Create a channel for message passing
        let (tx, rx) = mpsc::channel(100);

        Ok(Self {
            client,
            event_loop,
            tx,
            rx,
        })
    }

    /// Connect to MQTT broker and subscribe to topics
    ///
    /// Subscription happens in the event loop on every ConnAck.
    pub async fn connect(self, topics: &[String]) -> Result<MqttClient, TrackerError> {
        let _handle = tokio::spawn(Self::process_events(
            self.tx,
            self.event_loop,
            self.client.clone(),
            topics.to_vec(),
        ));

        Ok(MqttClient {
            client: self.client,
            rx: self.rx,
            _handle,
        })
    }

    async fn subscribe(client: &AsyncClient, topics: &[String]) -> Result<(), TrackerError> {
        for topic in topics {
            info!("Subscribing to topic: {}", topic);
            client.subscribe(topic, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    /// Process MQTT events
    ///
    /// `rumqttc` reconnects on its own but subscriptions have to be renewed,
    /// so they are made here on every ConnAck. Messages that cannot be
    /// parsed are acknowledged right away; redelivering them would not help.
    ///
    /// NOTE: If topic subscription fails, the loop will break and return an error.
    async fn process_events(
        tx: mpsc::Sender<Delivery>,
        mut event_loop: EventLoop,
        client: AsyncClient,
        topics: Vec<String>,
    ) -> Result<(), TrackerError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker, subscribing to topics");
                    if let Err(e) = Self::subscribe(&client, &topics).await {
                        error!("Failed to subscribe: {}", e);
                        break Err(e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match Self::parse_message(&publish.topic, &publish.payload) {
                        Ok(event) => {
                            if tx.send(Delivery { event, publish }).await.is_err() {
                                info!("Receiver dropped, stopping MQTT event loop");
                                break Ok(());
                            }
                        }
                        Err(TrackerError::UnknownEventKind(kind)) => {
                            debug!("Ignoring {} message on {}", kind, publish.topic);
                            Self::ack(&client, &publish).await;
                        }
                        Err(e) => {
                            warn!("Failed to parse message on {}: {}", publish.topic, e);
                            Self::ack(&client, &publish).await;
                        }
                    }
                }
                Err(e) => {
                    error!("MQTT Error: {}", e);
                    continue;
                }
                _ => continue,
            }
        }
    }

    async fn ack(client: &AsyncClient, publish: &Publish) {
        if let Err(e) = client.ack(publish).await {
            error!("Failed to acknowledge message on {}: {}", publish.topic, e);
        }
    }

    /// Parse incoming message based on topic
    ///
    /// Only JSON topics (`<root>/.../json/...`) carry envelopes.
    fn parse_message(topic: &str, payload: &[u8]) -> Result<InboundEvent, TrackerError> {
        if !topic.split('/').any(|part| part == "json") {
            return Err(TrackerError::InvalidTopic(topic.to_string()));
        }

        InboundEvent::from_json(payload)
    }
}

impl MqttClient {
    /// Receive next event, None once the event loop has stopped
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Acknowledge a delivery after it has been stored
    pub async fn ack(&self, delivery: &Delivery) -> Result<(), TrackerError> {
        self.client.ack(&delivery.publish).await?;
        Ok(())
    }
}
