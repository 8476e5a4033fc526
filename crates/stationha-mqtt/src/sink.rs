//! rumqttc-backed publish sink.
//!
//! Owns the broker event loop: marks the sink connected on ConnAck, announces
//! availability, listens for the hub's birth message and reports connection
//! changes as [`BrokerEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Packet as MqttPacket, QoS};
use stationha_core::{MqttSettings, PublishSink, SinkError, Topics};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::options::{build_options, OFFLINE, ONLINE};

const REQUEST_CAPACITY: usize = 10;
const EVENT_CAPACITY: usize = 16;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Connection changes surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEvent {
    /// ConnAck received, availability published
    Connected,
    /// The connection dropped; rumqttc keeps reconnecting
    Disconnected,
    /// The hub announced it came online; discovery should be republished
    HubOnline,
}

/// Publish sink over an MQTT broker connection.
pub struct MqttSink {
    client: AsyncClient,
    availability_topic: String,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl MqttSink {
    /// Start connecting to the broker. Returns the sink and its event stream.
    pub fn connect(settings: &MqttSettings, topics: &Topics) -> (Arc<Self>, mpsc::Receiver<BrokerEvent>) {
        let options = build_options(settings, topics);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        let sink = Arc::new(Self {
            client: client.clone(),
            availability_topic: topics.availability(),
            connected: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(true)),
            closed: AtomicBool::new(false),
        });

        let driver = EventLoopDriver {
            client,
            availability_topic: topics.availability(),
            hub_status_topic: topics.hub_status(),
            connected: sink.connected.clone(),
            running: sink.running.clone(),
            events: event_tx,
        };
        tokio::spawn(driver.run(eventloop));

        info!(
            host = %settings.hostname,
            port = settings.port,
            tls = settings.use_tls,
            "Connecting to MQTT broker"
        );
        (sink, event_rx)
    }
}

#[async_trait]
impl PublishSink for MqttSink {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        // rumqttc would queue the request until reconnect and stall the task
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SinkError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Publishing offline availability");
        self.client
            .publish(&self.availability_topic, QoS::AtLeastOnce, true, OFFLINE)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        self.running.store(false, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct EventLoopDriver {
    client: AsyncClient,
    availability_topic: String,
    hub_status_topic: String,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    events: mpsc::Sender<BrokerEvent>,
}

impl EventLoopDriver {
    async fn run(self, mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(event) => self.handle(event),
                Err(e) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if self.connected.swap(false, Ordering::SeqCst) {
                        self.emit(BrokerEvent::Disconnected);
                    }
                    warn!("MQTT connection error: {}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
        info!("MQTT event loop stopped");
    }

    fn handle(&self, event: Event) {
        match event {
            Event::Incoming(MqttPacket::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    error!("MQTT broker refused connection: {:?}", ack.code);
                    return;
                }
                info!("Connected to MQTT broker, publishing online availability");
                self.connected.store(true, Ordering::SeqCst);
                if let Err(e) =
                    self.client
                        .try_publish(&self.availability_topic, QoS::AtLeastOnce, true, ONLINE)
                {
                    warn!("Failed to publish availability: {}", e);
                }
                if let Err(e) = self.client.try_subscribe(&self.hub_status_topic, QoS::AtLeastOnce) {
                    warn!("Failed to subscribe to {}: {}", self.hub_status_topic, e);
                }
                self.emit(BrokerEvent::Connected);
            }
            Event::Incoming(MqttPacket::Publish(publish)) => {
                if is_hub_birth(&self.hub_status_topic, &publish.topic, &publish.payload) {
                    info!("Home Assistant came online");
                    self.emit(BrokerEvent::HubOnline);
                }
            }
            Event::Incoming(MqttPacket::SubAck(ack)) => {
                debug!(pkid = ack.pkid, "Subscribed to hub status");
            }
            Event::Incoming(MqttPacket::Disconnect) => {
                self.connected.store(false, Ordering::SeqCst);
                self.emit(BrokerEvent::Disconnected);
            }
            _ => {}
        }
    }

    fn emit(&self, event: BrokerEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("Dropping broker event {:?}: {}", event, e);
        }
    }
}

/// Whether a message is the hub announcing it is online.
pub fn is_hub_birth(hub_status_topic: &str, topic: &str, payload: &[u8]) -> bool {
    topic == hub_status_topic && payload == ONLINE.as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_birth_detection() {
        assert!(is_hub_birth("homeassistant/status", "homeassistant/status", b"online"));
        assert!(!is_hub_birth("homeassistant/status", "homeassistant/status", b"offline"));
        assert!(!is_hub_birth("homeassistant/status", "weather/status", b"online"));
    }
}
