//! Publish sink abstraction.
//!
//! The pipeline only ever hands `(topic, payload)` pairs to a sink. The MQTT
//! transport lives in `stationha-mqtt`; [`MemorySink`] records messages for
//! tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::SinkError;

/// Destination for discovery and state messages.
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SinkError>;

    /// Whether the transport is currently able to deliver.
    fn is_connected(&self) -> bool;

    /// Release the transport. Further publishes fail with [`SinkError::Closed`].
    async fn close(&self) -> Result<(), SinkError>;
}

/// A message captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
}

/// In-memory sink.
#[derive(Debug)]
pub struct MemorySink {
    messages: Mutex<Vec<PublishedMessage>>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().clone()
    }

    /// Drain the captured messages.
    pub fn take(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut *self.messages.lock())
    }

    /// Payloads published on `topic`, oldest first.
    pub fn payloads_for(&self, topic: &str) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PublishSink for MemorySink {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.messages.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.is_closed()
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_records_and_closes() {
        let sink = MemorySink::new();
        sink.publish("weather/outTemp", "21.5".to_string()).await.unwrap();
        sink.publish("weather/inTemp", "20".to_string()).await.unwrap();

        assert_eq!(sink.payloads_for("weather/outTemp"), vec!["21.5"]);
        assert_eq!(sink.len(), 2);
        assert!(sink.is_connected());

        sink.close().await.unwrap();
        assert!(!sink.is_connected());
        assert!(matches!(
            sink.publish("weather/outTemp", "1".to_string()).await,
            Err(SinkError::Closed)
        ));
        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());
    }
}
