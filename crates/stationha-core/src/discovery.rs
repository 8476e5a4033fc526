//! Home Assistant MQTT discovery documents.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::BridgeResult;
use crate::record::MetadataRecord;
use crate::registry::MeasurementRegistry;
use crate::sink::PublishSink;
use crate::topics::{DeviceDescription, Topics};

/// One rendered discovery document.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryDocument {
    pub key: String,
    pub topic: String,
    pub payload: Map<String, Value>,
}

/// Publishes a discovery document for every registered measurement.
pub struct DiscoveryPublisher {
    registry: Arc<MeasurementRegistry>,
    topics: Topics,
    device: Value,
    sink: Arc<dyn PublishSink>,
}

impl DiscoveryPublisher {
    pub fn new(
        registry: Arc<MeasurementRegistry>,
        topics: Topics,
        device: &DeviceDescription,
        sink: Arc<dyn PublishSink>,
    ) -> BridgeResult<Self> {
        Ok(Self {
            registry,
            topics,
            device: serde_json::to_value(device)?,
            sink,
        })
    }

    /// Render the document for one measurement.
    ///
    /// Base attributes are overlaid by the record's metadata, then by the
    /// device block. Null attributes are dropped.
    pub fn render(&self, key: &str, record: &MetadataRecord) -> DiscoveryDocument {
        let mut payload = Map::new();
        payload.insert(
            "availability_topic".to_string(),
            Value::String(self.topics.availability()),
        );
        payload.insert("state_topic".to_string(), Value::String(self.topics.state(key)));
        payload.insert("unique_id".to_string(), Value::String(self.topics.unique_id(key)));
        for (attr, value) in &record.metadata {
            payload.insert(attr.clone(), value.clone());
        }
        payload.insert("device".to_string(), self.device.clone());
        payload.retain(|_, value| !value.is_null());

        DiscoveryDocument {
            key: key.to_string(),
            topic: self.topics.discovery(record.integration, key),
            payload,
        }
    }

    /// Render documents for the current registry contents, in discovery order.
    pub fn render_all(&self) -> Vec<DiscoveryDocument> {
        self.registry
            .snapshot()
            .iter()
            .map(|(key, record)| self.render(key, record))
            .collect()
    }

    /// Publish every document. Returns the number published.
    pub async fn publish_all(&self) -> BridgeResult<usize> {
        let documents = self.render_all();
        info!("Publishing {} discovery configurations", documents.len());
        for document in &documents {
            let payload = serde_json::to_string(&document.payload)?;
            debug!(topic = %document.topic, "Publishing discovery configuration");
            self.sink.publish(&document.topic, payload).await?;
        }
        Ok(documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use crate::sink::MemorySink;
    use crate::tables::MetadataTables;
    use crate::units::{StandardUnits, UnitSystem};
    use serde_json::json;

    fn publisher() -> (Arc<MeasurementRegistry>, DiscoveryPublisher, Arc<MemorySink>) {
        let registry = Arc::new(MeasurementRegistry::new(
            Arc::new(MetadataTables::embedded().unwrap()),
            Arc::new(StandardUnits::new()),
            UnitSystem::MetricWx,
        ));
        let sink = Arc::new(MemorySink::new());
        let publisher = DiscoveryPublisher::new(
            registry.clone(),
            Topics::new("homeassistant", "weather", "station1"),
            &DeviceDescription::new("station1", "Backyard", "Vantage Pro2", "Davis"),
            sink.clone(),
        )
        .unwrap();
        (registry, publisher, sink)
    }

    #[test]
    fn test_render_document() {
        let (registry, publisher, _) = publisher();
        registry.observe(&Packet::new().with("outTemp", 20.0).with("windDir", 90.0));

        let docs = publisher.render_all();
        assert_eq!(docs.len(), 3);

        let out = &docs[0];
        assert_eq!(out.topic, "homeassistant/sensor/station1/outTemp/config");
        assert_eq!(out.payload["availability_topic"], json!("weather/status"));
        assert_eq!(out.payload["state_topic"], json!("weather/outTemp"));
        assert_eq!(out.payload["unique_id"], json!("station1_outTemp"));
        assert_eq!(out.payload["unit_of_measurement"], json!("°C"));
        assert_eq!(
            out.payload["device"],
            json!({
                "identifiers": ["station1"],
                "name": "Backyard",
                "model": "Vantage Pro2",
                "manufacturer": "Davis"
            })
        );

        let cardinal = &docs[2];
        assert_eq!(cardinal.key, "windDirCardinal");
        assert!(!cardinal.payload.contains_key("unit_of_measurement"));
    }

    #[tokio::test]
    async fn test_publish_all_is_repeatable() {
        let (registry, publisher, sink) = publisher();
        registry.observe(&Packet::new().with("outTemp", 20.0).with("txBatteryStatus", 0.0));

        assert_eq!(publisher.publish_all().await.unwrap(), 2);
        let first = sink.take();
        assert_eq!(publisher.publish_all().await.unwrap(), 2);
        let second = sink.take();

        assert_eq!(first, second);
        assert_eq!(
            first[1].topic,
            "homeassistant/binary_sensor/station1/txBatteryStatus/config"
        );
    }
}
