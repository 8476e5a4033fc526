//! MQTT topic layout and the device block shared by discovery documents.

use serde::Serialize;

use crate::record::IntegrationKind;

/// Topic naming for one bridge node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    discovery_prefix: String,
    state_prefix: String,
    node_id: String,
}

impl Topics {
    pub fn new(
        discovery_prefix: impl Into<String>,
        state_prefix: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            discovery_prefix: discovery_prefix.into(),
            state_prefix: state_prefix.into(),
            node_id: node_id.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// `<state_prefix>/status`, carries `online`/`offline`.
    pub fn availability(&self) -> String {
        format!("{}/status", self.state_prefix)
    }

    /// `<discovery_prefix>/status`, where the hub announces its own birth.
    pub fn hub_status(&self) -> String {
        format!("{}/status", self.discovery_prefix)
    }

    pub fn state(&self, key: &str) -> String {
        format!("{}/{}", self.state_prefix, key)
    }

    pub fn discovery(&self, integration: IntegrationKind, key: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.discovery_prefix, integration, self.node_id, key
        )
    }

    pub fn unique_id(&self, key: &str) -> String {
        format!("{}_{}", self.node_id, key)
    }
}

/// The `device` block of every discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescription {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
}

impl DeviceDescription {
    pub fn new(
        node_id: impl Into<String>,
        name: impl Into<String>,
        model: impl Into<String>,
        manufacturer: impl Into<String>,
    ) -> Self {
        Self {
            identifiers: vec![node_id.into()],
            name: name.into(),
            model: model.into(),
            manufacturer: manufacturer.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_shapes() {
        let topics = Topics::new("homeassistant", "weather", "backyard");
        assert_eq!(topics.availability(), "weather/status");
        assert_eq!(topics.hub_status(), "homeassistant/status");
        assert_eq!(topics.state("outTemp"), "weather/outTemp");
        assert_eq!(
            topics.discovery(IntegrationKind::BinarySensor, "extraAlarm1"),
            "homeassistant/binary_sensor/backyard/extraAlarm1/config"
        );
        assert_eq!(topics.unique_id("outTemp"), "backyard_outTemp");
    }
}
