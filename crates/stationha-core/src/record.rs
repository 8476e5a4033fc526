//! Resolved measurement metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conversion::Conversion;

/// Home Assistant integration a measurement is published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    #[default]
    Sensor,
    BinarySensor,
}

impl IntegrationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::BinarySensor => "binary_sensor",
        }
    }
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor" => Ok(Self::Sensor),
            "binary_sensor" => Ok(Self::BinarySensor),
            other => Err(format!(
                "unknown integration '{}', expected sensor or binary_sensor",
                other
            )),
        }
    }
}

/// Description of one measurement key.
///
/// `metadata` holds the discovery attributes (name, icon, device_class,
/// unit_of_measurement, ...). A record with a `source` is a derived sensor:
/// its value is computed from the source key's raw value by `conversion`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataRecord {
    pub integration: IntegrationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion: Option<Conversion>,
    pub metadata: Map<String, Value>,
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name").and_then(Value::as_str)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.metadata
            .insert("name".to_string(), Value::String(name.into()));
    }

    pub fn is_derived(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_derived_from(&self, key: &str) -> bool {
        self.source.as_deref() == Some(key)
    }

    pub fn unit_of_measurement(&self) -> Option<&Value> {
        self.metadata.get("unit_of_measurement")
    }

    /// Layer this record's metadata over `base`. Keys already present win.
    pub fn underlay(&mut self, base: &Map<String, Value>) {
        let mut merged = base.clone();
        for (key, value) in std::mem::take(&mut self.metadata) {
            merged.insert(key, value);
        }
        self.metadata = merged;
    }
}
