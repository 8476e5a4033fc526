//! Measurement packets.
//!
//! A packet is an ordered mapping of measurement key to value, as delivered
//! by the station host for every loop packet or archive record. The
//! `usUnits` key names the unit system the packet's numbers are expressed in.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{BridgeError, BridgeResult};
use crate::units::UnitSystem;

/// Key carrying the packet's unit system code.
pub const UNIT_SYSTEM_KEY: &str = "usUnits";

/// A single packet value.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketValue {
    Number(f64),
    Text(String),
    Null,
}

impl PacketValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value. Text is parsed leniently.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    /// Convert a JSON value. Arrays and objects are not valid packet values.
    pub fn from_json(value: &Value) -> BridgeResult<Self> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Number(if *b { 1.0 } else { 0.0 })),
            Value::Number(n) => n
                .as_f64()
                .map(Self::Number)
                .ok_or_else(|| BridgeError::InvalidPacket(format!("unrepresentable number {}", n))),
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(BridgeError::InvalidPacket(format!(
                "nested value {} is not a measurement",
                value
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(s) => Value::String(s.clone()),
            Self::Null => Value::Null,
        }
    }
}

impl fmt::Display for PacketValue {
    /// State payload form: integral numbers render without a fraction.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
            Self::Null => f.write_str("None"),
        }
    }
}

impl From<f64> for PacketValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for PacketValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PacketValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Ordered key/value measurement packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    entries: Vec<(String, PacketValue)>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PacketValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value. Replacing keeps the key's position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PacketValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&PacketValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PacketValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut PacketValue)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unit system the packet's values are expressed in, if it declares one.
    pub fn unit_system(&self) -> Option<UnitSystem> {
        self.get(UNIT_SYSTEM_KEY)
            .and_then(PacketValue::as_f64)
            .and_then(|code| UnitSystem::from_code(code as i64))
    }

    /// Parse a JSON object into a packet, keeping key order.
    pub fn from_json(value: &Value) -> BridgeResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| BridgeError::InvalidPacket("packet must be a JSON object".to_string()))?;
        let mut packet = Self::new();
        for (key, value) in object {
            packet.insert(key.clone(), PacketValue::from_json(value)?);
        }
        Ok(packet)
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<PacketValue>> FromIterator<(K, V)> for Packet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut packet = Packet::new();
        for (k, v) in iter {
            packet.insert(k, v);
        }
        packet
    }
}

impl Serialize for Packet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Packet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Packet::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Validates and normalises packets before they enter the pipeline.
#[derive(Debug, Clone, Default)]
pub struct PacketPreprocessor;

impl PacketPreprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Check the unit system indicator and replace non-finite numbers with null.
    pub fn process(&self, mut packet: Packet) -> BridgeResult<Packet> {
        let indicator = packet
            .get(UNIT_SYSTEM_KEY)
            .ok_or(BridgeError::MissingUnitSystem(UNIT_SYSTEM_KEY))?;
        if packet.unit_system().is_none() {
            return Err(BridgeError::InvalidUnitSystem(indicator.to_string()));
        }

        let mut normalised = 0usize;
        for (_, value) in packet.iter_mut() {
            if matches!(value, PacketValue::Number(n) if !n.is_finite()) {
                *value = PacketValue::Null;
                normalised += 1;
            }
        }
        if normalised > 0 {
            tracing::debug!("Replaced {} non-finite values with null", normalised);
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_packet_keeps_insertion_order() {
        let packet = Packet::new()
            .with("outTemp", 21.5)
            .with("usUnits", 17.0)
            .with("windDir", 45.0);
        let keys: Vec<&str> = packet.keys().collect();
        assert_eq!(keys, vec!["outTemp", "usUnits", "windDir"]);

        let mut packet = packet;
        packet.insert("outTemp", 22.0);
        let keys: Vec<&str> = packet.keys().collect();
        assert_eq!(keys, vec!["outTemp", "usUnits", "windDir"]);
        assert_eq!(packet.get("outTemp"), Some(&PacketValue::Number(22.0)));
    }

    #[test]
    fn test_from_json() {
        let value = json!({"dateTime": 1700000000, "usUnits": 1, "outTemp": null, "txBatteryStatus": true});
        let packet = Packet::from_json(&value).unwrap();
        assert_eq!(packet.len(), 4);
        assert_eq!(packet.get("outTemp"), Some(&PacketValue::Null));
        assert_eq!(packet.get("txBatteryStatus"), Some(&PacketValue::Number(1.0)));
        assert_eq!(packet.unit_system(), Some(UnitSystem::Us));

        assert!(Packet::from_json(&json!([1, 2])).is_err());
        assert!(Packet::from_json(&json!({"a": {"b": 1}})).is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(PacketValue::Number(1.0).to_string(), "1");
        assert_eq!(PacketValue::Number(21.5).to_string(), "21.5");
        assert_eq!(PacketValue::Text("NE".into()).to_string(), "NE");
    }

    #[test]
    fn test_preprocessor() {
        let pre = PacketPreprocessor::new();

        let packet = Packet::new().with("usUnits", 17.0).with("outTemp", f64::NAN);
        let packet = pre.process(packet).unwrap();
        assert_eq!(packet.get("outTemp"), Some(&PacketValue::Null));

        let missing = Packet::new().with("outTemp", 1.0);
        assert!(matches!(
            pre.process(missing),
            Err(BridgeError::MissingUnitSystem(_))
        ));

        let invalid = Packet::new().with("usUnits", 99.0);
        assert!(matches!(
            pre.process(invalid),
            Err(BridgeError::InvalidUnitSystem(_))
        ));
    }
}
