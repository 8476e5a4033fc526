//! MQTT transport for the station bridge.
//!
//! Provides [`MqttSink`], a [`stationha_core::PublishSink`] over rumqttc that
//! maintains the retained availability topic and watches the Home Assistant
//! status topic for restarts.

pub mod options;
pub mod sink;

pub use options::{build_options, client_id, OFFLINE, ONLINE};
pub use sink::{is_hub_birth, BrokerEvent, MqttSink};
