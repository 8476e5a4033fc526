//! StationHA core.
//!
//! Turns weather station measurement packets into Home Assistant MQTT
//! discovery documents and state messages.
//!
//! ## Pipeline
//!
//! 1. [`PacketPreprocessor`] validates the packet's unit system.
//! 2. [`MeasurementRegistry`] registers unseen keys, resolving each through
//!    [`KeyResolver`] and [`UnitResolver`], and cascades to derived sensors.
//! 3. [`DiscoveryPublisher`] renders one config document per registered key.
//! 4. [`StatePublisher`] publishes values, applying named [`Conversion`]s.
//!
//! [`Controller`] runs these steps as supervised tasks over a [`PublishSink`].

pub mod config;
pub mod controller;
pub mod conversion;
pub mod discovery;
pub mod error;
pub mod packet;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod sink;
pub mod state;
pub mod supervisor;
pub mod tables;
pub mod topics;
pub mod units;

pub use config::{ExtensionConfig, MqttSettings, StationInfo};
pub use controller::{Controller, PacketKind};
pub use conversion::{Conversion, StationContext};
pub use discovery::{DiscoveryDocument, DiscoveryPublisher};
pub use error::{BridgeError, BridgeResult, ConfigError, ConversionError, SinkError, TableError};
pub use packet::{Packet, PacketPreprocessor, PacketValue, UNIT_SYSTEM_KEY};
pub use record::{IntegrationKind, MetadataRecord};
pub use registry::MeasurementRegistry;
pub use resolver::{KeyResolver, UnitResolver};
pub use sink::{MemorySink, PublishSink, PublishedMessage};
pub use state::{StatePublisher, StateReport, SETTLE_COUNTDOWN_START};
pub use supervisor::{SupervisorStats, TaskSpawner, TaskSupervisor};
pub use tables::{EnumMaps, LocaleOptions, MetadataTables};
pub use topics::{DeviceDescription, Topics};
pub use units::{StandardUnits, UnitConverter, UnitSystem, UnitType};
