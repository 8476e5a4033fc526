//! Error types for the bridge.
//!
//! Resolution misses (unknown keys, unknown units) are never errors: the
//! resolvers always produce a best-effort record and log a diagnostic. The
//! types here cover configuration, table loading, value conversion,
//! publishing and pipeline tasks.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for pipeline tasks.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised while loading or validating the extension configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML or does not match the schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field failed validation
    #[error("Invalid config field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading the metadata tables.
#[derive(Debug, Error)]
pub enum TableError {
    /// The base table is missing
    #[error("Base table not found: {0}")]
    MissingBase(String),

    /// A table file could not be read
    #[error("Failed to read table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A table is not valid TOML
    #[error("Failed to parse table {name}: {reason}")]
    Parse { name: String, reason: String },

    /// A table parsed but does not have the expected shape
    #[error("Invalid entry '{entry}' in table {table}: {reason}")]
    Invalid {
        table: &'static str,
        entry: String,
        reason: String,
    },

    /// A sensor references a conversion that does not exist
    #[error("Unknown conversion '{name}' for sensor '{sensor}'")]
    UnknownConversion { sensor: String, name: String },
}

/// Errors raised by a named value conversion.
#[derive(Debug, Error, PartialEq)]
pub enum ConversionError {
    /// The conversion needs a numeric input
    #[error("Conversion {conversion} expects a number, got '{value}'")]
    NotNumeric {
        conversion: &'static str,
        value: String,
    },

    /// The value is not a known unit system code
    #[error("Invalid unit system value: {0}")]
    UnknownUnitSystem(f64),

    /// NaN or infinite input
    #[error("Conversion {conversion} got a non-finite value: {value}")]
    NotFinite {
        conversion: &'static str,
        value: f64,
    },

    /// The timestamp cannot be represented
    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(f64),

    /// An enum map the conversion relies on is missing
    #[error("Enum map '{0}' is not loaded")]
    MissingEnum(&'static str),
}

/// Errors raised by a publish sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink is not connected to its transport
    #[error("Sink not connected")]
    NotConnected,

    /// The sink has been closed
    #[error("Sink is closed")]
    Closed,

    /// The transport rejected the publish
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors surfaced by pipeline tasks.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Publishing failed
    #[error("Publish failed: {0}")]
    Sink(#[from] SinkError),

    /// A conversion failed
    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// The packet carries no unit system indicator
    #[error("Packet has no '{0}' key")]
    MissingUnitSystem(&'static str),

    /// The packet's unit system indicator is not a known code
    #[error("Packet unit system is invalid: {0}")]
    InvalidUnitSystem(String),

    /// The packet could not be parsed
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// JSON serialisation failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::invalid("node_id", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Invalid config field 'node_id': must not be empty"
        );

        let err = TableError::UnknownConversion {
            sensor: "windDirCardinal".to_string(),
            name: "to_compass".to_string(),
        };
        assert!(err.to_string().contains("to_compass"));
        assert!(err.to_string().contains("windDirCardinal"));
    }

    #[test]
    fn test_bridge_error_from_sink() {
        let err: BridgeError = SinkError::NotConnected.into();
        assert!(matches!(err, BridgeError::Sink(SinkError::NotConnected)));
        assert_eq!(err.to_string(), "Publish failed: Sink not connected");
    }
}
