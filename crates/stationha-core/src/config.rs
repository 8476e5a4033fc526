//! Extension configuration.
//!
//! Loaded once from TOML at startup and passed by reference to everything
//! that needs it:
//!
//! ```toml
//! node_id = "backyard"
//! unit_system = "METRICWX"
//! lang = "de"
//!
//! [mqtt]
//! hostname = "broker.local"
//!
//! [station]
//! name = "Backyard"
//! model = "Vantage Pro2"
//! manufacturer = "Davis"
//! timezone = "Europe/Berlin"
//!
//! [sensors.outTemp.metadata]
//! icon = "mdi:sun-thermometer"
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::conversion::StationContext;
use crate::error::ConfigError;
use crate::tables::LocaleOptions;
use crate::topics::{DeviceDescription, Topics};
use crate::units::UnitSystem;

pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";
pub const DEFAULT_STATE_PREFIX: &str = "weather";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
/// The broker client rejects keep-alive intervals below this.
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

fn default_discovery_prefix() -> String {
    DEFAULT_DISCOVERY_PREFIX.to_string()
}

fn default_state_prefix() -> String {
    DEFAULT_STATE_PREFIX.to_string()
}

fn default_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_keep_alive() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn identifier_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").ok()).as_ref()
}

fn is_identifier(s: &str) -> bool {
    identifier_re().is_some_and(|re| re.is_match(s))
}

/// Top-level extension configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionConfig {
    /// Node identifier used in topics and unique ids
    pub node_id: String,

    #[serde(default = "default_discovery_prefix")]
    pub discovery_topic_prefix: String,

    #[serde(default = "default_state_prefix")]
    pub state_topic_prefix: String,

    /// Canonical unit system values are published in
    #[serde(default)]
    pub unit_system: UnitSystem,

    /// Locale code for translated names
    #[serde(default)]
    pub lang: Option<String>,

    /// Directory to read locale tables from instead of the built-in ones
    #[serde(default)]
    pub locales_dir: Option<PathBuf>,

    pub mqtt: MqttSettings,

    pub station: StationInfo,

    /// Sensor definition overrides
    #[serde(default)]
    pub sensors: toml::Table,

    /// Unit metadata overrides
    #[serde(default)]
    pub units: toml::Table,

    /// Enum map overrides
    #[serde(default)]
    pub enums: toml::Table,
}

/// Broker connection settings.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttSettings {
    pub hostname: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Generated when unset
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    #[serde(default)]
    pub use_tls: bool,
}

impl MqttSettings {
    /// Username and password, only when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("keep_alive", &self.keep_alive)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

/// Station identity shown on the Home Assistant device.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StationInfo {
    pub name: String,
    pub model: String,
    pub manufacturer: String,

    /// IANA time zone the station's clock runs in
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl StationInfo {
    pub fn time_zone(&self) -> Result<Tz, ConfigError> {
        self.timezone.parse::<Tz>().map_err(|_| {
            ConfigError::invalid(
                "station.timezone",
                format!("unknown time zone '{}'", self.timezone),
            )
        })
    }
}

impl ExtensionConfig {
    /// Load and validate a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        info!(category = "config", "Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parse and validate config text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_identifier(&self.node_id) {
            return Err(ConfigError::invalid(
                "node_id",
                "must be non-empty and contain only letters, digits, '_' or '-'",
            ));
        }
        validate_prefix("discovery_topic_prefix", &self.discovery_topic_prefix)?;
        validate_prefix("state_topic_prefix", &self.state_topic_prefix)?;

        if let Some(lang) = &self.lang {
            if !is_identifier(lang) {
                return Err(ConfigError::invalid("lang", format!("invalid locale code '{}'", lang)));
            }
        }

        if self.mqtt.hostname.trim().is_empty() {
            return Err(ConfigError::invalid("mqtt.hostname", "must not be empty"));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::invalid("mqtt.port", "must not be 0"));
        }
        if self.mqtt.keep_alive < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::invalid(
                "mqtt.keep_alive",
                format!("must be at least {} seconds", MIN_KEEP_ALIVE_SECS),
            ));
        }
        if self.mqtt.username.is_some() != self.mqtt.password.is_some() {
            tracing::warn!(
                category = "config",
                "Only one of mqtt.username and mqtt.password is set, connecting anonymously"
            );
        }

        for (field, value) in [
            ("station.name", &self.station.name),
            ("station.model", &self.station.model),
            ("station.manufacturer", &self.station.manufacturer),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }
        self.station.time_zone()?;

        Ok(())
    }

    pub fn topics(&self) -> Topics {
        Topics::new(
            &self.discovery_topic_prefix,
            &self.state_topic_prefix,
            &self.node_id,
        )
    }

    pub fn device(&self) -> DeviceDescription {
        DeviceDescription::new(
            &self.node_id,
            &self.station.name,
            &self.station.model,
            &self.station.manufacturer,
        )
    }

    pub fn station_context(&self) -> Result<StationContext, ConfigError> {
        Ok(StationContext {
            time_zone: self.station.time_zone()?,
        })
    }

    pub fn locale_options(&self) -> LocaleOptions {
        LocaleOptions {
            lang: self.lang.clone(),
            locales_dir: self.locales_dir.clone(),
            enum_overrides: self.enums.clone(),
            unit_overrides: self.units.clone(),
            sensor_overrides: self.sensors.clone(),
        }
    }
}

fn validate_prefix(field: &'static str, prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    if prefix.contains(['+', '#']) {
        return Err(ConfigError::invalid(field, "must not contain MQTT wildcards"));
    }
    if prefix.starts_with('/') || prefix.ends_with('/') {
        return Err(ConfigError::invalid(field, "must not start or end with '/'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        node_id = "backyard"

        [mqtt]
        hostname = "localhost"

        [station]
        name = "Backyard"
        model = "Vantage Pro2"
        manufacturer = "Davis"
    "#;

    #[test]
    fn test_defaults() {
        let config = ExtensionConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.discovery_topic_prefix, "homeassistant");
        assert_eq!(config.state_topic_prefix, "weather");
        assert_eq!(config.unit_system, UnitSystem::MetricWx);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.keep_alive, 60);
        assert!(!config.mqtt.use_tls);
        assert!(config.mqtt.credentials().is_none());
        assert_eq!(config.station.time_zone().unwrap(), Tz::UTC);
        assert_eq!(config.topics().availability(), "weather/status");
        assert_eq!(config.device().identifiers, vec!["backyard"]);
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            node_id = "roof-1"
            discovery_topic_prefix = "ha"
            state_topic_prefix = "wx/roof"
            unit_system = "US"
            lang = "cs"

            [mqtt]
            hostname = "broker"
            port = 8883
            username = "wx"
            password = "secret"
            use_tls = true

            [station]
            name = "Roof"
            model = "WS-2902"
            manufacturer = "Ambient"
            timezone = "Europe/Prague"

            [sensors.outTemp.metadata]
            icon = "mdi:sun-thermometer"
        "#;
        let config = ExtensionConfig::from_toml_str(text).unwrap();
        assert_eq!(config.unit_system, UnitSystem::Us);
        assert_eq!(config.mqtt.credentials(), Some(("wx", "secret")));
        assert_eq!(config.station_context().unwrap().time_zone, chrono_tz::Europe::Prague);
        assert_eq!(config.topics().state("outTemp"), "wx/roof/outTemp");

        let options = config.locale_options();
        assert_eq!(options.lang.as_deref(), Some("cs"));
        assert!(options.sensor_overrides.contains_key("outTemp"));
        assert!(!format!("{:?}", config.mqtt).contains("secret"));
    }

    #[test]
    fn test_rejects_invalid() {
        let bad_node = MINIMAL.replace("backyard", "back yard");
        assert!(matches!(
            ExtensionConfig::from_toml_str(&bad_node),
            Err(ConfigError::Invalid { field: "node_id", .. })
        ));

        let bad_tz = format!("{}\ntimezone = \"Mars/Olympus\"\n", MINIMAL);
        assert!(matches!(
            ExtensionConfig::from_toml_str(&bad_tz),
            Err(ConfigError::Invalid { field: "station.timezone", .. })
        ));

        let unknown = format!("colour = \"red\"\n{}", MINIMAL);
        assert!(matches!(
            ExtensionConfig::from_toml_str(&unknown),
            Err(ConfigError::Parse(_))
        ));

        let bad_units = format!("unit_system = \"IMPERIAL\"\n{}", MINIMAL);
        assert!(ExtensionConfig::from_toml_str(&bad_units).is_err());

        let wildcard = format!("state_topic_prefix = \"weather/#\"\n{}", MINIMAL);
        assert!(matches!(
            ExtensionConfig::from_toml_str(&wildcard),
            Err(ConfigError::Invalid { field: "state_topic_prefix", .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stationha.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        assert_eq!(ExtensionConfig::from_file(&path).unwrap().node_id, "backyard");

        assert!(matches!(
            ExtensionConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_sample_config() {
        let config =
            ExtensionConfig::from_toml_str(include_str!("../../../stationha.example.toml")).unwrap();
        assert_eq!(config.node_id, "backyard");
        assert_eq!(config.station.time_zone().unwrap(), chrono_tz::Europe::Berlin);
        assert!(config.sensors.contains_key("outTemp"));
    }
}
