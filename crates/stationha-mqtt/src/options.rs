//! Broker connection options.

use std::time::Duration;

use rumqttc::{LastWill, MqttOptions, QoS, Transport};
use stationha_core::{MqttSettings, Topics};
use uuid::Uuid;

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Client id from the settings, or a generated `stationha-<uuid>`.
pub fn client_id(settings: &MqttSettings) -> String {
    settings
        .client_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("stationha-{}", Uuid::new_v4()))
}

/// Build rumqttc options with the availability last will.
pub fn build_options(settings: &MqttSettings, topics: &Topics) -> MqttOptions {
    let mut options = MqttOptions::new(client_id(settings), &settings.hostname, settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive));
    options.set_last_will(LastWill::new(
        topics.availability(),
        OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));

    if let Some((user, pass)) = settings.credentials() {
        options.set_credentials(user, pass);
    }
    if settings.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use stationha_core::ExtensionConfig;

    fn config(mqtt: &str) -> ExtensionConfig {
        ExtensionConfig::from_toml_str(&format!(
            r#"
node_id = "station1"

[mqtt]
{}

[station]
name = "Backyard"
model = "Vantage Pro2"
manufacturer = "Davis"
"#,
            mqtt
        ))
        .unwrap()
    }

    #[test]
    fn test_generated_client_id() {
        let config = config(r#"hostname = "broker""#);
        let id = client_id(&config.mqtt);
        assert!(id.starts_with("stationha-"));
        assert_ne!(id, client_id(&config.mqtt));
    }

    #[test]
    fn test_build_options() {
        let config = config(
            r#"
hostname = "broker"
port = 1884
client_id = "wx"
username = "user"
password = "pass"
keep_alive = 30
"#,
        );
        let options = build_options(&config.mqtt, &config.topics());

        assert_eq!(options.client_id(), "wx");
        assert_eq!(options.broker_address(), ("broker".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert_eq!(
            options.credentials(),
            Some(("user".to_string(), "pass".to_string()))
        );

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "weather/status");
        assert_eq!(&will.message[..], OFFLINE.as_bytes());
        assert!(will.retain);
    }

    #[test]
    fn test_partial_credentials_are_ignored() {
        let config = config("hostname = \"broker\"\nusername = \"user\"\n");
        let options = build_options(&config.mqtt, &config.topics());
        assert!(options.credentials().is_none());
    }
}
