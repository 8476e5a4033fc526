//! Key and unit resolution.
//!
//! Both resolvers are total: an unknown key or unit yields a best-effort
//! record and a log line, never an error.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::packet::UNIT_SYSTEM_KEY;
use crate::record::MetadataRecord;
use crate::tables::MetadataTables;
use crate::units::{UnitConverter, UnitSystem};

/// Ordered guess rules: first needle found in the lower-cased synthesized
/// name selects the sensor definition used as a template.
const GUESS_RULES: &[(&str, &str)] = &[
    ("alarm", "extraAlarm"),
    ("humidity", "outHumidity"),
    ("pressure", "pressure"),
    ("temperature", "outTemp"),
];

/// Leading words expanded in synthesized names.
const PREFIX_WORDS: &[(&str, &str)] = &[
    ("In ", "Indoor "),
    ("Out ", "Outdoor "),
    ("Tx ", "Transmit "),
    ("Rx ", "Receive "),
];

/// Keys whose unit follows `dateTime`.
const SOLAR_EVENT_KEYS: &[&str] = &["sunrise", "sunset", "stormStart"];

fn numeric_suffix_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)(\d+)$").ok()).as_ref()
}

fn digit_run_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").ok()).as_ref()
}

/// Split a key into its base and trailing digit run, e.g. `extraTemp12` -> (`extraTemp`, `12`).
pub fn split_numeric_suffix(key: &str) -> Option<(&str, &str)> {
    let caps = numeric_suffix_re()?.captures(key)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Human readable name for a key nobody described, e.g. `inFooPressure2` -> `Indoor Foo Pressure 2`.
pub fn synthesize_name(key: &str) -> String {
    let spaced_digits = match digit_run_re() {
        Some(re) => re.replace_all(key, " $0").into_owned(),
        None => key.to_string(),
    };

    let mut split = String::with_capacity(spaced_digits.len() + 8);
    for (i, c) in spaced_digits.chars().enumerate() {
        if i > 0 && c.is_uppercase() {
            split.push(' ');
        }
        split.push(c);
    }

    let mut name = title_case(&split);
    for (short, long) in PREFIX_WORDS {
        if let Some(rest) = name.strip_prefix(short) {
            name = format!("{}{}", long, rest);
            break;
        }
    }
    name
}

/// Capitalise the first letter of every letter run and lower-case the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_letter = true;
        } else {
            out.push(c);
            prev_letter = false;
        }
    }
    out
}

/// Resolves measurement keys to metadata records.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    tables: Arc<MetadataTables>,
}

impl KeyResolver {
    pub fn new(tables: Arc<MetadataTables>) -> Self {
        Self { tables }
    }

    /// Resolve `key`: exact match, then numbered channel, then a guess.
    pub fn resolve(&self, key: &str) -> MetadataRecord {
        if let Some(record) = self.tables.sensor(key) {
            return record.clone();
        }

        if let Some(record) = self.resolve_numbered(key) {
            return record;
        }

        let name = synthesize_name(key);
        let lowered = name.to_lowercase();
        let mut guess = GUESS_RULES
            .iter()
            .find(|(needle, _)| lowered.contains(needle))
            .and_then(|(_, template)| self.tables.sensor(template))
            .map(|template| MetadataRecord {
                integration: template.integration,
                source: None,
                conversion: None,
                metadata: template.metadata.clone(),
            })
            .unwrap_or_default();
        guess.set_name(name);

        warn!(key, guess = ?guess.metadata, "Guessed metadata for key");
        guess
    }

    fn resolve_numbered(&self, key: &str) -> Option<MetadataRecord> {
        let (base, suffix) = split_numeric_suffix(key)?;
        let mut record = self.tables.sensor(base)?.clone();
        let base_name = record.name().unwrap_or(base).to_string();
        record.set_name(format!("{} {}", base_name, suffix));
        Some(record)
    }
}

/// Resolves the display unit metadata of a key in a unit system.
#[derive(Clone)]
pub struct UnitResolver {
    tables: Arc<MetadataTables>,
    converter: Arc<dyn UnitConverter>,
}

impl UnitResolver {
    pub fn new(tables: Arc<MetadataTables>, converter: Arc<dyn UnitConverter>) -> Self {
        Self { tables, converter }
    }

    /// Unit metadata for `key`. Falls back to the bare unit name, or a null unit.
    pub fn resolve_unit(&self, key: &str, system: UnitSystem) -> Map<String, Value> {
        let mut unit = self.converter.standard_unit_type(system, key).unit;

        if unit.is_none() {
            if key == UNIT_SYSTEM_KEY {
                // no unit expected
            } else if key.ends_with("ET") {
                unit = self.converter.standard_unit_type(system, "ET").unit;
            } else if SOLAR_EVENT_KEYS.contains(&key) {
                unit = self.converter.standard_unit_type(system, "dateTime").unit;
            } else {
                warn!(key, unit_system = %system, "No unit found for measurement");
            }
            if let Some(unit) = &unit {
                info!(key, unit = %unit, "Guessed unit for measurement");
            }
        }

        if let Some(metadata) = unit.as_deref().and_then(|u| self.tables.unit(u)) {
            return metadata.clone();
        }

        let mut fallback = Map::new();
        fallback.insert(
            "unit_of_measurement".to_string(),
            unit.map(Value::String).unwrap_or(Value::Null),
        );
        fallback
    }
}

impl std::fmt::Debug for UnitResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::IntegrationKind;
    use crate::packet::Packet;
    use crate::units::{StandardUnits, UnitType};
    use serde_json::json;

    fn tables() -> Arc<MetadataTables> {
        Arc::new(MetadataTables::embedded().unwrap())
    }

    #[test]
    fn test_split_numeric_suffix() {
        assert_eq!(split_numeric_suffix("extraTemp3"), Some(("extraTemp", "3")));
        assert_eq!(split_numeric_suffix("soilMoist12"), Some(("soilMoist", "12")));
        assert_eq!(split_numeric_suffix("pm2_5"), Some(("pm2_", "5")));
        assert_eq!(split_numeric_suffix("outTemp"), None);
    }

    #[test]
    fn test_synthesize_name() {
        assert_eq!(synthesize_name("extraAlarm5"), "Extra Alarm 5");
        assert_eq!(synthesize_name("inFooPressure"), "Indoor Foo Pressure");
        assert_eq!(synthesize_name("outWidgetTemperature"), "Outdoor Widget Temperature");
        assert_eq!(synthesize_name("txSignal"), "Transmit Signal");
        assert_eq!(synthesize_name("rxPower"), "Receive Power");
        assert_eq!(synthesize_name("lightning"), "Lightning");
        assert_eq!(synthesize_name("insideGlow"), "Inside Glow");
    }

    #[test]
    fn test_resolve_exact() {
        let tables = tables();
        let resolver = KeyResolver::new(tables.clone());
        for (key, record) in &tables.sensors {
            assert_eq!(&resolver.resolve(key), record, "key {}", key);
        }
    }

    #[test]
    fn test_resolve_numbered() {
        let resolver = KeyResolver::new(tables());
        let record = resolver.resolve("extraTemp3");
        assert_eq!(record.name(), Some("Extra Temperature 3"));
        assert_eq!(record.metadata["device_class"], json!("temperature"));
    }

    #[test]
    fn test_resolve_guesses() {
        let resolver = KeyResolver::new(tables());

        let alarm = resolver.resolve("floodAlarm");
        assert_eq!(alarm.integration, IntegrationKind::BinarySensor);
        assert_eq!(alarm.name(), Some("Flood Alarm"));

        let humid = resolver.resolve("cellarHumidity");
        assert_eq!(humid.metadata["device_class"], json!("humidity"));
        assert_eq!(humid.name(), Some("Cellar Humidity"));

        let temp = resolver.resolve("inWidgetTemperature");
        assert_eq!(temp.name(), Some("Indoor Widget Temperature"));
        assert_eq!(temp.metadata["device_class"], json!("temperature"));

        let unknown = resolver.resolve("gizmoCount");
        assert_eq!(unknown.name(), Some("Gizmo Count"));
        assert_eq!(unknown.metadata.len(), 1);
        assert_eq!(unknown.integration, IntegrationKind::Sensor);
    }

    #[test]
    fn test_resolve_unit() {
        let resolver = UnitResolver::new(tables(), Arc::new(StandardUnits::new()));

        let temp = resolver.resolve_unit("outTemp", UnitSystem::MetricWx);
        assert_eq!(temp["unit_of_measurement"], json!("°C"));

        let et = resolver.resolve_unit("dayET", UnitSystem::MetricWx);
        assert_eq!(et["unit_of_measurement"], json!("mm"));

        let sunrise = resolver.resolve_unit("sunrise", UnitSystem::Us);
        assert!(sunrise.get("unit_of_measurement").is_none());

        let units = resolver.resolve_unit("usUnits", UnitSystem::Us);
        assert_eq!(units["unit_of_measurement"], Value::Null);

        let mystery = resolver.resolve_unit("gizmoCount", UnitSystem::Us);
        assert_eq!(mystery["unit_of_measurement"], Value::Null);
    }

    struct FixedUnit(&'static str);

    impl UnitConverter for FixedUnit {
        fn standard_unit_type(&self, _system: UnitSystem, _key: &str) -> UnitType {
            UnitType {
                unit: Some(self.0.to_string()),
                group: None,
            }
        }

        fn to_std_system(&self, packet: &Packet, _target: UnitSystem) -> Packet {
            packet.clone()
        }
    }

    #[test]
    fn test_resolve_unit_without_table_entry() {
        let tables = Arc::new(MetadataTables::from_toml_strs("", "", "").unwrap());
        let resolver = UnitResolver::new(tables, Arc::new(FixedUnit("degree_C")));

        let unit = resolver.resolve_unit("outTemp", UnitSystem::MetricWx);
        assert_eq!(unit.len(), 1);
        assert_eq!(unit["unit_of_measurement"], json!("degree_C"));
    }
}
