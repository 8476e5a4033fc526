//! Metadata tables and their loader.
//!
//! Three tables drive resolution:
//!
//! - `enums`: enum name -> ordinal -> label
//! - `units`: unit name -> display metadata
//! - `sensors`: measurement key -> sensor definition
//!
//! Each table is read from `<name>.toml`, overlaid with `<name>_<lang>.toml`
//! when a language is selected, then overlaid with the runtime overrides from
//! the extension config. Overlays are deep merged. Files come from the
//! locales compiled into the crate unless a locales directory is configured.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::conversion::Conversion;
use crate::error::TableError;
use crate::record::{IntegrationKind, MetadataRecord};

/// Ordinal -> label.
pub type EnumMap = BTreeMap<u32, String>;

/// Named enum maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumMaps {
    maps: HashMap<String, EnumMap>,
}

impl EnumMaps {
    pub fn get(&self, name: &str) -> Option<&EnumMap> {
        self.maps.get(name)
    }

    pub fn label(&self, name: &str, ordinal: u32) -> Option<&str> {
        self.maps
            .get(name)
            .and_then(|m| m.get(&ordinal))
            .map(String::as_str)
    }

    /// Labels of an enum in ordinal order.
    pub fn labels(&self, name: &str) -> Option<Vec<String>> {
        self.maps.get(name).map(|m| m.values().cloned().collect())
    }

    pub fn insert(&mut self, name: impl Into<String>, map: EnumMap) {
        self.maps.insert(name.into(), map);
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

/// Build enum maps from label lists, numbering labels from zero.
impl<K: Into<String>, L: Into<String>> FromIterator<(K, Vec<L>)> for EnumMaps {
    fn from_iter<T: IntoIterator<Item = (K, Vec<L>)>>(iter: T) -> Self {
        let mut maps = EnumMaps::default();
        for (name, labels) in iter {
            let map = labels
                .into_iter()
                .enumerate()
                .map(|(i, label)| (i as u32, label.into()))
                .collect();
            maps.insert(name, map);
        }
        maps
    }
}

/// Where locale files are read from and which overlays apply.
#[derive(Debug, Clone, Default)]
pub struct LocaleOptions {
    /// Locale code selecting the `<name>_<lang>.toml` overlays
    pub lang: Option<String>,
    /// Directory holding the locale files. Embedded files are used when unset.
    pub locales_dir: Option<PathBuf>,
    pub enum_overrides: toml::Table,
    pub unit_overrides: toml::Table,
    pub sensor_overrides: toml::Table,
}

impl LocaleOptions {
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn with_locales_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.locales_dir = Some(dir.into());
        self
    }
}

fn embedded_file(file_name: &str) -> Option<&'static str> {
    match file_name {
        "enums.toml" => Some(include_str!("../locales/enums.toml")),
        "enums_de.toml" => Some(include_str!("../locales/enums_de.toml")),
        "enums_cs.toml" => Some(include_str!("../locales/enums_cs.toml")),
        "units.toml" => Some(include_str!("../locales/units.toml")),
        "sensors.toml" => Some(include_str!("../locales/sensors.toml")),
        "sensors_de.toml" => Some(include_str!("../locales/sensors_de.toml")),
        "sensors_cs.toml" => Some(include_str!("../locales/sensors_cs.toml")),
        _ => None,
    }
}

/// Recursively merge `overlay` into `base`. Tables merge, anything else is replaced.
pub fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(overlay_table) => {
                if let Some(toml::Value::Table(base_table)) = base.get_mut(&key) {
                    deep_merge(base_table, overlay_table);
                } else {
                    base.insert(key, toml::Value::Table(overlay_table));
                }
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

/// The loaded metadata tables. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct MetadataTables {
    pub enums: EnumMaps,
    pub units: HashMap<String, Map<String, Value>>,
    pub sensors: BTreeMap<String, MetadataRecord>,
}

impl MetadataTables {
    /// Load the tables compiled into the crate, without a language overlay.
    pub fn embedded() -> Result<Self, TableError> {
        Self::load(&LocaleOptions::default())
    }

    /// Load all three tables with the overlays selected by `options`.
    pub fn load(options: &LocaleOptions) -> Result<Self, TableError> {
        let loader = LayerLoader { options };
        let enums = loader.load_layers("enums", &options.enum_overrides)?;
        let units = loader.load_layers("units", &options.unit_overrides)?;
        let sensors = loader.load_layers("sensors", &options.sensor_overrides)?;

        let tables = Self::from_tables(enums, units, sensors)?;
        info!(
            enums = tables.enums.len(),
            units = tables.units.len(),
            sensors = tables.sensors.len(),
            lang = options.lang.as_deref().unwrap_or("default"),
            "Loaded metadata tables"
        );
        Ok(tables)
    }

    /// Build tables from TOML source text, without overlays.
    pub fn from_toml_strs(enums: &str, units: &str, sensors: &str) -> Result<Self, TableError> {
        Self::from_tables(
            parse_table("enums", enums)?,
            parse_table("units", units)?,
            parse_table("sensors", sensors)?,
        )
    }

    fn from_tables(
        enums: toml::Table,
        units: toml::Table,
        mut sensors: toml::Table,
    ) -> Result<Self, TableError> {
        let enums = build_enums(enums)?;
        let units = build_units(units)?;
        for (_, definition) in sensors.iter_mut() {
            expand_enum_refs(definition, &enums);
        }
        let sensors = build_sensors(sensors)?;
        Ok(Self {
            enums,
            units,
            sensors,
        })
    }

    pub fn sensor(&self, key: &str) -> Option<&MetadataRecord> {
        self.sensors.get(key)
    }

    pub fn unit(&self, unit: &str) -> Option<&Map<String, Value>> {
        self.units.get(unit)
    }

    /// Sensor definitions derived from `source`.
    pub fn derived_from<'a>(
        &'a self,
        source: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a MetadataRecord)> + 'a {
        self.sensors
            .iter()
            .filter(move |(_, record)| record.is_derived_from(source))
            .map(|(key, record)| (key.as_str(), record))
    }
}

struct LayerLoader<'a> {
    options: &'a LocaleOptions,
}

impl LayerLoader<'_> {
    fn load_layers(&self, name: &str, overrides: &toml::Table) -> Result<toml::Table, TableError> {
        let base_file = format!("{}.toml", name);
        let base_text = self
            .read(&base_file)?
            .ok_or_else(|| TableError::MissingBase(base_file.clone()))?;
        let mut table = parse_table(&base_file, &base_text)?;

        if let Some(lang) = self.options.lang.as_deref() {
            let overlay_file = format!("{}_{}.toml", name, lang);
            match self.read(&overlay_file) {
                Ok(Some(text)) => match parse_table(&overlay_file, &text) {
                    Ok(overlay) => {
                        debug!(file = %overlay_file, "Applying locale overlay");
                        deep_merge(&mut table, overlay);
                    }
                    Err(e) => warn!("Ignoring locale overlay: {}", e),
                },
                Ok(None) => debug!(file = %overlay_file, "No locale overlay"),
                Err(e) => warn!("Ignoring locale overlay: {}", e),
            }
        }

        if !overrides.is_empty() {
            debug!(table = name, entries = overrides.len(), "Applying config overrides");
            deep_merge(&mut table, overrides.clone());
        }
        Ok(table)
    }

    fn read(&self, file_name: &str) -> Result<Option<String>, TableError> {
        match &self.options.locales_dir {
            Some(dir) => read_file(&dir.join(file_name)),
            None => Ok(embedded_file(file_name).map(str::to_string)),
        }
    }
}

fn read_file(path: &Path) -> Result<Option<String>, TableError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(TableError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_table(name: &str, text: &str) -> Result<toml::Table, TableError> {
    text.parse::<toml::Table>().map_err(|e| TableError::Parse {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn build_enums(table: toml::Table) -> Result<EnumMaps, TableError> {
    let mut maps = EnumMaps::default();
    for (name, entries) in table {
        let toml::Value::Table(entries) = entries else {
            return Err(TableError::Invalid {
                table: "enums",
                entry: name,
                reason: "expected a table of ordinal = label".to_string(),
            });
        };
        let mut map = EnumMap::new();
        for (ordinal, label) in entries {
            let invalid = |reason: &str| TableError::Invalid {
                table: "enums",
                entry: format!("{}.{}", name, ordinal),
                reason: reason.to_string(),
            };
            let index: u32 = ordinal
                .parse()
                .map_err(|_| invalid("ordinal is not a non-negative integer"))?;
            let label = label
                .as_str()
                .ok_or_else(|| invalid("label is not a string"))?;
            map.insert(index, label.to_string());
        }
        maps.insert(name, map);
    }
    Ok(maps)
}

fn build_units(table: toml::Table) -> Result<HashMap<String, Map<String, Value>>, TableError> {
    table
        .into_iter()
        .map(|(unit, value)| {
            let metadata = to_json_object(value).ok_or_else(|| TableError::Invalid {
                table: "units",
                entry: unit.clone(),
                reason: "expected a table of display attributes".to_string(),
            })?;
            Ok((unit, metadata))
        })
        .collect()
}

fn build_sensors(table: toml::Table) -> Result<BTreeMap<String, MetadataRecord>, TableError> {
    let mut sensors = BTreeMap::new();
    for (key, value) in table {
        let invalid = |reason: String| TableError::Invalid {
            table: "sensors",
            entry: key.clone(),
            reason,
        };
        let toml::Value::Table(mut definition) = value else {
            return Err(invalid("expected a sensor definition table".to_string()));
        };

        let mut record = MetadataRecord::new();
        if let Some(integration) = definition.remove("integration") {
            record.integration = integration
                .as_str()
                .ok_or_else(|| invalid("integration must be a string".to_string()))?
                .parse::<IntegrationKind>()
                .map_err(invalid)?;
        }
        if let Some(source) = definition.remove("source") {
            let source = source
                .as_str()
                .ok_or_else(|| invalid("source must be a string".to_string()))?;
            record.source = Some(source.to_string());
        }
        if let Some(conversion) = definition.remove("conversion") {
            let name = conversion
                .as_str()
                .ok_or_else(|| invalid("conversion must be a string".to_string()))?;
            let conversion =
                name.parse::<Conversion>()
                    .map_err(|_| TableError::UnknownConversion {
                        sensor: key.clone(),
                        name: name.to_string(),
                    })?;
            record.conversion = Some(conversion);
        }
        if let Some(metadata) = definition.remove("metadata") {
            record.metadata = to_json_object(metadata)
                .ok_or_else(|| invalid("metadata must be a table".to_string()))?;
        }
        for field in definition.keys() {
            warn!(sensor = %key, field = %field, "Ignoring unknown sensor definition field");
        }
        if record.is_derived() && record.conversion.is_none() {
            warn!(sensor = %key, "Derived sensor has a source but no conversion");
        }

        sensors.insert(key, record);
    }
    Ok(sensors)
}

/// Replace `"@<enum>"` strings with the enum's labels.
fn expand_enum_refs(value: &mut toml::Value, enums: &EnumMaps) {
    match value {
        toml::Value::String(s) => {
            if let Some(name) = s.strip_prefix('@') {
                match enums.labels(name) {
                    Some(labels) => {
                        *value = toml::Value::Array(
                            labels.into_iter().map(toml::Value::String).collect(),
                        );
                    }
                    None => warn!(reference = %s, "Unknown enum reference"),
                }
            }
        }
        toml::Value::Array(items) => {
            for item in items {
                expand_enum_refs(item, enums);
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                expand_enum_refs(item, enums);
            }
        }
        _ => {}
    }
}

fn to_json_object(value: toml::Value) -> Option<Map<String, Value>> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
