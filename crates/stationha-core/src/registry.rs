//! Registry of discovered measurements.
//!
//! Keys are registered the first time they show up in a packet and are never
//! removed. Registering a key also registers, transitively, every sensor
//! definition derived from it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::packet::Packet;
use crate::record::MetadataRecord;
use crate::resolver::{KeyResolver, UnitResolver};
use crate::tables::MetadataTables;
use crate::units::{UnitConverter, UnitSystem};

#[derive(Default)]
struct RegistryInner {
    order: Vec<String>,
    entries: HashMap<String, Arc<MetadataRecord>>,
}

/// Registry of measurement key -> resolved metadata, in discovery order.
pub struct MeasurementRegistry {
    tables: Arc<MetadataTables>,
    keys: KeyResolver,
    units: UnitResolver,
    unit_system: UnitSystem,
    inner: RwLock<RegistryInner>,
}

impl MeasurementRegistry {
    pub fn new(
        tables: Arc<MetadataTables>,
        converter: Arc<dyn UnitConverter>,
        unit_system: UnitSystem,
    ) -> Self {
        Self {
            keys: KeyResolver::new(tables.clone()),
            units: UnitResolver::new(tables.clone(), converter),
            tables,
            unit_system,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    pub fn unit_system(&self) -> UnitSystem {
        self.unit_system
    }

    /// Register every unseen key of `packet`. Returns true if anything new was found.
    pub fn observe(&self, packet: &Packet) -> bool {
        let mut found = false;
        for key in packet.keys() {
            if self.contains(key) {
                continue;
            }
            let record = self.describe(key);
            if self.insert(key, record) {
                debug!(key, "Discovered new measurement");
                found = true;
                self.discover_derived(key);
            }
        }
        found
    }

    /// Resolved record for `key` as it would be registered: unit metadata
    /// underneath, key metadata on top.
    pub fn describe(&self, key: &str) -> MetadataRecord {
        let mut record = self.keys.resolve(key);
        record.underlay(&self.units.resolve_unit(key, self.unit_system));
        record
    }

    fn discover_derived(&self, source: &str) {
        let mut pending = vec![source.to_string()];
        while let Some(source) = pending.pop() {
            for (name, definition) in self.tables.derived_from(&source) {
                if self.contains(name) {
                    continue;
                }
                let mut record = definition.clone();
                record
                    .metadata
                    .entry("unit_of_measurement")
                    .or_insert(Value::Null);
                if self.insert(name, record) {
                    debug!(key = name, source = %source, "Discovered derived measurement");
                    pending.push(name.to_string());
                }
            }
        }
    }

    /// Insert unless present. Returns false if another caller got there first.
    fn insert(&self, key: &str, record: MetadataRecord) -> bool {
        let mut inner = self.inner.write();
        if inner.entries.contains_key(key) {
            return false;
        }
        inner.order.push(key.to_string());
        inner.entries.insert(key.to_string(), Arc::new(record));
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<MetadataRecord>> {
        self.inner.read().entries.get(key).cloned()
    }

    /// All entries in discovery order.
    pub fn snapshot(&self) -> Vec<(String, Arc<MetadataRecord>)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|key| inner.entries.get(key).map(|r| (key.clone(), r.clone())))
            .collect()
    }

    /// Registered entries derived from `source`.
    pub fn derived_from(&self, source: &str) -> Vec<(String, Arc<MetadataRecord>)> {
        self.snapshot()
            .into_iter()
            .filter(|(_, record)| record.is_derived_from(source))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::StandardUnits;
    use serde_json::json;

    fn registry() -> MeasurementRegistry {
        MeasurementRegistry::new(
            Arc::new(MetadataTables::embedded().unwrap()),
            Arc::new(StandardUnits::new()),
            UnitSystem::MetricWx,
        )
    }

    #[test]
    fn test_observe_reports_new_keys() {
        let registry = registry();
        let packet = Packet::new()
            .with("dateTime", 1_700_000_000.0)
            .with("usUnits", 17.0)
            .with("outTemp", 12.5);

        assert!(registry.observe(&packet));
        assert!(!registry.observe(&packet));
        assert_eq!(registry.keys(), vec!["dateTime", "usUnits", "outTemp"]);
    }

    #[test]
    fn test_unit_metadata_is_underlaid() {
        let registry = registry();
        registry.observe(&Packet::new().with("outTemp", 1.0).with("extraTemp2", 1.0));

        let out = registry.get("outTemp").unwrap();
        assert_eq!(out.metadata["unit_of_measurement"], json!("°C"));
        assert_eq!(out.metadata["suggested_display_precision"], json!(1));
        assert_eq!(out.name(), Some("Outdoor Temperature"));

        let extra = registry.get("extraTemp2").unwrap();
        assert_eq!(extra.name(), Some("Extra Temperature 2"));
        assert_eq!(extra.metadata["unit_of_measurement"], json!("°C"));
    }

    #[test]
    fn test_derived_sensor_cascade() {
        let registry = registry();
        assert!(registry.observe(&Packet::new().with("windDir", 45.0)));

        assert_eq!(registry.keys(), vec!["windDir", "windDirCardinal"]);
        let cardinal = registry.get("windDirCardinal").unwrap();
        assert_eq!(cardinal.unit_of_measurement(), Some(&Value::Null));
        assert_eq!(registry.derived_from("windDir").len(), 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = registry();
        registry.observe(&Packet::new().with("outTemp", 1.0));
        let snapshot = registry.snapshot();
        registry.observe(&Packet::new().with("inTemp", 1.0));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }
}
