//! State publication.
//!
//! Every non-null packet value of a registered key is published on
//! `<state_prefix>/<key>`, after its named conversion if it has one. Derived
//! sensors of that key are published from the raw value. Missing-config
//! warnings stay quiet for the first few packets while discovery catches up.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::conversion::StationContext;
use crate::error::BridgeResult;
use crate::packet::{Packet, PacketValue};
use crate::registry::MeasurementRegistry;
use crate::sink::PublishSink;
use crate::tables::MetadataTables;
use crate::topics::Topics;
use crate::units::{UnitConverter, UnitSystem};

/// Number of packets published before missing-config warnings are emitted.
pub const SETTLE_COUNTDOWN_START: u32 = 5;

/// Outcome of publishing one packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateReport {
    /// Messages published, derived sensors included
    pub published: usize,
    /// Null values skipped
    pub skipped_null: usize,
    /// Keys not in the registry
    pub missing: Vec<String>,
    /// Whether missing keys were warned about
    pub warned_missing: bool,
    /// Keys whose conversion failed
    pub failed: Vec<String>,
}

pub struct StatePublisher {
    registry: Arc<MeasurementRegistry>,
    tables: Arc<MetadataTables>,
    converter: Arc<dyn UnitConverter>,
    unit_system: UnitSystem,
    topics: Topics,
    context: StationContext,
    sink: Arc<dyn PublishSink>,
    settle_countdown: AtomicU32,
}

impl StatePublisher {
    pub fn new(
        registry: Arc<MeasurementRegistry>,
        tables: Arc<MetadataTables>,
        converter: Arc<dyn UnitConverter>,
        topics: Topics,
        context: StationContext,
        sink: Arc<dyn PublishSink>,
    ) -> Self {
        Self {
            unit_system: registry.unit_system(),
            registry,
            tables,
            converter,
            topics,
            context,
            sink,
            settle_countdown: AtomicU32::new(SETTLE_COUNTDOWN_START),
        }
    }

    pub fn settle_countdown(&self) -> u32 {
        self.settle_countdown.load(Ordering::SeqCst)
    }

    /// Publish the state of every value in `packet`.
    pub async fn publish(&self, packet: &Packet) -> BridgeResult<StateReport> {
        let previous = self
            .settle_countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        let settled = previous == 0;

        debug!("Processing packet");
        let packet = self.converter.to_std_system(packet, self.unit_system);
        let mut report = StateReport::default();

        for (key, value) in packet.iter() {
            if value.is_null() {
                report.skipped_null += 1;
                continue;
            }
            let Some(record) = self.registry.get(key) else {
                if settled {
                    warn!(key, "Could not find configuration for key");
                    report.warned_missing = true;
                }
                report.missing.push(key.to_string());
                continue;
            };

            let state = match record.conversion {
                Some(conversion) => conversion
                    .apply(value, &self.context, &self.tables.enums)
                    .map_err(|e| {
                        warn!(key, error = %e, "Conversion failed, skipping value");
                        report.failed.push(key.to_string());
                    })
                    .ok(),
                None => Some(value.clone()),
            };
            if let Some(state) = state {
                self.sink
                    .publish(&self.topics.state(key), state.to_string())
                    .await?;
                report.published += 1;
            }

            self.publish_derived(key, value, &mut report).await?;
        }

        Ok(report)
    }

    /// Publish every registered sensor derived, directly or through other
    /// derived sensors, from `source`. All of them see the source's raw value.
    async fn publish_derived(
        &self,
        source: &str,
        raw: &PacketValue,
        report: &mut StateReport,
    ) -> BridgeResult<()> {
        let mut visited = HashSet::from([source.to_string()]);
        let mut pending = vec![source.to_string()];
        let mut derived_count = 0usize;

        while let Some(parent) = pending.pop() {
            for (name, record) in self.registry.derived_from(&parent) {
                if !visited.insert(name.clone()) {
                    continue;
                }
                derived_count += 1;
                match record.conversion {
                    Some(conversion) => {
                        match conversion.apply(raw, &self.context, &self.tables.enums) {
                            Ok(state) => {
                                debug!(key = %name, source, state = %state, "Publishing derived sensor");
                                self.sink
                                    .publish(&self.topics.state(&name), state.to_string())
                                    .await?;
                                report.published += 1;
                            }
                            Err(e) => {
                                warn!(key = %name, source, error = %e, "Derived conversion failed");
                                report.failed.push(name.clone());
                            }
                        }
                    }
                    None => {
                        warn!(key = %name, source, "Derived sensor has a source but no conversion");
                    }
                }
                pending.push(name);
            }
        }

        if derived_count > 0 {
            debug!("Published {} derived sensors from {}", derived_count, source);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::units::StandardUnits;

    fn setup() -> (Arc<MeasurementRegistry>, StatePublisher, Arc<MemorySink>) {
        let tables = Arc::new(MetadataTables::embedded().unwrap());
        let converter: Arc<dyn UnitConverter> = Arc::new(StandardUnits::new());
        let registry = Arc::new(MeasurementRegistry::new(
            tables.clone(),
            converter.clone(),
            UnitSystem::MetricWx,
        ));
        let sink = Arc::new(MemorySink::new());
        let publisher = StatePublisher::new(
            registry.clone(),
            tables,
            converter,
            Topics::new("homeassistant", "weather", "station1"),
            StationContext::default(),
            sink.clone(),
        );
        (registry, publisher, sink)
    }

    #[tokio::test]
    async fn test_publishes_converted_values() {
        let (registry, publisher, sink) = setup();
        let packet = Packet::new()
            .with("usUnits", 1.0)
            .with("outTemp", 212.0)
            .with("windDir", 45.0);
        registry.observe(&packet);

        let report = publisher.publish(&packet).await.unwrap();
        assert_eq!(report.published, 4);
        assert_eq!(sink.payloads_for("weather/usUnits"), vec!["METRICWX"]);
        let out_temp: f64 = sink.payloads_for("weather/outTemp")[0].parse().unwrap();
        assert!((out_temp - 100.0).abs() < 1e-9);
        assert_eq!(sink.payloads_for("weather/windDir"), vec!["45"]);
        assert_eq!(sink.payloads_for("weather/windDirCardinal"), vec!["NE"]);
    }

    #[tokio::test]
    async fn test_null_values_are_skipped_silently() {
        let (registry, publisher, sink) = setup();
        for _ in 0..SETTLE_COUNTDOWN_START {
            publisher.publish(&Packet::new()).await.unwrap();
        }
        registry.observe(&Packet::new().with("outTemp", 1.0));

        let report = publisher
            .publish(&Packet::new().with("outTemp", PacketValue::Null))
            .await
            .unwrap();
        assert_eq!(report.skipped_null, 1);
        assert!(!report.warned_missing);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_settle_countdown() {
        let (_, publisher, sink) = setup();
        let packet = Packet::new().with("mystery", 1.0);

        for call in 1..=SETTLE_COUNTDOWN_START {
            let report = publisher.publish(&packet).await.unwrap();
            assert!(!report.warned_missing, "call {} warned", call);
            assert_eq!(report.missing, vec!["mystery"]);
        }
        let report = publisher.publish(&packet).await.unwrap();
        assert!(report.warned_missing);
        assert_eq!(publisher.settle_countdown(), 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_conversion_failure_skips_only_that_key() {
        let (registry, publisher, sink) = setup();
        let packet = Packet::new()
            .with("usUnits", 17.0)
            .with("dateTime", "soon")
            .with("outTemp", 3.0);
        registry.observe(&packet);

        let report = publisher.publish(&packet).await.unwrap();
        assert_eq!(report.failed, vec!["dateTime"]);
        assert_eq!(sink.payloads_for("weather/outTemp"), vec!["3"]);
    }
}
