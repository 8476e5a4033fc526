//! Packet handling entry point for the host.
//!
//! Each accepted packet becomes a `preprocess` task which fans out into a
//! `publish_state` and an `update_discovery` task. Discovery that finds new
//! keys schedules `publish_discovery`. All of it runs under one
//! [`TaskSupervisor`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ExtensionConfig;
use crate::discovery::DiscoveryPublisher;
use crate::error::{BridgeError, ConfigError};
use crate::packet::{Packet, PacketPreprocessor};
use crate::registry::MeasurementRegistry;
use crate::sink::PublishSink;
use crate::state::StatePublisher;
use crate::supervisor::{SupervisorStats, TaskSpawner, TaskSupervisor, DEFAULT_MAX_CONCURRENCY};
use crate::tables::MetadataTables;
use crate::units::UnitConverter;

/// Where a packet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// High-rate loop packet
    Loop,
    /// Archive record
    Archive,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loop => f.write_str("loop"),
            Self::Archive => f.write_str("archive"),
        }
    }
}

struct Pipeline {
    preprocessor: PacketPreprocessor,
    registry: Arc<MeasurementRegistry>,
    discovery: DiscoveryPublisher,
    state: StatePublisher,
}

/// Wires the pipeline over one sink.
pub struct Controller {
    pipeline: Arc<Pipeline>,
    sink: Arc<dyn PublishSink>,
    spawner: Mutex<Option<TaskSpawner>>,
    supervisor: Mutex<Option<TaskSupervisor>>,
}

impl Controller {
    /// Build the pipeline. Must be called inside a tokio runtime.
    pub fn new(
        config: &ExtensionConfig,
        tables: Arc<MetadataTables>,
        converter: Arc<dyn UnitConverter>,
        sink: Arc<dyn PublishSink>,
    ) -> Result<Self, ConfigError> {
        let registry = Arc::new(MeasurementRegistry::new(
            tables.clone(),
            converter.clone(),
            config.unit_system,
        ));
        let discovery = DiscoveryPublisher::new(
            registry.clone(),
            config.topics(),
            &config.device(),
            sink.clone(),
        )
        .map_err(|e| ConfigError::invalid("station", e.to_string()))?;
        let state = StatePublisher::new(
            registry.clone(),
            tables,
            converter,
            config.topics(),
            config.station_context()?,
            sink.clone(),
        );

        let (supervisor, spawner) = TaskSupervisor::start(DEFAULT_MAX_CONCURRENCY);
        info!(
            node_id = %config.node_id,
            unit_system = %config.unit_system,
            "Controller started"
        );

        Ok(Self {
            pipeline: Arc::new(Pipeline {
                preprocessor: PacketPreprocessor::new(),
                registry,
                discovery,
                state,
            }),
            sink,
            spawner: Mutex::new(Some(spawner)),
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    pub fn registry(&self) -> &Arc<MeasurementRegistry> {
        &self.pipeline.registry
    }

    pub fn on_loop_packet(&self, packet: Packet) -> bool {
        self.submit_packet(PacketKind::Loop, packet)
    }

    pub fn on_archive_record(&self, packet: Packet) -> bool {
        self.submit_packet(PacketKind::Archive, packet)
    }

    /// Queue a packet for processing. Returns false if it was dropped.
    pub fn submit_packet(&self, kind: PacketKind, packet: Packet) -> bool {
        if !self.sink.is_connected() {
            warn!(kind = %kind, "Sink not connected, dropping packet");
            return false;
        }
        let Some(spawner) = self.spawner.lock().clone() else {
            warn!(kind = %kind, "Controller is shutting down, dropping packet");
            return false;
        };
        debug!(kind = %kind, keys = packet.len(), "Received packet");

        let pipeline = self.pipeline.clone();
        let follow_up = spawner.clone();
        spawner.spawn("preprocess", async move {
            let packet = Arc::new(pipeline.preprocessor.process(packet)?);

            let state = pipeline.clone();
            let state_packet = packet.clone();
            follow_up.spawn("publish_state", async move {
                let report = state.state.publish(&state_packet).await?;
                debug!(published = report.published, "Published state");
                Ok(())
            });

            let next = follow_up.clone();
            follow_up.spawn("update_discovery", async move {
                if pipeline.registry.observe(&packet) {
                    next.spawn("publish_discovery", async move {
                        pipeline.discovery.publish_all().await?;
                        Ok(())
                    });
                }
                Ok(())
            });
            Ok::<(), BridgeError>(())
        })
    }

    /// Republish every discovery document, e.g. after the hub restarted.
    pub fn request_rediscovery(&self) -> bool {
        let Some(spawner) = self.spawner.lock().clone() else {
            return false;
        };
        let pipeline = self.pipeline.clone();
        spawner.spawn("publish_discovery", async move {
            pipeline.discovery.publish_all().await?;
            Ok(())
        })
    }

    pub fn stats(&self) -> SupervisorStats {
        self.supervisor
            .lock()
            .as_ref()
            .map(TaskSupervisor::stats)
            .unwrap_or_default()
    }

    /// Stop accepting packets, finish in-flight work, then close the sink.
    pub async fn shutdown(&self) -> SupervisorStats {
        self.spawner.lock().take();
        let supervisor = self.supervisor.lock().take();
        let stats = match supervisor {
            Some(supervisor) => supervisor.join().await,
            None => SupervisorStats::default(),
        };
        if let Err(e) = self.sink.close().await {
            warn!("Failed to close sink: {}", e);
        }
        info!(
            completed = stats.completed,
            failed = stats.failed,
            panicked = stats.panicked,
            "Controller stopped"
        );
        stats
    }
}
