//! Command-line host for the StationHA bridge.

mod input;
mod stdout_sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stationha_core::{
    Controller, ExtensionConfig, LocaleOptions, MeasurementRegistry, MetadataTables, PublishSink,
    StandardUnits, UnitConverter, UnitSystem,
};
use stationha_mqtt::{BrokerEvent, MqttSink};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::stdout_sink::StdoutSink;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// StationHA - publish weather station measurements to Home Assistant over MQTT.
#[derive(Parser, Debug)]
#[command(name = "stationha")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge over a stream of JSON-lines packets.
    Run {
        /// Extension config file.
        #[arg(short, long)]
        config: PathBuf,
        /// Packet input file (defaults to stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Print publishes to stdout instead of connecting to the broker.
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a config file and its locale tables.
    CheckConfig {
        /// Extension config file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the resolved metadata for measurement keys.
    Resolve {
        /// Measurement keys.
        #[arg(required = true)]
        keys: Vec<String>,
        /// Extension config file (embedded tables when omitted).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Unit system to resolve units in.
        #[arg(short, long)]
        unit_system: Option<UnitSystem>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Run {
            config,
            input,
            dry_run,
        } => run(&config, input.as_deref(), dry_run).await,
        Command::CheckConfig { config } => check_config(&config),
        Command::Resolve {
            keys,
            config,
            unit_system,
        } => resolve(&keys, config.as_deref(), unit_system),
    }
}

fn init_tracing(verbose: bool) {
    let json_logging = std::env::var("STATIONHA_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose { "stationha=debug" } else { "stationha=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    // Logs go to stderr so dry-run output on stdout stays clean
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_tables(config: &ExtensionConfig) -> Result<Arc<MetadataTables>> {
    let tables = MetadataTables::load(&config.locale_options())
        .context("Failed to load metadata tables")?;
    Ok(Arc::new(tables))
}

/// Run the bridge until the input ends or Ctrl-C.
async fn run(config_path: &Path, input: Option<&Path>, dry_run: bool) -> Result<()> {
    let config = ExtensionConfig::from_file(config_path)?;
    let tables = load_tables(&config)?;
    let converter: Arc<dyn UnitConverter> = Arc::new(StandardUnits::new());

    let (sink, mut events): (Arc<dyn PublishSink>, Option<mpsc::Receiver<BrokerEvent>>) =
        if dry_run {
            info!("Dry run, printing publishes to stdout");
            let sink: Arc<dyn PublishSink> = Arc::new(StdoutSink::new());
            (sink, None)
        } else {
            let (sink, mut events) = MqttSink::connect(&config.mqtt, &config.topics());
            wait_for_connection(&mut events).await;
            let sink: Arc<dyn PublishSink> = sink;
            (sink, Some(events))
        };

    let controller = Controller::new(&config, tables, converter, sink)?;
    let mut lines = input::open(input).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut line_no = 0usize;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    info!("End of input");
                    break;
                };
                line_no += 1;
                match input::parse_line(&line) {
                    Ok(Some((kind, packet))) => {
                        controller.submit_packet(kind, packet);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(line = line_no, "Skipping input line: {:#}", e),
                }
            }
            Some(event) = next_event(&mut events) => match event {
                BrokerEvent::HubOnline => {
                    info!("Republishing discovery after hub restart");
                    controller.request_rediscovery();
                }
                BrokerEvent::Connected => info!("Broker connection restored"),
                BrokerEvent::Disconnected => warn!("Broker connection lost"),
            },
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    let stats = controller.shutdown().await;
    info!(
        submitted = stats.submitted,
        completed = stats.completed,
        failed = stats.failed,
        "Bridge stopped"
    );
    Ok(())
}

async fn next_event(events: &mut Option<mpsc::Receiver<BrokerEvent>>) -> Option<BrokerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Packets are dropped while disconnected, so give the broker a chance first.
async fn wait_for_connection(events: &mut mpsc::Receiver<BrokerEvent>) {
    let connected = tokio::time::timeout(CONNECT_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            debug!("Broker event while connecting: {:?}", event);
            if event == BrokerEvent::Connected {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !connected {
        warn!(
            "Not connected to broker after {}s, packets will be dropped until it is",
            CONNECT_TIMEOUT.as_secs()
        );
    }
}

fn check_config(config_path: &Path) -> Result<()> {
    let config = ExtensionConfig::from_file(config_path)?;
    let tables = load_tables(&config)?;
    let topics = config.topics();

    println!("Config OK: {}", config_path.display());
    println!("  node_id:         {}", config.node_id);
    println!("  unit_system:     {}", config.unit_system);
    println!("  lang:            {}", config.lang.as_deref().unwrap_or("(default)"));
    println!("  broker:          {}:{}", config.mqtt.hostname, config.mqtt.port);
    println!("  tls:             {}", config.mqtt.use_tls);
    println!("  availability:    {}", topics.availability());
    println!("  hub status:      {}", topics.hub_status());
    println!(
        "  station:         {} ({} {}), {}",
        config.station.name,
        config.station.manufacturer,
        config.station.model,
        config.station.timezone
    );
    println!(
        "  tables:          {} enums, {} units, {} sensors",
        tables.enums.len(),
        tables.units.len(),
        tables.sensors.len()
    );
    Ok(())
}

fn resolve(keys: &[String], config_path: Option<&Path>, unit_system: Option<UnitSystem>) -> Result<()> {
    let (tables, configured_system) = match config_path {
        Some(path) => {
            let config = ExtensionConfig::from_file(path)?;
            (load_tables(&config)?, config.unit_system)
        }
        None => (
            Arc::new(MetadataTables::load(&LocaleOptions::default())?),
            UnitSystem::default(),
        ),
    };

    let registry = MeasurementRegistry::new(
        tables,
        Arc::new(StandardUnits::new()),
        unit_system.unwrap_or(configured_system),
    );
    for key in keys {
        let record = registry.describe(key);
        println!(
            "{}: {}",
            key,
            serde_json::to_string_pretty(&record).context("Failed to render record")?
        );
    }
    Ok(())
}
