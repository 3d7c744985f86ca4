//! Fleetcast coordinator service.
//!
//! Connects to an MQTT broker, loads persisted device and weather state,
//! and runs the coordinator until Ctrl-C, then disconnects cleanly.
//!
//! # Usage
//!
//! ```bash
//! # Plain TCP to a local broker
//! fleetcast-server --data-dir ./data --feed-dir ./feeds
//!
//! # Mutual TLS, debug topics, verbose logs
//! fleetcast-server --host broker.example.net --port 8883 \
//!     --ca ca.pem --cert client.pem --key client.key \
//!     --debug-topics --verbose
//! ```

mod file_feed;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fleetcast::{CoordinatorBuilder, CoordinatorConfig, Topics};
use fleetcast_registry::JsonFileStore;
use fleetcast_tick::shutdown_channel;
use fleetcast_transport::{MqttConfig, TlsConfig};
use tracing_subscriber::EnvFilter;

use crate::file_feed::FileFeedSource;

#[derive(Parser, Debug)]
#[command(name = "fleetcast-server")]
#[command(about = "Coordinates a fleet of MQTT display devices")]
#[command(version)]
struct Cli {
    /// Broker host
    #[arg(long, env = "FLEETCAST_BROKER_HOST", default_value = "localhost")]
    host: String,

    /// Broker port
    #[arg(long, env = "FLEETCAST_BROKER_PORT", default_value = "1883")]
    port: u16,

    /// MQTT client id
    #[arg(long, env = "FLEETCAST_CLIENT_ID", default_value = "fleetcast-server")]
    client_id: String,

    /// CA certificate (PEM). Enables TLS.
    #[arg(long, env = "FLEETCAST_TLS_CA")]
    ca: Option<PathBuf>,

    /// Client certificate (PEM), for mutual TLS. Requires --key.
    #[arg(long, env = "FLEETCAST_TLS_CERT", requires = "key")]
    cert: Option<PathBuf>,

    /// Client private key (PEM), for mutual TLS. Requires --cert.
    #[arg(long, env = "FLEETCAST_TLS_KEY", requires = "cert")]
    key: Option<PathBuf>,

    /// Directory for persisted device and weather state
    #[arg(long, env = "FLEETCAST_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Runtime config file (device version), reloaded every 15 minutes
    #[arg(long, env = "FLEETCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of `<routing_key>.json` weather snapshots
    #[arg(long, env = "FLEETCAST_FEED_DIR", default_value = "feeds")]
    feed_dir: PathBuf,

    /// Use the `debug_` topic set and separate state files
    #[arg(long)]
    debug_topics: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn mqtt_config(&self) -> Result<MqttConfig> {
        let mut config = MqttConfig::new(&self.host, self.port, &self.client_id);
        match (&self.ca, &self.cert, &self.key) {
            (None, None, None) => {}
            (Some(ca), cert, key) => {
                let client_auth = cert.clone().zip(key.clone());
                config = config.with_tls(TlsConfig {
                    ca: ca.clone(),
                    client_auth,
                });
            }
            (None, _, _) => anyhow::bail!("--cert/--key need --ca"),
        }
        Ok(config)
    }

    fn store_path(&self, name: &str) -> PathBuf {
        let suffix = if self.debug_topics { "_debug" } else { "" };
        self.data_dir.join(format!("{name}{suffix}.json"))
    }

    fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            topics: if self.debug_topics {
                Topics::debug()
            } else {
                Topics::production()
            },
            runtime_config_path: self.config.clone(),
            ..CoordinatorConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let devices = JsonFileStore::open(cli.store_path("devices"))
        .context("failed to open device store")?;
    let weather = JsonFileStore::open(cli.store_path("weather"))
        .context("failed to open weather store")?;
    let feeds = FileFeedSource::new(&cli.feed_dir);
    tracing::info!(
        devices = %devices.path().display(),
        weather = %weather.path().display(),
        feeds = %feeds.dir().display(),
        "state locations"
    );

    let mqtt = cli.mqtt_config()?;
    tracing::info!(
        host = %mqtt.host,
        port = mqtt.port,
        client_id = %mqtt.client_id,
        tls = mqtt.tls.is_some(),
        "connecting to broker"
    );
    let (publisher, inbox) = fleetcast_transport::connect(&mqtt).context("broker setup failed")?;

    let coordinator = CoordinatorBuilder::new()
        .config(cli.coordinator_config())
        .build(publisher, feeds, devices, weather)
        .context("failed to load coordinator state")?;

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, shutting down"),
            Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        trigger.trigger();
    });

    // Sends DISCONNECT and waits for it to go out before returning.
    coordinator.run(inbox, shutdown).await?;
    Ok(())
}
