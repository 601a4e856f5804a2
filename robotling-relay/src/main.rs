//! robotling-relay - stores robotling status telemetry in SQLite
//!
//! ```bash
//! # broker on localhost, table `rob` in ./robotling.db
//! robotling-relay --guid robotling_30aea42664a8
//!
//! # explicit broker and database, create the table on first run
//! robotling-relay -g robotling_30aea42664a8 --broker 192.168.0.6 --db dash.db --create-table
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use robotling_relay::{
    BrokerLink, ColumnMapping, Relay, RelayConfig, RowAssembler, StatusStore, TopicResolver,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "robotling-relay")]
#[command(about = "Relay robotling MQTT telemetry into a SQLite status table", long_about = None)]
struct Args {
    /// Robotling GUID, used as MQTT root topic
    #[arg(short, long)]
    guid: Option<String>,

    /// Database path (SQLite file)
    #[arg(long)]
    db: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long)]
    broker: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    port: Option<u16>,

    /// Column mapping: positional or by-topic
    #[arg(long, value_enum)]
    mapping: Option<ColumnMapping>,

    /// Create the status table if it does not exist
    #[arg(long)]
    create_table: bool,

    /// Config file (overrides $ROBOTLING_RELAY_CONFIG)
    #[arg(short, long, env = "ROBOTLING_RELAY_CONFIG")]
    config: Option<PathBuf>,
}

impl Args {
    fn apply(self, cfg: &mut RelayConfig) {
        if let Some(guid) = self.guid {
            cfg.root_topic = guid;
        }
        if let Some(db) = self.db {
            cfg.database.path = db;
        }
        if let Some(host) = self.broker {
            cfg.mqtt.host = host;
        }
        if let Some(port) = self.port {
            cfg.mqtt.port = port;
        }
        if let Some(mapping) = self.mapping {
            cfg.mapping = mapping;
        }
        cfg.database.create_table |= self.create_table;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("robotling_relay=info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => RelayConfig::load_from(path)?,
        None => RelayConfig::load()?,
    };
    args.apply(&mut cfg);
    cfg.validate()?;

    let store = StatusStore::open(&cfg.database.path, &cfg.database.table)
        .context("Failed to open status database")?;
    if cfg.database.create_table {
        store
            .create_table_if_missing()
            .context("Failed to create status table")?;
    }
    info!(
        db = %cfg.database.path.display(),
        table = %cfg.database.table,
        mapping = ?cfg.mapping,
        "status store ready"
    );

    let resolver = TopicResolver::new(cfg.root_topic.trim());
    let link = BrokerLink::new(&cfg.mqtt, resolver.raw_topic());
    let relay = Relay::new(
        RowAssembler::new(resolver, cfg.mapping),
        store,
        cfg.poll_interval(),
        cfg.reconnect_backoff(),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    };

    relay.run(link, shutdown).await;
    Ok(())
}
