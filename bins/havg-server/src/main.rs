use clap::Parser;
use serde::{Deserialize, Serialize};

use havg_cluster::{Cluster, ClusterConfig};
use havg_logging::LoggingConfig;
use havg_types::Duration;

/// havg cluster member daemon
#[derive(Parser, Debug)]
#[command(name = "havg-server", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "havg.toml")]
    config: String,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerConfig {
    /// etcd endpoints, e.g. ["http://10.0.0.1:2379"].
    endpoints: Vec<String>,

    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,

    cluster: ClusterConfig,

    #[serde(default)]
    logging: LoggingConfig,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".into()],
            connect_timeout_ms: default_connect_timeout_ms(),
            cluster: ClusterConfig::new(""),
            logging: LoggingConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", toml::to_string_pretty(&ServerConfig::default())?);
        return Ok(());
    }

    let text = std::fs::read_to_string(&args.config)?;
    let config: ServerConfig = toml::from_str(&text)?;
    let _log_guard = havg_logging::init(&config.logging);

    tracing::info!(config = %args.config, host = %config.cluster.host_name, "starting havg server");

    let cluster = Cluster::connect(
        &config.endpoints,
        config.cluster,
        Duration::from_millis(config.connect_timeout_ms),
    )
    .await?;
    cluster.server().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cluster.close().await;

    Ok(())
}
