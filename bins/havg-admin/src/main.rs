use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use havg_cluster::{Cluster, ClusterConfig};
use havg_types::Duration;

/// havg administrative tool
#[derive(Parser, Debug)]
#[command(name = "havg-admin", version, about)]
struct Args {
    /// etcd endpoints
    #[arg(long, value_delimiter = ',', default_value = "http://127.0.0.1:2379")]
    endpoints: Vec<String>,

    /// Connection timeout in milliseconds
    #[arg(long, default_value_t = 5_000)]
    connect_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a volume group
    Add {
        name: String,
        ip_addr: String,
        netmask: String,
        nic: String,
        /// Do not fail the group over automatically
        #[arg(long)]
        no_auto_failover: bool,
        /// Create the group disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a volume group (must not be ONLINING or ONLINE)
    Rm { name: String },
    /// Mark a volume group FAILED
    Fail { name: String },
    /// Allow a volume group to be placed
    Enable { name: String },
    /// Take a volume group down and keep it down
    Disable { name: String },
    /// Gracefully take a volume group down
    Offline { name: String },
    /// List every volume group
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let args = Args::parse();

    // The admin handle never serves; the host name only labels the client.
    let cluster = Cluster::connect(
        &args.endpoints,
        ClusterConfig::new("havg-admin"),
        Duration::from_millis(args.connect_timeout_ms),
    )
    .await?;

    match args.command {
        Command::Add {
            name,
            ip_addr,
            netmask,
            nic,
            no_auto_failover,
            disabled,
        } => {
            cluster
                .add_volume_group(&name, &ip_addr, &netmask, &nic, !no_auto_failover, !disabled)
                .await?;
            println!("added {}", name);
        }
        Command::Rm { name } => {
            cluster.rm_volume_group(&name).await?;
            println!("removed {}", name);
        }
        Command::Fail { name } => {
            cluster.mark_volume_group_failed(&name).await?;
            println!("marked {} FAILED", name);
        }
        Command::Enable { name } => {
            cluster.enable(&name).await?;
            println!("enabled {}", name);
        }
        Command::Disable { name } => {
            cluster.disable(&name).await?;
            println!("disabled {}", name);
        }
        Command::Offline { name } => {
            cluster.offline_volume_group(&name).await?;
            println!("offlining {}", name);
        }
        Command::List => {
            let groups = cluster.list().await?;
            println!(
                "{:<20} {:<10} {:<16} {:<16} {:<8} {:<6} {:<8}",
                "NAME", "STATE", "NODE", "IPADDR", "NIC", "AUTO", "ENABLED"
            );
            for vg in groups {
                println!(
                    "{:<20} {:<10} {:<16} {:<16} {:<8} {:<6} {:<8}",
                    vg.name,
                    vg.state.as_str(),
                    vg.node,
                    vg.ip_addr,
                    vg.nic,
                    vg.auto_failover,
                    vg.enabled
                );
            }
        }
    }

    Ok(())
}
