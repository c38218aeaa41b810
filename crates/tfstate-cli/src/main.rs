//! tfstate CLI
//!
//! Persists provisioning state into the cluster object store and reads it
//! back

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use eyre::WrapErr;
use serde_json::{Map, Value, json};
use tfstate_core::{
    CancellationToken, Checkpointer, NodeGroupState, ProvisioningOutputs, StateSink, StateSync,
};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod watch;

use config::{Config, LogConfig};

/// Terraform state synchronization tool
#[derive(Parser, Debug)]
#[command(name = "tfstate", version, about, long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Keep records in process memory instead of the API server
    #[arg(long, global = true)]
    memory: bool,

    /// Log level, overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print state of every node, grouped by node group
    Nodes,

    /// Print the cluster-wide state
    ClusterState {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the cluster UUID
    ClusterUuid,

    /// Save the cluster-wide state
    SaveCluster {
        /// State file
        #[arg(long)]
        state: PathBuf,
        /// Cloud provider discovery data file
        #[arg(long)]
        cloud_discovery: Option<PathBuf>,
    },

    /// Save a worker node's state
    SaveNode {
        /// Node name
        #[arg(long)]
        node: String,
        /// Node group name
        #[arg(long)]
        group: String,
        /// State file
        #[arg(long)]
        state: PathBuf,
        /// Node group settings file
        #[arg(long)]
        settings: Option<PathBuf>,
    },

    /// Save a master node's state and data device path
    SaveMaster {
        /// Node name
        #[arg(long)]
        node: String,
        /// State file
        #[arg(long)]
        state: PathBuf,
        /// Kubernetes data device path
        #[arg(long)]
        device_path: String,
    },

    /// Create a node record holding group settings only
    CreateNode {
        /// Node name
        #[arg(long)]
        node: String,
        /// Node group name
        #[arg(long)]
        group: String,
        /// Node group settings file
        #[arg(long)]
        settings: PathBuf,
    },

    /// Delete a state record
    Delete {
        /// Node whose state record to delete
        #[arg(long, conflicts_with = "record", required_unless_present = "record")]
        node: Option<String>,
        /// State record name
        #[arg(long)]
        record: Option<String>,
    },

    /// Checkpoint a state file on every change until interrupted
    Watch {
        /// State file written by the provisioning engine
        #[arg(long)]
        state: PathBuf,
        #[command(subcommand)]
        target: WatchTarget,
    },
}

#[derive(Subcommand, Debug)]
enum WatchTarget {
    /// Cluster-wide state
    Cluster {
        /// Cloud provider discovery data file
        #[arg(long)]
        cloud_discovery: Option<PathBuf>,
    },
    /// A worker node
    Node {
        /// Node name
        #[arg(long)]
        node: String,
        /// Node group name
        #[arg(long)]
        group: String,
        /// Node group settings file
        #[arg(long)]
        settings: PathBuf,
    },
    /// A master node
    Master {
        /// Node name
        #[arg(long)]
        node: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let (mut config, source) = Config::resolve(cli.config.as_deref())?;
    if cli.memory {
        config.store.memory = true;
    }
    if let Some(level) = &cli.log_level {
        config.log.level.clone_from(level);
    }
    if cli.json_logs {
        config.log.json = true;
    }

    init_tracing(&config.log);
    match &source {
        Some(path) => debug!(config = %path.display(), "loaded configuration"),
        None => debug!("no config file found, using defaults"),
    }

    let store = config.build_store()?;
    info!(store = store.store_type(), "store ready");
    let sync = config.engine(store);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    run(cli.command, &sync, &cancel).await
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);

    if log.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(command: Commands, sync: &StateSync, cancel: &CancellationToken) -> Result<()> {
    match command {
        Commands::Nodes => {
            let groups = sync.nodes_state(cancel).await?;
            println!("{}", serde_json::to_string_pretty(&groups_to_json(&groups))?);
        }
        Commands::ClusterState { output } => {
            let state = sync.cluster_state(cancel).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &state)
                    .await
                    .wrap_err_with(|| format!("writing {}", path.display()))?,
                None => println!("{}", String::from_utf8_lossy(&state)),
            }
        }
        Commands::ClusterUuid => {
            println!("{}", sync.cluster_uuid(cancel).await?);
        }
        Commands::SaveCluster {
            state,
            cloud_discovery,
        } => {
            let outputs = ProvisioningOutputs::new(read_file(&state).await?)
                .with_cloud_discovery(read_optional(cloud_discovery.as_deref()).await?);
            sync.save_cluster_state(Some(&outputs), cancel).await?;
        }
        Commands::SaveNode {
            node,
            group,
            state,
            settings,
        } => {
            let state = read_file(&state).await?;
            let settings = match settings {
                Some(path) => Some(read_file(&path).await?),
                None => None,
            };
            sync.save_node_state(&node, &group, &state, settings.as_deref(), cancel)
                .await?;
        }
        Commands::SaveMaster {
            node,
            state,
            device_path,
        } => {
            let state = read_file(&state).await?;
            sync.save_master_node_state(&node, &state, device_path.as_bytes(), cancel)
                .await?;
        }
        Commands::CreateNode {
            node,
            group,
            settings,
        } => {
            let settings = read_file(&settings).await?;
            sync.create_node_state(&node, &group, &settings, cancel).await?;
        }
        Commands::Delete { node, record } => match (node, record) {
            (Some(node), _) => sync.delete_node_state(&node, cancel).await?,
            (None, Some(record)) => sync.delete_state(&record, cancel).await?,
            (None, None) => eyre::bail!("either --node or --record is required"),
        },
        Commands::Watch { state, target } => {
            let (sink, cloud_discovery): (Arc<dyn StateSink>, Vec<u8>) = match target {
                WatchTarget::Cluster { cloud_discovery } => (
                    Arc::new(sync.cluster_saver(cancel)),
                    read_optional(cloud_discovery.as_deref()).await?,
                ),
                WatchTarget::Node {
                    node,
                    group,
                    settings,
                } => (
                    Arc::new(sync.node_saver(&node, &group, read_file(&settings).await?, cancel)?),
                    Vec::new(),
                ),
                WatchTarget::Master { node } => {
                    (Arc::new(sync.master_node_saver(&node, cancel)?), Vec::new())
                }
            };
            let checkpointer = Checkpointer::new(sink);
            watch::watch_state_file(&state, &cloud_discovery, &checkpointer, cancel).await?;
        }
    }

    Ok(())
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .wrap_err_with(|| format!("reading {}", path.display()))
}

async fn read_optional(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => read_file(path).await,
        None => Ok(Vec::new()),
    }
}

/// Render node groups for humans: blobs that are JSON stay JSON
fn groups_to_json(groups: &std::collections::BTreeMap<String, NodeGroupState>) -> Value {
    let blob = |bytes: &[u8]| {
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
    };

    let mut out = Map::new();
    for (group, state) in groups {
        let nodes: Map<String, Value> = state
            .state
            .iter()
            .map(|(node, bytes)| (node.clone(), blob(bytes.as_slice())))
            .collect();
        out.insert(
            group.clone(),
            json!({
                "nodes": nodes,
                "settings": state.settings.as_deref().map(blob),
            }),
        );
    }
    Value::Object(out)
}
