// CLI - Command line interface for the honeygraph node
pub mod config;
pub mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Honeygraph node - fork-aware replication sidecar
#[derive(Parser, Debug)]
#[command(name = "honeygraph-node")]
#[command(author = "Honeygraph Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Replicates producer state streams into a graph store")]
#[command(long_about = r#"
Honeygraph ingests state-mutation streams from upstream producer nodes,
tracks their competing forks, commits the histories their consensus
checkpoints confirm, and recovers missed blocks from peer sidecars.

Run against a local graph store:
  honeygraph-node run --graph-url http://127.0.0.1:8080

Run with producer authentication and a peer seed:
  honeygraph-node run --require-auth --authorized-accounts alice,bob \
      --peer https://peer1.example.com
"#)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", env = "HONEYGRAPH_LOG")]
    pub log_level: String,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sidecar
    Run(RunCmd),

    /// Purge local sidecar data (queue state)
    Purge(PurgeCmd),
}

/// Run the sidecar
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Base path for local data
    #[arg(short = 'd', long, env = "HONEYGRAPH_BASE_PATH")]
    pub base_path: Option<PathBuf>,

    /// Node name announced to producers and peers
    #[arg(long, env = "HONEYGRAPH_NAME")]
    pub name: Option<String>,

    /// API listen port (peer HTTP surface + producer WebSocket)
    #[arg(long, default_value = "3030", env = "HONEYGRAPH_API_PORT")]
    pub api_port: u16,

    /// API listen address (use 0.0.0.0 for public)
    #[arg(long, default_value = "127.0.0.1", env = "HONEYGRAPH_API_ADDR")]
    pub api_addr: String,

    /// Graph store base URL
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "HONEYGRAPH_GRAPH_URL")]
    pub graph_url: String,

    /// Require producers to answer a signed challenge
    #[arg(long, default_value = "false", env = "HONEYGRAPH_REQUIRE_AUTH")]
    pub require_auth: bool,

    /// Comma-separated lowercase account allowlist (empty = any known account)
    #[arg(long, env = "HONEYGRAPH_AUTHORIZED_ACCOUNTS")]
    pub authorized_accounts: Option<String>,

    /// Dataset name used for snapshot tagging
    #[arg(long, default_value = "honeygraph", env = "HONEYGRAPH_DATASET")]
    pub dataset: String,

    /// Maximum retained snapshots
    #[arg(long, default_value = "10", env = "HONEYGRAPH_MAX_SNAPSHOTS")]
    pub max_snapshots: usize,

    /// Peer seed URLs (can be specified multiple times)
    #[arg(long = "peer", value_name = "URL", env = "HONEYGRAPH_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Continuous sync interval in seconds
    #[arg(long, default_value = "60", env = "HONEYGRAPH_SYNC_INTERVAL")]
    pub sync_interval: u64,

    /// Enable continuous gap sync
    #[arg(long, default_value = "true", env = "HONEYGRAPH_SYNC_ENABLED")]
    pub sync: bool,

    /// Peers queried per block for hash agreement
    #[arg(long, default_value = "3", env = "HONEYGRAPH_FETCH_PEERS")]
    pub fetch_peers: usize,

    /// Per-fork operation buffer size
    #[arg(long, default_value = "10000", env = "HONEYGRAPH_OP_BUFFER_SIZE")]
    pub op_buffer_size: usize,

    /// Maximum live forks per block
    #[arg(long, default_value = "10", env = "HONEYGRAPH_FORK_CAP")]
    pub fork_cap: usize,

    /// Retention window for inactive forks in seconds
    #[arg(long, default_value = "3600", env = "HONEYGRAPH_FORK_RETENTION_SECS")]
    pub fork_retention: u64,

    /// Policy for forks created by stray operations (trust, quarantine)
    #[arg(long, default_value = "trust", env = "HONEYGRAPH_STRAY_FORK_POLICY")]
    pub stray_fork_policy: String,
}

/// Purge local data
#[derive(Parser, Debug)]
pub struct PurgeCmd {
    /// Base path for local data
    #[arg(short = 'd', long, env = "HONEYGRAPH_BASE_PATH")]
    pub base_path: Option<PathBuf>,

    /// Skip confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

fn default_base_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("honeygraph")
}

impl RunCmd {
    /// Get the base path, defaulting to the platform data directory
    pub fn get_base_path(&self) -> PathBuf {
        self.base_path.clone().unwrap_or_else(default_base_path)
    }
}

impl PurgeCmd {
    pub fn get_base_path(&self) -> PathBuf {
        self.base_path.clone().unwrap_or_else(default_base_path)
    }
}
