// CLI configuration - Convert CLI args to node config
// Every knob the components read is resolved here; nothing reads the
// process environment after this point.

use crate::cli::RunCmd;
use crate::forks::{RegistryConfig, StrayForkPolicy};
use crate::network::SyncConfig;
use crate::queue::QueueConfig;
use crate::rpc::ApiConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Producer authentication settings
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub required: bool,

    /// Lowercase allowlist; empty admits any account the identity registry
    /// knows
    pub authorized_accounts: Vec<String>,
}

/// Snapshot engine settings
#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub dataset: String,
    pub max_snapshots: usize,
}

/// Complete node configuration derived from CLI arguments
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node name announced to producers and peers
    pub name: String,

    /// Local data directory (durable queue lives under it)
    pub base_path: PathBuf,

    pub api: ApiConfig,

    /// Graph store base URL
    pub graph_url: String,

    pub auth: AuthSettings,

    pub registry: RegistryConfig,

    pub queue: QueueConfig,

    pub sync: SyncConfig,

    pub snapshots: SnapshotSettings,
}

impl NodeConfig {
    /// Create configuration from the CLI run command
    pub fn from_run_cmd(cmd: &RunCmd) -> Result<Self, ConfigError> {
        let address = Self::parse_ip_addr(&cmd.api_addr)?;

        let stray_fork_policy = match cmd.stray_fork_policy.as_str() {
            "trust" => StrayForkPolicy::Trust,
            "quarantine" => StrayForkPolicy::Quarantine,
            other => return Err(ConfigError::InvalidStrayForkPolicy(other.to_string())),
        };

        let authorized_accounts = cmd
            .authorized_accounts
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();

        let name = cmd.name.clone().unwrap_or_else(|| {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let id: u16 = rng.gen();
            format!("honeygraph-{}", id)
        });

        Ok(Self {
            name,
            base_path: cmd.get_base_path(),
            api: ApiConfig {
                port: cmd.api_port,
                address,
            },
            graph_url: cmd.graph_url.clone(),
            auth: AuthSettings {
                required: cmd.require_auth,
                authorized_accounts,
            },
            registry: RegistryConfig {
                op_buffer_size: cmd.op_buffer_size,
                fork_cap: cmd.fork_cap,
                retention_secs: cmd.fork_retention,
                stray_fork_policy,
            },
            queue: QueueConfig::default(),
            sync: SyncConfig {
                enabled: cmd.sync,
                interval: Duration::from_secs(cmd.sync_interval.max(1)),
                fetch_peers: cmd.fetch_peers.max(1),
                fetch_concurrency: crate::network::fetch::DEFAULT_FETCH_CONCURRENCY,
                seeds: cmd.peers.clone(),
            },
            snapshots: SnapshotSettings {
                dataset: cmd.dataset.clone(),
                max_snapshots: cmd.max_snapshots.max(1),
            },
        })
    }

    /// Parse a dotted-quad listen address
    fn parse_ip_addr(addr: &str) -> Result<[u8; 4], ConfigError> {
        match addr {
            "localhost" => return Ok([127, 0, 0, 1]),
            _ => {}
        }
        let parts: Vec<&str> = addr.split('.').collect();
        if parts.len() != 4 {
            return Err(ConfigError::InvalidIpAddress(addr.to_string()));
        }

        let mut bytes = [0u8; 4];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = part
                .parse()
                .map_err(|_| ConfigError::InvalidIpAddress(addr.to_string()))?;
        }
        Ok(bytes)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),

    #[error("Invalid stray-fork policy: {0} (expected trust or quarantine)")]
    InvalidStrayForkPolicy(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn run_cmd(args: &[&str]) -> RunCmd {
        let mut full = vec!["honeygraph-node", "run"];
        full.extend_from_slice(args);
        let cli = crate::cli::Cli::try_parse_from(full).unwrap();
        match cli.command {
            crate::cli::Commands::Run(cmd) => cmd,
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = NodeConfig::from_run_cmd(&run_cmd(&[])).unwrap();
        assert_eq!(config.api.port, 3030);
        assert_eq!(config.registry.fork_cap, 10);
        assert_eq!(config.registry.op_buffer_size, 10_000);
        assert_eq!(config.sync.interval, Duration::from_secs(60));
        assert!(config.sync.enabled);
        assert!(!config.auth.required);
        assert_eq!(config.registry.stray_fork_policy, StrayForkPolicy::Trust);
    }

    #[test]
    fn test_accounts_lowercased_and_trimmed() {
        let config =
            NodeConfig::from_run_cmd(&run_cmd(&["--authorized-accounts", "Alice, BOB ,carol"]))
                .unwrap();
        assert_eq!(config.auth.authorized_accounts, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_quarantine_policy_parsed() {
        let config =
            NodeConfig::from_run_cmd(&run_cmd(&["--stray-fork-policy", "quarantine"])).unwrap();
        assert_eq!(
            config.registry.stray_fork_policy,
            StrayForkPolicy::Quarantine
        );
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let result = NodeConfig::from_run_cmd(&run_cmd(&["--stray-fork-policy", "maybe"]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidStrayForkPolicy(_))
        ));
    }

    #[test]
    fn test_parse_ip_addr() {
        assert_eq!(NodeConfig::parse_ip_addr("0.0.0.0").unwrap(), [0, 0, 0, 0]);
        assert_eq!(
            NodeConfig::parse_ip_addr("192.168.1.1").unwrap(),
            [192, 168, 1, 1]
        );
        assert_eq!(
            NodeConfig::parse_ip_addr("localhost").unwrap(),
            [127, 0, 0, 1]
        );
        assert!(NodeConfig::parse_ip_addr("not-an-ip").is_err());
    }

    #[test]
    fn test_generated_name_prefix() {
        let config = NodeConfig::from_run_cmd(&run_cmd(&[])).unwrap();
        assert!(config.name.starts_with("honeygraph-"));
    }
}
