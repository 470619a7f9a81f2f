// Copyright (c) 2024 The Botho Foundation

//! Mint service configuration types.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Main mint service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintConfig {
    /// Address and amount to watch
    pub watch: WatchConfig,

    /// Minting parameters
    pub mint: MintSettings,

    /// Chain node CLI settings
    #[serde(default)]
    pub node: NodeConfig,

    /// Ledger indexer settings
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Service loop settings
    #[serde(default)]
    pub service: ServiceSettings,

    /// Notification settings
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// The watched funding address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Address that receives deposits and pays for mints
    pub address: String,

    /// Exact deposit amount that triggers a mint, in base units
    #[serde(default = "default_target_amount")]
    pub target_amount: u64,
}

/// Minting parameters handed to the transaction builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintSettings {
    /// Minting policy id (hex)
    pub policy_id: String,

    /// Path to the minting policy script
    pub script_file: PathBuf,

    /// Path to the signing key for the watched address
    pub signing_key_file: PathBuf,

    /// Asset name prefix; the sequence number is appended after a space
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Extra base units required on top of the target amount to cover fee
    /// and change
    #[serde(default = "default_fee_buffer")]
    pub fee_buffer: u64,

    /// Validity window in slots past the current tip
    #[serde(default = "default_validity_horizon")]
    pub validity_horizon: u64,

    /// Base units sent alongside the minted asset
    #[serde(default = "default_min_output_value")]
    pub min_output_value: u64,

    /// Optional transaction metadata file, passed through verbatim
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,

    /// Directory for transaction body and signed files
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

/// Chain network selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Preprod,
    Preview,
}

impl Network {
    /// Default network magic for test networks.
    pub fn default_magic(&self) -> Option<u32> {
        match self {
            Network::Mainnet => None,
            Network::Preprod => Some(1),
            Network::Preview => Some(2),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Preprod => write!(f, "preprod"),
            Network::Preview => write!(f, "preview"),
        }
    }
}

/// Chain node CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: Network,

    /// Overrides the network's default magic
    #[serde(default)]
    pub testnet_magic: Option<u32>,

    /// Node socket path
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// CLI executable
    #[serde(default = "default_cli_path")]
    pub cli_path: PathBuf,

    /// Timeout for a single CLI invocation
    #[serde(default = "default_node_timeout")]
    pub timeout_secs: u64,
}

/// Ledger indexer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// API project id
    #[serde(default)]
    pub project_id: String,

    /// Overrides the network's default API base URL
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_indexer_timeout")]
    pub timeout_secs: u64,

    /// Upper bound on pages fetched from any list endpoint
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

/// Where deposits come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Query the ledger indexer
    #[default]
    Live,
    /// Read a static fixture file
    Fixture,
}

/// Service loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Path to the mint state file
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Polling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub source: SourceKind,

    /// Fixture file (required if source = fixture)
    #[serde(default)]
    pub fixture_file: Option<PathBuf>,
}

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook URL; notifications are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_notify_username")]
    pub username: String,

    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

fn default_target_amount() -> u64 {
    27_000_000
}

fn default_name_prefix() -> String {
    "Flowmass".to_string()
}

fn default_fee_buffer() -> u64 {
    2_000_000
}

fn default_validity_horizon() -> u64 {
    10_000
}

fn default_min_output_value() -> u64 {
    1_400_000
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/var/lib/bth-mint")
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/cardano-node/node.socket")
}

fn default_cli_path() -> PathBuf {
    PathBuf::from("cardano-cli")
}

fn default_node_timeout() -> u64 {
    60
}

fn default_indexer_timeout() -> u64 {
    15
}

fn default_max_pages() -> u32 {
    100
}

fn default_state_file() -> PathBuf {
    PathBuf::from("mint.state")
}

fn default_poll_interval() -> u64 {
    60
}

fn default_notify_username() -> String {
    "Mint Bot".to_string()
}

fn default_notify_timeout() -> u64 {
    10
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            testnet_magic: None,
            socket_path: default_socket_path(),
            cli_path: default_cli_path(),
            timeout_secs: default_node_timeout(),
        }
    }
}

impl NodeConfig {
    /// Effective network magic for test networks.
    pub fn magic(&self) -> Option<u32> {
        match self.network {
            Network::Mainnet => None,
            _ => self.testnet_magic.or(self.network.default_magic()),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            base_url: None,
            timeout_secs: default_indexer_timeout(),
            max_pages: default_max_pages(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            poll_interval_secs: default_poll_interval(),
            source: SourceKind::default(),
            fixture_file: None,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            username: default_notify_username(),
            timeout_secs: default_notify_timeout(),
        }
    }
}

impl MintConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MintConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Base units the selected inputs must cover for one mint.
    pub fn required_input_value(&self) -> u64 {
        self.watch.target_amount.saturating_add(self.mint.fee_buffer)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.address.is_empty() {
            return Err(ConfigError::Invalid("watch.address is required".into()));
        }
        if self.watch.target_amount == 0 {
            return Err(ConfigError::Invalid(
                "watch.target_amount must be greater than zero".into(),
            ));
        }

        if self.mint.policy_id.is_empty() || hex::decode(&self.mint.policy_id).is_err() {
            return Err(ConfigError::Invalid(
                "mint.policy_id must be a non-empty hex string".into(),
            ));
        }
        if self.mint.name_prefix.is_empty() {
            return Err(ConfigError::Invalid("mint.name_prefix is required".into()));
        }

        if self.service.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "service.poll_interval_secs must be greater than zero".into(),
            ));
        }

        match self.service.source {
            SourceKind::Live => {
                if self.indexer.project_id.is_empty() {
                    return Err(ConfigError::Invalid(
                        "indexer.project_id is required when service.source = live".into(),
                    ));
                }
            }
            SourceKind::Fixture => {
                if self.service.fixture_file.is_none() {
                    return Err(ConfigError::Invalid(
                        "service.fixture_file is required when service.source = fixture".into(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [watch]
        address = "addr1qmonitor"

        [mint]
        policy_id = "1d0cf168b30d27c6619e7ca7c18e02c8cebc011bf056216a1ea829ff"
        script_file = "policy.script"
        signing_key_file = "payment.skey"

        [indexer]
        project_id = "mainnetabc"
    "#;

    #[test]
    fn test_defaults_from_minimal_file() {
        let config: MintConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.watch.target_amount, 27_000_000);
        assert_eq!(config.mint.fee_buffer, 2_000_000);
        assert_eq!(config.mint.name_prefix, "Flowmass");
        assert_eq!(config.required_input_value(), 29_000_000);
        assert_eq!(config.node.network, Network::Mainnet);
        assert_eq!(config.node.magic(), None);
        assert_eq!(config.service.source, SourceKind::Live);
        assert_eq!(config.service.poll_interval_secs, 60);
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn test_testnet_magic() {
        let mut node = NodeConfig {
            network: Network::Preprod,
            ..Default::default()
        };
        assert_eq!(node.magic(), Some(1));

        node.testnet_magic = Some(42);
        assert_eq!(node.magic(), Some(42));
    }

    #[test]
    fn test_validate_rejects_bad_policy() {
        let mut config: MintConfig = toml::from_str(MINIMAL).unwrap();
        config.mint.policy_id = "not-hex".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_fixture_requires_file() {
        let mut config: MintConfig = toml::from_str(MINIMAL).unwrap();
        config.service.source = SourceKind::Fixture;
        assert!(config.validate().is_err());

        config.service.fixture_file = Some(PathBuf::from("mock_deposits.json"));
        config.indexer.project_id.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_live_requires_project_id() {
        let mut config: MintConfig = toml::from_str(MINIMAL).unwrap();
        config.indexer.project_id.clear();
        assert!(config.validate().is_err());
    }
}
