use std::fs;
use std::path::{Path, PathBuf};

use alloy_primitives::address;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::NetworkDescriptor;
use crate::types::{Address, ChainId};

const DEFAULT_CONTRACT_ADDRESS: alloy_primitives::Address =
    address!("a3a586e410164140d9e71c8b0ed460a95a239513");
const DEFAULT_INDEXER_ENDPOINT: &str =
    "https://api.studio.thegraph.com/query/89524/neo-quick-poll/version/latest";
const DEFAULT_INDEXER_PAGE_SIZE: u32 = 5;
const MAX_INDEXER_PAGE_SIZE: u32 = 1_000;
const DEFAULT_INDEXER_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BRIDGE_ENDPOINT: &str = "http://127.0.0.1:8545";
const DEFAULT_BRIDGE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 1_000;
const MIN_RECEIPT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_EVENT_POLL_INTERVAL_MS: u64 = 2_000;
const MIN_EVENT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_LINK_PATH: &str = "./data/quickpoll/link.toml";
const DEFAULT_SUGGESTIONS_ENDPOINT: &str = "https://llama.us.gaianet.network/v1/chat/completions";
const DEFAULT_SUGGESTIONS_MODEL: &str = "llama";
const DEFAULT_SUGGESTIONS_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid config {path}: unknown configuration key(s): {}", keys.join(", "))]
    UnknownKeys { path: PathBuf, keys: Vec<String> },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("unable to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Client configuration, one section per collaborator.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Network the wallet must be on before any state-changing call.
    pub network: NetworkDescriptor,
    pub contract: ContractConfig,
    pub indexer: IndexerConfig,
    pub bridge: BridgeConfig,
    pub session: SessionConfig,
    pub workflow: WorkflowConfig,
    pub suggestions: SuggestionsConfig,
}

impl ClientConfig {
    /// Reads and validates a TOML config, rejecting keys this client does not know.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = parse_strict(&content, path)?;
        config.validate()?;
        Ok(config.sanitized())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let encoded = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        fs::write(path, encoded).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.chain_id == ChainId(0) {
            return Err(ConfigError::Invalid("network.chain_id must be non-zero".into()));
        }
        if self.network.chain_name.trim().is_empty() {
            return Err(ConfigError::Invalid("network.chain_name must be set".into()));
        }
        if self.network.rpc_urls.is_empty() {
            return Err(ConfigError::Invalid(
                "network.rpc_urls must list at least one endpoint".into(),
            ));
        }
        if self.indexer.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("indexer.endpoint must be set".into()));
        }
        if self.bridge.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("bridge.endpoint must be set".into()));
        }
        if self.bridge.receipt_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "bridge.receipt_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.contract.gas_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "contract.gas_limit must be greater than zero when set".into(),
            ));
        }
        Ok(())
    }

    /// Clamps tunables into the ranges the client supports.
    pub fn sanitized(mut self) -> Self {
        self.indexer = self.indexer.sanitized();
        self.bridge = self.bridge.sanitized();
        self
    }
}

fn parse_strict<T: DeserializeOwned>(content: &str, path: &Path) -> Result<T, ConfigError> {
    let mut unknown_keys = Vec::new();
    let deserializer = toml::de::Deserializer::new(content);
    let value = serde_ignored::deserialize(deserializer, |key| {
        unknown_keys.push(key.to_string());
    })
    .map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    if !unknown_keys.is_empty() {
        return Err(ConfigError::UnknownKeys {
            path: path.to_path_buf(),
            keys: unknown_keys,
        });
    }
    Ok(value)
}

/// Poll contract coordinates.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContractConfig {
    pub address: Address,
    /// Explicit gas limit; left to the wallet's estimate when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            address: Address::from(DEFAULT_CONTRACT_ADDRESS),
            gas_limit: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexerConfig {
    /// GraphQL endpoint serving the poll subgraph.
    pub endpoint: String,
    /// Number of polls and votes requested per refresh.
    pub page_size: u32,
    pub request_timeout_ms: u64,
}

impl IndexerConfig {
    pub fn sanitized(mut self) -> Self {
        self.page_size = self.page_size.clamp(1, MAX_INDEXER_PAGE_SIZE);
        self
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_INDEXER_ENDPOINT.to_string(),
            page_size: DEFAULT_INDEXER_PAGE_SIZE,
            request_timeout_ms: DEFAULT_INDEXER_TIMEOUT_MS,
        }
    }
}

/// Signer endpoint used by the JSON-RPC wallet bridge.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub endpoint: String,
    pub request_timeout_ms: u64,
    /// Delay between `eth_getTransactionReceipt` polls.
    pub receipt_poll_interval_ms: u64,
    /// Give up waiting for a receipt after this many seconds.
    pub receipt_timeout_secs: u64,
    /// Delay between account/chain polls feeding change notifications.
    pub event_poll_interval_ms: u64,
}

impl BridgeConfig {
    pub fn sanitized(mut self) -> Self {
        if self.receipt_poll_interval_ms < MIN_RECEIPT_POLL_INTERVAL_MS {
            self.receipt_poll_interval_ms = MIN_RECEIPT_POLL_INTERVAL_MS;
        }
        if self.event_poll_interval_ms < MIN_EVENT_POLL_INTERVAL_MS {
            self.event_poll_interval_ms = MIN_EVENT_POLL_INTERVAL_MS;
        }
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_BRIDGE_ENDPOINT.to_string(),
            request_timeout_ms: DEFAULT_BRIDGE_TIMEOUT_MS,
            receipt_poll_interval_ms: DEFAULT_RECEIPT_POLL_INTERVAL_MS,
            receipt_timeout_secs: DEFAULT_RECEIPT_TIMEOUT_SECS,
            event_poll_interval_ms: DEFAULT_EVENT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// File holding the persisted "wallet was linked" flag.
    pub link_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            link_path: PathBuf::from(DEFAULT_LINK_PATH),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Refresh the poll cache after a poll is confirmed.
    pub refresh_after_create: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            refresh_after_create: true,
        }
    }
}

/// Chat-completions endpoint used to suggest poll options.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SuggestionsConfig {
    pub endpoint: String,
    pub model: String,
    pub request_timeout_ms: u64,
}

impl Default for SuggestionsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SUGGESTIONS_ENDPOINT.to_string(),
            model: DEFAULT_SUGGESTIONS_MODEL.to_string(),
            request_timeout_ms: DEFAULT_SUGGESTIONS_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_target_neox_testnet() {
        let config = ClientConfig::default();
        assert_eq!(config.network.chain_id, ChainId(12_227_332));
        assert_eq!(config.indexer.page_size, DEFAULT_INDEXER_PAGE_SIZE);
        assert!(config.workflow.refresh_after_create);
        assert_eq!(config.contract.address.as_evm(), &DEFAULT_CONTRACT_ADDRESS);
        assert!(config
            .contract
            .address
            .matches("0xA3A586e410164140D9e71C8B0eD460a95A239513"));
        config.validate().expect("defaults validate");
    }

    #[test]
    fn round_trips_through_toml_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("quickpoll.toml");
        let mut config = ClientConfig::default();
        config.contract.gas_limit = Some(300_000);
        config.indexer.page_size = 20;
        config.save(&path).expect("save");

        let loaded = ClientConfig::load(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn absent_sections_fall_back_to_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("partial.toml");
        fs::write(&path, "[indexer]\npage_size = 12\n").expect("write");

        let loaded = ClientConfig::load(&path).expect("load");
        assert_eq!(loaded.indexer.page_size, 12);
        assert_eq!(loaded.bridge, BridgeConfig::default());
        assert_eq!(loaded.network, NetworkDescriptor::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("typo.toml");
        fs::write(&path, "[bridge]\nendpoit = \"http://localhost:8545\"\n").expect("write");

        let err = ClientConfig::load(&path).expect_err("unknown key");
        match err {
            ConfigError::UnknownKeys { keys, .. } => {
                assert_eq!(keys, vec!["bridge.endpoit".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_contract_address_fails_to_parse() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[contract]\naddress = \"0x1234\"\n").expect("write");
        assert!(matches!(
            ClientConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn validate_rejects_empty_endpoints() {
        let mut config = ClientConfig::default();
        config.indexer.endpoint = "  ".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn sanitized_clamps_intervals_and_page_size() {
        let mut config = ClientConfig::default();
        config.indexer.page_size = 0;
        config.bridge.receipt_poll_interval_ms = 1;
        config.bridge.event_poll_interval_ms = 10;
        let config = config.sanitized();
        assert_eq!(config.indexer.page_size, 1);
        assert_eq!(config.bridge.receipt_poll_interval_ms, MIN_RECEIPT_POLL_INTERVAL_MS);
        assert_eq!(config.bridge.event_poll_interval_ms, MIN_EVENT_POLL_INTERVAL_MS);
    }
}
