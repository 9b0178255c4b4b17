//! Node configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use consensus::{ConsensusConfig, Genesis, Validator, ValidatorSet};
use crypto::{Keypair, PublicKey};
use serde::{Deserialize, Serialize};

/// Main node configuration, loaded from TOML.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node configuration section
    #[serde(default)]
    pub node: NodeSection,

    /// Network configuration section
    #[serde(default)]
    pub network: NetworkSection,

    /// Round-change timer tuning
    #[serde(default)]
    pub consensus: ConsensusSection,

    /// This validator's identity and the genesis validator set
    pub validator: ValidatorSection,
}

/// Node-specific configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSection {
    /// Data directory for storage
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Network configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkSection {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub listen_port: u16,

    /// Maximum number of peers
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Bootstrap peers
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Enable peer discovery
    #[serde(default = "default_true")]
    pub enable_discovery: bool,
}

/// Round-change timer tuning, mapped onto [`ConsensusConfig`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusSection {
    #[serde(default = "default_round_change_timeout_ms")]
    pub round_change_timeout_ms: u64,

    #[serde(default = "default_timeout_delta_ms")]
    pub timeout_delta_ms: u64,

    #[serde(default = "default_max_rounds")]
    pub max_rounds: u64,
}

impl ConsensusSection {
    pub fn to_consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            round_change_timeout: Duration::from_millis(self.round_change_timeout_ms),
            timeout_delta: Duration::from_millis(self.timeout_delta_ms),
            max_rounds: self.max_rounds,
        }
    }
}

/// This node's signing identity and the genesis validator membership.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorSection {
    /// This node's secret key, hex-encoded (32 bytes).
    pub secret_key: String,

    /// Every validator's public key in the genesis set, hex-encoded
    /// (33-byte compressed secp256k1 points), in any order — the
    /// validator set sorts them by derived address.
    pub peers: Vec<String>,
}

impl ValidatorSection {
    fn keypair(&self) -> Result<Keypair, ConfigError> {
        let bytes = hex::decode(&self.secret_key)
            .map_err(|e| ConfigError::ParseError(format!("invalid secret_key hex: {e}")))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ConfigError::ParseError("secret_key must be 32 bytes".to_string()))?;
        Keypair::from_bytes(&secret)
            .map_err(|e| ConfigError::ParseError(format!("invalid secret_key: {e}")))
    }

    fn peer_keys(&self) -> Result<Vec<PublicKey>, ConfigError> {
        self.peers
            .iter()
            .map(|hex_key| {
                let bytes = hex::decode(hex_key)
                    .map_err(|e| ConfigError::ParseError(format!("invalid peer key hex: {e}")))?;
                let array: [u8; 33] = bytes.try_into().map_err(|_| {
                    ConfigError::ParseError("peer public key must be 33 bytes".to_string())
                })?;
                PublicKey::from_bytes(array)
                    .map_err(|e| ConfigError::ParseError(format!("invalid peer public key: {e}")))
            })
            .collect()
    }

    /// Build a fresh [`Keypair`] for this validator. Called twice by the
    /// node: once for the manager's internal vote-signing copy, once for
    /// the header-signing copy the proposer keeps for itself.
    pub fn load_keypair(&self) -> Result<Keypair, ConfigError> {
        self.keypair()
    }

    /// Build the genesis validator set and identity, sorted by address.
    pub fn load_validator_set(&self) -> Result<ValidatorSet, ConfigError> {
        let keypair = self.keypair()?;
        let self_validator = Validator::new(keypair.public_key());
        let mut validators: Vec<Validator> = self
            .peer_keys()?
            .into_iter()
            .map(Validator::new)
            .collect();
        if !validators.iter().any(|v| v.address == self_validator.address) {
            validators.push(self_validator.clone());
        }
        ValidatorSet::new(validators, &self_validator.address)
            .map_err(|e| ConfigError::ParseError(format!("invalid validator set: {e}")))
    }

    /// Build the genesis record from the same validator set, with the
    /// lowest-address validator as the fixed genesis proposer.
    pub fn load_genesis(&self) -> Result<Genesis, ConfigError> {
        let keypair = self.keypair()?;
        let self_validator = Validator::new(keypair.public_key());
        let mut validators: Vec<Validator> = self
            .peer_keys()?
            .into_iter()
            .map(Validator::new)
            .collect();
        if !validators.iter().any(|v| v.address == self_validator.address) {
            validators.push(self_validator.clone());
        }
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        let proposer = validators[0].clone();
        Ok(Genesis {
            timestamp_nanos: 0,
            proposer,
            validators,
        })
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    30303
}

fn default_max_peers() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_round_change_timeout_ms() -> u64 {
    3_000
}

fn default_timeout_delta_ms() -> u64 {
    500
}

fn default_max_rounds() -> u64 {
    100
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_port: default_port(),
            max_peers: default_max_peers(),
            bootstrap_peers: Vec::new(),
            enable_discovery: true,
        }
    }
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            round_change_timeout_ms: default_round_change_timeout_ms(),
            timeout_delta_ms: default_timeout_delta_ms(),
            max_rounds: default_max_rounds(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// A single-validator development configuration with a fixed (not
    /// random) secret key, so repeated `--dev` runs share the same chain
    /// identity.
    pub fn dev() -> Self {
        let secret_key = "11".repeat(32);
        Self {
            node: NodeSection {
                data_dir: PathBuf::from("./dev_data"),
                log_level: "debug".to_string(),
            },
            network: NetworkSection {
                listen_port: 30303,
                max_peers: 10,
                bootstrap_peers: Vec::new(),
                enable_discovery: false,
            },
            consensus: ConsensusSection::default(),
            validator: ValidatorSection {
                secret_key,
                peers: Vec::new(),
            },
        }
    }

    /// Get the listen address.
    pub fn listen_addr(&self) -> SocketAddr {
        format!("0.0.0.0:{}", self.network.listen_port)
            .parse()
            .unwrap()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("parse error: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_config() {
        let config = NodeConfig::dev();
        assert_eq!(config.network.max_peers, 10);
        let keypair = config.validator.load_keypair().unwrap();
        assert!(!keypair.address().is_empty());
    }

    #[test]
    fn dev_validator_set_contains_self() {
        let config = NodeConfig::dev();
        let validator_set = config.validator.load_validator_set().unwrap();
        assert_eq!(validator_set.size(), 1);
    }

    #[test]
    fn genesis_is_stable_across_calls() {
        let config = NodeConfig::dev();
        let a = config.validator.load_genesis().unwrap();
        let b = config.validator.load_genesis().unwrap();
        assert_eq!(a.chain_id(), b.chain_id());
    }

    #[test]
    fn test_serialize_config() {
        let config = NodeConfig::dev();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("listen_port"));
    }
}
