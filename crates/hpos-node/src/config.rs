// hpos-node/src/config.rs
//
// Node-level configuration: the chain parameters agreed at genesis,
// surfaced directly as flat TOML fields, plus the handful of settings
// that only make sense for this process (where to keep data, where to
// find a validator keypair, how often the reward loop ticks). Keeps the
// `from_file`/`to_file` TOML round-trip the original config used.

use hpos_core::{BasisPoints, BlockNumber};
use hpos_crypto::Address;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: String,
    /// Path to a keypair JSON file written by `hpos-node keygen`. Required
    /// when `chain.is_validator` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator_key_path: Option<String>,
    /// Path to the genesis document written by `hpos-node init --genesis`.
    /// Defaults to `{data_dir}/genesis.json` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genesis_path: Option<String>,
    pub chain: ChainSettings,
    #[serde(default)]
    pub reward_loop: RewardLoopSettings,
}

impl NodeConfig {
    pub fn genesis_path(&self) -> String {
        self.genesis_path
            .clone()
            .unwrap_or_else(|| format!("{}/genesis.json", self.data_dir))
    }

    pub fn validator_key_path(&self) -> Option<String> {
        self.validator_key_path
            .clone()
            .or_else(|| Some(format!("{}/keys/validator.json", self.data_dir)))
            .filter(|_| self.chain.is_validator)
    }
}

/// Mirrors `hpos_core::ChainConfig` field for field so the config file
/// stays flat TOML rather than a nested genesis document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain_id: u64,
    pub block_time_seconds: u64,
    pub epoch_length: u64,
    pub max_validators: usize,
    pub min_stake: u64,
    pub slashing_enabled: bool,
    pub reward_base: u64,
    pub halving_interval: u64,
    pub slash_fraction_bps: BasisPoints,
    pub validator_fee_share_bps: BasisPoints,
    pub burn_share_bps: BasisPoints,
    pub treasury_share_bps: BasisPoints,
    pub max_supply: u64,
    pub treasury_address: Address,
    pub governance_activation_height: BlockNumber,
    pub max_peers: usize,
    pub bootstrap_peers: Vec<SocketAddr>,
    pub node_listen_addr: SocketAddr,
    pub is_validator: bool,
}

impl ChainSettings {
    pub fn to_chain_config(&self) -> hpos_core::ChainConfig {
        hpos_core::ChainConfig {
            chain_id: self.chain_id,
            block_time: Duration::from_secs(self.block_time_seconds),
            epoch_length: self.epoch_length,
            max_validators: self.max_validators,
            min_stake: self.min_stake,
            slashing_enabled: self.slashing_enabled,
            reward_base: self.reward_base,
            halving_interval: self.halving_interval,
            slash_fraction_bps: self.slash_fraction_bps,
            validator_fee_share_bps: self.validator_fee_share_bps,
            burn_share_bps: self.burn_share_bps,
            treasury_share_bps: self.treasury_share_bps,
            max_supply: self.max_supply,
            treasury_address: self.treasury_address,
            governance_activation_height: self.governance_activation_height,
            max_peers: self.max_peers,
            bootstrap_peers: self.bootstrap_peers.clone(),
            node_listen_addr: self.node_listen_addr,
            is_validator: self.is_validator,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardLoopSettings {
    pub tick_interval_seconds: u64,
    pub reward_score_threshold: f64,
}

impl Default for RewardLoopSettings {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 60,
            reward_score_threshold: 0.9,
        }
    }
}

impl From<&RewardLoopSettings> for hpos_genesis::RewardLoopConfig {
    fn from(s: &RewardLoopSettings) -> Self {
        hpos_genesis::RewardLoopConfig {
            tick_interval: Duration::from_secs(s.tick_interval_seconds),
            reward_score_threshold: s.reward_score_threshold,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            validator_key_path: None,
            genesis_path: None,
            chain: ChainSettings {
                chain_id: 1,
                block_time_seconds: 2,
                epoch_length: 100,
                max_validators: 100,
                min_stake: 10_000,
                slashing_enabled: true,
                reward_base: 50,
                halving_interval: 210_000,
                slash_fraction_bps: 500,
                validator_fee_share_bps: 6_000,
                burn_share_bps: 2_000,
                treasury_share_bps: 2_000,
                max_supply: 1_000_000_000,
                treasury_address: Address::zero(),
                governance_activation_height: 0,
                max_peers: 50,
                bootstrap_peers: vec![],
                node_listen_addr: "0.0.0.0:30303".parse().unwrap(),
                is_validator: false,
            },
            reward_loop: RewardLoopSettings::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// The genesis document written by `hpos-node init --genesis`: the
/// allocations and initial validator seats that, combined with
/// `ChainConfig`, feed `hpos_genesis::bootstrap`. Kept as its own JSON
/// file rather than folded into `config.toml` since it is agreed once at
/// network birth and distributed out of band, unlike the rest of
/// `NodeConfig` which is a per-process operational setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisFile {
    pub initial_validators: Vec<hpos_core::GenesisValidator>,
    pub allocations: Vec<(Address, u64)>,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub gas_limit: u64,
}

impl GenesisFile {
    pub fn to_genesis_config(&self, chain: hpos_core::ChainConfig) -> hpos_core::GenesisConfig {
        hpos_core::GenesisConfig {
            chain,
            initial_validators: self.initial_validators.clone(),
            allocations: self.allocations.clone(),
            timestamp: self.timestamp,
            extra_data: self.extra_data.clone(),
            gas_limit: self.gas_limit,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
