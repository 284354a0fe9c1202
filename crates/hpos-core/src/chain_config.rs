// hpos-core/src/chain_config.rs
//
// Chain-wide configuration, immutable once genesis is accepted.

use crate::types::{BasisPoints, BlockNumber};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Immutable chain parameters agreed at genesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Identity across peers; a handshake mismatch is a protocol violation.
    pub chain_id: u64,
    /// Target interval between block heights.
    #[serde(with = "duration_secs")]
    pub block_time: Duration,
    /// Epoch rotation cadence, in blocks.
    pub epoch_length: u64,
    /// Seat cap after sorting the validator set by weight.
    pub max_validators: usize,
    /// Minimum stake required for validator-set membership.
    pub min_stake: u64,
    /// Gates the slashing branch of the reward loop.
    pub slashing_enabled: bool,
    /// Per-block base reward before halving, in base units.
    pub reward_base: u64,
    /// Blocks between halvings of `reward_base`.
    pub halving_interval: u64,
    /// Fraction of stake removed on a slashable offense, in basis points.
    pub slash_fraction_bps: BasisPoints,
    /// Validator / burn / treasury split of collected fees, basis points summing to 10000.
    pub validator_fee_share_bps: BasisPoints,
    pub burn_share_bps: BasisPoints,
    pub treasury_share_bps: BasisPoints,
    /// Maximum token supply that can ever be minted.
    pub max_supply: u64,
    /// Address credited with the treasury's share of fees.
    pub treasury_address: crate::Address,
    /// Block height at which governance features (if any) activate. 0 disables.
    pub governance_activation_height: BlockNumber,
    /// Transport peer cap.
    pub max_peers: usize,
    /// Addresses dialed on startup.
    pub bootstrap_peers: Vec<SocketAddr>,
    /// Local listen address for the P2P transport.
    pub node_listen_addr: SocketAddr,
    /// Whether this node participates as a validator.
    pub is_validator: bool,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// A single genesis validator allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub address: crate::Address,
    pub public_key_hex: String,
    pub stake: u64,
    pub commission_bps: BasisPoints,
}

/// The full genesis configuration: chain parameters plus initial allocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain: ChainConfig,
    pub initial_validators: Vec<GenesisValidator>,
    /// Additional balance allocations not tied to a validator seat.
    pub allocations: Vec<(crate::Address, u64)>,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub gas_limit: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum GenesisValidationError {
    #[error("chain_id must be positive")]
    ChainIdNotPositive,
    #[error("epoch_length must be at least 1")]
    EpochLengthZero,
    #[error("max_validators must be at least 1")]
    MaxValidatorsZero,
    #[error("block_time must be greater than zero")]
    BlockTimeZero,
    #[error("genesis requires at least one validator with stake >= min_stake")]
    NoQualifyingValidator,
    #[error("validator commission {0} exceeds 10000 basis points")]
    CommissionTooHigh(BasisPoints),
    #[error("fee shares must sum to 10000 basis points, got {0}")]
    FeeSharesInvalid(u32),
    #[error("allocated supply {allocated} exceeds max supply {max_supply}")]
    SupplyExceeded { allocated: u128, max_supply: u128 },
}

impl ChainConfig {
    /// Structural invariants that must hold regardless of genesis allocations.
    pub fn validate_shape(&self) -> Result<(), GenesisValidationError> {
        if self.chain_id == 0 {
            return Err(GenesisValidationError::ChainIdNotPositive);
        }
        if self.epoch_length == 0 {
            return Err(GenesisValidationError::EpochLengthZero);
        }
        if self.max_validators == 0 {
            return Err(GenesisValidationError::MaxValidatorsZero);
        }
        if self.block_time.is_zero() {
            return Err(GenesisValidationError::BlockTimeZero);
        }
        let share_sum = self.validator_fee_share_bps as u32
            + self.burn_share_bps as u32
            + self.treasury_share_bps as u32;
        if share_sum != 10_000 {
            return Err(GenesisValidationError::FeeSharesInvalid(share_sum));
        }
        Ok(())
    }
}

impl GenesisConfig {
    /// Required validations before genesis is accepted (§4.5).
    pub fn validate(&self) -> Result<(), GenesisValidationError> {
        self.chain.validate_shape()?;

        let qualifies = self
            .initial_validators
            .iter()
            .any(|v| v.stake >= self.chain.min_stake);
        if !qualifies {
            return Err(GenesisValidationError::NoQualifyingValidator);
        }

        for v in &self.initial_validators {
            if v.commission_bps > 10_000 {
                return Err(GenesisValidationError::CommissionTooHigh(v.commission_bps));
            }
        }

        let allocated: u128 = self
            .initial_validators
            .iter()
            .map(|v| v.stake as u128)
            .sum::<u128>()
            + self
                .allocations
                .iter()
                .map(|(_, amount)| *amount as u128)
                .sum::<u128>();
        if allocated > self.chain.max_supply as u128 {
            return Err(GenesisValidationError::SupplyExceeded {
                allocated,
                max_supply: self.chain.max_supply as u128,
            });
        }

        Ok(())
    }
}
