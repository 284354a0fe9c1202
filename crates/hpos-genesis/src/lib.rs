// hpos-genesis/src/lib.rs

//! Genesis bootstrap and the staking/reward economics that run alongside
//! consensus.
//!
//! This crate turns a `GenesisConfig` into the seeded building blocks the
//! node needs at height 0 (the genesis block, the initial `ValidatorSet`,
//! a neutral `PerformanceTracker`), and owns the periodic reward loop that
//! mints rewards, applies slashing evidence handed up from consensus, and
//! splits collected fees between validators, the burn sink, and the
//! treasury.

pub mod genesis;
pub mod reward_loop;
pub mod staking;

pub use genesis::{bootstrap, genesis_hash, GenesisOutcome};
pub use reward_loop::{FeeSplit, RewardLoop, RewardLoopConfig, RewardTickSummary};
pub use staking::{StakeInfo, StakingLedger};

/// Result type for genesis/reward operations.
pub type GenesisResult<T> = Result<T, GenesisError>;

/// Errors that can occur during genesis bootstrap or reward distribution.
#[derive(Debug, thiserror::Error)]
pub enum GenesisError {
    #[error("genesis validation failed: {0}")]
    Validation(#[from] hpos_core::GenesisValidationError),

    #[error("core error: {0}")]
    Core(#[from] hpos_core::CoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] hpos_crypto::CryptoError),

    #[error("staking error: {0}")]
    Staking(String),
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {
        // Smoke test to ensure all modules compile together.
    }
}
