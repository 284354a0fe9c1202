// hpos-core/src/lib.rs

//! Core chain data structures shared by consensus, networking and the
//! genesis/reward loop.
//!
//! This crate owns:
//! - Block and header representation, with an opaque transaction payload
//! - Chain-wide genesis configuration
//! - A minimal append-only block ledger
//! - Thin collaborator traits for the execution engine, state view,
//!   signing and time, each with an in-memory default implementation

pub mod block;
pub mod chain;
pub mod chain_config;
pub mod collaborators;
pub mod types;

pub use block::{Block, BlockHeader, ConsensusProof};
pub use chain::Chain;
pub use chain_config::{ChainConfig, GenesisConfig, GenesisValidationError, GenesisValidator};
pub use types::*;

pub use hpos_crypto::{Address, Hash};

/// Result type for blockchain operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core blockchain operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("invalid chain: {0}")]
    InvalidChain(String),

    #[error("block not found: {0}")]
    BlockNotFound(Hash),

    #[error("genesis validation failed: {0}")]
    Genesis(#[from] GenesisValidationError),

    #[error("cryptographic error: {0}")]
    Crypto(#[from] hpos_crypto::CryptoError),

    #[error("serialization error: {0}")]
    Serialization(String),
}
