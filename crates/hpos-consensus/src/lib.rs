// consensus/src/lib.rs

//! Hybrid Proof-of-Stake (HPoS) consensus
//!
//! This crate implements the round/epoch state machine that drives the
//! chain forward: a BFT-style three-phase vote (Propose, Prevote,
//! Precommit) per round, stake-weighted proposer selection, a rolling
//! performance tracker that feeds both selection weight and reward
//! distribution, and epoch rotation of the active validator set.

pub mod messages;
pub mod performance;
pub mod selection;
pub mod slashing;
pub mod state_machine;
pub mod validator;

pub use messages::{Commit, EquivocationEvidence, Proposal, Vote, VoteKind};
pub use performance::PerformanceTracker;
pub use selection::select_proposer;
pub use slashing::{EvidenceLog, SlashingCondition, SlashingEvidence};
pub use state_machine::{
    ConsensusConfig, ConsensusMessage, ConsensusStateMachine, Step, StatusSnapshot, SubmitOutcome,
};
pub use validator::{Validator, ValidatorSet};

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Errors that can occur during consensus operations.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("consensus engine already running")]
    AlreadyRunning,

    #[error("consensus engine is not running")]
    NotRunning,

    #[error("validator error: {0}")]
    ValidatorError(String),

    #[error("validator not found: {0}")]
    ValidatorNotFound(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("selection error: {0}")]
    SelectionError(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("core error: {0}")]
    Core(#[from] hpos_core::CoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] hpos_crypto::CryptoError),
}
