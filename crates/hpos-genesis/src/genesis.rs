// hpos-genesis/src/genesis.rs
//
// Turns a GenesisConfig into the seeded state a node needs at height 0:
// the genesis block itself, a ValidatorSet carrying the initial stakes,
// and a PerformanceTracker giving every initial validator the neutral
// (no-activity) score. Allocations and validator stakes are materialised
// into the state collaborator so balance queries are consistent from the
// first height onward.

use crate::GenesisResult;
use hpos_consensus::{PerformanceTracker, Validator, ValidatorSet};
use hpos_core::{collaborators::StateView, Block, Gas, GenesisConfig, Hash, Timestamp};
use hpos_crypto::{Hashable, PublicKey, SignatureScheme};

/// The genesis block plus the consensus building blocks seeded from it.
pub struct GenesisOutcome {
    pub block: Block,
    pub validators: ValidatorSet,
    pub tracker: PerformanceTracker,
    /// The chain-identity hash per §4.5, distinct from `block.hash()`: it
    /// folds in `chain_id`, which the block header itself does not carry.
    pub genesis_hash: Hash,
}

/// Bootstrap genesis: validate the configuration, seed the validator set
/// and performance tracker, materialise allocations and validator stakes
/// into `state`, and build the genesis block.
pub async fn bootstrap(genesis: &GenesisConfig, state: &dyn StateView) -> GenesisResult<GenesisOutcome> {
    genesis.validate()?;

    let mut validators = ValidatorSet::new();
    let mut tracker = PerformanceTracker::new();

    for gv in &genesis.initial_validators {
        let mut validator = Validator::new(gv.address, gv.stake, gv.commission_bps);
        if !gv.public_key_hex.is_empty() {
            if let Ok(pk) = PublicKey::from_hex(SignatureScheme::Ed25519, &gv.public_key_hex) {
                validator.public_key = Some(pk);
            }
        }
        validators.add(validator);
        tracker.seed(gv.address);
        state.credit(&gv.address, gv.stake).await;
    }

    for (address, amount) in &genesis.allocations {
        state.credit(address, *amount).await;
    }

    // No execution collaborator is wired at genesis time; state/receipts
    // roots are the zero hash until the first block is executed.
    let state_root = Hash::zero();
    let receipts_root = Hash::zero();
    let block = Block::genesis(
        state_root,
        receipts_root,
        genesis.extra_data.clone(),
        genesis.timestamp,
        genesis.gas_limit,
    );

    let hash = genesis_hash(
        genesis.chain.chain_id,
        state_root,
        receipts_root,
        &genesis.extra_data,
        genesis.timestamp,
        genesis.gas_limit,
    );

    tracing::info!(
        chain_id = genesis.chain.chain_id,
        validators = validators.len(),
        total_stake = validators.total_stake(),
        genesis_hash = %hash,
        block_hash = %block.hash(),
        "genesis bootstrapped"
    );

    Ok(GenesisOutcome {
        block,
        validators,
        tracker,
        genesis_hash: hash,
    })
}

/// The deterministic genesis identity hash per §4.5: a hash of
/// (chain_id, parent = zero hash, state root, receipts root, extra data,
/// timestamp, gas limit). Kept separate from `BlockHeader::hash()`, which
/// does not carry `chain_id` and is used for chain linkage instead.
pub fn genesis_hash(
    chain_id: u64,
    state_root: Hash,
    receipts_root: Hash,
    extra_data: &[u8],
    timestamp: Timestamp,
    gas_limit: Gas,
) -> Hash {
    let mut bytes = Vec::with_capacity(8 + 32 + 32 + 32 + extra_data.len() + 8 + 8);
    bytes.extend_from_slice(&chain_id.to_be_bytes());
    bytes.extend_from_slice(Hash::zero().as_bytes());
    bytes.extend_from_slice(state_root.as_bytes());
    bytes.extend_from_slice(receipts_root.as_bytes());
    bytes.extend_from_slice(extra_data);
    bytes.extend_from_slice(&timestamp.to_be_bytes());
    bytes.extend_from_slice(&gas_limit.to_be_bytes());
    bytes.as_slice().hash()
}
