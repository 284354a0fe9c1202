// hpos-consensus/src/messages.rs
//
// The three consensus-class wire messages plus Byzantine evidence. `Commit`
// is a re-export of `hpos_core::ConsensusProof`: the set of signatures that
// crossed the super-majority threshold for a block hash at a height.

use hpos_core::{BlockNumber, Round, Timestamp};
pub use hpos_core::ConsensusProof as Commit;
use hpos_crypto::{Address, Hash, Signature};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub height: BlockNumber,
    pub round: Round,
    pub block_hash: Hash,
    pub proposer: Address,
    pub timestamp: Timestamp,
    pub signature: Signature,
}

impl Proposal {
    /// The bytes a proposer signs: (height, round, block hash, proposer).
    pub fn signing_bytes(height: BlockNumber, round: Round, block_hash: Hash, proposer: Address) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + 4 + 32 + 20);
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&round.to_be_bytes());
        bytes.extend_from_slice(block_hash.as_bytes());
        bytes.extend_from_slice(proposer.as_bytes());
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteKind {
    Prevote,
    Precommit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub height: BlockNumber,
    pub round: Round,
    /// `None` is a nil vote.
    pub block_hash: Option<Hash>,
    pub validator: Address,
    pub kind: VoteKind,
    pub signature: Signature,
}

impl Vote {
    pub fn signing_bytes(
        height: BlockNumber,
        round: Round,
        block_hash: Option<Hash>,
        validator: Address,
        kind: VoteKind,
    ) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + 4 + 33 + 20 + 1);
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&round.to_be_bytes());
        match block_hash {
            Some(h) => {
                bytes.push(1);
                bytes.extend_from_slice(h.as_bytes());
            }
            None => bytes.push(0),
        }
        bytes.extend_from_slice(validator.as_bytes());
        bytes.push(match kind {
            VoteKind::Prevote => 0,
            VoteKind::Precommit => 1,
        });
        bytes
    }
}

/// Byzantine evidence: two signed votes of the same kind for the same
/// (height, round) by the same validator. The core only flags this;
/// concrete slashing policy lives in the reward loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivocationEvidence {
    pub height: BlockNumber,
    pub round: Round,
    pub validator: Address,
    pub kind: VoteKind,
    pub first: Vote,
    pub second: Vote,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_signing_bytes_are_stable() {
        let a = Proposal::signing_bytes(1, 0, Hash::zero(), Address::zero());
        let b = Proposal::signing_bytes(1, 0, Hash::zero(), Address::zero());
        assert_eq!(a, b);
    }

    #[test]
    fn vote_signing_bytes_distinguish_nil() {
        let nil = Vote::signing_bytes(1, 0, None, Address::zero(), VoteKind::Prevote);
        let not_nil = Vote::signing_bytes(1, 0, Some(Hash::zero()), Address::zero(), VoteKind::Prevote);
        assert_ne!(nil, not_nil);
    }
}
