// hpos-core/src/block.rs
//
// The abstract block header the consensus core requires: hash identity and
// parent linkage. Execution-side fields (state root, receipts root,
// transaction payload) are produced by the execution collaborator (§6) and
// treated here as opaque bytes.

use crate::{types::*, CoreError, CoreResult};
use hpos_crypto::{hash::Hashable, Address, Hash, Signature};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: BlockNumber,
    pub parent_hash: Hash,
    pub timestamp: Timestamp,
    pub gas_limit: Gas,
    pub state_root: Hash,
    pub receipts_root: Hash,
    pub proposer: Address,
    /// Opaque transaction payload hash, as reported by the execution collaborator.
    pub transactions_root: Hash,
    pub extra_data: Vec<u8>,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        bincode::serialize(self).expect("header serialization is infallible").hash()
    }

    /// Header-level checks independent of the consensus proof: sequential
    /// height, correct parent linkage, monotonic timestamp, gas accounting.
    pub fn validate(&self, parent: &BlockHeader) -> CoreResult<()> {
        if self.height != parent.height + 1 {
            return Err(CoreError::InvalidBlock(format!(
                "expected height {}, got {}",
                parent.height + 1,
                self.height
            )));
        }
        if self.parent_hash != parent.hash() {
            return Err(CoreError::InvalidBlock("parent hash mismatch".into()));
        }
        if self.timestamp <= parent.timestamp {
            return Err(CoreError::InvalidBlock(
                "block timestamp must be after parent".into(),
            ));
        }
        Ok(())
    }
}

/// The consensus proof attached to a committed block: the set of Precommit
/// signatures whose combined stake weight crossed the super-majority
/// threshold for `block_hash` at `height`. Constructing and verifying the
/// weight threshold is the consensus state machine's job (`hpos-consensus`);
/// this type only carries the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusProof {
    pub height: BlockNumber,
    pub block_hash: Hash,
    pub signatures: Vec<(Address, Signature)>,
}

impl ConsensusProof {
    pub fn signer_count(&self) -> usize {
        self.signatures.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Opaque transaction payload as returned by the execution collaborator.
    pub transactions: Vec<u8>,
    /// Present once the consensus state machine has finalised this height.
    pub proof: Option<ConsensusProof>,
}

impl Block {
    pub fn new(
        height: BlockNumber,
        parent_hash: Hash,
        proposer: Address,
        state_root: Hash,
        receipts_root: Hash,
        transactions: Vec<u8>,
        gas_limit: Gas,
        timestamp: Timestamp,
    ) -> Self {
        let transactions_root = transactions.hash();
        let header = BlockHeader {
            height,
            parent_hash,
            timestamp,
            gas_limit,
            state_root,
            receipts_root,
            proposer,
            transactions_root,
            extra_data: Vec::new(),
        };
        Self {
            header,
            transactions,
            proof: None,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> BlockNumber {
        self.header.height
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.parent_hash == Hash::zero()
    }

    pub fn validate(&self, parent: &Block) -> CoreResult<()> {
        self.header.validate(&parent.header)?;
        if self.transactions.hash() != self.header.transactions_root {
            return Err(CoreError::InvalidBlock(
                "transactions root mismatch".into(),
            ));
        }
        Ok(())
    }

    pub fn genesis(
        state_root: Hash,
        receipts_root: Hash,
        extra_data: Vec<u8>,
        timestamp: Timestamp,
        gas_limit: Gas,
    ) -> Self {
        let header = BlockHeader {
            height: 0,
            parent_hash: Hash::zero(),
            timestamp,
            gas_limit,
            state_root,
            receipts_root,
            proposer: Address::zero(),
            transactions_root: Vec::<u8>::new().hash(),
            extra_data,
        };
        Self {
            header,
            transactions: Vec::new(),
            proof: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_identified() {
        let genesis = Block::genesis(Hash::zero(), Hash::zero(), b"genesis".to_vec(), 0, 10_000_000);
        assert_eq!(genesis.height(), 0);
        assert!(genesis.is_genesis());
    }

    #[test]
    fn two_identical_genesis_configs_hash_equal() {
        let a = Block::genesis(Hash::zero(), Hash::zero(), b"g".to_vec(), 1234, 10_000_000);
        let b = Block::genesis(Hash::zero(), Hash::zero(), b"g".to_vec(), 1234, 10_000_000);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn block_linkage_validates() {
        let genesis = Block::genesis(Hash::zero(), Hash::zero(), b"g".to_vec(), 0, 10_000_000);
        let child = Block::new(
            1,
            genesis.hash(),
            Address::zero(),
            Hash::zero(),
            Hash::zero(),
            vec![],
            10_000_000,
            1,
        );
        assert!(child.validate(&genesis).is_ok());
    }

    #[test]
    fn wrong_height_rejected() {
        let genesis = Block::genesis(Hash::zero(), Hash::zero(), b"g".to_vec(), 0, 10_000_000);
        let child = Block::new(
            2,
            genesis.hash(),
            Address::zero(),
            Hash::zero(),
            Hash::zero(),
            vec![],
            10_000_000,
            1,
        );
        assert!(child.validate(&genesis).is_err());
    }
}
