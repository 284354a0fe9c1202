// hpos-core/src/chain.rs
//
// A minimal append-only block ledger. The core does not prescribe a
// database format (that's a storage collaborator's job); it only keeps
// enough in memory to answer "what's the head", "what's at height N", and
// "is this candidate block's parent linkage valid" — the facts a restart
// needs to rehydrate last committed height and last committed block hash.

use crate::{Block, CoreError, CoreResult, Hash};
use std::collections::HashMap;

#[derive(Debug)]
pub struct Chain {
    genesis_hash: Hash,
    blocks_by_hash: HashMap<Hash, Block>,
    hash_by_height: HashMap<u64, Hash>,
    head: Hash,
}

impl Chain {
    /// Start a new ledger from a genesis block.
    pub fn new(genesis: Block) -> CoreResult<Self> {
        if !genesis.is_genesis() {
            return Err(CoreError::InvalidChain(
                "first block must be genesis".into(),
            ));
        }
        let genesis_hash = genesis.hash();
        let mut blocks_by_hash = HashMap::new();
        let mut hash_by_height = HashMap::new();
        hash_by_height.insert(0, genesis_hash);
        blocks_by_hash.insert(genesis_hash, genesis);
        Ok(Self {
            genesis_hash,
            blocks_by_hash,
            hash_by_height,
            head: genesis_hash,
        })
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis_hash
    }

    pub fn genesis_block(&self) -> &Block {
        self.blocks_by_hash
            .get(&self.genesis_hash)
            .expect("genesis is always stored")
    }

    pub fn head_hash(&self) -> Hash {
        self.head
    }

    pub fn head_block(&self) -> &Block {
        self.blocks_by_hash
            .get(&self.head)
            .expect("head always points at a stored block")
    }

    pub fn height(&self) -> u64 {
        self.head_block().height()
    }

    pub fn get_block(&self, hash: &Hash) -> Option<&Block> {
        self.blocks_by_hash.get(hash)
    }

    pub fn get_block_by_height(&self, height: u64) -> Option<&Block> {
        self.hash_by_height
            .get(&height)
            .and_then(|h| self.blocks_by_hash.get(h))
    }

    /// Append a block as the new head. The caller (the consensus state
    /// machine) is responsible for having already reached a commit
    /// decision; this only enforces the structural linkage invariant.
    pub fn commit_block(&mut self, block: Block) -> CoreResult<()> {
        let parent = self
            .get_block(&block.header.parent_hash)
            .ok_or(CoreError::BlockNotFound(block.header.parent_hash))?
            .clone();
        block.validate(&parent)?;

        let hash = block.hash();
        let height = block.height();
        self.hash_by_height.insert(height, hash);
        self.blocks_by_hash.insert(hash, block);
        self.head = hash;
        Ok(())
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks_by_hash.contains_key(hash)
    }

    /// Walk the full chain from genesis to head, re-checking linkage.
    pub fn verify_chain(&self) -> CoreResult<()> {
        let mut current = self.genesis_block().clone();
        for height in 1..=self.height() {
            let next = self
                .get_block_by_height(height)
                .ok_or_else(|| CoreError::InvalidChain(format!("missing block at height {height}")))?;
            next.validate(&current)?;
            current = next.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpos_crypto::Address;

    fn genesis() -> Block {
        Block::genesis(Hash::zero(), Hash::zero(), b"g".to_vec(), 0, 10_000_000)
    }

    #[test]
    fn new_chain_starts_at_genesis() {
        let chain = Chain::new(genesis()).unwrap();
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.head_hash(), chain.genesis_hash());
    }

    #[test]
    fn commit_advances_head() {
        let mut chain = Chain::new(genesis()).unwrap();
        let parent_hash = chain.head_hash();
        let next = Block::new(
            1,
            parent_hash,
            Address::zero(),
            Hash::zero(),
            Hash::zero(),
            vec![],
            10_000_000,
            1,
        );
        let next_hash = next.hash();
        chain.commit_block(next).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.head_hash(), next_hash);
        assert!(chain.contains(&next_hash));
    }

    #[test]
    fn commit_rejects_unknown_parent() {
        let mut chain = Chain::new(genesis()).unwrap();
        let bogus = Block::new(
            1,
            Hash::from_slice(&[7u8; 32]).unwrap(),
            Address::zero(),
            Hash::zero(),
            Hash::zero(),
            vec![],
            10_000_000,
            1,
        );
        assert!(chain.commit_block(bogus).is_err());
    }

    #[test]
    fn verify_chain_detects_gap() {
        let mut chain = Chain::new(genesis()).unwrap();
        let parent_hash = chain.head_hash();
        let next = Block::new(
            1,
            parent_hash,
            Address::zero(),
            Hash::zero(),
            Hash::zero(),
            vec![],
            10_000_000,
            1,
        );
        chain.commit_block(next).unwrap();
        assert!(chain.verify_chain().is_ok());
    }
}
