// hpos-core/src/collaborators.rs
//
// Thin interfaces to the pieces of a full node this repository treats as
// external: transaction execution, account balances, message signing, and
// wall-clock time. Consensus and the reward loop consume these traits;
// they do not own an implementation. The in-memory defaults exist only so
// the workspace is buildable and testable standalone — a real deployment
// wires in its own execution engine, storage-backed state view, signer and
// clock.

use crate::{Block, Hash};
use async_trait::async_trait;
use hpos_crypto::{Address, Signature};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Produces transaction payloads for a proposal and applies a committed
/// block's payload to whatever state store backs it.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Opaque transaction bytes to embed in the next proposal, and the
    /// state/receipts roots that would result from applying them.
    async fn collect_pending(&self, gas_limit: u64) -> (Vec<u8>, Hash, Hash);

    /// Apply a committed block's payload, returning the gas fees it
    /// collected on success, or `None` if the collaborator rejected the
    /// block (e.g. I/O failure). The reward loop splits the returned fee
    /// total between validator, burn, and treasury shares.
    async fn apply_block(&self, block: &Block) -> Option<u64>;
}

/// Read-only view over account balances, used by the genesis/reward loop
/// to credit rewards and by validation to check allocations.
#[async_trait]
pub trait StateView: Send + Sync {
    async fn balance_of(&self, address: &Address) -> u64;
    async fn credit(&self, address: &Address, amount: u64);
    async fn debit(&self, address: &Address, amount: u64) -> bool;
}

/// Signs and verifies consensus messages on behalf of this node's
/// validator identity.
#[async_trait]
pub trait SignatureProvider: Send + Sync {
    fn address(&self) -> Address;
    async fn sign(&self, payload: &[u8]) -> Signature;
    fn verify(&self, address: &Address, payload: &[u8], signature: &Signature) -> bool;
}

/// Wall-clock access, abstracted so round timeouts are testable without
/// real sleeps.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// In-memory `StateView` sufficient for tests and single-process demos.
#[derive(Default)]
pub struct InMemoryStateView {
    balances: Mutex<HashMap<Address, u64>>,
}

impl InMemoryStateView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, address: Address, amount: u64) {
        self.balances.lock().unwrap().insert(address, amount);
    }
}

#[async_trait]
impl StateView for InMemoryStateView {
    async fn balance_of(&self, address: &Address) -> u64 {
        *self.balances.lock().unwrap().get(address).unwrap_or(&0)
    }

    async fn credit(&self, address: &Address, amount: u64) {
        *self.balances.lock().unwrap().entry(*address).or_insert(0) += amount;
    }

    async fn debit(&self, address: &Address, amount: u64) -> bool {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry(*address).or_insert(0);
        if *entry < amount {
            return false;
        }
        *entry -= amount;
        true
    }
}

/// In-memory `ExecutionEngine` that produces empty blocks. Useful for
/// exercising the consensus and network layers without a real executor.
#[derive(Default)]
pub struct NullExecutionEngine;

#[async_trait]
impl ExecutionEngine for NullExecutionEngine {
    async fn collect_pending(&self, _gas_limit: u64) -> (Vec<u8>, Hash, Hash) {
        (Vec::new(), Hash::zero(), Hash::zero())
    }

    async fn apply_block(&self, _block: &Block) -> Option<u64> {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_state_view_credits_and_debits() {
        let view = InMemoryStateView::new();
        let addr = Address::zero();
        view.credit(&addr, 100).await;
        assert_eq!(view.balance_of(&addr).await, 100);
        assert!(view.debit(&addr, 40).await);
        assert_eq!(view.balance_of(&addr).await, 60);
        assert!(!view.debit(&addr, 1000).await);
    }

    #[tokio::test]
    async fn null_execution_engine_applies_any_block() {
        let engine = NullExecutionEngine;
        let block = Block::genesis(Hash::zero(), Hash::zero(), vec![], 0, 10_000_000);
        assert_eq!(engine.apply_block(&block).await, Some(0));
    }
}
