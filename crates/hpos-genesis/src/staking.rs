// hpos-genesis/src/staking.rs
//
// Per-staker bookkeeping the reward loop reads and writes each tick.
// Owned exclusively by the reward loop; the ValidatorSet carries the
// figure consensus actually votes weight by (Validator.stake), while this
// ledger tracks the auxiliary facts reward distribution and slashing need
// (deposit height, payout routing, slash history).

use hpos_core::BlockNumber;
use hpos_crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeInfo {
    pub amount: u64,
    pub deposit_height: BlockNumber,
    pub last_active_height: BlockNumber,
    pub slash_count: u32,
    pub reward_payout_address: Address,
    /// Rolling performance score, refreshed from the tracker each tick.
    pub performance_score: f64,
}

impl StakeInfo {
    pub fn new(amount: u64, deposit_height: BlockNumber, reward_payout_address: Address) -> Self {
        Self {
            amount,
            deposit_height,
            last_active_height: deposit_height,
            slash_count: 0,
            reward_payout_address,
            performance_score: 1.0,
        }
    }
}

/// Per-staker ledger, keyed by validator address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StakingLedger {
    stakers: HashMap<Address, StakeInfo>,
}

impl StakingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deposit at `height`. Subsequent deposits to the same
    /// validator add to the existing amount rather than replacing it.
    pub fn deposit(&mut self, validator: Address, amount: u64, height: BlockNumber) {
        self.stakers
            .entry(validator)
            .and_modify(|info| info.amount += amount)
            .or_insert_with(|| StakeInfo::new(amount, height, validator));
    }

    pub fn get(&self, validator: &Address) -> Option<&StakeInfo> {
        self.stakers.get(validator)
    }

    pub fn get_mut(&mut self, validator: &Address) -> Option<&mut StakeInfo> {
        self.stakers.get_mut(validator)
    }

    pub fn remove(&mut self, validator: &Address) -> Option<StakeInfo> {
        self.stakers.remove(validator)
    }

    pub fn record_slash(&mut self, validator: &Address, penalty: u64) {
        if let Some(info) = self.stakers.get_mut(validator) {
            info.amount = info.amount.saturating_sub(penalty);
            info.slash_count += 1;
        }
    }

    pub fn update_score(&mut self, validator: &Address, score: f64) {
        if let Some(info) = self.stakers.get_mut(validator) {
            info.performance_score = score;
        }
    }

    pub fn touch(&mut self, validator: &Address, height: BlockNumber) {
        if let Some(info) = self.stakers.get_mut(validator) {
            info.last_active_height = height;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &StakeInfo)> {
        self.stakers.iter()
    }

    pub fn len(&self) -> usize {
        self.stakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stakers.is_empty()
    }
}
