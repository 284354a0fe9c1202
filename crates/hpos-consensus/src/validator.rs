// hpos-consensus/src/validator.rs

use crate::{ConsensusError, ConsensusResult};
use hpos_core::{clamp_unit, BasisPoints, BlockNumber};
use hpos_crypto::{Address, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single validator's stake and performance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    #[serde(skip)]
    pub public_key: Option<PublicKey>,
    pub stake: u64,
    pub commission_bps: BasisPoints,
    /// In [0.0, 1.0], last value written by `ValidatorSet::apply_scores`.
    pub performance: f64,
    pub online: bool,
    pub proposals: u64,
    pub signings: u64,
    pub misses: u64,
    pub last_active_height: BlockNumber,
}

impl Validator {
    pub fn new(address: Address, stake: u64, commission_bps: BasisPoints) -> Self {
        Self {
            address,
            public_key: None,
            stake,
            commission_bps: commission_bps.min(10_000),
            performance: 1.0,
            online: true,
            proposals: 0,
            signings: 0,
            misses: 0,
            last_active_height: 0,
        }
    }

    /// weight(v) = stake(v) × (0.7 + 0.3 × performance(v))
    pub fn weight(&self) -> f64 {
        self.stake as f64 * (0.7 + 0.3 * clamp_unit(self.performance))
    }
}

/// Authoritative ledger of who may participate in consensus at a given
/// height, with a stable weight ordering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: HashMap<Address, Validator>,
    total_stake: u64,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, validator: Validator) {
        if let Some(prev) = self.validators.insert(validator.address, validator.clone()) {
            self.total_stake -= prev.stake;
        }
        self.total_stake += validator.stake;
    }

    pub fn remove(&mut self, address: &Address) -> Option<Validator> {
        let removed = self.validators.remove(address);
        if let Some(v) = &removed {
            self.total_stake -= v.stake;
        }
        removed
    }

    pub fn lookup(&self, address: &Address) -> ConsensusResult<&Validator> {
        self.validators
            .get(address)
            .ok_or_else(|| ConsensusError::ValidatorNotFound(address.to_hex()))
    }

    pub fn lookup_mut(&mut self, address: &Address) -> ConsensusResult<&mut Validator> {
        self.validators
            .get_mut(address)
            .ok_or_else(|| ConsensusError::ValidatorNotFound(address.to_hex()))
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.validators.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_stake(&self) -> u64 {
        self.total_stake
    }

    pub fn total_weight(&self) -> f64 {
        self.validators.values().map(Validator::weight).sum()
    }

    /// Current ordering by weight, descending, address as tie-break.
    /// A snapshot owned by the caller.
    pub fn sorted_by_weight(&self) -> Vec<Validator> {
        let mut all: Vec<Validator> = self.validators.values().cloned().collect();
        all.sort_by(|a, b| {
            b.weight()
                .partial_cmp(&a.weight())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.address.cmp(&b.address))
        });
        all
    }

    /// Refresh performance scores from the tracker and re-sort.
    pub fn apply_scores(&mut self, tracker: &crate::performance::PerformanceTracker) {
        for validator in self.validators.values_mut() {
            validator.performance = tracker.score(&validator.address);
        }
    }

    /// Keep only the top `max_seats` validators by weight, dropping the rest.
    pub fn retain_top(&mut self, max_seats: usize) {
        let kept: Vec<Address> = self
            .sorted_by_weight()
            .into_iter()
            .take(max_seats)
            .map(|v| v.address)
            .collect();
        let kept_set: std::collections::HashSet<Address> = kept.into_iter().collect();
        let dropped_stake: u64 = self
            .validators
            .values()
            .filter(|v| !kept_set.contains(&v.address))
            .map(|v| v.stake)
            .sum();
        self.validators.retain(|addr, _| kept_set.contains(addr));
        self.total_stake -= dropped_stake;
    }
}
