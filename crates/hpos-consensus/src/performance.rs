// hpos-consensus/src/performance.rs
//
// Rolling per-validator counters that feed the weight function and reward
// distribution. Two nodes fed the same event sequence must derive the same
// scores; nothing here reads wall-clock time or randomness.

use hpos_core::{clamp_unit, Timestamp};
use hpos_crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counters {
    proposals: u64,
    votes: u64,
    misses: u64,
    response_time_total: u64,
    response_samples: u64,
}

/// Rolling counters of proposals, votes, missed blocks, and response time,
/// feeding validator weight and reward derivation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceTracker {
    counters: HashMap<Address, Counters>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a validator with a neutral (empty) record, e.g. at genesis.
    pub fn seed(&mut self, address: Address) {
        self.counters.entry(address).or_default();
    }

    pub fn record_proposal(&mut self, address: Address) {
        self.counters.entry(address).or_default().proposals += 1;
    }

    pub fn record_vote(&mut self, address: Address) {
        self.counters.entry(address).or_default().votes += 1;
    }

    pub fn record_missed(&mut self, address: Address) {
        self.counters.entry(address).or_default().misses += 1;
    }

    pub fn record_response(&mut self, address: Address, duration: Timestamp) {
        let c = self.counters.entry(address).or_default();
        c.response_time_total += duration;
        c.response_samples += 1;
    }

    /// Average response time over the current epoch window, in the same
    /// unit `duration` was recorded in. 0 if no samples yet.
    pub fn average_response(&self, address: &Address) -> u64 {
        match self.counters.get(address) {
            Some(c) if c.response_samples > 0 => c.response_time_total / c.response_samples,
            _ => 0,
        }
    }

    /// score = 1.0 for a validator with no recorded activity (benefit of the
    /// doubt for a newly joined validator). Otherwise
    /// base = (2p + v) / (2(p + v + m)), penalty = 0.5m / (p + v + m),
    /// score = clamp(base - penalty, 0, 1).
    pub fn score(&self, address: &Address) -> f64 {
        let c = match self.counters.get(address) {
            Some(c) => c,
            None => return 1.0,
        };
        let (p, v, m) = (c.proposals as f64, c.votes as f64, c.misses as f64);
        let total = p + v + m;
        if total == 0.0 {
            return 1.0;
        }
        let base = (2.0 * p + v) / (2.0 * total);
        let penalty = 0.5 * m / total;
        clamp_unit(base - penalty)
    }

    /// Write current scores into the validator set and re-sort it.
    pub fn apply_to(&self, set: &mut crate::validator::ValidatorSet) {
        set.apply_scores(self);
    }

    /// Halve every counter. Called at epoch rotation: preserves recent
    /// history while bounding growth.
    pub fn decay(&mut self) {
        for c in self.counters.values_mut() {
            c.proposals /= 2;
            c.votes /= 2;
            c.misses /= 2;
            c.response_time_total /= 2;
            c.response_samples /= 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    #[test]
    fn new_validator_gets_benefit_of_the_doubt() {
        let tracker = PerformanceTracker::new();
        assert_eq!(tracker.score(&addr(1)), 1.0);
    }

    #[test]
    fn pure_proposals_score_high() {
        let mut tracker = PerformanceTracker::new();
        tracker.record_proposal(addr(1));
        tracker.record_proposal(addr(1));
        // base = (2*2 + 0) / (2*2) = 1.0, penalty = 0
        assert_eq!(tracker.score(&addr(1)), 1.0);
    }

    #[test]
    fn misses_reduce_score() {
        let mut tracker = PerformanceTracker::new();
        tracker.record_vote(addr(1));
        tracker.record_missed(addr(1));
        // p=0 v=1 m=1, total=2, base=(0+1)/4=0.25, penalty=0.5*1/2=0.25 -> 0.0
        assert_eq!(tracker.score(&addr(1)), 0.0);
    }

    #[test]
    fn decay_halves_counters() {
        let mut tracker = PerformanceTracker::new();
        for _ in 0..4 {
            tracker.record_vote(addr(1));
        }
        tracker.decay();
        assert_eq!(tracker.counters.get(&addr(1)).unwrap().votes, 2);
    }

    #[test]
    fn score_is_always_in_unit_range() {
        let mut tracker = PerformanceTracker::new();
        for _ in 0..10 {
            tracker.record_missed(addr(1));
        }
        let s = tracker.score(&addr(1));
        assert!((0.0..=1.0).contains(&s));
    }
}
