// hpos-consensus/src/selection.rs
//
// Deterministic, stake-weighted proposer selection. Two observers handed
// the same validator set and the same (prev_hash, height, round) derive the
// same proposer — no RNG, no shared mutable seed.

use crate::{validator::ValidatorSet, ConsensusError, ConsensusResult};
use hpos_core::{BlockNumber, Round};
use hpos_crypto::{hash::Hashable, Address, Hash};

/// Derive the verifiable random beacon for a given height/round.
fn beacon(prev_hash: Hash, height: BlockNumber, round: Round) -> Hash {
    let mut bytes = Vec::with_capacity(32 + 8 + 4);
    bytes.extend_from_slice(prev_hash.as_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&round.to_be_bytes());
    bytes.hash()
}

/// Pick the proposer for (prev_hash, height, round) from `set`.
///
/// Sampling is weighted by `weight(v) = stake(v) × (0.7 + 0.3 × performance(v))`
/// using a cryptographic beacon derived from (prev_hash, height, round);
/// ties break by address, lexicographically. When total weight is zero,
/// falls back to round-robin by address.
pub fn select_proposer(
    set: &ValidatorSet,
    prev_hash: Hash,
    height: BlockNumber,
    round: Round,
) -> ConsensusResult<Address> {
    if set.is_empty() {
        return Err(ConsensusError::SelectionError("validator set is empty".into()));
    }

    let mut candidates = set.sorted_by_weight();
    let total_weight: f64 = candidates.iter().map(|v| v.weight()).sum();

    if total_weight <= 0.0 {
        // Round-robin fallback: deterministic index from the beacon.
        candidates.sort_by(|a, b| a.address.cmp(&b.address));
        let b = beacon(prev_hash, height, round);
        let index = (u64::from_be_bytes(b.as_bytes()[..8].try_into().unwrap()) as usize)
            % candidates.len();
        return Ok(candidates[index].address);
    }

    let b = beacon(prev_hash, height, round);
    // Map the first 8 bytes of the beacon onto [0, total_weight) at a fixed
    // resolution so the same beacon always yields the same point.
    let scale = u64::from_be_bytes(b.as_bytes()[..8].try_into().unwrap());
    let point = (scale as f64 / u64::MAX as f64) * total_weight;

    let mut accumulated = 0.0;
    for v in &candidates {
        accumulated += v.weight();
        if point < accumulated {
            return Ok(v.address);
        }
    }
    // Floating point rounding at the boundary: fall back to the last
    // candidate in the (deterministic) sorted order.
    Ok(candidates.last().expect("checked non-empty above").address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Validator;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    #[test]
    fn selection_is_deterministic() {
        let mut set = ValidatorSet::new();
        set.add(Validator::new(addr(1), 1_000, 0));
        set.add(Validator::new(addr(2), 5_000, 0));
        set.add(Validator::new(addr(3), 3_000, 0));

        let prev = Hash::zero();
        let a = select_proposer(&set, prev, 10, 0).unwrap();
        let b = select_proposer(&set, prev, 10, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_rounds_can_select_different_proposers() {
        let mut set = ValidatorSet::new();
        for i in 1..=10u8 {
            set.add(Validator::new(addr(i), 1_000, 0));
        }
        let prev = Hash::zero();
        let selections: std::collections::HashSet<_> = (0..10)
            .map(|round| select_proposer(&set, prev, 1, round).unwrap())
            .collect();
        assert!(selections.len() > 1);
    }

    #[test]
    fn zero_weight_falls_back_to_round_robin() {
        let mut set = ValidatorSet::new();
        // Zero stake validators contribute zero weight regardless of performance.
        set.add(Validator::new(addr(1), 0, 0));
        set.add(Validator::new(addr(2), 0, 0));
        let prev = Hash::zero();
        let proposer = select_proposer(&set, prev, 1, 0).unwrap();
        assert!(set.contains(&proposer));
    }

    #[test]
    fn empty_set_is_rejected() {
        let set = ValidatorSet::new();
        assert!(select_proposer(&set, Hash::zero(), 1, 0).is_err());
    }
}
