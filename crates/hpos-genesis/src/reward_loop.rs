// hpos-genesis/src/reward_loop.rs
//
// The periodic economics sweep that runs alongside consensus: mints
// staker rewards, executes slashing evidence handed up from the state
// machine's `EvidenceLog`, tracks the halving schedule for the flat
// per-block reward, and splits a block's collected fees. Shaped after
// tokenomics::rewards::RewardDistributor (a stateful distributor that
// walks a validator set once per cycle and returns a record of what it
// did) generalized to this chain's single reward formula.

use crate::staking::StakingLedger;
use crate::GenesisResult;
use hpos_consensus::{SlashingCondition, SlashingEvidence, ValidatorSet};
use hpos_core::collaborators::StateView;
use hpos_core::{BasisPoints, BlockNumber, ChainConfig};
use hpos_crypto::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the periodic reward tick. Chain-wide economic
/// parameters (reward_base, halving_interval, slash_fraction_bps, fee
/// shares, max_supply) live on `ChainConfig` instead; this struct only
/// carries the scheduling and threshold knobs the loop owns itself.
#[derive(Debug, Clone)]
pub struct RewardLoopConfig {
    pub tick_interval: Duration,
    /// Minimum performance score a staker must carry to earn a reward this tick.
    pub reward_score_threshold: f64,
}

impl Default for RewardLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            reward_score_threshold: 0.9,
        }
    }
}

/// Validator/burn/treasury split of a single block's collected fees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub validator_share: u64,
    pub burn_share: u64,
    pub treasury_share: u64,
}

impl FeeSplit {
    /// Split `total_fees` per `chain`'s basis-point shares. Burn and
    /// treasury are computed from the basis points directly; the
    /// validator share absorbs the rounding remainder so no unit of fee
    /// is lost to integer division.
    pub fn compute(total_fees: u64, chain: &ChainConfig) -> Self {
        let total = total_fees as u128;
        let burn = (total * chain.burn_share_bps as u128 / 10_000) as u64;
        let treasury = (total * chain.treasury_share_bps as u128 / 10_000) as u64;
        let validator = total_fees.saturating_sub(burn).saturating_sub(treasury);
        Self {
            validator_share: validator,
            burn_share: burn,
            treasury_share: treasury,
        }
    }
}

/// What happened during a single reward-loop tick, returned to the caller
/// for logging and telemetry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewardTickSummary {
    pub height: BlockNumber,
    pub rewarded: Vec<(Address, u64)>,
    pub slashed: Vec<(Address, u64)>,
    pub removed: Vec<Address>,
    pub minted: u64,
    pub burned: u64,
}

/// Owns the minted-supply counter and the current per-block reward rate,
/// and walks the staking ledger once per tick to mint rewards and apply
/// slashing evidence. Fee splitting and the flat per-block reward are
/// driven separately, once per committed block, since they depend on
/// facts (the block's proposer and collected fees) the tick itself
/// doesn't have.
pub struct RewardLoop {
    config: RewardLoopConfig,
    minted_supply: u64,
    current_reward_base: u64,
}

impl RewardLoop {
    pub fn new(config: RewardLoopConfig, chain: &ChainConfig) -> Self {
        Self {
            config,
            minted_supply: 0,
            current_reward_base: chain.reward_base,
        }
    }

    pub fn config(&self) -> &RewardLoopConfig {
        &self.config
    }

    pub fn minted_supply(&self) -> u64 {
        self.minted_supply
    }

    pub fn current_reward_base(&self) -> u64 {
        self.current_reward_base
    }

    /// Run one reward tick: execute slashing evidence drained from
    /// consensus, mint rewards for high-performing stakers, and report a
    /// summary. `evidence` is typically `EvidenceLog::drain()`'s output.
    pub async fn tick(
        &mut self,
        height: BlockNumber,
        chain: &ChainConfig,
        ledger: &mut StakingLedger,
        validators: &mut ValidatorSet,
        evidence: Vec<SlashingEvidence>,
        state: &dyn StateView,
    ) -> GenesisResult<RewardTickSummary> {
        let mut summary = RewardTickSummary {
            height,
            ..Default::default()
        };

        if chain.slashing_enabled {
            for item in evidence {
                self.apply_slashing(item, chain, ledger, validators, &mut summary);
            }
        }

        self.mint_rewards(chain, ledger, state, &mut summary).await;

        tracing::info!(
            height,
            rewarded = summary.rewarded.len(),
            slashed = summary.slashed.len(),
            removed = summary.removed.len(),
            minted = summary.minted,
            "reward loop tick complete"
        );

        Ok(summary)
    }

    fn apply_slashing(
        &mut self,
        item: SlashingEvidence,
        chain: &ChainConfig,
        ledger: &mut StakingLedger,
        validators: &mut ValidatorSet,
        summary: &mut RewardTickSummary,
    ) {
        let penalty_bps: BasisPoints = match item.condition {
            SlashingCondition::Equivocation => chain.slash_fraction_bps,
            SlashingCondition::Exhaustion => item.condition.base_penalty_bps(),
        };
        let stake_before = ledger.get(&item.validator).map(|i| i.amount).unwrap_or(0);
        let penalty = (stake_before as u128 * penalty_bps as u128 / 10_000) as u64;
        if penalty == 0 {
            return;
        }
        ledger.record_slash(&item.validator, penalty);
        if let Ok(v) = validators.lookup_mut(&item.validator) {
            v.stake = v.stake.saturating_sub(penalty);
        }
        summary.slashed.push((item.validator, penalty));
        tracing::warn!(
            validator = %item.validator,
            condition = ?item.condition,
            penalty,
            "executed slashing evidence"
        );

        let remaining = ledger.get(&item.validator).map(|i| i.amount).unwrap_or(0);
        if remaining < chain.min_stake {
            validators.remove(&item.validator);
            ledger.remove(&item.validator);
            summary.removed.push(item.validator);
            tracing::warn!(validator = %item.validator, remaining, "validator removed below min_stake");
        }
    }

    async fn mint_rewards(
        &mut self,
        chain: &ChainConfig,
        ledger: &mut StakingLedger,
        state: &dyn StateView,
        summary: &mut RewardTickSummary,
    ) {
        let candidates: Vec<(Address, u64, f64)> = ledger
            .iter()
            .map(|(addr, info)| (*addr, info.amount, info.performance_score))
            .collect();

        for (address, amount, score) in candidates {
            if score <= self.config.reward_score_threshold {
                continue;
            }
            let remaining_budget = chain.max_supply.saturating_sub(self.minted_supply);
            if remaining_budget == 0 {
                break;
            }
            let reward = (amount / 1_000).min(remaining_budget);
            if reward == 0 {
                continue;
            }
            state.credit(&address, reward).await;
            if let Some(info) = ledger.get_mut(&address) {
                info.amount += reward;
            }
            self.minted_supply += reward;
            summary.minted += reward;
            summary.rewarded.push((address, reward));
        }
    }

    /// Halve the flat per-block reward every `halving_interval` blocks,
    /// then mint it to `proposer`, capped by the remaining mint budget.
    /// Called once per committed block, not once per reward tick.
    pub async fn mint_block_reward(
        &mut self,
        height: BlockNumber,
        chain: &ChainConfig,
        proposer: &Address,
        state: &dyn StateView,
    ) -> u64 {
        if chain.halving_interval > 0 && height > 0 && height % chain.halving_interval == 0 {
            self.current_reward_base /= 2;
            tracing::info!(height, new_reward_base = self.current_reward_base, "reward halved");
        }

        let remaining = chain.max_supply.saturating_sub(self.minted_supply);
        let reward = self.current_reward_base.min(remaining);
        if reward > 0 {
            state.credit(proposer, reward).await;
            self.minted_supply += reward;
        }
        reward
    }

    /// Split a block's collected fees and apply them: the validator share
    /// is credited to `payout`, the treasury share to
    /// `chain.treasury_address`. The burn share is reported in the
    /// returned summary but not credited anywhere — there is no token
    /// store to destroy from in the balance model, so burning simply
    /// withholds that portion from circulation.
    pub async fn apply_fees(
        &mut self,
        total_fees: u64,
        payout: &Address,
        chain: &ChainConfig,
        state: &dyn StateView,
        summary: &mut RewardTickSummary,
    ) -> FeeSplit {
        let split = FeeSplit::compute(total_fees, chain);
        state.credit(payout, split.validator_share).await;
        state.credit(&chain.treasury_address, split.treasury_share).await;
        summary.burned += split.burn_share;
        split
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpos_consensus::Validator;
    use hpos_core::collaborators::InMemoryStateView;
    use hpos_crypto::Address;
    use std::time::Duration;

    fn chain_config() -> ChainConfig {
        ChainConfig {
            chain_id: 7,
            block_time: Duration::from_secs(2),
            epoch_length: 100,
            max_validators: 10,
            min_stake: 1_000,
            slashing_enabled: true,
            reward_base: 100,
            halving_interval: 10,
            slash_fraction_bps: 500,
            validator_fee_share_bps: 6_000,
            burn_share_bps: 2_000,
            treasury_share_bps: 2_000,
            max_supply: 1_000_000,
            treasury_address: Address::new([7u8; 20]),
            governance_activation_height: 0,
            max_peers: 50,
            bootstrap_peers: vec![],
            node_listen_addr: "0.0.0.0:30303".parse().unwrap(),
            is_validator: true,
        }
    }

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    #[test]
    fn fee_split_sums_to_total_and_respects_shares() {
        let chain = chain_config();
        let split = FeeSplit::compute(1_000, &chain);
        assert_eq!(split.validator_share + split.burn_share + split.treasury_share, 1_000);
        assert_eq!(split.burn_share, 200);
        assert_eq!(split.treasury_share, 200);
        assert_eq!(split.validator_share, 600);
    }

    #[tokio::test]
    async fn tick_rewards_high_performers_only() {
        let chain = chain_config();
        let mut ledger = StakingLedger::new();
        ledger.deposit(addr(1), 100_000, 0);
        ledger.deposit(addr(2), 100_000, 0);
        ledger.update_score(&addr(1), 0.95);
        ledger.update_score(&addr(2), 0.5);
        let mut validators = ValidatorSet::new();
        validators.add(Validator::new(addr(1), 100_000, 0));
        validators.add(Validator::new(addr(2), 100_000, 0));
        let state = InMemoryStateView::new();
        let mut loop_ = RewardLoop::new(RewardLoopConfig::default(), &chain);

        let summary = loop_
            .tick(1, &chain, &mut ledger, &mut validators, vec![], &state)
            .await
            .unwrap();

        assert_eq!(summary.rewarded.len(), 1);
        assert_eq!(summary.rewarded[0].0, addr(1));
        assert_eq!(state.balance_of(&addr(1)).await, 100);
        assert_eq!(state.balance_of(&addr(2)).await, 0);
    }

    #[tokio::test]
    async fn tick_respects_max_supply_cap() {
        let mut chain = chain_config();
        chain.max_supply = 50;
        let mut ledger = StakingLedger::new();
        ledger.deposit(addr(1), 100_000, 0);
        ledger.update_score(&addr(1), 1.0);
        let mut validators = ValidatorSet::new();
        validators.add(Validator::new(addr(1), 100_000, 0));
        let state = InMemoryStateView::new();
        let mut loop_ = RewardLoop::new(RewardLoopConfig::default(), &chain);

        let summary = loop_
            .tick(1, &chain, &mut ledger, &mut validators, vec![], &state)
            .await
            .unwrap();

        assert_eq!(summary.minted, 50);
        assert_eq!(loop_.minted_supply(), 50);
    }

    #[tokio::test]
    async fn equivocation_evidence_slashes_and_can_remove_validator() {
        let chain = chain_config();
        let mut ledger = StakingLedger::new();
        ledger.deposit(addr(1), 1_100, 0);
        let mut validators = ValidatorSet::new();
        validators.add(Validator::new(addr(1), 1_100, 0));
        let state = InMemoryStateView::new();
        let mut loop_ = RewardLoop::new(RewardLoopConfig::default(), &chain);

        let evidence = SlashingEvidence {
            validator: addr(1),
            condition: SlashingCondition::Equivocation,
            evidence: None,
        };
        let summary = loop_
            .tick(1, &chain, &mut ledger, &mut validators, vec![evidence], &state)
            .await
            .unwrap();

        // 5% of 1,100 = 55, leaving 1,045 which is still >= min_stake (1,000).
        assert_eq!(summary.slashed, vec![(addr(1), 55)]);
        assert!(summary.removed.is_empty());
        assert_eq!(ledger.get(&addr(1)).unwrap().amount, 1_045);
    }

    #[tokio::test]
    async fn exhaustion_evidence_removes_the_validator() {
        let chain = chain_config();
        let mut ledger = StakingLedger::new();
        ledger.deposit(addr(1), 1_100, 0);
        let mut validators = ValidatorSet::new();
        validators.add(Validator::new(addr(1), 1_100, 0));
        let state = InMemoryStateView::new();
        let mut loop_ = RewardLoop::new(RewardLoopConfig::default(), &chain);

        let evidence = SlashingEvidence {
            validator: addr(1),
            condition: SlashingCondition::Exhaustion,
            evidence: None,
        };
        let summary = loop_
            .tick(1, &chain, &mut ledger, &mut validators, vec![evidence], &state)
            .await
            .unwrap();

        assert_eq!(summary.removed, vec![addr(1)]);
        assert!(!validators.contains(&addr(1)));
        assert!(ledger.get(&addr(1)).is_none());
    }

    #[tokio::test]
    async fn block_reward_halves_on_schedule() {
        let chain = chain_config();
        let state = InMemoryStateView::new();
        let mut loop_ = RewardLoop::new(RewardLoopConfig::default(), &chain);

        let r1 = loop_.mint_block_reward(9, &chain, &addr(1), &state).await;
        assert_eq!(r1, 100);
        let r2 = loop_.mint_block_reward(10, &chain, &addr(1), &state).await;
        assert_eq!(r2, 50);
        assert_eq!(loop_.current_reward_base(), 50);
    }

    #[tokio::test]
    async fn apply_fees_credits_validator_and_treasury() {
        let chain = chain_config();
        let state = InMemoryStateView::new();
        let mut loop_ = RewardLoop::new(RewardLoopConfig::default(), &chain);
        let mut summary = RewardTickSummary::default();

        let split = loop_
            .apply_fees(1_000, &addr(1), &chain, &state, &mut summary)
            .await;

        assert_eq!(split.validator_share, 600);
        assert_eq!(state.balance_of(&addr(1)).await, 600);
        assert_eq!(state.balance_of(&chain.treasury_address).await, 200);
        assert_eq!(summary.burned, 200);
    }
}
