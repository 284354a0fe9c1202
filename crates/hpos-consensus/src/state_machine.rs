// hpos-consensus/src/state_machine.rs
//
// The round/epoch BFT state machine: Propose -> Prevote -> Precommit per
// round, committing once a hash crosses the stake-weighted super-majority
// threshold, or moving to the next round on timeout. Height advances only
// on commit; epoch rotation (refreshing scores, trimming the validator set,
// decaying counters) happens every `epoch_length` blocks.
//
// `submit` is synchronous and deterministic: feeding two state machines the
// same sequence of messages leaves them in the same state. `on_tick` is
// async because becoming the proposer or finalizing a block requires the
// signing and execution collaborators; it is polled by the node runtime on
// a short interval rather than driven purely by timeout expiry, so that
// newly-reached supermajorities are acted on promptly.

use crate::{
    messages::{Commit, Proposal, Vote, VoteKind},
    performance::PerformanceTracker,
    selection,
    slashing::EvidenceLog,
    validator::ValidatorSet,
    ConsensusError, ConsensusResult,
};
use hpos_core::{
    collaborators::{ExecutionEngine, SignatureProvider},
    Block, BlockNumber, Epoch, Gas, Round, Timestamp,
};
use hpos_crypto::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Target time between blocks; drives the Propose timeout directly and
    /// the Prevote/Precommit timeouts as a fraction of it.
    pub block_time: std::time::Duration,
    pub epoch_length: u64,
    pub max_validators: usize,
    pub min_stake: u64,
    pub gas_limit: Gas,
    /// Proposals/votes for heights more than this far beyond the current
    /// one are dropped outright rather than buffered.
    pub future_height_horizon: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            block_time: std::time::Duration::from_secs(2),
            epoch_length: 100,
            max_validators: 100,
            min_stake: 1_000,
            gas_limit: 10_000_000,
            future_height_horizon: 8,
        }
    }
}

impl ConsensusConfig {
    fn propose_timeout_secs(&self) -> u64 {
        self.block_time.as_secs().max(1)
    }

    fn prevote_timeout_secs(&self) -> u64 {
        (self.block_time.as_secs() / 2).max(1)
    }

    fn precommit_timeout_secs(&self) -> u64 {
        (self.block_time.as_secs() / 2).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Propose,
    Prevote,
    Precommit,
}

/// Outcome of handing a message to `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Duplicate,
    Invalid(String),
}

/// A consensus-class wire message, as handed to `submit` or emitted by
/// `on_tick` for the caller to broadcast.
#[derive(Debug, Clone)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Vote(Vote),
    Commit(Commit),
}

/// A point-in-time snapshot, safe to call from any task without blocking
/// consensus progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub height: BlockNumber,
    pub round: Round,
    pub epoch: Epoch,
    pub step: Step,
    pub active_validators: usize,
    pub total_stake: u64,
    pub local_performance_score: f64,
}

/// `ceil(2 * total_stake / 3) + 1`, computed in u128 to avoid overflow.
fn super_majority_threshold(total_stake: u64) -> u64 {
    let numerator = 2u128 * total_stake as u128;
    let ceil = (numerator + 2) / 3;
    (ceil + 1) as u64
}

pub struct ConsensusStateMachine {
    config: ConsensusConfig,
    local_address: Address,
    participates: bool,

    validators: ValidatorSet,
    tracker: PerformanceTracker,
    evidence: EvidenceLog,

    execution: Arc<dyn ExecutionEngine>,
    signer: Arc<dyn SignatureProvider>,

    running: bool,
    height: BlockNumber,
    round: Round,
    epoch: Epoch,
    step: Step,
    prev_hash: Hash,
    current_proposer: Option<Address>,
    step_deadline: Timestamp,

    proposal: Option<Proposal>,
    prevotes: HashMap<Address, Vote>,
    precommits: HashMap<Address, Vote>,

    /// Messages for a height beyond the current one, held until that
    /// height becomes current.
    future_buffer: BTreeMap<BlockNumber, Vec<ConsensusMessage>>,
    /// An externally-observed commit for the current height, used to catch
    /// up when this node did not itself reach a local supermajority (e.g.
    /// it joined mid-round).
    pending_external_commit: Option<Commit>,
    /// (height, proposer, collected fees) of the most recently finalized
    /// block, for the node runtime to offer to the reward loop once per
    /// commit — the wire `Commit` itself carries neither field (§6).
    last_committed: Option<(BlockNumber, Address, u64)>,
}

impl ConsensusStateMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConsensusConfig,
        local_address: Address,
        participates: bool,
        genesis_hash: Hash,
        start_height: BlockNumber,
        validators: ValidatorSet,
        tracker: PerformanceTracker,
        execution: Arc<dyn ExecutionEngine>,
        signer: Arc<dyn SignatureProvider>,
    ) -> Self {
        Self {
            config,
            local_address,
            participates,
            validators,
            tracker,
            evidence: EvidenceLog::new(),
            execution,
            signer,
            running: false,
            height: start_height,
            round: 0,
            epoch: 0,
            step: Step::Propose,
            prev_hash: genesis_hash,
            current_proposer: None,
            step_deadline: 0,
            proposal: None,
            prevotes: HashMap::new(),
            precommits: HashMap::new(),
            future_buffer: BTreeMap::new(),
            pending_external_commit: None,
            last_committed: None,
        }
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// (height, proposer, collected fees) of the most recently finalized
    /// block. `None` until the first commit. Consumed once per commit by
    /// the node runtime to drive `RewardLoop::mint_block_reward` and
    /// `apply_fees`.
    pub fn last_committed(&self) -> Option<(BlockNumber, Address, u64)> {
        self.last_committed
    }

    pub fn validators_mut(&mut self) -> &mut ValidatorSet {
        &mut self.validators
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut PerformanceTracker {
        &mut self.tracker
    }

    /// Drain recorded Byzantine evidence, for the reward loop to act on.
    pub fn drain_evidence(&mut self) -> Vec<crate::slashing::SlashingEvidence> {
        self.evidence.drain()
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            height: self.height,
            round: self.round,
            epoch: self.epoch,
            step: self.step,
            active_validators: self.validators.len(),
            total_stake: self.validators.total_stake(),
            local_performance_score: self.tracker.score(&self.local_address),
        }
    }

    /// Begin the round loop at the current height. Idempotent only in the
    /// sense that a second call before `stop()` fails loudly rather than
    /// silently resetting in-flight round state.
    pub fn start(&mut self, now: Timestamp) -> ConsensusResult<()> {
        if self.running {
            return Err(ConsensusError::AlreadyRunning);
        }
        self.running = true;
        self.enter_round(0, now);
        Ok(())
    }

    /// Halt the round loop. Round state (votes, buffered future messages)
    /// is left intact so a subsequent `start` resumes rather than replays.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn enter_round(&mut self, round: Round, now: Timestamp) {
        self.round = round;
        self.step = Step::Propose;
        self.proposal = None;
        self.prevotes.clear();
        self.precommits.clear();
        self.pending_external_commit = None;
        self.step_deadline = now.saturating_add(self.config.propose_timeout_secs());
        self.current_proposer =
            selection::select_proposer(&self.validators, self.prev_hash, self.height, round).ok();
    }

    fn enter_step(&mut self, step: Step, now: Timestamp) {
        self.step = step;
        self.step_deadline = now.saturating_add(match step {
            Step::Propose => self.config.propose_timeout_secs(),
            Step::Prevote => self.config.prevote_timeout_secs(),
            Step::Precommit => self.config.precommit_timeout_secs(),
        });
    }

    fn is_local_proposer(&self) -> bool {
        self.participates && self.current_proposer == Some(self.local_address)
    }

    /// Hand an inbound message to the state machine. Pure and synchronous:
    /// validates membership, signature, height/round window, and vote
    /// uniqueness (recording equivocation evidence rather than applying a
    /// conflicting vote). Does not itself emit this node's own votes; that
    /// happens in `on_tick`.
    pub fn submit(&mut self, message: ConsensusMessage) -> ConsensusResult<SubmitOutcome> {
        if !self.running {
            return Err(ConsensusError::NotRunning);
        }
        match message {
            ConsensusMessage::Proposal(p) => self.submit_proposal(p),
            ConsensusMessage::Vote(v) => self.submit_vote(v),
            ConsensusMessage::Commit(c) => self.submit_commit(c),
        }
    }

    fn height_window(&self, height: BlockNumber) -> HeightWindow {
        if height > self.height.saturating_add(self.config.future_height_horizon) {
            HeightWindow::TooFarAhead
        } else if height > self.height {
            HeightWindow::Future
        } else if height < self.height {
            HeightWindow::Past
        } else {
            HeightWindow::Current
        }
    }

    fn submit_proposal(&mut self, p: Proposal) -> ConsensusResult<SubmitOutcome> {
        match self.height_window(p.height) {
            HeightWindow::TooFarAhead => {
                return Ok(SubmitOutcome::Invalid("height beyond buffering horizon".into()))
            }
            HeightWindow::Future => {
                self.future_buffer
                    .entry(p.height)
                    .or_default()
                    .push(ConsensusMessage::Proposal(p));
                return Ok(SubmitOutcome::Accepted);
            }
            HeightWindow::Past => return Ok(SubmitOutcome::Invalid("stale height".into())),
            HeightWindow::Current => {}
        }
        if p.round != self.round {
            return Ok(SubmitOutcome::Invalid("round mismatch".into()));
        }
        if self.proposal.is_some() {
            return Ok(SubmitOutcome::Duplicate);
        }
        if Some(p.proposer) != self.current_proposer {
            return Ok(SubmitOutcome::Invalid("unexpected proposer for this round".into()));
        }
        let validator = match self.validators.lookup(&p.proposer) {
            Ok(v) => v,
            Err(_) => return Ok(SubmitOutcome::Invalid("unknown proposer".into())),
        };
        let public_key = match &validator.public_key {
            Some(pk) => pk.clone(),
            None => return Ok(SubmitOutcome::Invalid("proposer has no known public key".into())),
        };
        let bytes = Proposal::signing_bytes(p.height, p.round, p.block_hash, p.proposer);
        let ok = p.signature.verify(&bytes, &public_key).unwrap_or(false);
        if !ok {
            self.tracker.record_missed(p.proposer);
            return Ok(SubmitOutcome::Invalid("bad proposal signature".into()));
        }
        self.tracker.record_proposal(p.proposer);
        self.proposal = Some(p);
        Ok(SubmitOutcome::Accepted)
    }

    fn submit_vote(&mut self, v: Vote) -> ConsensusResult<SubmitOutcome> {
        match self.height_window(v.height) {
            HeightWindow::TooFarAhead => {
                return Ok(SubmitOutcome::Invalid("height beyond buffering horizon".into()))
            }
            HeightWindow::Future => {
                self.future_buffer
                    .entry(v.height)
                    .or_default()
                    .push(ConsensusMessage::Vote(v));
                return Ok(SubmitOutcome::Accepted);
            }
            HeightWindow::Past => return Ok(SubmitOutcome::Invalid("stale height".into())),
            HeightWindow::Current => {}
        }
        if v.round != self.round {
            return Ok(SubmitOutcome::Invalid("round mismatch".into()));
        }
        let validator = match self.validators.lookup(&v.validator) {
            Ok(val) => val,
            Err(_) => return Ok(SubmitOutcome::Invalid("unknown validator".into())),
        };
        let public_key = match &validator.public_key {
            Some(pk) => pk.clone(),
            None => return Ok(SubmitOutcome::Invalid("validator has no known public key".into())),
        };
        let bytes = Vote::signing_bytes(v.height, v.round, v.block_hash, v.validator, v.kind);
        let ok = v.signature.verify(&bytes, &public_key).unwrap_or(false);
        if !ok {
            self.tracker.record_missed(v.validator);
            return Ok(SubmitOutcome::Invalid("bad vote signature".into()));
        }

        let table = match v.kind {
            VoteKind::Prevote => &mut self.prevotes,
            VoteKind::Precommit => &mut self.precommits,
        };
        if let Some(existing) = table.get(&v.validator) {
            if existing.block_hash != v.block_hash {
                let evidence = crate::messages::EquivocationEvidence {
                    height: v.height,
                    round: v.round,
                    validator: v.validator,
                    kind: v.kind,
                    first: existing.clone(),
                    second: v,
                };
                self.evidence.record_equivocation(evidence);
                return Ok(SubmitOutcome::Invalid("conflicting vote (equivocation)".into()));
            }
            return Ok(SubmitOutcome::Duplicate);
        }
        table.insert(v.validator, v.clone());
        self.tracker.record_vote(v.validator);
        Ok(SubmitOutcome::Accepted)
    }

    fn submit_commit(&mut self, c: Commit) -> ConsensusResult<SubmitOutcome> {
        if c.height < self.height {
            return Ok(SubmitOutcome::Invalid("stale commit".into()));
        }
        if c.height > self.height.saturating_add(self.config.future_height_horizon) {
            return Ok(SubmitOutcome::Invalid("height beyond buffering horizon".into()));
        }
        let stake: u64 = c
            .signatures
            .iter()
            .filter_map(|(addr, _)| self.validators.lookup(addr).ok().map(|v| v.stake))
            .sum();
        let threshold = super_majority_threshold(self.validators.total_stake());
        if stake < threshold {
            return Ok(SubmitOutcome::Invalid("insufficient stake weight".into()));
        }
        if c.height == self.height {
            self.pending_external_commit = Some(c);
        }
        Ok(SubmitOutcome::Accepted)
    }

    fn weighted_support(&self, votes: &HashMap<Address, Vote>) -> HashMap<Option<Hash>, u64> {
        let mut tally: HashMap<Option<Hash>, u64> = HashMap::new();
        for vote in votes.values() {
            if let Ok(validator) = self.validators.lookup(&vote.validator) {
                *tally.entry(vote.block_hash).or_insert(0) += validator.stake;
            }
        }
        tally
    }

    /// The non-nil hash, if any, whose combined voting stake has crossed
    /// the super-majority threshold.
    fn supermajority_hash(&self, votes: &HashMap<Address, Vote>) -> Option<Hash> {
        let threshold = super_majority_threshold(self.validators.total_stake());
        self.weighted_support(votes)
            .into_iter()
            .filter_map(|(hash, stake)| hash.map(|h| (h, stake)))
            .find(|(_, stake)| *stake >= threshold)
            .map(|(hash, _)| hash)
    }

    fn build_block(&self, proposer: Address, timestamp: Timestamp, txs: Vec<u8>, state_root: Hash, receipts_root: Hash) -> Block {
        Block::new(
            self.height,
            self.prev_hash,
            proposer,
            state_root,
            receipts_root,
            txs,
            self.config.gas_limit,
            timestamp,
        )
    }

    async fn propose(&mut self, now: Timestamp) -> ConsensusResult<Option<Proposal>> {
        let (txs, state_root, receipts_root) = self.execution.collect_pending(self.config.gas_limit).await;
        let block = self.build_block(self.local_address, now, txs, state_root, receipts_root);
        let block_hash = block.hash();
        let bytes = Proposal::signing_bytes(self.height, self.round, block_hash, self.local_address);
        let signature = self.signer.sign(&bytes).await;
        let proposal = Proposal {
            height: self.height,
            round: self.round,
            block_hash,
            proposer: self.local_address,
            timestamp: now,
            signature,
        };
        self.tracker.record_proposal(self.local_address);
        self.proposal = Some(proposal.clone());
        Ok(Some(proposal))
    }

    async fn cast_vote(&self, block_hash: Option<Hash>, kind: VoteKind) -> Vote {
        let bytes = Vote::signing_bytes(self.height, self.round, block_hash, self.local_address, kind);
        let signature = self.signer.sign(&bytes).await;
        Vote {
            height: self.height,
            round: self.round,
            block_hash,
            validator: self.local_address,
            kind,
            signature,
        }
    }

    fn record_own_vote(&mut self, vote: Vote) {
        let table = match vote.kind {
            VoteKind::Prevote => &mut self.prevotes,
            VoteKind::Precommit => &mut self.precommits,
        };
        table.insert(vote.validator, vote.clone());
        self.tracker.record_vote(vote.validator);
    }

    async fn finalize(&mut self, hash: Hash) -> ConsensusResult<Commit> {
        let proposer = self
            .proposal
            .as_ref()
            .map(|p| p.proposer)
            .unwrap_or(self.local_address);
        let timestamp = self.proposal.as_ref().map(|p| p.timestamp).unwrap_or(0);
        let (txs, state_root, receipts_root) = self.execution.collect_pending(self.config.gas_limit).await;
        let block = self.build_block(proposer, timestamp, txs, state_root, receipts_root);

        let fees = match self.execution.apply_block(&block).await {
            Some(fees) => fees,
            None => {
                return Err(ConsensusError::ExecutionError(
                    "execution engine rejected the committed block".into(),
                ));
            }
        };

        let signatures: Vec<(Address, hpos_crypto::Signature)> = self
            .precommits
            .values()
            .filter(|v| v.block_hash == Some(hash))
            .map(|v| (v.validator, v.signature.clone()))
            .collect();

        self.last_committed = Some((self.height, proposer, fees));

        Ok(Commit {
            height: self.height,
            block_hash: hash,
            signatures,
        })
    }

    async fn advance_height(&mut self, new_tip: Hash, now: Timestamp) {
        self.prev_hash = new_tip;
        self.height += 1;

        if self.height % self.config.epoch_length == 0 {
            self.rotate_epoch();
        }

        let buffered = self.future_buffer.remove(&self.height).unwrap_or_default();
        self.enter_round(0, now);
        for message in buffered {
            let _ = self.submit(message);
        }
    }

    fn rotate_epoch(&mut self) {
        self.tracker.apply_to(&mut self.validators);
        self.validators.retain_top(self.config.max_validators);
        let below_minimum: Vec<Address> = self
            .validators
            .sorted_by_weight()
            .into_iter()
            .filter(|v| v.stake < self.config.min_stake)
            .map(|v| v.address)
            .collect();
        for address in below_minimum {
            self.validators.remove(&address);
            self.evidence.record_exhaustion(address);
        }
        self.tracker.decay();
        self.epoch += 1;
        tracing::info!(epoch = self.epoch, height = self.height, "epoch rotation");
    }

    fn advance_round(&mut self, now: Timestamp) {
        self.enter_round(self.round + 1, now);
    }

    /// Advance the state machine: propose if it is this node's turn, cast
    /// votes once the corresponding condition is met, finalize on
    /// supermajority precommit, or move to the next round on timeout.
    /// Returns messages the caller should broadcast.
    pub async fn on_tick(&mut self, now: Timestamp) -> ConsensusResult<Vec<ConsensusMessage>> {
        if !self.running {
            return Ok(Vec::new());
        }
        let mut outbound = Vec::new();

        if let Some(commit) = self.pending_external_commit.take() {
            if commit.height == self.height {
                let new_tip = commit.block_hash;
                self.advance_height(new_tip, now).await;
                return Ok(outbound);
            }
        }

        match self.step {
            Step::Propose => {
                if self.proposal.is_none() && self.is_local_proposer() {
                    if let Some(p) = self.propose(now).await? {
                        outbound.push(ConsensusMessage::Proposal(p));
                    }
                }
                if self.proposal.is_some() {
                    let hash = self.proposal.as_ref().map(|p| p.block_hash);
                    if self.participates {
                        let vote = self.cast_vote(hash, VoteKind::Prevote).await;
                        outbound.push(ConsensusMessage::Vote(vote.clone()));
                        self.record_own_vote(vote);
                    }
                    self.enter_step(Step::Prevote, now);
                } else if now >= self.step_deadline {
                    if let Some(proposer) = self.current_proposer {
                        self.tracker.record_missed(proposer);
                    }
                    if self.participates {
                        let vote = self.cast_vote(None, VoteKind::Prevote).await;
                        outbound.push(ConsensusMessage::Vote(vote.clone()));
                        self.record_own_vote(vote);
                    }
                    self.enter_step(Step::Prevote, now);
                }
            }
            Step::Prevote => {
                if let Some(hash) = self.supermajority_hash(&self.prevotes) {
                    if self.participates {
                        let vote = self.cast_vote(Some(hash), VoteKind::Precommit).await;
                        outbound.push(ConsensusMessage::Vote(vote.clone()));
                        self.record_own_vote(vote);
                    }
                    self.enter_step(Step::Precommit, now);
                } else if now >= self.step_deadline {
                    if self.participates {
                        let vote = self.cast_vote(None, VoteKind::Precommit).await;
                        outbound.push(ConsensusMessage::Vote(vote.clone()));
                        self.record_own_vote(vote);
                    }
                    self.enter_step(Step::Precommit, now);
                }
            }
            Step::Precommit => {
                if let Some(hash) = self.supermajority_hash(&self.precommits) {
                    match self.finalize(hash).await {
                        Ok(commit) => {
                            outbound.push(ConsensusMessage::Commit(commit));
                            self.advance_height(hash, now).await;
                        }
                        Err(ConsensusError::ExecutionError(reason)) => {
                            tracing::warn!(height = self.height, reason, "execution rejected block, advancing round");
                            if let Some(proposer) = self.current_proposer {
                                self.tracker.record_missed(proposer);
                            }
                            self.advance_round(now);
                        }
                        Err(e) => return Err(e),
                    }
                } else if now >= self.step_deadline {
                    if let Some(proposer) = self.current_proposer {
                        self.tracker.record_missed(proposer);
                    }
                    self.advance_round(now);
                }
            }
        }

        Ok(outbound)
    }
}

enum HeightWindow {
    Past,
    Current,
    Future,
    TooFarAhead,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Validator;
    use hpos_core::collaborators::NullExecutionEngine;
    use hpos_crypto::{KeyPair, SignatureScheme};
    use std::sync::Arc;

    struct LocalSigner {
        address: Address,
        keypair: KeyPair,
    }

    #[async_trait::async_trait]
    impl SignatureProvider for LocalSigner {
        fn address(&self) -> Address {
            self.address
        }

        async fn sign(&self, payload: &[u8]) -> hpos_crypto::Signature {
            self.keypair.sign(payload).expect("signing test payload")
        }

        fn verify(&self, address: &Address, payload: &[u8], signature: &hpos_crypto::Signature) -> bool {
            if *address != self.address {
                return false;
            }
            signature.verify(payload, self.keypair.public_key()).unwrap_or(false)
        }
    }

    fn validator_with_key(byte: u8, stake: u64) -> (Validator, KeyPair) {
        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let address = Address::new([byte; 20]);
        let mut validator = Validator::new(address, stake, 0);
        validator.public_key = Some(keypair.public_key().clone());
        (validator, keypair)
    }

    /// Builds a state machine for `local_index`'s validator and returns the
    /// remaining validators' keypairs (by address) so tests can sign
    /// messages on their behalf. `KeyPair` holds zeroize-on-drop secret
    /// material and is intentionally not `Clone`.
    fn harness(validators: Vec<(Validator, KeyPair)>, local_index: usize) -> (ConsensusStateMachine, HashMap<Address, KeyPair>) {
        let mut set = ValidatorSet::new();
        let mut keys: HashMap<Address, KeyPair> = HashMap::new();
        for (v, k) in validators {
            set.add(v.clone());
            keys.insert(v.address, k);
        }
        let local_address = set.sorted_by_weight()[local_index].address;
        let local_keypair = keys.remove(&local_address).unwrap();
        let signer = Arc::new(LocalSigner {
            address: local_address,
            keypair: local_keypair,
        });
        let sm = ConsensusStateMachine::new(
            ConsensusConfig {
                block_time: std::time::Duration::from_secs(2),
                epoch_length: 4,
                max_validators: 10,
                min_stake: 1,
                gas_limit: 10_000_000,
                future_height_horizon: 8,
            },
            local_address,
            true,
            Hash::zero(),
            1,
            set,
            PerformanceTracker::new(),
            Arc::new(NullExecutionEngine),
            signer,
        );
        (sm, keys)
    }

    #[test]
    fn start_twice_fails() {
        let (mut sm, _keys) = harness(vec![validator_with_key(1, 1_000)], 0);
        sm.start(0).unwrap();
        assert!(matches!(sm.start(0), Err(ConsensusError::AlreadyRunning)));
    }

    #[test]
    fn submit_before_start_is_rejected() {
        let (mut sm, _keys) = harness(vec![validator_with_key(1, 1_000)], 0);
        let vote = Vote {
            height: 1,
            round: 0,
            block_hash: None,
            validator: Address::new([1u8; 20]),
            kind: VoteKind::Prevote,
            signature: hpos_crypto::Signature::new(SignatureScheme::Ed25519, vec![0; 64]),
        };
        assert!(matches!(sm.submit(ConsensusMessage::Vote(vote)), Err(ConsensusError::NotRunning)));
    }

    #[tokio::test]
    async fn single_validator_commits_every_round() {
        let (mut sm, _keys) = harness(vec![validator_with_key(1, 1_000)], 0);
        sm.start(0).unwrap();
        // Propose -> Prevote -> Precommit -> Commit, all in one tick since
        // a lone validator always has the supermajority of itself.
        let mut now = 0u64;
        let mut committed = false;
        for _ in 0..5 {
            let out = sm.on_tick(now).await.unwrap();
            if out.iter().any(|m| matches!(m, ConsensusMessage::Commit(_))) {
                committed = true;
                break;
            }
            now += 1;
        }
        assert!(committed);
        assert_eq!(sm.status().height, 2);
        let (height, proposer, fees) = sm.last_committed().expect("a commit should record last_committed");
        assert_eq!(height, 1);
        assert_eq!(proposer, sm.local_address);
        assert_eq!(fees, 0); // NullExecutionEngine reports no fees
    }

    #[test]
    fn duplicate_votes_are_reported_as_duplicate() {
        let (mut sm, keys) = harness(
            vec![validator_with_key(1, 1_000), validator_with_key(2, 1_000)],
            0,
        );
        sm.start(0).unwrap();
        let other_addr = sm.validators().sorted_by_weight()[1].address;
        let other_key = keys.get(&other_addr).expect("other validator keypair");
        let bytes = Vote::signing_bytes(sm.status().height, 0, None, other_addr, VoteKind::Prevote);
        let sig = other_key.sign(&bytes).unwrap();
        let vote = Vote {
            height: sm.status().height,
            round: 0,
            block_hash: None,
            validator: other_addr,
            kind: VoteKind::Prevote,
            signature: sig,
        };
        let first = sm.submit(ConsensusMessage::Vote(vote.clone())).unwrap();
        assert_eq!(first, SubmitOutcome::Accepted);
        let second = sm.submit(ConsensusMessage::Vote(vote)).unwrap();
        assert_eq!(second, SubmitOutcome::Duplicate);
    }

    #[test]
    fn conflicting_votes_are_recorded_as_equivocation() {
        let (mut sm, keys) = harness(
            vec![validator_with_key(1, 1_000), validator_with_key(2, 1_000)],
            0,
        );
        sm.start(0).unwrap();
        let other_addr = sm.validators().sorted_by_weight()[1].address;
        let other_key = keys.get(&other_addr).expect("other validator keypair");
        let height = sm.status().height;
        let bytes_a = Vote::signing_bytes(height, 0, Some(Hash::zero()), other_addr, VoteKind::Prevote);
        let vote_a = Vote {
            height,
            round: 0,
            block_hash: Some(Hash::zero()),
            validator: other_addr,
            kind: VoteKind::Prevote,
            signature: other_key.sign(&bytes_a).unwrap(),
        };
        let conflicting_hash = hpos_crypto::Hash::from_slice(&[7u8; 32]).unwrap();
        let bytes_b = Vote::signing_bytes(height, 0, Some(conflicting_hash), other_addr, VoteKind::Prevote);
        let vote_b = Vote {
            height,
            round: 0,
            block_hash: Some(conflicting_hash),
            validator: other_addr,
            kind: VoteKind::Prevote,
            signature: other_key.sign(&bytes_b).unwrap(),
        };
        sm.submit(ConsensusMessage::Vote(vote_a)).unwrap();
        let outcome = sm.submit(ConsensusMessage::Vote(vote_b)).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Invalid(_)));
        let evidence = sm.drain_evidence();
        assert_eq!(evidence.len(), 1);
    }

    #[test]
    fn supermajority_threshold_matches_formula() {
        assert_eq!(super_majority_threshold(3), 3); // ceil(2)=2, +1=3
        assert_eq!(super_majority_threshold(10), 8); // ceil(6.66)=7, +1=8
        assert_eq!(super_majority_threshold(0), 1);
    }

    #[test]
    fn future_height_beyond_horizon_is_invalid() {
        let (mut sm, _keys) = harness(vec![validator_with_key(1, 1_000)], 0);
        sm.start(0).unwrap();
        let vote = Vote {
            height: 1000,
            round: 0,
            block_hash: None,
            validator: Address::new([1u8; 20]),
            kind: VoteKind::Prevote,
            signature: hpos_crypto::Signature::new(SignatureScheme::Ed25519, vec![0; 64]),
        };
        let outcome = sm.submit(ConsensusMessage::Vote(vote)).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Invalid(_)));
    }
}
