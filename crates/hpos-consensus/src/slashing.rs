// hpos-consensus/src/slashing.rs
//
// The consensus core only records Byzantine evidence and exposes a policy
// shape for how severe an offense is; it does not touch stake. Concrete
// slash execution (removing stake, routing the slashed amount) is the
// genesis/reward loop's job, which consumes `SlashingEvidence` from here.

use crate::messages::EquivocationEvidence;
use hpos_core::BasisPoints;
use hpos_crypto::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlashingCondition {
    /// Two signed votes of the same kind for the same (height, round).
    Equivocation,
    /// Stake fell below the minimum and was not replenished before removal.
    Exhaustion,
}

impl SlashingCondition {
    /// Base penalty rate in basis points; applied to the validator's stake.
    pub fn base_penalty_bps(&self) -> BasisPoints {
        match self {
            SlashingCondition::Equivocation => 500, // 5%
            SlashingCondition::Exhaustion => 10_000, // remaining stake is forfeit
        }
    }
}

/// A recorded offense, awaiting execution by the reward loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashingEvidence {
    pub validator: Address,
    pub condition: SlashingCondition,
    pub evidence: Option<EquivocationEvidence>,
}

/// Accumulates evidence as the state machine observes it. Read by the
/// reward loop once per epoch; does not mutate the validator set itself.
#[derive(Debug, Clone, Default)]
pub struct EvidenceLog {
    entries: Vec<SlashingEvidence>,
}

impl EvidenceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_equivocation(&mut self, evidence: EquivocationEvidence) {
        self.entries.push(SlashingEvidence {
            validator: evidence.validator,
            condition: SlashingCondition::Equivocation,
            evidence: Some(evidence),
        });
    }

    pub fn record_exhaustion(&mut self, validator: Address) {
        self.entries.push(SlashingEvidence {
            validator,
            condition: SlashingCondition::Exhaustion,
            evidence: None,
        });
    }

    pub fn drain(&mut self) -> Vec<SlashingEvidence> {
        std::mem::take(&mut self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
