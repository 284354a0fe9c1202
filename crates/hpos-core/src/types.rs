// hpos-core/src/types.rs

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Block number/height
pub type BlockNumber = u64;

/// Consensus round number within a height
pub type Round = u32;

/// Epoch number
pub type Epoch = u64;

/// Timestamp in Unix epoch seconds
pub type Timestamp = u64;

/// Gas price
pub type GasPrice = u64;

/// Gas limit/used
pub type Gas = u64;

/// Basis points, 0..=10000 (i.e. hundredths of a percent)
pub type BasisPoints = u16;

/// Token amount (using BigUint for arbitrary precision)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(BigUint);

impl Amount {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(BigUint::from(0u64))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    pub fn inner(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::from(0u64)
    }

    /// Approximate value as f64. Used only for weight/score arithmetic where
    /// losing precision on amounts beyond 2^53 is acceptable.
    pub fn to_f64_lossy(&self) -> f64 {
        self.0.to_string().parse().unwrap_or(f64::MAX)
    }

    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        Some(Amount(&self.0 + &other.0))
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.0 < other.0 {
            None
        } else {
            Some(Amount(&self.0 - &other.0))
        }
    }

    /// Divide by a small integer divisor, truncating.
    pub fn checked_div_u64(&self, divisor: u64) -> Option<Amount> {
        if divisor == 0 {
            return None;
        }
        Some(Amount(&self.0 / BigUint::from(divisor)))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(&self.0 + &other.0)
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, other: Amount) -> Amount {
        Amount(&self.0 - &other.0)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validator stake amount
pub type StakeAmount = Amount;

/// Clamp an f64 into [0.0, 1.0].
pub fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}
