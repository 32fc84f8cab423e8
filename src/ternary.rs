//! Ternary - balanced three-valued arithmetic and logic
//!
//! A [`Ternary`] is one of `{Neg, Zero, Pos}`, isomorphic to the balanced
//! digits `{-1, 0, +1}` and to the floats `{-1.0, 0.0, +1.0}`.
//!
//! # Layers
//!
//! - **Conversion**: exact integer mapping, thresholded float ingestion
//! - **Arithmetic**: balanced mod-3 addition with carry, sign-product multiplication
//! - **Logic**: Łukasiewicz-style `not`/`and`/`or`/`implies`, modular `xor`
//! - **Aggregation**: majority, weighted vote, consensus, activity energy, Ising energy
//! - **Gates**: Feynman, Toffoli and Fredkin, each its own inverse

use crate::error::{LatticeError, Result};
use rand::Rng;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default float threshold for ingesting continuous signals.
pub const DEFAULT_FLOAT_THRESHOLD: f32 = 0.33;

/// Balanced ternary value.
///
/// Ordering follows the balanced digits: `Neg < Zero < Pos`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(i8)]
pub enum Ternary {
    Neg = -1,
    #[default]
    Zero = 0,
    Pos = 1,
}

impl Ternary {
    /// All three values in ascending order.
    pub const ALL: [Ternary; 3] = [Ternary::Neg, Ternary::Zero, Ternary::Pos];

    // =========================================================================
    // CONVERSION
    // =========================================================================

    /// Balanced integer digit.
    #[inline]
    pub const fn to_balanced(self) -> i8 {
        self as i8
    }

    /// Sign-based conversion from any integer.
    #[inline]
    pub fn from_balanced(value: i64) -> Self {
        match value.signum() {
            -1 => Ternary::Neg,
            0 => Ternary::Zero,
            _ => Ternary::Pos,
        }
    }

    /// Float mapping: `-1.0`, `0.0` or `1.0`.
    #[inline]
    pub fn to_float(self) -> f32 {
        self.to_balanced() as f32
    }

    /// Ingest a continuous signal with the default `±0.33` thresholds.
    #[inline]
    pub fn from_float(value: f32) -> Self {
        Self::from_float_with(value, -DEFAULT_FLOAT_THRESHOLD, DEFAULT_FLOAT_THRESHOLD)
    }

    /// Ingest a continuous signal: `value > high` is `Pos`, `value < low` is `Neg`.
    #[inline]
    pub fn from_float_with(value: f32, low: f32, high: f32) -> Self {
        if value > high {
            Ternary::Pos
        } else if value < low {
            Ternary::Neg
        } else {
            Ternary::Zero
        }
    }

    // =========================================================================
    // SAMPLING
    // =========================================================================

    /// Uniform sample over the three values.
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..3)]
    }

    /// Sample with explicit `Neg` and `Zero` probabilities; `Pos` takes the rest.
    pub fn sample_weighted<R: Rng + ?Sized>(rng: &mut R, p_neg: f32, p_zero: f32) -> Self {
        let r: f32 = rng.gen();
        if r < p_neg {
            Ternary::Neg
        } else if r < p_neg + p_zero {
            Ternary::Zero
        } else {
            Ternary::Pos
        }
    }

    // =========================================================================
    // ARITHMETIC
    // =========================================================================

    /// Balanced addition returning `(sum, carry)`.
    ///
    /// `Pos + Pos = (Neg, Pos)` and `Neg + Neg = (Pos, Neg)`; every other pair
    /// fits in one digit with a `Zero` carry.
    pub fn add_with_carry(self, other: Self) -> (Self, Self) {
        match self.to_balanced() + other.to_balanced() {
            2 => (Ternary::Neg, Ternary::Pos),
            -2 => (Ternary::Pos, Ternary::Neg),
            sum => (Self::from_balanced(sum as i64), Ternary::Zero),
        }
    }

    /// Balanced addition, carry discarded.
    #[inline]
    pub fn add(self, other: Self) -> Self {
        self.add_with_carry(other).0
    }

    /// Balanced subtraction modulo 3.
    #[inline]
    pub fn sub(self, other: Self) -> Self {
        wrap_mod3(self.to_balanced() as i64 - other.to_balanced() as i64)
    }

    /// Sign product; `Zero` absorbs.
    #[inline]
    pub fn mul(self, other: Self) -> Self {
        Self::from_balanced((self.to_balanced() * other.to_balanced()) as i64)
    }

    // =========================================================================
    // LOGIC
    // =========================================================================

    /// Negation.
    #[inline]
    pub fn not(self) -> Self {
        Self::from_balanced(-(self.to_balanced() as i64))
    }

    /// Minimum.
    #[inline]
    pub fn and(self, other: Self) -> Self {
        self.min(other)
    }

    /// Maximum.
    #[inline]
    pub fn or(self, other: Self) -> Self {
        self.max(other)
    }

    /// Modular exclusive-or: `xor(a, a) = Zero` and `xor(a, Zero) = a`.
    #[inline]
    pub fn xor(self, other: Self) -> Self {
        self.sub(other)
    }

    /// Łukasiewicz implication `min(1, 1 - a + b)`.
    #[inline]
    pub fn implies(self, other: Self) -> Self {
        let v = 1 - self.to_balanced() as i64 + other.to_balanced() as i64;
        Self::from_balanced(v.min(1))
    }
}

impl TryFrom<i64> for Ternary {
    type Error = LatticeError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(Ternary::Neg),
            0 => Ok(Ternary::Zero),
            1 => Ok(Ternary::Pos),
            other => Err(LatticeError::InvalidTernary(other)),
        }
    }
}

impl TryFrom<i8> for Ternary {
    type Error = LatticeError;

    fn try_from(value: i8) -> Result<Self> {
        Ternary::try_from(value as i64)
    }
}

impl From<Ternary> for i8 {
    fn from(t: Ternary) -> Self {
        t.to_balanced()
    }
}

impl fmt::Display for Ternary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Ternary::Neg => '-',
            Ternary::Zero => '0',
            Ternary::Pos => '+',
        };
        write!(f, "{c}")
    }
}

/// Reduce an integer into the balanced digit set modulo 3.
#[inline]
pub fn wrap_mod3(value: i64) -> Ternary {
    match (value + 1).rem_euclid(3) - 1 {
        -1 => Ternary::Neg,
        0 => Ternary::Zero,
        _ => Ternary::Pos,
    }
}

// =============================================================================
// NEIGHBORHOOD AGGREGATION
// =============================================================================

/// Plurality vote. Ties (including the empty set) resolve to `Zero`.
pub fn majority(states: &[Ternary]) -> Ternary {
    let mut counts = [0usize; 3];
    for s in states {
        counts[(s.to_balanced() + 1) as usize] += 1;
    }
    let best = *counts.iter().max().unwrap_or(&0);
    let winners: Vec<usize> = (0..3).filter(|&i| counts[i] == best).collect();
    if best == 0 || winners.len() != 1 {
        return Ternary::Zero;
    }
    Ternary::ALL[winners[0]]
}

/// Sign of the balanced sum.
pub fn weighted_vote(states: &[Ternary]) -> Ternary {
    let sum: i64 = states.iter().map(|s| s.to_balanced() as i64).sum();
    Ternary::from_balanced(sum)
}

/// True when every state is identical (vacuously true when empty).
pub fn consensus(states: &[Ternary]) -> bool {
    states.windows(2).all(|w| w[0] == w[1])
}

/// Number of non-`Zero` states.
pub fn energy(states: &[Ternary]) -> usize {
    states.iter().filter(|&&s| s != Ternary::Zero).count()
}

/// Ising energy `-J * sum(center * neighbor) - h * center`.
pub fn ising_energy(center: Ternary, neighbors: &[Ternary], coupling: f32, bias: f32) -> f32 {
    let c = center.to_float();
    let interaction: f32 = neighbors.iter().map(|n| c * n.to_float()).sum();
    -coupling * interaction - bias * c
}

// =============================================================================
// REVERSIBLE GATES
// =============================================================================

/// Controlled modular negation. Control passes through; target becomes
/// `control ⊖ target`. Applying twice restores the target.
#[inline]
pub fn feynman(control: Ternary, target: Ternary) -> (Ternary, Ternary) {
    (control, control.xor(target))
}

/// Target is negated iff both controls are `Pos`.
#[inline]
pub fn toffoli(c1: Ternary, c2: Ternary, target: Ternary) -> (Ternary, Ternary, Ternary) {
    if c1 == Ternary::Pos && c2 == Ternary::Pos {
        (c1, c2, target.not())
    } else {
        (c1, c2, target)
    }
}

/// Targets are swapped iff control is `Pos`.
#[inline]
pub fn fredkin(control: Ternary, t1: Ternary, t2: Ternary) -> (Ternary, Ternary, Ternary) {
    if control == Ternary::Pos {
        (control, t2, t1)
    } else {
        (control, t1, t2)
    }
}
