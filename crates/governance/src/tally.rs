//! Tally engine
//!
//! Aggregates positions into per-stance counts and an approval signal. The
//! approval rule is supplied as a [`ThresholdPolicy`]; the block veto and the
//! empty-denominator rule are applied by the engine regardless of policy.

use std::fmt::{self, Debug};
use serde::{Deserialize, Serialize};

use crate::types::{Position, Stance, Vocabulary};

/// Decides whether a support count is enough to approve.
///
/// `total` is support + oppose + block; abstentions are never counted. The
/// engine only consults a policy when `total > 0` and there are no blocks.
pub trait ThresholdPolicy: Send + Sync + Debug {
    /// Whether `support` out of `total` counted positions approves
    fn is_met(&self, support: usize, total: usize) -> bool;

    /// Human-readable description, recorded on every tally
    fn describe(&self) -> String;
}

/// More than half of counted positions
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleMajority;

impl ThresholdPolicy for SimpleMajority {
    fn is_met(&self, support: usize, total: usize) -> bool {
        support * 2 > total
    }

    fn describe(&self) -> String {
        "simple majority".to_string()
    }
}

/// At least `numerator / denominator` of counted positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supermajority {
    numerator: u32,
    denominator: u32,
}

impl Supermajority {
    /// Create a supermajority rule. The fraction must lie in (0, 1].
    pub fn new(numerator: u32, denominator: u32) -> Option<Self> {
        if numerator == 0 || denominator == 0 || numerator > denominator {
            return None;
        }
        Some(Self { numerator, denominator })
    }

    /// Two thirds of counted positions
    pub fn two_thirds() -> Self {
        Self { numerator: 2, denominator: 3 }
    }
}

impl ThresholdPolicy for Supermajority {
    fn is_met(&self, support: usize, total: usize) -> bool {
        // Integer cross-multiplication keeps 2/3 exact
        support as u128 * self.denominator as u128 >= total as u128 * self.numerator as u128
    }

    fn describe(&self) -> String {
        format!("supermajority of {}/{}", self.numerator, self.denominator)
    }
}

/// Every counted position supports
#[derive(Debug, Clone, Copy, Default)]
pub struct Unanimous;

impl ThresholdPolicy for Unanimous {
    fn is_met(&self, support: usize, total: usize) -> bool {
        support == total
    }

    fn describe(&self) -> String {
        "unanimous".to_string()
    }
}

/// A fixed number of supporters, regardless of opposition
#[derive(Debug, Clone, Copy)]
pub struct MinimumSupport {
    pub count: usize,
}

impl ThresholdPolicy for MinimumSupport {
    fn is_met(&self, support: usize, _total: usize) -> bool {
        support >= self.count
    }

    fn describe(&self) -> String {
        format!("at least {} in support", self.count)
    }
}

/// Adapts a closure into a policy
pub struct FnPolicy<F> {
    name: String,
    predicate: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(usize, usize) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self { name: name.into(), predicate }
    }
}

impl<F> Debug for FnPolicy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPolicy").field("name", &self.name).finish()
    }
}

impl<F> ThresholdPolicy for FnPolicy<F>
where
    F: Fn(usize, usize) -> bool + Send + Sync,
{
    fn is_met(&self, support: usize, total: usize) -> bool {
        (self.predicate)(support, total)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Aggregate of the positions on one proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub support: usize,
    pub oppose: usize,
    pub abstain: usize,
    pub block: usize,
    /// support + oppose + block
    pub total: usize,
    pub has_blocks: bool,
    /// Never true while `has_blocks` is true
    pub threshold_met: bool,
    /// Description of the policy that produced `threshold_met`
    pub policy: String,
}

impl Tally {
    /// Count for a single stance
    pub fn count(&self, stance: Stance) -> usize {
        match stance {
            Stance::Support => self.support,
            Stance::Oppose => self.oppose,
            Stance::Abstain => self.abstain,
            Stance::Block => self.block,
        }
    }

    /// Fraction of counted positions in support, if any were counted
    pub fn support_ratio(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.support as f64 / self.total as f64)
        }
    }

    /// Counts keyed by their label in the given vocabulary
    pub fn labelled_counts(&self, vocabulary: Vocabulary) -> Vec<(&'static str, usize)> {
        Stance::ALL
            .iter()
            .map(|stance| (stance.label(vocabulary), self.count(*stance)))
            .collect()
    }
}

/// Compute the tally for a set of positions.
///
/// Pure and deterministic. Positions are expected to be unique per member,
/// as the ledger guarantees.
pub fn compute_tally(positions: &[Position], policy: &dyn ThresholdPolicy) -> Tally {
    let count = |stance: Stance| positions.iter().filter(|p| p.stance == stance).count();

    let support = count(Stance::Support);
    let oppose = count(Stance::Oppose);
    let abstain = count(Stance::Abstain);
    let block = count(Stance::Block);

    let total = support + oppose + block;
    let has_blocks = block > 0;
    let threshold_met = !has_blocks && total > 0 && policy.is_met(support, total);

    Tally {
        support,
        oppose,
        abstain,
        block,
        total,
        has_blocks,
        threshold_met,
        policy: policy.describe(),
    }
}
