//! Pluggable scoring adjustments.
//!
//! A scoring function is pure: given the block graph, the pool's state and a
//! block ID it returns an integer delta added to the block's base difficulty
//! score. The honest baseline configures none of them.

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::block::{BlockId, BlockTable};
use crate::pool::Pool;

/// One configured scoring adjustment. Rules are applied in configuration
/// order and their deltas summed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ScoringRule {
    /// Bonus for a block whose parent already has a competing child in the
    /// pool's view; rewards miners that acknowledge contested heights.
    UncleBonus { bonus: i64 },
    /// Penalty for a header timestamp straying from the pool's local receipt
    /// time by more than the tolerance.
    TimePenalty { tolerance_secs: i64, penalty: i64 },
    /// Per-height penalty for blocks forking in below the pool's chaintip;
    /// makes deep replacement branches progressively more expensive.
    DepthPenalty { per_height: i64 },
}

impl ScoringRule {
    pub fn adjustment(
        &self,
        blocks: &BlockTable,
        pool: &Pool,
        id: &BlockId,
        local_time: i64,
    ) -> i64 {
        let Some(block) = blocks.get(id) else { return 0 };

        match self {
            ScoringRule::UncleBonus { bonus } => {
                let has_known_sibling = blocks
                    .at_height(block.height)
                    .iter()
                    .any(|other| {
                        other != id
                            && blocks.prev_of(other) == block.prev.as_ref()
                            && pool.scores.contains(other)
                    });
                if has_known_sibling {
                    *bonus
                } else {
                    0
                }
            }
            ScoringRule::TimePenalty {
                tolerance_secs,
                penalty,
            } => match block.timestamp {
                Some(ts) if (local_time - ts).abs() > *tolerance_secs => {
                    -penalty
                }
                _ => 0,
            },
            ScoringRule::DepthPenalty { per_height } => {
                let tip_height = blocks
                    .get(&pool.chaintip)
                    .map(|b| b.height)
                    .unwrap_or(block.height);
                let depth = (tip_height + 1).saturating_sub(block.height);
                -(per_height * depth as i64)
            }
        }
    }
}

/// Applies a summed adjustment to a base difficulty, saturating at zero:
/// scores are unbounded non-negative integers.
pub fn apply_adjustment(base: &BigUint, adjustment: i64) -> BigUint {
    if adjustment >= 0 {
        base + BigUint::from(adjustment as u64)
    } else {
        let magnitude = BigUint::from(adjustment.unsigned_abs());
        if magnitude >= *base {
            BigUint::zero()
        } else {
            base - magnitude
        }
    }
}
