//! Chain-health metrics, computed per honest pool by walking its score book
//! in first-seen order, and summarized as mean/stdev across honest pools.

use std::collections::{BTreeMap, HashSet};

use num_traits::ToPrimitive;

use crate::block::{BlockId, BlockTable, PoolId};
use crate::pool::Pool;

/// Reorgs at least this deep count toward `reorgRate`.
const DEEP_REORG: u64 = 10;

/// Metrics for one honest pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolMetrics {
    pub pool: PoolId,
    pub orphan_rate: f64,
    pub reorg_max: f64,
    pub reorg_p99: f64,
    pub reorg_rate: f64,
    pub self_shares: f64,
    pub gamma: f64,
    pub difficulty: f64,
}

impl PoolMetrics {
    /// Metric column names, in output order.
    pub const NAMES: [&'static str; 7] = [
        "orphanRate",
        "reorgMax",
        "reorgP99",
        "reorgRate",
        "selfShares",
        "gamma",
        "difficulty",
    ];

    pub fn values(&self) -> [f64; 7] {
        [
            self.orphan_rate,
            self.reorg_max,
            self.reorg_p99,
            self.reorg_rate,
            self.self_shares,
            self.gamma,
            self.difficulty,
        ]
    }
}

/// Mean and standard deviation of each metric across honest pools. A large
/// stdev flags partition divergence between pools.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Summary {
    pub mean: [f64; 7],
    pub std: [f64; 7],
}

impl Summary {
    pub fn of(per_pool: &[PoolMetrics]) -> Self {
        if per_pool.is_empty() {
            return Summary::default();
        }
        let n = per_pool.len() as f64;
        let mut mean = [0.0; 7];
        for metrics in per_pool {
            for (slot, value) in mean.iter_mut().zip(metrics.values()) {
                *slot += value;
            }
        }
        for slot in mean.iter_mut() {
            *slot /= n;
        }

        let mut std = [0.0; 7];
        for metrics in per_pool {
            for (i, value) in metrics.values().into_iter().enumerate() {
                std[i] += (value - mean[i]).powi(2);
            }
        }
        for slot in std.iter_mut() {
            *slot = (*slot / n).sqrt();
        }

        Summary { mean, std }
    }
}

/// Computes metrics for every honest pool in the round.
pub fn compute(
    pools: &BTreeMap<PoolId, Pool>,
    blocks: &BlockTable,
    root: &BlockId,
) -> (Vec<PoolMetrics>, Summary) {
    let selfish: HashSet<&PoolId> = pools
        .values()
        .filter(|p| p.is_selfish())
        .map(|p| &p.id)
        .collect();
    let selfish_hpp: f64 = pools
        .values()
        .filter(|p| p.is_selfish())
        .map(|p| p.hpp)
        .sum();

    let per_pool: Vec<PoolMetrics> = pools
        .values()
        .filter(|p| !p.is_selfish())
        .map(|pool| pool_metrics(pool, blocks, root, &selfish, selfish_hpp))
        .collect();
    let summary = Summary::of(&per_pool);
    (per_pool, summary)
}

fn pool_metrics(
    pool: &Pool,
    blocks: &BlockTable,
    root: &BlockId,
    selfish: &HashSet<&PoolId>,
    selfish_hpp: f64,
) -> PoolMetrics {
    let is_selfish_block = |id: &BlockId| -> bool {
        blocks
            .get(id)
            .map(|b| selfish.contains(&b.pool))
            .unwrap_or(false)
    };

    let mut canonical = 0u64;
    let mut self_canonical = 0u64;
    let mut orphaned_foreign = 0u64;

    // Reorg depths: runs of abandoned once-head blocks, flushed when the
    // walk returns to the head path.
    let mut reorgs: Vec<u64> = Vec::new();
    let mut depth = 0u64;

    // Gamma contention: adjacent same-height pairs in first-seen order.
    let mut contested = 0u64;
    let mut selfish_first = 0u64;
    let mut previous: Option<(&BlockId, u64)> = None;

    for (id, score) in pool.scores.iter() {
        let block_height = blocks.get(id).map(|b| b.height);

        if score.is_head_path {
            canonical += 1;
            if is_selfish_block(id) {
                self_canonical += 1;
            }
            if depth > 0 {
                reorgs.push(depth);
                depth = 0;
            }
        } else {
            if blocks.get(id).map(|b| &b.pool) != Some(&pool.id) {
                orphaned_foreign += 1;
            }
            if score.chaintip.as_ref() == Some(id) {
                // The pool once believed this block was its head.
                depth += 1;
            }
        }

        if let (Some((prev_id, prev_height)), Some(height)) =
            (previous, block_height)
        {
            if prev_height == height {
                let either_selfish =
                    is_selfish_block(prev_id) || is_selfish_block(id);
                if either_selfish {
                    contested += 1;
                    if is_selfish_block(prev_id) {
                        selfish_first += 1;
                    }
                }
            }
        }
        previous = block_height.map(|h| (id, h));
    }
    if depth > 0 {
        reorgs.push(depth);
    }

    let canonical_span = (canonical.max(1) - 1) as f64;
    let canonical_height = blocks
        .get(&pool.chaintip)
        .map(|tip| tip.height)
        .unwrap_or(0)
        .saturating_sub(blocks.get(root).map(|b| b.height).unwrap_or(0));

    let orphan_rate = if canonical_span > 0.0 {
        orphaned_foreign as f64 / canonical_span
    } else {
        0.0
    };

    reorgs.sort_unstable();
    let reorg_max = reorgs.last().copied().unwrap_or(0) as f64;
    let reorg_p99 = percentile(&reorgs, 0.99);
    let deep = reorgs.iter().filter(|&&d| d >= DEEP_REORG).count() as f64;
    let reorg_rate = if canonical_height > 0 {
        deep / canonical_height as f64
    } else {
        0.0
    };

    let self_shares = if canonical_span > 0.0 {
        self_canonical as f64 / canonical_span - selfish_hpp
    } else {
        -selfish_hpp
    };

    let gamma = if contested > 0 && selfish_hpp < 1.0 {
        (selfish_first as f64 / contested as f64)
            * (pool.hpp / (1.0 - selfish_hpp))
    } else {
        0.0
    };

    let difficulty = blocks
        .get(&pool.chaintip)
        .and_then(|b| b.difficulty.to_f64())
        .unwrap_or(f64::INFINITY);

    PoolMetrics {
        pool: pool.id.clone(),
        orphan_rate,
        reorg_max,
        reorg_p99,
        reorg_rate,
        self_shares,
        gamma,
        difficulty,
    }
}

/// Percentile over sorted depths, by nearest-rank.
fn percentile(sorted: &[u64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1] as f64
}
