//! Per-pool state: subjective block scores and the pool record itself.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigUint;

use crate::block::{BlockId, PoolId};
use crate::strategy::Strategy;

/// A pool's subjective record of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    /// Event time at which the pool first processed the block.
    pub sim_clock: f64,
    /// The pool's belief of UTC at first processing:
    /// `floor(simClock + ntpDrift)`.
    pub local_time: i64,
    /// Strategy-adjusted difficulty. `None` until the parent resolves.
    pub diff_score: Option<BigUint>,
    pub cum_diff_score: Option<BigUint>,
    /// Whether the block lies on the pool's current best chain.
    pub is_head_path: bool,
    /// The pool's chaintip at the moment it first processed this block.
    pub chaintip: Option<BlockId>,
}

impl Score {
    /// A tentative score for a block seen for the first time; difficulty
    /// fields resolve once the parent is scorable.
    pub fn tentative(sim_clock: f64, ntp_drift: f64) -> Self {
        Score {
            sim_clock,
            local_time: (sim_clock + ntp_drift).floor() as i64,
            diff_score: None,
            cum_diff_score: None,
            is_head_path: false,
            chaintip: None,
        }
    }

    #[inline]
    pub fn is_scored(&self) -> bool {
        self.cum_diff_score.is_some()
    }
}

/// Insertion-ordered mapping of block ID to [`Score`].
///
/// Metric walks depend on observing scores in first-seen order, so the book
/// keeps a hash index into an append-only entry list.
#[derive(Debug, Clone, Default)]
pub struct ScoreBook {
    index: std::collections::HashMap<BlockId, usize>,
    entries: Vec<(BlockId, Score)>,
}

impl ScoreBook {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: &BlockId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &BlockId) -> Option<&Score> {
        self.index.get(id).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, id: &BlockId) -> Option<&mut Score> {
        self.index.get(id).map(|&i| &mut self.entries[i].1)
    }

    /// Inserts or replaces a score. A replaced entry keeps its original
    /// insertion position.
    pub fn upsert(&mut self, id: BlockId, score: Score) {
        match self.index.get(&id) {
            Some(&i) => self.entries[i].1 = score,
            None => {
                self.index.insert(id.clone(), self.entries.len());
                self.entries.push((id, score));
            }
        }
    }

    /// Scores in insertion (first-seen) order.
    pub fn iter(&self) -> impl Iterator<Item = (&BlockId, &Score)> {
        self.entries.iter().map(|(id, s)| (id, s))
    }
}

/// A mining pool participating in a round.
#[derive(Debug, Clone)]
pub struct Pool {
    pub id: PoolId,
    /// Hash-power percentage; sums to 1 across the round.
    pub hpp: f64,
    /// `hpp * networkHashrate`, hashes per second.
    pub hashrate: f64,
    /// Constant clock offset, sampled once per round from N(0, ntpStdev).
    pub ntp_drift: f64,
    pub chaintip: BlockId,
    /// For selfish pools: the believed public honest tip.
    pub hon_tip: BlockId,
    pub scores: ScoreBook,
    /// Blocks requested from the network but not yet received.
    pub request_ids: BTreeSet<BlockId>,
    /// Received blocks whose ancestor scores are still missing, by height.
    pub unscored: BTreeMap<BlockId, u64>,
    pub strategy: Strategy,
}

impl Pool {
    pub fn is_selfish(&self) -> bool {
        matches!(self.strategy, Strategy::Selfish { .. })
    }
}
