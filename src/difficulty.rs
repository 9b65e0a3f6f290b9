//! The cut-trimmed rolling-window difficulty calculation and the per-chaintip
//! window cache.
//!
//! The arithmetic is a port of Monero's `next_difficulty`: take the last
//! `window + lag` records behind a chaintip, drop the `lag` newest, sort the
//! timestamps (alone — cumulative difficulties stay in chain order), trim
//! `cut` outliers from each side, and divide the spanned work by the spanned
//! time with ceiling semantics.

use std::collections::{HashMap, HashSet, VecDeque};

use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};

use crate::block::{BlockId, BlockTable};

/// Difficulty-algorithm parameters (`DIFFICULTY_TARGET_V2`, window, lag,
/// cut).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DifficultyParams {
    pub target_secs: u64,
    pub window: usize,
    pub lag: usize,
    pub cut: usize,
}

impl DifficultyParams {
    /// Maximum number of records a window retains.
    #[inline]
    pub fn span(&self) -> usize {
        self.window + self.lag
    }
}

/// One record of a difficulty window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub timestamp: i64,
    pub cum_difficulty: BigUint,
}

/// Rolling per-chaintip window of `(timestamp, cumulative difficulty)`
/// records, oldest first, length bounded by `window + lag`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DifficultyWindow {
    entries: VecDeque<WindowEntry>,
}

impl DifficultyWindow {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = WindowEntry>,
    {
        DifficultyWindow {
            entries: entries.into_iter().collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a record, dropping the head once the bound is reached.
    pub fn push(&mut self, params: &DifficultyParams, entry: WindowEntry) {
        if self.entries.len() >= params.span() {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Difficulty the next block on this chaintip must carry.
    pub fn next_difficulty(&self, params: &DifficultyParams) -> BigUint {
        let total = self.entries.len();
        let take = total.min(params.span());
        let recent = self.entries.iter().skip(total - take);

        // Drop the `lag` newest records.
        let len = take.saturating_sub(params.lag);
        if len <= 1 {
            return BigUint::one();
        }
        let considered: Vec<&WindowEntry> = recent.take(len).collect();

        let mut timestamps: Vec<i64> =
            considered.iter().map(|e| e.timestamp).collect();
        timestamps.sort_unstable();

        let trimmed = params.window.saturating_sub(2 * params.cut);
        let (cut_begin, cut_end) = if len <= trimmed {
            (0, len)
        } else {
            let begin = (len - trimmed + 1) / 2;
            (begin, begin + trimmed)
        };

        let time_span =
            (timestamps[cut_end - 1] - timestamps[cut_begin]).max(1) as u64;
        let total_work = &considered[cut_end - 1].cum_difficulty
            - &considered[cut_begin].cum_difficulty;

        // Ceiling division, clamped to at least 1.
        let next = (total_work * params.target_secs
            + BigUint::from(time_span - 1))
            / BigUint::from(time_span);
        next.max(BigUint::one())
    }
}

/// Per-chaintip window snapshots. Windows are extended incrementally as
/// blocks are stamped; a miss is reconstructed by walking `prev` links.
#[derive(Debug, Clone, Default)]
pub struct WindowCache {
    windows: HashMap<BlockId, DifficultyWindow>,
}

impl WindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Window behind `tip`, reconstructing it from the block table if it is
    /// not cached. Reconstruction walks `prev` collecting up to
    /// `window + lag` stamped blocks, then reverses to chronological order.
    pub fn window_for(
        &mut self,
        tip: &BlockId,
        blocks: &BlockTable,
        params: &DifficultyParams,
    ) -> &DifficultyWindow {
        if !self.windows.contains_key(tip) {
            let mut collected = Vec::with_capacity(params.span());
            let mut cursor = Some(tip.clone());
            while let Some(id) = cursor {
                if collected.len() >= params.span() {
                    break;
                }
                let Some(block) = blocks.get(&id) else { break };
                let Some(timestamp) = block.timestamp else { break };
                collected.push(WindowEntry {
                    timestamp,
                    cum_difficulty: block.cum_difficulty.clone(),
                });
                cursor = block.prev.clone();
            }
            collected.reverse();
            self.windows
                .insert(tip.clone(), DifficultyWindow::from_entries(collected));
        }
        &self.windows[tip]
    }

    /// Copies the parent's window, appends the child's record, and caches
    /// the result under the child's ID.
    pub fn extend(
        &mut self,
        parent: &BlockId,
        child: &BlockId,
        entry: WindowEntry,
        blocks: &BlockTable,
        params: &DifficultyParams,
    ) {
        let mut window = self.window_for(parent, blocks, params).clone();
        window.push(params, entry);
        self.windows.insert(child.clone(), window);
    }

    pub fn get(&self, tip: &BlockId) -> Option<&DifficultyWindow> {
        self.windows.get(tip)
    }

    /// Drops every window not named in `keep`.
    pub fn prune(&mut self, keep: &HashSet<BlockId>) {
        self.windows.retain(|id, _| keep.contains(id));
    }
}
