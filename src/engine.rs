//! The per-round discrete-event engine: owns the queue, the block table, the
//! difficulty-window cache and the pools, and drives agent decisions.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use num_traits::ToPrimitive;

use crate::block::{Block, BlockId, BlockInsertError, BlockTable, PoolId};
use crate::difficulty::{DifficultyParams, WindowCache, WindowEntry};
use crate::event::{Event, EventKind, EventQueue};
use crate::noise::NoiseModel;
use crate::output::RunLogs;
use crate::pool::Pool;
use crate::strategy::{self, AgentError, Decision};

/// Rough per-record sizes used by the memory guard.
const BLOCK_EST_BYTES: u64 = 512;
const SCORE_EST_BYTES: u64 = 256;
const EVENT_EST_BYTES: u64 = 192;

/// How often (in events) the memory guard re-estimates.
const RAM_CHECK_INTERVAL: u64 = 512;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("agent failure: {0}")]
    Agent(#[from] AgentError),
    #[error("block table rejected a mint: {0}")]
    Block(#[from] BlockInsertError),
    #[error("event addressed unknown pool {0}")]
    UnknownPool(PoolId),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Why a run stopped before draining the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    Cancelled,
    RamCapExceeded,
}

/// Outcome of driving the loop.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub events: u64,
    pub final_clock: f64,
    pub aborted: Option<Abort>,
}

pub struct Engine {
    pub blocks: BlockTable,
    pub pools: BTreeMap<PoolId, Pool>,
    pub root: BlockId,
    queue: EventQueue,
    windows: WindowCache,
    noise: NoiseModel,
    diff: DifficultyParams,
    sim_depth_secs: f64,
    now: f64,
    events: u64,
    logs: Arc<RunLogs>,
    round: usize,
}

impl Engine {
    /// Builds the engine and computes the bootstrap tip's next difficulty,
    /// which seeds every pool's first mining template.
    pub fn new(
        mut blocks: BlockTable,
        pools: BTreeMap<PoolId, Pool>,
        root: BlockId,
        noise: NoiseModel,
        diff: DifficultyParams,
        sim_depth_secs: f64,
        logs: Arc<RunLogs>,
        round: usize,
    ) -> Result<Self, EngineError> {
        let mut windows = WindowCache::new();
        let nxt = windows
            .window_for(&root, &blocks, &diff)
            .next_difficulty(&diff);
        blocks
            .get_mut(&root)
            .ok_or_else(|| {
                EngineError::Invariant(format!("bootstrap root {root} missing"))
            })?
            .nxt_difficulty = Some(nxt);

        Ok(Engine {
            blocks,
            pools,
            root,
            queue: EventQueue::new(),
            windows,
            noise,
            diff,
            sim_depth_secs,
            now: 0.0,
            events: 0,
            logs,
            round,
        })
    }

    /// Schedules every pool's first find event.
    pub fn seed(&mut self) -> Result<(), EngineError> {
        let ids: Vec<PoolId> = self.pools.keys().cloned().collect();
        for id in ids {
            self.simulate_block_time(&id, 0.0)?;
        }
        Ok(())
    }

    /// Drives the loop until the queue drains past `simDepth`, the round is
    /// cancelled, or the memory guard trips.
    pub fn run(
        &mut self,
        cancel: Option<&AtomicBool>,
        ram_cap_mb: u64,
    ) -> Result<RunStats, EngineError> {
        let mut aborted = None;

        while let Some(clock) = self.queue.peek_clock() {
            if clock > self.sim_depth_secs {
                break;
            }
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    aborted = Some(Abort::Cancelled);
                    break;
                }
            }

            let event = self.queue.pop().expect("peeked");
            debug_assert!(
                event.sim_clock >= self.now,
                "event queue popped backwards in time"
            );
            self.now = event.sim_clock;
            self.events += 1;

            self.dispatch(event)?;
            self.prune_windows();
            self.queue.compact();

            if ram_cap_mb > 0
                && self.events % RAM_CHECK_INTERVAL == 0
                && self.estimated_mb() > ram_cap_mb
            {
                aborted = Some(Abort::RamCapExceeded);
                break;
            }
        }

        Ok(RunStats {
            events: self.events,
            final_clock: self.now,
            aborted,
        })
    }

    fn dispatch(&mut self, event: Event) -> Result<(), EngineError> {
        self.logs.info(self.round, || {
            format!(
                "t={:.3} {} pool={} tip={}",
                event.sim_clock,
                event.kind.tag(),
                event.pool,
                event.chaintip
            )
        });

        match event.kind {
            EventKind::HasherFind => self.hasher_finds_block(event),
            EventKind::RecvOwn => match self.generate_block(&event)? {
                Some(minted) => {
                    let mut event = event;
                    event.new_ids = vec![minted];
                    self.invoke_agent(event)
                }
                None => Ok(()),
            },
            EventKind::RecvOther => self.invoke_agent(event),
        }
    }

    /// Whether the template an event was scheduled against is still worth
    /// mining for the pool. A template one block behind is accepted only if
    /// the find landed before a fresh template could have reached the
    /// hasher.
    fn template_current(&mut self, event: &Event) -> Result<bool, EngineError> {
        let (tip, tip_seen) = {
            let pool = self
                .pools
                .get(&event.pool)
                .ok_or_else(|| EngineError::UnknownPool(event.pool.clone()))?;
            let seen = pool.scores.get(&pool.chaintip).map(|s| s.sim_clock);
            (pool.chaintip.clone(), seen)
        };

        if event.chaintip == tip {
            return Ok(true);
        }
        if self.blocks.prev_of(&tip) == Some(&event.chaintip) {
            let seen = tip_seen.ok_or_else(|| {
                EngineError::Invariant(format!(
                    "chaintip {tip} of pool {} has no score",
                    event.pool
                ))
            })?;
            let owd = self.noise.owd_p2h();
            self.logs.stats(self.round, "owd_p2h", owd);
            return Ok(event.sim_clock <= seen + owd);
        }
        Ok(false)
    }

    /// A hasher solved its template: if still relevant, the block reaches
    /// its pool one template-send delay later.
    fn hasher_finds_block(&mut self, event: Event) -> Result<(), EngineError> {
        if !self.template_current(&event)? {
            trace!("stale find discarded: pool={} tip={}", event.pool, event.chaintip);
            return Ok(());
        }
        let owd = self.noise.owd_p2h();
        self.logs.stats(self.round, "owd_p2h", owd);
        self.queue.push(Event {
            sim_clock: event.sim_clock + owd,
            pool: event.pool,
            kind: EventKind::RecvOwn,
            chaintip: event.chaintip,
            new_ids: Vec::new(),
        });
        Ok(())
    }

    /// Validates and mints the block a pool's hasher found. Returns `None`
    /// when the template went stale in flight.
    fn generate_block(
        &mut self,
        event: &Event,
    ) -> Result<Option<BlockId>, EngineError> {
        if !self.template_current(event)? {
            trace!("stale mint discarded: pool={} tip={}", event.pool, event.chaintip);
            return Ok(None);
        }

        let parent = self.blocks.get(&event.chaintip).ok_or_else(|| {
            EngineError::Invariant(format!(
                "mint parent {} missing from table",
                event.chaintip
            ))
        })?;
        let height = parent.height + 1;
        let id = BlockId::new(height, &event.pool);
        if self.blocks.contains(&id) {
            // The pool already mined this height on a sibling template; the
            // race is dead.
            trace!("duplicate-height mint discarded: {id}");
            return Ok(None);
        }

        let difficulty = parent.nxt_difficulty.clone().ok_or_else(|| {
            EngineError::Invariant(format!(
                "mint parent {} lacks nxtDifficulty",
                event.chaintip
            ))
        })?;
        let cum_difficulty = &parent.cum_difficulty + &difficulty;

        self.blocks.insert(Block {
            id: id.clone(),
            height,
            pool: event.pool.clone(),
            prev: Some(event.chaintip.clone()),
            sim_clock: event.sim_clock,
            timestamp: None,
            difficulty,
            cum_difficulty,
            nxt_difficulty: None,
            broadcast: None,
            historical: false,
        })?;

        debug!("minted {id} by {} at t={:.3}", event.pool, event.sim_clock);
        Ok(Some(id))
    }

    fn invoke_agent(&mut self, event: Event) -> Result<(), EngineError> {
        let decision = {
            let pool = self
                .pools
                .get(&event.pool)
                .ok_or_else(|| EngineError::UnknownPool(event.pool.clone()))?;
            strategy::decide(&event, pool, &self.blocks)?
        };
        self.integrate(event, decision)
    }

    /// Applies an agent's decision in the fixed order: fulfilled requests,
    /// timestamp/difficulty, score merge, honest-tip update, chaintip switch
    /// (with a fresh template), ancestor fetches, broadcasts.
    fn integrate(
        &mut self,
        event: Event,
        decision: Decision,
    ) -> Result<(), EngineError> {
        let pool_id = event.pool.clone();

        {
            let pool = self.pool_mut(&pool_id)?;
            for id in &event.new_ids {
                pool.request_ids.remove(id);
            }
        }

        if let Some(timestamp) = decision.timestamp {
            let minted = event.last_new_id().cloned().ok_or_else(|| {
                EngineError::Invariant(
                    "timestamp returned without a delivered block".into(),
                )
            })?;
            let (parent, cum_difficulty) = {
                let block =
                    self.blocks.get_mut(&minted).ok_or_else(|| {
                        EngineError::Invariant(format!(
                            "stamped block {minted} missing from table"
                        ))
                    })?;
                block.timestamp = Some(timestamp);
                let parent = block.prev.clone().ok_or_else(|| {
                    EngineError::Invariant(format!(
                        "stamped block {minted} has no parent"
                    ))
                })?;
                (parent, block.cum_difficulty.clone())
            };
            self.windows.extend(
                &parent,
                &minted,
                WindowEntry {
                    timestamp,
                    cum_difficulty,
                },
                &self.blocks,
                &self.diff,
            );
            let nxt = self
                .windows
                .get(&minted)
                .expect("window just extended")
                .next_difficulty(&self.diff);
            self.blocks
                .get_mut(&minted)
                .expect("stamped above")
                .nxt_difficulty = Some(nxt);
        }

        self.merge_scores(&pool_id, decision.scores)?;

        if let Some(hon_tip) = decision.hon_tip {
            self.pool_mut(&pool_id)?.hon_tip = hon_tip;
        }

        if let Some(tip) = decision.chaintip {
            if !self.blocks.contains(&tip) {
                return Err(EngineError::Invariant(format!(
                    "agent returned chaintip {tip} not in the block table"
                )));
            }
            let changed = {
                let pool = self.pool_mut(&pool_id)?;
                if pool.chaintip != tip {
                    pool.chaintip = tip;
                    true
                } else {
                    false
                }
            };
            if changed {
                self.simulate_block_time(&pool_id, event.sim_clock)?;
            }
        }

        self.schedule_requests(&event, decision.request_ids)?;
        self.broadcast_blocks(&event, decision.broadcast_ids)?;

        // A freshly minted block that was not announced is withheld.
        if event.kind == EventKind::RecvOwn {
            if let Some(minted) = event.last_new_id() {
                if let Some(block) = self.blocks.get_mut(minted) {
                    if block.broadcast != Some(true) {
                        block.broadcast = Some(false);
                    }
                }
            }
        }

        Ok(())
    }

    /// Merges returned scores into the pool's book: existing entries update
    /// in place, new entries land sorted by height, and the unscored set is
    /// kept in sync.
    fn merge_scores(
        &mut self,
        pool_id: &PoolId,
        scores: Vec<(BlockId, crate::pool::Score)>,
    ) -> Result<(), EngineError> {
        if scores.is_empty() {
            return Ok(());
        }
        let blocks = &self.blocks;
        let pool = self
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| EngineError::UnknownPool(pool_id.clone()))?;

        let mut additions = Vec::new();
        for (id, score) in scores {
            if pool.scores.contains(&id) {
                sync_unscored(pool, blocks, &id, &score);
                pool.scores.upsert(id, score);
            } else {
                additions.push((id, score));
            }
        }

        additions.sort_by(|(a, _), (b, _)| {
            let ha = blocks.get(a).map(|blk| blk.height).unwrap_or(0);
            let hb = blocks.get(b).map(|blk| blk.height).unwrap_or(0);
            ha.cmp(&hb).then_with(|| a.cmp(b))
        });
        for (id, score) in additions {
            sync_unscored(pool, blocks, &id, &score);
            pool.scores.upsert(id, score);
        }
        Ok(())
    }

    /// Schedules a refetch of newly requested ancestors. Unlike compact
    /// broadcasts, fetched blocks carry full transmission time.
    fn schedule_requests(
        &mut self,
        event: &Event,
        request_ids: Vec<BlockId>,
    ) -> Result<(), EngineError> {
        let mut fresh = Vec::new();
        {
            let pool = self.pool_mut(&event.pool)?;
            for id in request_ids {
                if pool.request_ids.insert(id.clone()) {
                    fresh.push(id);
                }
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }

        let blocks = &self.blocks;
        fresh.sort_by(|a, b| {
            let ha = blocks.get(a).map(|blk| blk.height).unwrap_or(0);
            let hb = blocks.get(b).map(|blk| blk.height).unwrap_or(0);
            ha.cmp(&hb).then_with(|| a.cmp(b))
        });

        let owd = self.noise.owd_p2p();
        let tx = self.noise.tx_time();
        self.logs.stats(self.round, "owd_p2p", owd);
        self.logs.stats(self.round, "tx_time", tx);
        let delay = 2.0 * owd + tx * fresh.len() as f64;

        self.queue.push(Event {
            sim_clock: event.sim_clock + delay,
            pool: event.pool.clone(),
            kind: EventKind::RecvOther,
            chaintip: event.chaintip.clone(),
            new_ids: fresh,
        });
        Ok(())
    }

    /// Marks blocks public and fans them out to every other pool with an
    /// independent one-way delay each.
    fn broadcast_blocks(
        &mut self,
        event: &Event,
        broadcast_ids: Vec<BlockId>,
    ) -> Result<(), EngineError> {
        if broadcast_ids.is_empty() {
            return Ok(());
        }

        let blocks = &self.blocks;
        let mut ids = broadcast_ids;
        ids.sort_by(|a, b| {
            let ha = blocks.get(a).map(|blk| blk.height).unwrap_or(0);
            let hb = blocks.get(b).map(|blk| blk.height).unwrap_or(0);
            ha.cmp(&hb).then_with(|| a.cmp(b))
        });

        for id in &ids {
            self.blocks
                .get_mut(id)
                .ok_or_else(|| {
                    EngineError::Invariant(format!(
                        "broadcast of unknown block {id}"
                    ))
                })?
                .broadcast = Some(true);
        }

        if self
            .pools
            .get(&event.pool)
            .is_some_and(|p| p.is_selfish())
        {
            self.logs.probe(self.round, || {
                format!(
                    "t={:.3} selfish {} reveals {} block(s) up to {}",
                    event.sim_clock,
                    event.pool,
                    ids.len(),
                    ids.last().expect("non-empty")
                )
            });
        }

        let targets: Vec<PoolId> = self
            .pools
            .keys()
            .filter(|q| **q != event.pool)
            .cloned()
            .collect();
        for target in targets {
            let owd = self.noise.owd_p2p();
            self.logs.stats(self.round, "owd_p2p", owd);
            self.queue.push(Event {
                sim_clock: event.sim_clock + owd,
                pool: target,
                kind: EventKind::RecvOther,
                chaintip: event.chaintip.clone(),
                new_ids: ids.clone(),
            });
        }
        Ok(())
    }

    /// Schedules the pool's next find on its current template: template-send
    /// delay plus an exponential solve time at the tip's difficulty.
    fn simulate_block_time(
        &mut self,
        pool_id: &PoolId,
        now: f64,
    ) -> Result<(), EngineError> {
        let (tip, hashrate) = {
            let pool = self
                .pools
                .get(pool_id)
                .ok_or_else(|| EngineError::UnknownPool(pool_id.clone()))?;
            (pool.chaintip.clone(), pool.hashrate)
        };
        let nxt = self
            .blocks
            .get(&tip)
            .and_then(|b| b.nxt_difficulty.clone())
            .ok_or_else(|| {
                EngineError::Invariant(format!(
                    "chaintip {tip} lacks nxtDifficulty"
                ))
            })?;

        let difficulty = nxt.to_f64().unwrap_or(f64::INFINITY);
        let lambda = if difficulty > 0.0 {
            hashrate / difficulty
        } else {
            f64::INFINITY
        };

        let owd = self.noise.owd_p2h();
        let solve = self.noise.block_time(lambda);
        self.logs.stats(self.round, "owd_p2h", owd);
        self.logs.stats(self.round, "block_time", solve);

        self.queue.push(Event {
            sim_clock: now + owd + solve,
            pool: pool_id.clone(),
            kind: EventKind::HasherFind,
            chaintip: tip,
            new_ids: Vec::new(),
        });
        Ok(())
    }

    /// Drops difficulty windows no pool's tip (or its parent) references.
    fn prune_windows(&mut self) {
        let mut keep = HashSet::new();
        for pool in self.pools.values() {
            keep.insert(pool.chaintip.clone());
            if let Some(prev) = self.blocks.prev_of(&pool.chaintip) {
                keep.insert(prev.clone());
            }
        }
        self.windows.prune(&keep);
    }

    fn pool_mut(&mut self, id: &PoolId) -> Result<&mut Pool, EngineError> {
        self.pools
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownPool(id.clone()))
    }

    fn estimated_mb(&self) -> u64 {
        let scores: u64 = self
            .pools
            .values()
            .map(|p| p.scores.len() as u64)
            .sum();
        let bytes = self.blocks.len() as u64 * BLOCK_EST_BYTES
            + scores * SCORE_EST_BYTES
            + self.queue.len() as u64 * EVENT_EST_BYTES;
        bytes >> 20
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn push_event(&mut self, event: Event) {
        self.queue.push(event);
    }
}

/// Keeps `pool.unscored` consistent with a merged score.
fn sync_unscored(
    pool: &mut Pool,
    blocks: &BlockTable,
    id: &BlockId,
    score: &crate::pool::Score,
) {
    if score.is_scored() {
        pool.unscored.remove(id);
    } else if let Some(block) = blocks.get(id) {
        pool.unscored.insert(id.clone(), block.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::HISTORY_POOL;
    use crate::noise::InternetParams;
    use crate::pool::{Score, ScoreBook};
    use crate::strategy::Strategy;
    use num_bigint::BigUint;

    const DIFF: u64 = 1000;
    const TARGET: u64 = 120;

    fn bootstrap(rows: u64) -> (BlockTable, BlockId) {
        let mut table = BlockTable::new();
        let mut prev: Option<BlockId> = None;
        for i in 0..rows {
            let height = 100 + i;
            let id = BlockId::new(height, HISTORY_POOL);
            table
                .insert(Block {
                    id: id.clone(),
                    height,
                    pool: HISTORY_POOL.into(),
                    prev: prev.take(),
                    sim_clock: (i as f64 - (rows - 1) as f64) * TARGET as f64,
                    timestamp: Some(
                        (i as i64 - (rows - 1) as i64) * TARGET as i64,
                    ),
                    difficulty: BigUint::from(DIFF),
                    cum_difficulty: BigUint::from(DIFF) * (i + 1),
                    nxt_difficulty: None,
                    broadcast: Some(true),
                    historical: true,
                })
                .unwrap();
            prev = Some(id);
        }
        let root = prev.expect("rows > 0");
        (table, root)
    }

    fn test_engine(seed: u64, hpps: &[(&str, f64)]) -> Engine {
        let (blocks, root) = bootstrap(40);
        let root_block = blocks.get(&root).unwrap().clone();

        // Network hashrate tuned so the pure-honest find rate is one block
        // per difficulty target.
        let network_hashrate = DIFF as f64 / TARGET as f64;
        let params = InternetParams {
            ping_ms: 70.0,
            cv: 1.0,
            mbps: 100.0,
            ntp_stdev: 1.0,
            block_size_kb: 150.0,
        };
        let noise = NoiseModel::new(seed, &params).unwrap();

        let mut pools = BTreeMap::new();
        for (id, hpp) in hpps {
            let mut scores = ScoreBook::new();
            scores.upsert(
                root.clone(),
                Score {
                    sim_clock: 0.0,
                    local_time: 0,
                    diff_score: Some(root_block.difficulty.clone()),
                    cum_diff_score: Some(root_block.cum_difficulty.clone()),
                    is_head_path: true,
                    chaintip: Some(root.clone()),
                },
            );
            pools.insert(
                (*id).to_owned(),
                Pool {
                    id: (*id).to_owned(),
                    hpp: *hpp,
                    hashrate: hpp * network_hashrate,
                    ntp_drift: 0.0,
                    chaintip: root.clone(),
                    hon_tip: root.clone(),
                    scores,
                    request_ids: Default::default(),
                    unscored: Default::default(),
                    strategy: Strategy::Honest { scoring: vec![] },
                },
            );
        }

        Engine::new(
            blocks,
            pools,
            root,
            noise,
            DifficultyParams {
                target_secs: TARGET,
                window: 30,
                lag: 5,
                cut: 5,
            },
            24.0 * 3600.0,
            std::sync::Arc::new(RunLogs::disabled()),
            0,
        )
        .unwrap()
    }

    #[test]
    fn seeding_schedules_one_find_per_pool() {
        let mut engine = test_engine(42, &[("P0", 0.6), ("P1", 0.4)]);
        engine.seed().unwrap();
        assert_eq!(engine.queue_len(), 2);
        // The bootstrap tip got its next difficulty during construction.
        let root = engine.root.clone();
        assert!(engine.blocks.get(&root).unwrap().nxt_difficulty.is_some());
    }

    #[test]
    fn stale_template_is_silently_discarded() {
        let mut engine = test_engine(42, &[("P0", 1.0)]);
        let before = engine.blocks.len();
        // A find against a template two blocks behind the tip is dead.
        engine.push_event(Event {
            sim_clock: 1.0,
            pool: "P0".into(),
            kind: EventKind::HasherFind,
            chaintip: BlockId::new(100, HISTORY_POOL),
            new_ids: vec![],
        });
        let stats = engine.run(None, 0).unwrap();
        assert_eq!(stats.events, 1);
        assert_eq!(engine.blocks.len(), before);
    }

    #[test]
    fn honest_run_upholds_chain_invariants() {
        let mut engine = test_engine(42, &[("P0", 0.6), ("P1", 0.4)]);
        engine.seed().unwrap();
        let stats = engine.run(None, 0).unwrap();
        assert!(stats.events > 0);
        assert!(stats.aborted.is_none());

        // Cumulative difficulty identity over every minted block.
        let minted: Vec<&Block> =
            engine.blocks.iter().filter(|b| !b.historical).collect();
        assert!(!minted.is_empty(), "24 simulated hours must mint blocks");
        for block in &minted {
            let parent = engine
                .blocks
                .get(block.prev.as_ref().expect("minted blocks have parents"))
                .expect("parent exists");
            assert_eq!(block.height, parent.height + 1);
            assert_eq!(
                block.cum_difficulty,
                &parent.cum_difficulty + &block.difficulty
            );
            assert!(block.timestamp.is_some());
            assert!(block.nxt_difficulty.is_some());
        }

        // Every pool's head-path scores form exactly the chain from its tip
        // back to the bootstrap root.
        for pool in engine.pools.values() {
            let mut chain = std::collections::HashSet::new();
            let mut cursor = Some(pool.chaintip.clone());
            while let Some(id) = cursor {
                let at_root = id == engine.root;
                chain.insert(id.clone());
                cursor = if at_root {
                    None
                } else {
                    engine.blocks.prev_of(&id).cloned()
                };
            }
            let head_path: std::collections::HashSet<BlockId> = pool
                .scores
                .iter()
                .filter(|(_, s)| s.is_head_path)
                .map(|(id, _)| id.clone())
                .collect();
            assert_eq!(head_path, chain, "pool {}", pool.id);

            // Resolved scores obey the per-pool additivity invariant.
            for (id, score) in pool.scores.iter() {
                let (Some(diff), Some(cum)) =
                    (&score.diff_score, &score.cum_diff_score)
                else {
                    continue;
                };
                if let Some(prev) = engine.blocks.prev_of(id) {
                    if let Some(prev_cum) = pool
                        .scores
                        .get(prev)
                        .and_then(|s| s.cum_diff_score.as_ref())
                    {
                        assert_eq!(cum, &(prev_cum + diff));
                    }
                }
            }
        }
    }

    #[test]
    fn identical_seeds_reproduce_identical_rounds() {
        let run = |seed: u64| {
            let mut engine = test_engine(seed, &[("P0", 0.6), ("P1", 0.4)]);
            engine.seed().unwrap();
            let stats = engine.run(None, 0).unwrap();
            let tips: Vec<(PoolId, BlockId)> = engine
                .pools
                .values()
                .map(|p| (p.id.clone(), p.chaintip.clone()))
                .collect();
            (stats.events, engine.blocks.len(), tips)
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn ram_cap_aborts_with_partial_result() {
        let mut engine = test_engine(42, &[("P0", 0.6), ("P1", 0.4)]);
        engine.seed().unwrap();
        // A 0-block budget cannot be exceeded; 1 MB trips immediately once
        // enough events accumulate.
        let stats = engine.run(None, 1).unwrap();
        if let Some(abort) = stats.aborted {
            assert_eq!(abort, Abort::RamCapExceeded);
            assert!(stats.events > 0);
        }
    }
}
