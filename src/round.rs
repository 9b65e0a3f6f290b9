//! One simulation round: seeding, bootstrap, the event loop, and metric
//! extraction. Rounds are embarrassingly parallel and share nothing.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::info;
use serde_json::Value;

use crate::block::{Block, BlockId, BlockInsertError, BlockTable, PoolId, HISTORY_POOL};
use crate::config::{BootstrapRow, DataMode, DynamicConfig};
use crate::engine::{Engine, EngineError};
use crate::metrics::{self, PoolMetrics, Summary};
use crate::noise::{NoiseError, NoiseModel};
use crate::output::RunLogs;
use crate::pool::{Pool, Score, ScoreBook};
use crate::strategy::Strategy;

#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    #[error("round {round}: {source}")]
    Engine {
        round: usize,
        #[source]
        source: EngineError,
    },
    #[error("round {round}: noise model rejected parameters: {source}")]
    Noise {
        round: usize,
        #[source]
        source: NoiseError,
    },
    #[error("round {round}: bootstrap table build failed: {source}")]
    Bootstrap {
        round: usize,
        #[source]
        source: BlockInsertError,
    },
    #[error("round {round}: {message}")]
    Invariant { round: usize, message: String },
}

/// Everything one round needs, cloned by value onto its worker.
#[derive(Debug, Clone)]
pub struct RoundSpec {
    pub index: usize,
    pub seed: u64,
    pub sim_depth_secs: f64,
    pub worker_ram_mb: u64,
    pub data_mode: DataMode,
    /// `(id, HPP, strategy)` per pool.
    pub pools: Vec<(PoolId, f64, Strategy)>,
    pub dynamic: DynamicConfig,
    pub bootstrap: Arc<Vec<BootstrapRow>>,
    /// Sweep overrides this round ran under, echoed into the summary.
    pub sweep: Vec<(String, Value)>,
}

/// A dumped block row (`DATA_MODE = full`).
#[derive(Debug, Clone)]
pub struct BlockDump {
    pub id: BlockId,
    pub height: u64,
    pub pool: PoolId,
    pub prev: Option<BlockId>,
    pub sim_clock: f64,
    pub timestamp: Option<i64>,
    pub difficulty: String,
    pub cum_difficulty: String,
    pub nxt_difficulty: Option<String>,
    pub broadcast: Option<bool>,
}

/// A dumped per-pool score row (`DATA_MODE = full`).
#[derive(Debug, Clone)]
pub struct ScoreDump {
    pub pool: PoolId,
    pub block: BlockId,
    pub sim_clock: f64,
    pub local_time: i64,
    pub diff_score: Option<String>,
    pub cum_diff_score: Option<String>,
    pub is_head_path: bool,
    pub chaintip: Option<BlockId>,
}

#[derive(Debug, Clone)]
pub struct RoundResult {
    pub index: usize,
    pub per_pool: Vec<PoolMetrics>,
    pub summary: Summary,
    /// Set when the round stopped early (cancellation or memory cap); the
    /// emitted metrics cover the simulated prefix.
    pub partial: bool,
    pub events: u64,
    pub final_clock: f64,
    pub sweep: Vec<(String, Value)>,
    pub blocks: Vec<BlockDump>,
    pub scores: Vec<ScoreDump>,
}

/// Runs a single round to completion (or cancellation) and extracts its
/// metrics.
pub fn run_round(
    spec: &RoundSpec,
    cancel: Option<&AtomicBool>,
    logs: Arc<RunLogs>,
) -> Result<RoundResult, RoundError> {
    let round = spec.index;
    let engine_err = |source| RoundError::Engine { round, source };

    let (blocks, root) = bootstrap_table(spec)?;

    let mut noise = NoiseModel::new(spec.seed, &spec.dynamic.internet)
        .map_err(|source| RoundError::Noise { round, source })?;

    let root_block = blocks.get(&root).ok_or_else(|| RoundError::Invariant {
        round,
        message: format!("bootstrap root {root} missing after build"),
    })?;

    let mut pools = BTreeMap::new();
    let mut specs = spec.pools.clone();
    specs.sort_by(|a, b| a.0.cmp(&b.0));
    for (id, hpp, strategy) in specs {
        let ntp_drift = noise.ntp_drift();
        let mut scores = ScoreBook::new();
        scores.upsert(
            root.clone(),
            Score {
                sim_clock: 0.0,
                local_time: ntp_drift.floor() as i64,
                diff_score: Some(root_block.difficulty.clone()),
                cum_diff_score: Some(root_block.cum_difficulty.clone()),
                is_head_path: true,
                chaintip: Some(root.clone()),
            },
        );
        let hashrate = hpp * spec.dynamic.network_hashrate;
        pools.insert(
            id.clone(),
            Pool {
                id,
                hpp,
                hashrate,
                ntp_drift,
                chaintip: root.clone(),
                hon_tip: root.clone(),
                scores,
                request_ids: Default::default(),
                unscored: Default::default(),
                strategy,
            },
        );
    }

    info!(
        "round {round}: {} pools, depth {:.1}h, seed {}",
        pools.len(),
        spec.sim_depth_secs / 3600.0,
        spec.seed
    );

    let mut engine = Engine::new(
        blocks,
        pools,
        root.clone(),
        noise,
        spec.dynamic.difficulty.clone(),
        spec.sim_depth_secs,
        logs,
        round,
    )
    .map_err(engine_err)?;
    engine.seed().map_err(engine_err)?;
    let stats = engine
        .run(cancel, spec.worker_ram_mb)
        .map_err(engine_err)?;

    if let Some(abort) = stats.aborted {
        log::warn!(
            "round {round} stopped early ({abort:?}) at t={:.1}; emitting partial metrics",
            stats.final_clock
        );
    }

    let (per_pool, summary) =
        metrics::compute(&engine.pools, &engine.blocks, &engine.root);

    let (blocks_dump, scores_dump) = if spec.data_mode >= DataMode::Full {
        dump(&engine)
    } else {
        (Vec::new(), Vec::new())
    };

    info!(
        "round {round}: done, {} events, final clock {:.1}s",
        stats.events, stats.final_clock
    );

    Ok(RoundResult {
        index: round,
        per_pool,
        summary,
        partial: stats.aborted.is_some(),
        events: stats.events,
        final_clock: stats.final_clock,
        sweep: spec.sweep.clone(),
        blocks: blocks_dump,
        scores: scores_dump,
    })
}

/// Builds the block table from the bootstrap history. Timestamps are rebased
/// so the last historical row sits at second zero; difficulty arithmetic
/// only consumes timestamp differences, so the shift is behavior-preserving
/// and keeps header time continuous with the simulation clock.
fn bootstrap_table(
    spec: &RoundSpec,
) -> Result<(BlockTable, BlockId), RoundError> {
    let round = spec.index;
    let rows = &spec.bootstrap;
    let last = rows.last().ok_or_else(|| RoundError::Invariant {
        round,
        message: "empty bootstrap history".into(),
    })?;
    let rebase = last.timestamp;

    let mut table = BlockTable::new();
    let mut prev: Option<BlockId> = None;
    for row in rows.iter() {
        let id = BlockId::new(row.height, HISTORY_POOL);
        table
            .insert(Block {
                id: id.clone(),
                height: row.height,
                pool: HISTORY_POOL.into(),
                prev: prev.take(),
                sim_clock: (row.timestamp - rebase) as f64,
                timestamp: Some(row.timestamp - rebase),
                difficulty: row.difficulty.clone(),
                cum_difficulty: row.cum_difficulty.clone(),
                nxt_difficulty: None,
                broadcast: Some(true),
                historical: true,
            })
            .map_err(|source| RoundError::Bootstrap { round, source })?;
        prev = Some(id);
    }

    let root = BlockId::new(last.height, HISTORY_POOL);
    Ok((table, root))
}

/// Extracts full-data dumps: every simulated block (history excluded) and
/// every per-pool score.
fn dump(engine: &Engine) -> (Vec<BlockDump>, Vec<ScoreDump>) {
    let blocks = engine
        .blocks
        .iter()
        .filter(|b| !b.historical)
        .map(|b| BlockDump {
            id: b.id.clone(),
            height: b.height,
            pool: b.pool.clone(),
            prev: b.prev.clone(),
            sim_clock: b.sim_clock,
            timestamp: b.timestamp,
            difficulty: b.difficulty.to_string(),
            cum_difficulty: b.cum_difficulty.to_string(),
            nxt_difficulty: b.nxt_difficulty.as_ref().map(|d| d.to_string()),
            broadcast: b.broadcast,
        })
        .collect();

    let scores = engine
        .pools
        .values()
        .flat_map(|pool| {
            pool.scores.iter().map(move |(id, s)| ScoreDump {
                pool: pool.id.clone(),
                block: id.clone(),
                sim_clock: s.sim_clock,
                local_time: s.local_time,
                diff_score: s.diff_score.as_ref().map(|d| d.to_string()),
                cum_diff_score:
                    s.cum_diff_score.as_ref().map(|d| d.to_string()),
                is_head_path: s.is_head_path,
                chaintip: s.chaintip.clone(),
            })
        })
        .collect();

    (blocks, scores)
}
