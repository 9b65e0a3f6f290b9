//! The unified pool agent: a pure decision function over an event, a pool's
//! own state, and the shared block table.
//!
//! One agent covers the honest baseline, score-adjusted honest variants, and
//! the whole selfish family; strategy configuration is a tagged variant, and
//! the selfish behaviors collapse into two integer knobs (see
//! [`selfish::thresholds`]).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::block::{BlockId, BlockTable};
use crate::event::{Event, EventKind};
use crate::pool::{Pool, Score, ScoreBook};

pub mod honest;
pub mod scoring;
pub mod selfish;

pub use scoring::ScoringRule;

/// Strategy configuration for one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entryPoint", rename_all = "lowercase")]
pub enum Strategy {
    Honest {
        #[serde(default)]
        scoring: Vec<ScoringRule>,
    },
    #[serde(rename_all = "camelCase")]
    Selfish {
        /// Claim/abandon threshold: 1 Eyal-Sirer, 0 Stubborn, -1
        /// Very-Stubborn.
        k_thresh: i8,
        /// 0 silent, 1 equal-fork, 2 clobber.
        retort_policy: u8,
        #[serde(default)]
        scoring: Vec<ScoringRule>,
    },
}

impl Strategy {
    pub fn scoring(&self) -> &[ScoringRule] {
        match self {
            Strategy::Honest { scoring } => scoring,
            Strategy::Selfish { scoring, .. } => scoring,
        }
    }

    pub fn is_honest(&self) -> bool {
        matches!(self, Strategy::Honest { .. })
    }
}

/// What an agent asks the engine to change. Every field is optional; `None`
/// (or empty) means "no change".
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub chaintip: Option<BlockId>,
    pub hon_tip: Option<BlockId>,
    /// Header timestamp for the block minted by this event.
    pub timestamp: Option<i64>,
    /// New or updated scores, in the order the agent touched them.
    pub scores: Vec<(BlockId, Score)>,
    pub broadcast_ids: Vec<BlockId>,
    pub request_ids: Vec<BlockId>,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("block {0} is referenced but missing from the block table")]
    BlockMissing(BlockId),
    #[error("no score exists for block {0} where one is required")]
    ScoreMissing(BlockId),
    #[error("pool chaintip {0} has no resolved score")]
    ChaintipUnscored(BlockId),
    #[error("walk from {0} fell off the block graph before reaching the head path")]
    AncestorUnresolved(BlockId),
}

/// Scratch state for one agent invocation: the read-only inputs plus a
/// copy-on-write score overlay. All mutation lands in the overlay; the
/// caller's state is never touched.
pub(crate) struct Workspace<'a> {
    pub event: &'a Event,
    pub pool: &'a Pool,
    pub blocks: &'a BlockTable,
    fresh: ScoreBook,
    created: Vec<BlockId>,
    scored_now: Vec<BlockId>,
}

impl<'a> Workspace<'a> {
    fn new(event: &'a Event, pool: &'a Pool, blocks: &'a BlockTable) -> Self {
        Workspace {
            event,
            pool,
            blocks,
            fresh: ScoreBook::new(),
            created: Vec::new(),
            scored_now: Vec::new(),
        }
    }

    /// The score of `id` as this invocation currently sees it: the overlay
    /// first, the pool's book second.
    pub fn score_of(&self, id: &BlockId) -> Option<&Score> {
        self.fresh.get(id).or_else(|| self.pool.scores.get(id))
    }

    /// Mutable handle on `id`'s score in the overlay, copying the pool's
    /// entry in on first touch.
    fn overlay_mut(&mut self, id: &BlockId) -> Result<&mut Score, AgentError> {
        if !self.fresh.contains(id) {
            let existing = self
                .pool
                .scores
                .get(id)
                .cloned()
                .ok_or_else(|| AgentError::ScoreMissing(id.clone()))?;
            self.fresh.upsert(id.clone(), existing);
        }
        Ok(self.fresh.get_mut(id).expect("entry just ensured"))
    }

    fn create_tentative(&mut self, id: BlockId) {
        let score =
            Score::tentative(self.event.sim_clock, self.pool.ntp_drift);
        self.created.push(id.clone());
        self.fresh.upsert(id, score);
    }

    /// Height of a block, which must exist in the table.
    pub fn height_of(&self, id: &BlockId) -> Result<u64, AgentError> {
        self.blocks
            .get(id)
            .map(|b| b.height)
            .ok_or_else(|| AgentError::BlockMissing(id.clone()))
    }

    /// The pool's own newly minted block, on `RecvOwn` events.
    pub fn own_minted(&self) -> Option<&BlockId> {
        match self.event.kind {
            EventKind::RecvOwn => self.event.last_new_id(),
            _ => None,
        }
    }
}

/// Runs the pool's strategy over one event. Pure with respect to its
/// arguments: all state changes travel through the returned [`Decision`].
pub fn decide(
    event: &Event,
    pool: &Pool,
    blocks: &BlockTable,
) -> Result<Decision, AgentError> {
    // An event with nothing to deliver, or whose tip the pool has already
    // scored, is a no-op. The latter makes repeated invocation idempotent.
    let Some(new_tip) = event.last_new_id() else {
        return Ok(Decision::default());
    };
    if pool.scores.get(new_tip).is_some_and(Score::is_scored) {
        return Ok(Decision::default());
    }

    let mut ws = Workspace::new(event, pool, blocks);
    let mut decision = Decision::default();

    resolve_branch(&mut ws, &mut decision)?;
    score_dangling_chaintips(&mut ws)?;

    let outcome = match &pool.strategy {
        Strategy::Honest { .. } => honest::decide(&ws)?,
        Strategy::Selfish {
            k_thresh,
            retort_policy,
            ..
        } => selfish::decide(&ws, *k_thresh, *retort_policy)?,
    };

    propagate_head_path(&mut ws, &outcome.chaintip)?;

    decision.scores = ws.fresh.iter().map(|(id, s)| (id.clone(), s.clone())).collect();
    decision.chaintip =
        (outcome.chaintip != pool.chaintip).then_some(outcome.chaintip);
    decision.hon_tip = outcome.hon_tip;
    decision.timestamp = outcome.timestamp;
    decision.broadcast_ids = outcome.broadcast;
    Ok(decision)
}

/// What a strategy branch decided, before head-path propagation.
pub(crate) struct Outcome {
    pub chaintip: BlockId,
    pub hon_tip: Option<BlockId>,
    pub timestamp: Option<i64>,
    pub broadcast: Vec<BlockId>,
}

/// Walks `prev` from the delivered tip down to the pool's head path,
/// creating tentative scores for first-seen blocks and scoring the branch
/// bottom-up. A missing ancestor stops the walk and becomes a fetch request.
fn resolve_branch(
    ws: &mut Workspace,
    decision: &mut Decision,
) -> Result<(), AgentError> {
    let new_tip = ws.event.last_new_id().expect("checked by caller");

    let mut branch = Vec::new();
    let mut cursor = new_tip.clone();
    loop {
        match ws.score_of(&cursor) {
            Some(s) if s.is_scored() && s.is_head_path => break,
            Some(_) => {}
            None => {
                if ws.event.new_ids.contains(&cursor) {
                    ws.create_tentative(cursor.clone());
                } else {
                    // The pool has never received this block; it cannot
                    // follow prev links past it.
                    decision.request_ids.push(cursor.clone());
                    break;
                }
            }
        }
        branch.push(cursor.clone());
        match ws.blocks.prev_of(&cursor) {
            Some(prev) => cursor = prev.clone(),
            None => break,
        }
    }

    branch.reverse();
    for id in &branch {
        if !try_score(ws, id)? {
            break;
        }
    }
    Ok(())
}

/// Scores `id` if its parent has a resolved score. Returns whether it did.
fn try_score(ws: &mut Workspace, id: &BlockId) -> Result<bool, AgentError> {
    if ws.score_of(id).is_some_and(Score::is_scored) {
        return Ok(true);
    }
    let block = ws
        .blocks
        .get(id)
        .ok_or_else(|| AgentError::BlockMissing(id.clone()))?;
    let Some(prev) = &block.prev else {
        return Ok(false);
    };
    let Some(parent_cum) = ws
        .score_of(prev)
        .and_then(|s| s.cum_diff_score.clone())
    else {
        return Ok(false);
    };

    let local_time = ws
        .score_of(id)
        .ok_or_else(|| AgentError::ScoreMissing(id.clone()))?
        .local_time;
    let adjustment: i64 = ws
        .pool
        .strategy
        .scoring()
        .iter()
        .map(|rule| rule.adjustment(ws.blocks, ws.pool, id, local_time))
        .sum();
    let diff = scoring::apply_adjustment(&block.difficulty, adjustment);
    let cum = &parent_cum + &diff;

    let entry = ws.overlay_mut(id)?;
    entry.diff_score = Some(diff);
    entry.cum_diff_score = Some(cum);
    ws.scored_now.push(id.clone());
    Ok(true)
}

/// Retries the pool's dangling unscored blocks above the delivered tip,
/// breadth-first over heights, as newly resolved parents unlock them.
fn score_dangling_chaintips(ws: &mut Workspace) -> Result<(), AgentError> {
    let new_tip = ws.event.last_new_id().expect("checked by caller");
    let tip_height = ws.height_of(new_tip)?;

    let mut pending: Vec<(u64, BlockId)> = ws
        .pool
        .unscored
        .iter()
        .filter(|(id, height)| {
            **height > tip_height
                && !ws.score_of(id).is_some_and(Score::is_scored)
        })
        .map(|(id, height)| (*height, id.clone()))
        .collect();
    pending.sort();

    loop {
        let mut progressed = false;
        for (_, id) in &pending {
            if ws.score_of(id).is_some_and(Score::is_scored) {
                continue;
            }
            if try_score(ws, id)? {
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    Ok(())
}

/// Highest `cumDiffScore` among the blocks scored by this invocation. At
/// equal scores the pool's own freshly minted block wins; otherwise the
/// earlier-scored block is kept.
pub(crate) fn find_highest_score(ws: &Workspace) -> Option<BlockId> {
    let own = ws.own_minted();
    let mut best: Option<&BlockId> = None;
    for id in &ws.scored_now {
        let cum = ws
            .score_of(id)
            .and_then(|s| s.cum_diff_score.as_ref())
            .expect("scored_now entries are scored");
        match best {
            None => best = Some(id),
            Some(current) => {
                let current_cum = ws
                    .score_of(current)
                    .and_then(|s| s.cum_diff_score.as_ref())
                    .expect("scored_now entries are scored");
                if cum > current_cum
                    || (cum == current_cum && own == Some(id))
                {
                    best = Some(id);
                }
            }
        }
    }
    best.cloned()
}

/// Marks the chosen chain's scores as head path back to the common
/// ancestor; on a reorg, unmarks the abandoned prefix of the old chain.
/// Freshly created scores record the chosen chaintip.
fn propagate_head_path(
    ws: &mut Workspace,
    chosen: &BlockId,
) -> Result<(), AgentError> {
    let old_tip = ws.pool.chaintip.clone();

    if *chosen != old_tip {
        let mut cursor = chosen.clone();
        let ancestor = loop {
            let score = ws
                .score_of(&cursor)
                .ok_or_else(|| AgentError::ScoreMissing(cursor.clone()))?;
            if score.is_head_path {
                break cursor;
            }
            ws.overlay_mut(&cursor)?.is_head_path = true;
            cursor = ws
                .blocks
                .prev_of(&cursor)
                .cloned()
                .ok_or_else(|| AgentError::AncestorUnresolved(cursor.clone()))?;
        };

        if ancestor != old_tip {
            // Reorg: the old chain above the ancestor is abandoned.
            let mut cursor = old_tip;
            while cursor != ancestor {
                ws.overlay_mut(&cursor)?.is_head_path = false;
                cursor = ws
                    .blocks
                    .prev_of(&cursor)
                    .cloned()
                    .ok_or_else(|| {
                        AgentError::AncestorUnresolved(cursor.clone())
                    })?;
            }
        }
    }

    let created: HashSet<BlockId> = ws.created.iter().cloned().collect();
    for id in created {
        if let Some(score) = ws.fresh.get_mut(&id) {
            score.chaintip = Some(chosen.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, HISTORY_POOL};
    use num_bigint::BigUint;
    use std::collections::BTreeMap;

    const DIFF: u64 = 1000;

    fn add_block(
        blocks: &mut BlockTable,
        height: u64,
        pool: &str,
        prev: Option<&BlockId>,
        broadcast: Option<bool>,
    ) -> BlockId {
        let id = BlockId::new(height, pool);
        blocks
            .insert(Block {
                id: id.clone(),
                height,
                pool: pool.into(),
                prev: prev.cloned(),
                sim_clock: height as f64 * 120.0,
                timestamp: Some(height as i64 * 120),
                difficulty: BigUint::from(DIFF),
                cum_difficulty: BigUint::from(DIFF) * (height + 1),
                nxt_difficulty: Some(BigUint::from(DIFF)),
                broadcast,
                historical: prev.is_none(),
            })
            .unwrap();
        id
    }

    fn scored(cum: u64, head: bool, chaintip: &BlockId) -> Score {
        Score {
            sim_clock: 0.0,
            local_time: 0,
            diff_score: Some(BigUint::from(DIFF)),
            cum_diff_score: Some(BigUint::from(cum)),
            is_head_path: head,
            chaintip: Some(chaintip.clone()),
        }
    }

    fn pool_with(
        id: &str,
        chaintip: &BlockId,
        strategy: Strategy,
    ) -> Pool {
        Pool {
            id: id.into(),
            hpp: 0.3,
            hashrate: 1.0,
            ntp_drift: 0.0,
            chaintip: chaintip.clone(),
            hon_tip: chaintip.clone(),
            scores: crate::pool::ScoreBook::new(),
            request_ids: Default::default(),
            unscored: BTreeMap::new(),
            strategy,
        }
    }

    fn honest() -> Strategy {
        Strategy::Honest { scoring: vec![] }
    }

    fn selfish(k_thresh: i8, retort_policy: u8) -> Strategy {
        Strategy::Selfish {
            k_thresh,
            retort_policy,
            scoring: vec![],
        }
    }

    fn recv(kind: EventKind, pool: &str, tip: &BlockId, ids: &[&BlockId]) -> Event {
        Event {
            sim_clock: 500.0,
            pool: pool.into(),
            kind,
            chaintip: tip.clone(),
            new_ids: ids.iter().map(|id| (*id).clone()).collect(),
        }
    }

    /// Root plus a pool whose book holds the root as head.
    fn rooted(strategy: Strategy) -> (BlockTable, Pool, BlockId) {
        let mut blocks = BlockTable::new();
        let root = add_block(&mut blocks, 0, HISTORY_POOL, None, Some(true));
        let mut pool = pool_with("P0", &root, strategy);
        pool.scores.upsert(root.clone(), scored(DIFF, true, &root));
        (blocks, pool, root)
    }

    #[test]
    fn empty_delivery_is_a_noop() {
        let (blocks, pool, root) = rooted(honest());
        let event = recv(EventKind::RecvOther, "P0", &root, &[]);
        let decision = decide(&event, &pool, &blocks).unwrap();
        assert!(decision.scores.is_empty());
        assert!(decision.chaintip.is_none());
    }

    #[test]
    fn already_scored_tip_short_circuits() {
        let (mut blocks, mut pool, root) = rooted(honest());
        let b1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));
        pool.scores.upsert(b1.clone(), scored(2 * DIFF, true, &b1));
        pool.chaintip = b1.clone();

        let event = recv(EventKind::RecvOther, "P0", &root, &[&b1]);
        let decision = decide(&event, &pool, &blocks).unwrap();
        assert!(decision.scores.is_empty());
        assert!(decision.broadcast_ids.is_empty());
        assert!(decision.chaintip.is_none());
    }

    #[test]
    fn honest_adopts_delivered_extension() {
        let (mut blocks, pool, root) = rooted(honest());
        let b1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));

        let event = recv(EventKind::RecvOther, "P0", &root, &[&b1]);
        let decision = decide(&event, &pool, &blocks).unwrap();

        assert_eq!(decision.chaintip, Some(b1.clone()));
        let (_, score) = decision
            .scores
            .iter()
            .find(|(id, _)| id == &b1)
            .expect("b1 scored");
        assert_eq!(score.cum_diff_score, Some(BigUint::from(2 * DIFF)));
        assert!(score.is_head_path);
        assert_eq!(score.chaintip, Some(b1.clone()));
        // Received blocks are not re-broadcast.
        assert!(decision.broadcast_ids.is_empty());
    }

    #[test]
    fn honest_own_find_stamps_and_broadcasts() {
        let (mut blocks, pool, root) = rooted(honest());
        let mine = add_block(&mut blocks, 1, "P0", Some(&root), None);

        let event = recv(EventKind::RecvOwn, "P0", &root, &[&mine]);
        let decision = decide(&event, &pool, &blocks).unwrap();

        assert_eq!(decision.chaintip, Some(mine.clone()));
        assert_eq!(decision.broadcast_ids, vec![mine.clone()]);
        // localTime of the event, drift zero.
        assert_eq!(decision.timestamp, Some(500));
    }

    #[test]
    fn honest_keeps_tip_on_equal_weight() {
        let (mut blocks, mut pool, root) = rooted(honest());
        let a1 = add_block(&mut blocks, 1, "P0", Some(&root), Some(true));
        let b1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));
        pool.scores.upsert(a1.clone(), scored(2 * DIFF, true, &a1));
        pool.chaintip = a1.clone();

        let event = recv(EventKind::RecvOther, "P0", &root, &[&b1]);
        let decision = decide(&event, &pool, &blocks).unwrap();
        // Equal cumulative score: first-seen tip stays.
        assert!(decision.chaintip.is_none());
        let (_, score) =
            decision.scores.iter().find(|(id, _)| id == &b1).unwrap();
        assert!(!score.is_head_path);
    }

    #[test]
    fn reorg_flips_old_chain_off_head_path() {
        let (mut blocks, mut pool, root) = rooted(honest());
        let a1 = add_block(&mut blocks, 1, "P0", Some(&root), Some(true));
        let b1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));
        let b2 = add_block(&mut blocks, 2, "P1", Some(&b1), Some(true));
        pool.scores.upsert(a1.clone(), scored(2 * DIFF, true, &a1));
        pool.chaintip = a1.clone();

        let event = recv(EventKind::RecvOther, "P0", &root, &[&b1, &b2]);
        let decision = decide(&event, &pool, &blocks).unwrap();

        assert_eq!(decision.chaintip, Some(b2.clone()));
        let score_of = |id: &BlockId| {
            decision
                .scores
                .iter()
                .find(|(sid, _)| sid == id)
                .map(|(_, s)| s)
                .unwrap()
        };
        assert!(score_of(&b1).is_head_path);
        assert!(score_of(&b2).is_head_path);
        assert!(!score_of(&a1).is_head_path);
    }

    #[test]
    fn missing_parent_becomes_a_request() {
        let (mut blocks, pool, root) = rooted(honest());
        let b1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));
        let b2 = add_block(&mut blocks, 2, "P1", Some(&b1), Some(true));

        // b2 arrives alone; the pool has never seen b1.
        let event = recv(EventKind::RecvOther, "P0", &root, &[&b2]);
        let decision = decide(&event, &pool, &blocks).unwrap();

        assert_eq!(decision.request_ids, vec![b1.clone()]);
        assert!(decision.chaintip.is_none());
        let (_, score) =
            decision.scores.iter().find(|(id, _)| id == &b2).unwrap();
        assert!(score.cum_diff_score.is_none(), "b2 must stay unscored");
    }

    #[test]
    fn dangling_descendant_scores_after_repair() {
        let (mut blocks, mut pool, root) = rooted(honest());
        let b1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));
        let b2 = add_block(&mut blocks, 2, "P1", Some(&b1), Some(true));

        // The pool holds b2 unscored from an earlier delivery.
        pool.scores
            .upsert(b2.clone(), Score::tentative(400.0, 0.0));
        pool.unscored.insert(b2.clone(), 2);
        pool.request_ids.insert(b1.clone());

        // The requested parent arrives.
        let event = recv(EventKind::RecvOther, "P0", &root, &[&b1]);
        let decision = decide(&event, &pool, &blocks).unwrap();

        let score_of = |id: &BlockId| {
            decision
                .scores
                .iter()
                .find(|(sid, _)| sid == id)
                .map(|(_, s)| s)
                .unwrap()
        };
        assert_eq!(
            score_of(&b1).cum_diff_score,
            Some(BigUint::from(2 * DIFF))
        );
        assert_eq!(
            score_of(&b2).cum_diff_score,
            Some(BigUint::from(3 * DIFF))
        );
        // The rescued descendant wins the tip.
        assert_eq!(decision.chaintip, Some(b2));
    }

    #[test]
    fn invoking_twice_is_idempotent() {
        let (mut blocks, mut pool, root) = rooted(honest());
        let b1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));

        let event = recv(EventKind::RecvOther, "P0", &root, &[&b1]);
        let first = decide(&event, &pool, &blocks).unwrap();
        assert!(!first.scores.is_empty());

        // Apply the scores as the engine would, then repeat.
        for (id, score) in &first.scores {
            pool.scores.upsert(id.clone(), score.clone());
        }
        if let Some(tip) = &first.chaintip {
            pool.chaintip = tip.clone();
        }
        let second = decide(&event, &pool, &blocks).unwrap();
        assert!(second.scores.is_empty());
        assert!(second.chaintip.is_none());
    }

    #[test]
    fn selfish_withholds_its_first_find() {
        let (mut blocks, pool, root) = rooted(selfish(1, 1));
        let mine = add_block(&mut blocks, 1, "P0", Some(&root), None);

        let event = recv(EventKind::RecvOwn, "P0", &root, &[&mine]);
        let decision = decide(&event, &pool, &blocks).unwrap();

        assert_eq!(decision.chaintip, Some(mine.clone()));
        assert!(decision.broadcast_ids.is_empty(), "lead stays private");
        assert_eq!(decision.timestamp, Some(500));
        assert!(decision.hon_tip.is_none());
    }

    /// Selfish pool with a private chain of `lead` blocks above the root.
    fn selfish_with_lead(
        strategy: Strategy,
        lead: u64,
    ) -> (BlockTable, Pool, BlockId, Vec<BlockId>) {
        let (mut blocks, mut pool, root) = rooted(strategy);
        let mut prev = root.clone();
        let mut private = Vec::new();
        for h in 1..=lead {
            let id = add_block(&mut blocks, h, "P0", Some(&prev), Some(false));
            pool.scores
                .upsert(id.clone(), scored((h + 1) * DIFF, true, &id));
            private.push(id.clone());
            prev = id;
        }
        pool.chaintip = prev;
        pool.hon_tip = root.clone();
        (blocks, pool, root, private)
    }

    #[test]
    fn selfish_claims_whole_branch_when_caught() {
        let (mut blocks, pool, root, private) =
            selfish_with_lead(selfish(1, 1), 1);
        let h1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));

        let event = recv(EventKind::RecvOther, "P0", &root, &[&h1]);
        let decision = decide(&event, &pool, &blocks).unwrap();

        // kNew = 0: the race is published; the pool keeps mining private.
        assert_eq!(decision.broadcast_ids, private);
        assert_eq!(decision.hon_tip, Some(h1));
        assert!(decision.chaintip.is_none());
    }

    #[test]
    fn selfish_abandons_a_lost_race() {
        let (mut blocks, pool, root, private) =
            selfish_with_lead(selfish(1, 1), 1);
        let h1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));
        let h2 = add_block(&mut blocks, 2, "P1", Some(&h1), Some(true));

        let event = recv(EventKind::RecvOther, "P0", &root, &[&h1, &h2]);
        let decision = decide(&event, &pool, &blocks).unwrap();

        // Two behind: adopt the honest chain and drop the private block.
        assert_eq!(decision.chaintip, Some(h2.clone()));
        let (_, abandoned) = decision
            .scores
            .iter()
            .find(|(id, _)| id == &private[0])
            .expect("old head flipped");
        assert!(!abandoned.is_head_path);
        assert!(decision.broadcast_ids.is_empty());
    }

    #[test]
    fn silent_retort_reveals_nothing_at_deep_lead() {
        let (mut blocks, pool, root, _) =
            selfish_with_lead(selfish(1, 0), 3);
        let h1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));

        let event = recv(EventKind::RecvOther, "P0", &root, &[&h1]);
        let decision = decide(&event, &pool, &blocks).unwrap();
        assert!(decision.broadcast_ids.is_empty());
        assert!(decision.chaintip.is_none());
    }

    #[test]
    fn equal_fork_retort_reveals_one_block() {
        let (mut blocks, pool, root, private) =
            selfish_with_lead(selfish(1, 1), 3);
        let h1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));

        let event = recv(EventKind::RecvOther, "P0", &root, &[&h1]);
        let decision = decide(&event, &pool, &blocks).unwrap();
        assert_eq!(decision.broadcast_ids, vec![private[0].clone()]);
    }

    #[test]
    fn clobber_retort_reveals_one_past_the_honest_gain() {
        let (mut blocks, pool, root, private) =
            selfish_with_lead(selfish(1, 2), 3);
        let h1 = add_block(&mut blocks, 1, "P1", Some(&root), Some(true));

        let event = recv(EventKind::RecvOther, "P0", &root, &[&h1]);
        let decision = decide(&event, &pool, &blocks).unwrap();
        assert_eq!(
            decision.broadcast_ids,
            vec![private[0].clone(), private[1].clone()]
        );
        // Publishing two against one takes the honest-tip belief along.
        assert_eq!(decision.hon_tip, Some(private[1].clone()));
    }
}
