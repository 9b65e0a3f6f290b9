//! The generalized selfish family.
//!
//! Three scalars — abandon, claim, retort — derived from the lead geometry
//! and two integer knobs reproduce Eyal-Sirer (`kThresh = 1`), Stubborn
//! (`0`), Very-Stubborn (`-1`) and their retort variants without a
//! state-machine case explosion.

use crate::block::BlockId;
use crate::event::EventKind;

use super::{find_highest_score, AgentError, Outcome, Workspace};

/// Lead geometry at one event, measured against the believed honest tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadState {
    /// Honest blocks above the common ancestor.
    pub hon_length: i64,
    /// Private blocks above the common ancestor.
    pub self_length: i64,
    /// `self_length - hon_length`.
    pub k_new: i64,
    /// Honest height gained by this event (non-zero only on `RecvOther`).
    pub hon_added: i64,
    /// Whether this event is the pool's own find.
    pub own_find: bool,
}

/// The three decision scalars; each drives its action when positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub abandon: i64,
    pub claim: i64,
    pub retort: i64,
}

/// Evaluates the decision equations. The `0'` pivot gets a doubled claim
/// bump: a concurrent own find one ahead of a tied race must publish to
/// collect the fork.
pub fn thresholds(state: LeadState, k_thresh: i8, retort_policy: u8) -> Thresholds {
    let zero_prime_bump =
        if state.self_length > 1 && state.k_new == 1 && state.own_find {
            2
        } else {
            1
        };
    let k = i64::from(k_thresh);
    Thresholds {
        abandon: state.hon_length * (k.min(0) - state.k_new),
        claim: state.hon_length * (k.max(0) - state.k_new + zero_prime_bump),
        retort: (i64::from(retort_policy) * state.hon_added)
            .min(state.hon_added + 1),
    }
}

pub(crate) fn decide(
    ws: &Workspace,
    k_thresh: i8,
    retort_policy: u8,
) -> Result<Outcome, AgentError> {
    let pool = ws.pool;

    // Refresh the believed honest tip from whatever this event delivered.
    let mut hon_tip = pool.hon_tip.clone();
    let mut hon_added: i64 = 0;
    if ws.event.kind == EventKind::RecvOther {
        if let Some(best) = find_highest_score(ws) {
            let best_cum = ws
                .score_of(&best)
                .and_then(|s| s.cum_diff_score.clone())
                .ok_or_else(|| AgentError::ScoreMissing(best.clone()))?;
            let hon_cum = ws
                .score_of(&hon_tip)
                .and_then(|s| s.cum_diff_score.clone())
                .ok_or_else(|| AgentError::ScoreMissing(hon_tip.clone()))?;
            if best_cum > hon_cum {
                let new_height = ws.height_of(&best)?;
                let old_height = ws.height_of(&hon_tip)?;
                hon_added = new_height.saturating_sub(old_height) as i64;
                hon_tip = best;
            }
        }
    }

    let self_tip: BlockId = match ws.own_minted() {
        Some(own) => own.clone(),
        None => pool.chaintip.clone(),
    };

    let ancestor = common_ancestor(ws, &hon_tip, &self_tip)?;

    let ancestor_height = ws.height_of(&ancestor)? as i64;
    let state = LeadState {
        hon_length: ws.height_of(&hon_tip)? as i64 - ancestor_height,
        self_length: ws.height_of(&self_tip)? as i64 - ancestor_height,
        k_new: 0,
        hon_added,
        own_find: ws.event.kind == EventKind::RecvOwn,
    };
    let state = LeadState {
        k_new: state.self_length - state.hon_length,
        ..state
    };
    let t = thresholds(state, k_thresh, retort_policy);

    let mut outcome = Outcome {
        chaintip: pool.chaintip.clone(),
        hon_tip: None,
        timestamp: None,
        broadcast: Vec::new(),
    };

    if ws.event.kind == EventKind::RecvOwn {
        let own = self_tip.clone();
        let local_time = ws
            .score_of(&own)
            .ok_or_else(|| AgentError::ScoreMissing(own.clone()))?
            .local_time;
        outcome.timestamp = Some(local_time);
    }

    if t.abandon > 0 || state.self_length == 0 {
        // The private branch is hopeless (or absent): mine on the honest
        // tip.
        outcome.chaintip = hon_tip.clone();
    } else {
        let private = private_branch(ws, &self_tip)?;
        let publish: &[BlockId] = if t.claim > 0 {
            &private
        } else if t.retort > 0 {
            &private[..private.len().min(t.retort as usize)]
        } else {
            &[]
        };
        outcome.broadcast = publish.to_vec();

        if let Some(tip) = outcome.broadcast.last() {
            let tip_cum = ws
                .score_of(tip)
                .and_then(|s| s.cum_diff_score.clone())
                .ok_or_else(|| AgentError::ScoreMissing(tip.clone()))?;
            let hon_cum = ws
                .score_of(&hon_tip)
                .and_then(|s| s.cum_diff_score.clone())
                .ok_or_else(|| AgentError::ScoreMissing(hon_tip.clone()))?;
            if tip_cum > hon_cum {
                hon_tip = tip.clone();
            }
        }

        if ws.event.kind == EventKind::RecvOwn {
            outcome.chaintip = self_tip;
        }
    }

    if hon_tip != pool.hon_tip {
        outcome.hon_tip = Some(hon_tip);
    }
    Ok(outcome)
}

/// Walks back from the honest tip to the first score on the pool's head
/// path. In the concurrent-find corner where the pool's tip sits at the
/// honest tip's height and the honest tip itself is on the head path, the
/// honest tip's parent is the genuine ancestor.
fn common_ancestor(
    ws: &Workspace,
    hon_tip: &BlockId,
    self_tip: &BlockId,
) -> Result<BlockId, AgentError> {
    let hon_on_head =
        ws.score_of(hon_tip).is_some_and(|s| s.is_head_path);
    if hon_on_head && ws.height_of(self_tip)? == ws.height_of(hon_tip)? {
        return ws
            .blocks
            .prev_of(hon_tip)
            .cloned()
            .ok_or_else(|| AgentError::AncestorUnresolved(hon_tip.clone()));
    }

    let mut cursor = hon_tip.clone();
    loop {
        if ws.score_of(&cursor).is_some_and(|s| s.is_head_path) {
            return Ok(cursor);
        }
        cursor = ws
            .blocks
            .prev_of(&cursor)
            .cloned()
            .ok_or_else(|| AgentError::AncestorUnresolved(cursor.clone()))?;
    }
}

/// The consecutive run of unbroadcast private blocks from the selfish tip
/// down to the first published ancestor, in ascending height order.
fn private_branch(
    ws: &Workspace,
    self_tip: &BlockId,
) -> Result<Vec<BlockId>, AgentError> {
    let mut run = Vec::new();
    let mut cursor = self_tip.clone();
    loop {
        let block = ws
            .blocks
            .get(&cursor)
            .ok_or_else(|| AgentError::BlockMissing(cursor.clone()))?;
        if block.broadcast == Some(true) {
            break;
        }
        run.push(cursor.clone());
        match &block.prev {
            Some(prev) => cursor = prev.clone(),
            None => break,
        }
    }
    run.reverse();
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(
        hon_length: i64,
        self_length: i64,
        hon_added: i64,
        own_find: bool,
    ) -> LeadState {
        LeadState {
            hon_length,
            self_length,
            k_new: self_length - hon_length,
            hon_added,
            own_find,
        }
    }

    #[test]
    fn lead_one_withholds() {
        // First private find: nothing published, nothing abandoned.
        let t = thresholds(state(0, 1, 0, true), 1, 1);
        assert_eq!(t, Thresholds { abandon: 0, claim: 0, retort: 0 });
    }

    #[test]
    fn eyal_sirer_claims_when_caught() {
        // Lead 2, honest finds one: kNew = 1, claim fires and the whole
        // branch is published.
        let t = thresholds(state(1, 2, 1, false), 1, 1);
        assert!(t.claim > 0);
        assert!(t.abandon <= 0);

        // Lead 1 matched by honest: the race is published as well.
        let t = thresholds(state(1, 1, 1, false), 1, 1);
        assert!(t.claim > 0);
    }

    #[test]
    fn eyal_sirer_abandons_when_behind() {
        let t = thresholds(state(2, 1, 1, false), 1, 1);
        assert!(t.abandon > 0);
    }

    #[test]
    fn deep_lead_retorts_by_policy() {
        // Lead 3, honest finds one: claim stays shut, the retort policy
        // decides how much is revealed.
        for (policy, expect) in [(0u8, 0i64), (1, 1), (2, 2)] {
            let t = thresholds(state(1, 3, 1, false), 1, policy);
            assert!(t.claim <= 0);
            assert_eq!(t.retort, expect);
        }
        // The clobber retort is capped at one past the honest gain.
        let t = thresholds(state(2, 5, 2, false), 1, 2);
        assert_eq!(t.retort, 3);
    }

    #[test]
    fn stubborn_withholds_where_eyal_sirer_claims() {
        // kThresh = 0 at kNew = 1: the claim window stays shut and the lead
        // is kept private, where Eyal-Sirer would publish.
        let t = thresholds(state(1, 2, 1, false), 0, 0);
        assert_eq!(t.claim, 0);
        assert!(t.abandon <= 0);
        // Falling behind is not tolerated at kThresh = 0.
        let t = thresholds(state(2, 1, 1, false), 0, 0);
        assert!(t.abandon > 0);
    }

    #[test]
    fn zero_prime_own_find_claims() {
        // State 0': equal-length race, then an own find one ahead. The
        // doubled bump opens the claim window at the very next event.
        let t = thresholds(state(1, 2, 0, true), 0, 0);
        assert!(t.claim > 0);
        // The same geometry reached by a foreign block does not claim.
        let t = thresholds(state(1, 2, 0, false), 0, 0);
        assert!(t.claim <= 0);
    }

    #[test]
    fn zero_honest_length_freezes_all_thresholds() {
        for k in [-1i8, 0, 1] {
            let t = thresholds(state(0, 3, 0, false), k, 2);
            assert_eq!((t.abandon, t.claim), (0, 0));
        }
    }

    #[test]
    fn very_stubborn_tolerates_minus_one() {
        let t = thresholds(state(2, 1, 1, false), -1, 0);
        assert_eq!(t.abandon, 0);
        let t = thresholds(state(3, 1, 1, false), -1, 0);
        assert!(t.abandon > 0);
    }
}
