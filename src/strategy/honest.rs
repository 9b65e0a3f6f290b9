//! The honest baseline: adopt the highest-scoring chaintip, publish own
//! blocks immediately.

use super::{find_highest_score, AgentError, Outcome, Workspace};

pub(crate) fn decide(ws: &Workspace) -> Result<Outcome, AgentError> {
    let pool = ws.pool;
    let current_cum = ws
        .score_of(&pool.chaintip)
        .and_then(|s| s.cum_diff_score.clone())
        .ok_or_else(|| AgentError::ChaintipUnscored(pool.chaintip.clone()))?;

    let own = ws.own_minted().cloned();

    let mut chosen = pool.chaintip.clone();
    if let Some(best) = find_highest_score(ws) {
        let best_cum = ws
            .score_of(&best)
            .and_then(|s| s.cum_diff_score.clone())
            .ok_or_else(|| AgentError::ScoreMissing(best.clone()))?;
        // A strictly better chain always wins; at equal weight the current
        // tip is kept, except that a pool prefers its own fresh block.
        let prefer_own = own.as_ref() == Some(&best);
        if best_cum > current_cum || (best_cum == current_cum && prefer_own) {
            chosen = best;
        }
    }

    let mut outcome = Outcome {
        chaintip: chosen,
        hon_tip: None,
        timestamp: None,
        broadcast: Vec::new(),
    };

    if let Some(own) = own {
        // Stamp the header with the pool's belief of UTC and announce the
        // block to the network.
        let local_time = ws
            .score_of(&own)
            .ok_or_else(|| AgentError::ScoreMissing(own.clone()))?
            .local_time;
        outcome.timestamp = Some(local_time);
        outcome.broadcast.push(own);
    }

    Ok(outcome)
}
