//! Events and the totally-ordered event queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::block::{BlockId, PoolId};

/// What an event asks its pool to do.
///
/// The variant order is the dispatch order at equal clocks: the inverted
/// lexical order of the action tags, so that `RECV_OWN` precedes
/// `RECV_OTHER`, which precedes `HASHER_FIND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    /// A pool receives the block its own hasher found.
    RecvOwn,
    /// A pool receives blocks broadcast (or refetched) from elsewhere.
    RecvOther,
    /// A pool's hasher solves the current template.
    HasherFind,
}

impl EventKind {
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::RecvOwn => "RECV_OWN",
            EventKind::RecvOther => "RECV_OTHER",
            EventKind::HasherFind => "HASHER_FIND",
        }
    }
}

/// A scheduled simulation event.
#[derive(Debug, Clone)]
pub struct Event {
    pub sim_clock: f64,
    pub pool: PoolId,
    pub kind: EventKind,
    /// The chaintip the event was scheduled against (for `HasherFind` and
    /// `RecvOwn`, the mining template).
    pub chaintip: BlockId,
    /// Delivered block IDs, ascending in height. Empty for `HasherFind`.
    pub new_ids: Vec<BlockId>,
}

impl Event {
    pub fn last_new_id(&self) -> Option<&BlockId> {
        self.new_ids.last()
    }
}

/// Heap entry carrying the insertion sequence number that makes the 5-key
/// order total.
#[derive(Debug)]
struct Queued {
    event: Event,
    seq: u64,
}

impl Queued {
    fn key(
        &self,
    ) -> (
        OrderedFloat<f64>,
        &PoolId,
        EventKind,
        &BlockId,
        Option<&BlockId>,
        u64,
    ) {
        (
            OrderedFloat(self.event.sim_clock),
            &self.event.pool,
            self.event.kind,
            &self.event.chaintip,
            self.event.last_new_id(),
            self.seq,
        )
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the std max-heap pops the smallest key first.
        self.key().cmp(&other.key()).reverse()
    }
}

/// Min-heap of events over the 5-key tuple
/// `(simClock, poolId, action, chaintip, lastNewId)` with a monotone
/// sequence number as the final, uniqueness-guaranteeing key.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Queued>,
    seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        debug_assert!(
            event.sim_clock.is_finite() || event.kind == EventKind::HasherFind,
            "only find events may carry an unreachable clock"
        );
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Queued { event, seq });
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|q| q.event)
    }

    pub fn peek_clock(&self) -> Option<f64> {
        self.heap.peek().map(|q| q.event.sim_clock)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Releases backing storage once physical capacity exceeds 3x the
    /// logical length.
    pub fn compact(&mut self) {
        if self.heap.capacity() > 3 * self.heap.len().max(1) {
            self.heap.shrink_to_fit();
        }
    }
}
