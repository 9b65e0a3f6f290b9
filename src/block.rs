//! Definitions for blocks and the per-round block table.

use std::collections::HashMap;
use std::fmt;

use num_bigint::BigUint;

/// Identifier of a mining pool. The bootstrap history is attributed to the
/// pseudo-pool `HH0`.
pub type PoolId = String;

/// Pool ID under which historical bootstrap blocks are recorded.
pub const HISTORY_POOL: &str = "HH0";

/// Canonical block identifier, `"<height>_<poolId>"`.
///
/// Comparisons are byte-lexicographic over the rendered string, which is what
/// the event tie-break order calls for.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(height: u64, pool: &str) -> Self {
        BlockId(format!("{height}_{pool}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for BlockId {
    fn from(value: &str) -> Self {
        BlockId(value.to_owned())
    }
}

impl From<String> for BlockId {
    fn from(value: String) -> Self {
        BlockId(value)
    }
}

/// A simulated block. Once `nxt_difficulty` is computed the record is treated
/// as immutable; `timestamp` and `broadcast` are filled in between minting and
/// that point.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub height: u64,
    pub pool: PoolId,
    /// Parent block ID. `None` only for the oldest bootstrap row.
    pub prev: Option<BlockId>,
    /// True creation time in simulation seconds.
    pub sim_clock: f64,
    /// Header time in integer seconds. Stamped by the minting pool's agent;
    /// may deviate from `sim_clock` through NTP drift or manipulation.
    pub timestamp: Option<i64>,
    pub difficulty: BigUint,
    pub cum_difficulty: BigUint,
    /// Difficulty any child of this block must carry. Computed right after the
    /// block is stamped.
    pub nxt_difficulty: Option<BigUint>,
    /// Tri-state publication flag: `None` unset, `Some(false)` withheld,
    /// `Some(true)` public.
    pub broadcast: Option<bool>,
    /// Bootstrap rows are flagged so result dumps can exclude them.
    pub historical: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BlockInsertError {
    #[error("block ID {0} already exists in the table")]
    DuplicateBlockId(BlockId),
    #[error("block {child}'s parent {parent} was not found in the table")]
    ParentNotFound { child: BlockId, parent: BlockId },
    #[error("block {child} has height {got}, expected {want} from its parent")]
    HeightMismatch { child: BlockId, got: u64, want: u64 },
    #[error("non-historical block {0} has no parent")]
    MissingParent(BlockId),
}

/// Append-only table of all blocks known to a round, shared (read-only) with
/// every pool agent. Records are never removed; the full table persists to
/// round end for metrics.
#[derive(Debug, Clone, Default)]
pub struct BlockTable {
    blocks: HashMap<BlockId, Block>,
    /// Insertion order, used for deterministic result dumps.
    order: Vec<BlockId>,
    /// Block IDs grouped by height, offset by the height of the oldest row.
    by_height: Vec<Vec<BlockId>>,
    base_height: u64,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    #[inline]
    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: &BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id)
    }

    /// Parent ID of the given block, if both exist.
    #[inline]
    pub fn prev_of(&self, id: &BlockId) -> Option<&BlockId> {
        self.blocks.get(id).and_then(|b| b.prev.as_ref())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// IDs of all blocks at the given absolute height.
    pub fn at_height(&self, height: u64) -> &[BlockId] {
        if height < self.base_height {
            return &[];
        }
        match self.by_height.get((height - self.base_height) as usize) {
            Some(ids) => ids,
            None => &[],
        }
    }

    /// All blocks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.order.iter().map(|id| &self.blocks[id])
    }

    /// Adds a block to the table, validating parent linkage and height.
    pub fn insert(&mut self, block: Block) -> Result<(), BlockInsertError> {
        use BlockInsertError::*;

        if self.contains(&block.id) {
            return Err(DuplicateBlockId(block.id));
        }

        match &block.prev {
            Some(prev) => match self.blocks.get(prev) {
                Some(parent) => {
                    if block.height != parent.height + 1 {
                        return Err(HeightMismatch {
                            child: block.id,
                            got: block.height,
                            want: parent.height + 1,
                        });
                    }
                }
                None => {
                    return Err(ParentNotFound {
                        child: block.id,
                        parent: prev.clone(),
                    })
                }
            },
            None if block.historical => {}
            None => return Err(MissingParent(block.id)),
        }

        if self.blocks.is_empty() {
            self.base_height = block.height;
        }
        let slot = (block.height - self.base_height) as usize;
        while self.by_height.len() <= slot {
            self.by_height.push(vec![]);
        }
        self.by_height[slot].push(block.id.clone());

        self.order.push(block.id.clone());
        self.blocks.insert(block.id.clone(), block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn historical(height: u64, prev: Option<BlockId>) -> Block {
        Block {
            id: BlockId::new(height, HISTORY_POOL),
            height,
            pool: HISTORY_POOL.into(),
            prev,
            sim_clock: 0.0,
            timestamp: Some(0),
            difficulty: BigUint::from(100u32),
            cum_difficulty: BigUint::from(100u32 * (height as u32 + 1)),
            nxt_difficulty: None,
            broadcast: Some(true),
            historical: true,
        }
    }

    #[test]
    fn insert_links_heights() {
        let mut table = BlockTable::new();
        table.insert(historical(10, None)).unwrap();
        table
            .insert(historical(11, Some(BlockId::new(10, HISTORY_POOL))))
            .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.at_height(11), &[BlockId::new(11, HISTORY_POOL)]);
        assert_eq!(
            table.prev_of(&BlockId::new(11, HISTORY_POOL)),
            Some(&BlockId::new(10, HISTORY_POOL))
        );
    }

    #[test]
    fn insert_rejects_duplicates_and_gaps() {
        let mut table = BlockTable::new();
        table.insert(historical(10, None)).unwrap();

        let dup = historical(10, None);
        assert!(matches!(
            table.insert(dup),
            Err(BlockInsertError::DuplicateBlockId(_))
        ));

        let gap = historical(13, Some(BlockId::new(10, HISTORY_POOL)));
        assert!(matches!(
            table.insert(gap),
            Err(BlockInsertError::HeightMismatch { .. })
        ));

        let orphan = historical(11, Some(BlockId::new(99, HISTORY_POOL)));
        assert!(matches!(
            table.insert(orphan),
            Err(BlockInsertError::ParentNotFound { .. })
        ));
    }

    #[test]
    fn block_id_is_byte_lexicographic() {
        // "10_P0" < "9_P0" under byte-lex order, by design of the tie-break.
        assert!(BlockId::new(10, "P0") < BlockId::new(9, "P0"));
        assert_eq!(BlockId::new(42, "P1").as_str(), "42_P1");
    }
}
