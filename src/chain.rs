//! Read access to the local chain, plus an in-memory chain used by the demo
//! node and tests.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::blockchain::Block;
use crate::error::{BlockError, BlockOutOfOrder, ValidationError};

/// Lookup of blocks already accepted into the local chain.
pub trait ChainState: Send + Sync {
    fn block(&self, id: i64) -> Option<Arc<Block>>;

    /// Last block of the chain; `None` before genesis.
    fn tip(&self) -> Option<Arc<Block>>;
}

#[derive(Default)]
struct Inner {
    blocks: HashMap<i64, Arc<Block>>,
    tip: Option<Arc<Block>>,
}

/// Single-fork chain kept in memory.
#[derive(Default)]
pub struct InMemoryChain {
    inner: RwLock<Inner>,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a linked block on top of the current tip.
    pub fn push(&self, block: Arc<Block>) -> Result<(), BlockError> {
        let id = block.id()?;
        block.height()?;
        let mut inner = self.inner.write();
        if let Some(tip) = &inner.tip {
            let tip_id = tip.id()?;
            if block.previous_block_id() != Some(tip_id) {
                return Err(ValidationError::PreviousBlockMismatch {
                    declared: block.previous_block_id(),
                    actual: tip_id,
                }
                .into());
            }
            tip.set_next_block_id(Some(id));
        }
        inner.blocks.insert(id, Arc::clone(&block));
        inner.tip = Some(block);
        Ok(())
    }

    /// Detaches the tip and returns it; the genesis block cannot be popped.
    pub fn pop(&self) -> Result<Option<Arc<Block>>, BlockError> {
        let mut inner = self.inner.write();
        let Some(tip) = inner.tip.clone() else {
            return Ok(None);
        };
        let Some(previous_id) = tip.previous_block_id() else {
            return Ok(None);
        };
        let previous = inner
            .blocks
            .get(&previous_id)
            .cloned()
            .ok_or(BlockOutOfOrder {
                previous_block_id: Some(previous_id),
            })?;
        inner.blocks.remove(&tip.id()?);
        previous.set_next_block_id(None);
        inner.tip = Some(previous);
        Ok(Some(tip))
    }

    pub fn height(&self) -> Option<u32> {
        self.inner.read().tip.as_ref().and_then(|b| b.height().ok())
    }

    pub fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().blocks.is_empty()
    }
}

impl ChainState for InMemoryChain {
    fn block(&self, id: i64) -> Option<Arc<Block>> {
        self.inner.read().blocks.get(&id).cloned()
    }

    fn tip(&self) -> Option<Arc<Block>> {
        self.inner.read().tip.clone()
    }
}
