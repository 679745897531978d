use std::{collections::BTreeMap, sync::Arc};

use tracing::debug;

use super::state::PoolState;
use crate::errors::AMMError;

/// Block-indexed ledger of committed pool states, used to roll a pool back after a reorg.
///
/// At most one state is kept per block; a later update within the same block replaces the
/// earlier entry.
#[derive(Debug, Clone, Default)]
pub struct PoolStateArchive {
    states: BTreeMap<u64, Arc<PoolState>>,
    max_len: Option<usize>,
}

impl PoolStateArchive {
    pub fn new(max_len: Option<usize>) -> Self {
        PoolStateArchive {
            states: BTreeMap::new(),
            max_len,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn blocks(&self) -> impl Iterator<Item = u64> + '_ {
        self.states.keys().copied()
    }

    pub fn latest(&self) -> Option<(u64, &Arc<PoolState>)> {
        self.states.iter().next_back().map(|(block, state)| (*block, state))
    }

    /// The state that was live at `block`.
    pub fn state_at(&self, block: u64) -> Option<&Arc<PoolState>> {
        self.states.range(..=block).next_back().map(|(_, state)| state)
    }

    pub fn insert(&mut self, block: u64, state: Arc<PoolState>) {
        self.states.insert(block, state);

        if let Some(max_len) = self.max_len {
            while self.states.len() > max_len.max(1) {
                if let Some((evicted, _)) = self.states.pop_first() {
                    debug!(block = evicted, "evicted archived pool state");
                }
            }
        }
    }

    /// Discards every state recorded at or after `block`. Returns the number of discarded states.
    pub fn discard_from(&mut self, block: u64) -> usize {
        self.states.split_off(&block).len()
    }

    /// Discards states that can no longer be needed to restore the pool to any block at or
    /// after `block`. The latest state strictly before `block` is kept, so is every later one.
    ///
    /// Returns the number of discarded states.
    pub fn prune_before(&mut self, block: u64) -> Result<usize, AMMError> {
        let Some((&earliest, _)) = self.states.first_key_value() else {
            return Err(AMMError::NoPoolStateAvailable(block));
        };

        if earliest > block {
            return Err(AMMError::NoPoolStateAvailable(block));
        }

        let anchor = self
            .states
            .range(..block)
            .next_back()
            .map(|(known_block, _)| *known_block)
            .unwrap_or(block);

        let retained = self.states.split_off(&anchor);
        let discarded = std::mem::replace(&mut self.states, retained).len();

        if discarded > 0 {
            debug!(block, anchor, discarded, "pruned archived pool states");
        }

        Ok(discarded)
    }

    /// Discards every state recorded at or after `block` and returns the latest remaining one.
    ///
    /// Returns `None` when no state at or after `block` was recorded, in which case nothing is
    /// discarded.
    pub fn restore_before(&mut self, block: u64) -> Result<Option<(u64, Arc<PoolState>)>, AMMError> {
        if self.states.range(..block).next_back().is_none() {
            return Err(AMMError::NoPoolStateAvailable(block));
        }

        let discarded = self.states.split_off(&block);
        if discarded.is_empty() {
            return Ok(None);
        }

        debug!(
            block,
            discarded = discarded.len(),
            "discarded archived pool states"
        );

        Ok(self
            .states
            .iter()
            .next_back()
            .map(|(known_block, state)| (*known_block, state.clone())))
    }
}
