/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Representative weights.
//!
//! The weight of a representative is the sum of the balances of every account whose most recent
//! representative-naming block names it. The ledger keeps these sums up to date in the
//! representation table on every apply and every rollback, through [`RepWeights::add`] and
//! [`RepWeights::sub`].
//!
//! ## Bootstrap weights
//!
//! A freshly started node has very few blocks, so its locally tallied weights say little about who the
//! network's real representatives are. Until the store holds `max_blocks` blocks, [`RepWeights::weight`]
//! therefore answers from a table of bootstrap weights supplied in the node's configuration, for the
//! representatives that table lists. The block count is read from the counter the store keeps in its
//! meta table, so a lookup never scans the block tables. The first time `weight` sees the store at or above `max_blocks`,
//! the mode switches to [`WeightMode::Local`] and never switches back.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use crate::{
    store::{pluggables::KVGetError, BlockStoreError, KVGet, KVStore, Transaction},
    types::data_types::{Account, Amount},
};

/// Where [`RepWeights::weight`] takes its answers from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightMode {
    /// Answer from the bootstrap table until the store holds `max_blocks` blocks.
    Bootstrapping { max_blocks: u64 },
    /// Answer from the locally tallied representation table.
    Local,
}

pub struct RepWeights {
    mode: Mutex<WeightMode>,
    bootstrap: HashMap<Account, Amount>,
}

impl RepWeights {
    /// Create a weights component that starts in bootstrapping mode if `bootstrap` is non-empty and
    /// `max_blocks` is non-zero, and in local mode otherwise.
    pub fn new(bootstrap: HashMap<Account, Amount>, max_blocks: u64) -> Self {
        let mode = if bootstrap.is_empty() || max_blocks == 0 {
            WeightMode::Local
        } else {
            WeightMode::Bootstrapping { max_blocks }
        };
        Self {
            mode: Mutex::new(mode),
            bootstrap,
        }
    }

    /// Create a weights component that only ever uses locally tallied weights.
    pub fn local() -> Self {
        Self::new(HashMap::new(), 0)
    }

    pub fn mode(&self) -> WeightMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the voting weight of `representative`.
    pub fn weight(&self, store: &impl KVGet, representative: &Account) -> Result<Amount, KVGetError> {
        {
            let mut mode = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
            if let WeightMode::Bootstrapping { max_blocks } = *mode {
                let blocks = store.block_count_stored()?;
                if blocks < max_blocks {
                    if let Some(weight) = self.bootstrap.get(representative) {
                        return Ok(*weight);
                    }
                } else {
                    log::info!(
                        "Store holds {} blocks, switching from bootstrap weights to local weights.",
                        blocks
                    );
                    *mode = WeightMode::Local;
                }
            }
        }
        store.representation(representative)
    }

    /// Add `amount` to the locally tallied weight of `representative`.
    pub fn add<K: KVStore>(
        &self,
        txn: &mut Transaction<'_, K>,
        representative: &Account,
        amount: Amount,
    ) -> Result<(), BlockStoreError> {
        let current = txn.representation(representative)?;
        txn.representation_put(representative, current.saturating_add(amount))
    }

    /// Subtract `amount` from the locally tallied weight of `representative`.
    pub fn sub<K: KVStore>(
        &self,
        txn: &mut Transaction<'_, K>,
        representative: &Account,
        amount: Amount,
    ) -> Result<(), BlockStoreError> {
        let current = txn.representation(representative)?;
        txn.representation_put(representative, current.saturating_sub(amount))
    }
}
