/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory write-back cache for unchecked blocks and latest votes.
//!
//! Unchecked blocks and votes arrive far more often than it is worth opening a write transaction for.
//! They are therefore first inserted into a [`StoreCache`], which owns them until the next
//! [flush](super::block_store::BlockStore::flush). Flushing copies the cache's [contents](StoreCache::contents)
//! into a write transaction, and the copied entries stay in the cache until that transaction commits.
//! On commit they are [retired](StoreCache::retire) under the cache lock, in the same critical section
//! that writes them into the store, so a reader holding the cache lock always finds every entry in
//! exactly one of the two places. A flush whose transaction is dropped loses nothing.

use std::collections::{BTreeMap, HashMap};

use crate::types::{
    block::Block,
    data_types::{Account, Hash},
    vote::Vote,
};

#[derive(Default)]
pub struct StoreCache {
    unchecked: BTreeMap<Hash, Vec<Block>>,
    votes: HashMap<Account, Vote>,
}

impl StoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks waiting on `dependency` that have not been flushed yet.
    pub fn unchecked(&self, dependency: &Hash) -> &[Block] {
        self.unchecked
            .get(dependency)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every cached unchecked block, with the dependency it waits on.
    pub fn unchecked_iter(&self) -> impl Iterator<Item = (&Hash, &Block)> {
        self.unchecked
            .iter()
            .flat_map(|(dependency, blocks)| blocks.iter().map(move |block| (dependency, block)))
    }

    pub fn insert_unchecked(&mut self, dependency: Hash, block: Block) {
        self.unchecked.entry(dependency).or_default().push(block)
    }

    /// Remove the cached unchecked block with hash `block` waiting on `dependency`.
    pub fn remove_unchecked(&mut self, dependency: &Hash, block: &Hash) {
        if let Some(blocks) = self.unchecked.get_mut(dependency) {
            blocks.retain(|cached| cached.hash() != *block);
            if blocks.is_empty() {
                self.unchecked.remove(dependency);
            }
        }
    }

    pub fn unchecked_len(&self) -> usize {
        self.unchecked.values().map(Vec::len).sum()
    }

    pub fn clear_unchecked(&mut self) {
        self.unchecked.clear()
    }

    pub fn vote(&self, account: &Account) -> Option<&Vote> {
        self.votes.get(account)
    }

    pub fn insert_vote(&mut self, vote: Vote) {
        self.votes.insert(vote.account, vote);
    }

    pub fn votes_len(&self) -> usize {
        self.votes.len()
    }

    /// Copy everything currently in the cache, leaving the cache as it is.
    pub fn contents(&self) -> Flushed {
        Flushed {
            unchecked: self
                .unchecked_iter()
                .map(|(dependency, block)| (*dependency, block.clone()))
                .collect(),
            votes: self.votes.values().cloned().collect(),
        }
    }

    /// Remove the entries of `flushed`, which have just been written into the store. Votes that were
    /// replaced by a newer vote since the flush stay.
    pub fn retire(&mut self, flushed: &Flushed) {
        for (dependency, block) in &flushed.unchecked {
            self.remove_unchecked(dependency, &block.hash());
        }
        for vote in &flushed.votes {
            if self
                .votes
                .get(&vote.account)
                .is_some_and(|cached| cached.sequence <= vote.sequence)
            {
                self.votes.remove(&vote.account);
            }
        }
    }
}

/// Cache entries written into a transaction by a flush, to be retired from the cache when that
/// transaction commits.
#[derive(Default)]
pub struct Flushed {
    pub unchecked: Vec<(Hash, Block)>,
    pub votes: Vec<Vote>,
}

impl Flushed {
    pub fn extend(&mut self, other: Flushed) {
        self.unchecked.extend(other.unchecked);
        self.votes.extend(other.votes);
    }
}
