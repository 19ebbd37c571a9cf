/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`BlockStore`]: transactional, typed storage of all ledger entities.
//!
//! # Opening the block store
//!
//! [`BlockStore::open`] must be called on a [`KVStore`] before anything else is done with it. Opening:
//! 1. Runs every pending [migration](super::migrations) in order, bringing the store up to
//!    [`CURRENT_VERSION`](super::migrations::CURRENT_VERSION).
//! 2. Generates and stores a random node ID, if the store does not have one yet.
//!
//! # Reading and writing
//!
//! All reads and writes go through a [`Transaction`]. The typed getters of [`KVGet`] are available on
//! every transaction; typed setters are inherent methods of `Transaction`. Unchecked blocks and votes
//! are the exception: they are read and written through the methods of `BlockStore` in the
//! [unchecked](#impl-BlockStore<K>-1) and [votes](#impl-BlockStore<K>-2) groups, which combine the
//! in-memory [`StoreCache`] with the durable tables.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::seq::SliceRandom;
use rand_core::{OsRng, RngCore};

use crate::types::{
    block::{Block, BlockKind},
    data_types::{Account, Hash},
    keypair::Keypair,
    vote::Vote,
};

use super::{
    cache::StoreCache,
    migrations,
    pluggables::{unchecked_key, KVGet, KVGetError, KVSetError, KVStore},
    transaction::Transaction,
};

pub struct BlockStore<K: KVStore> {
    kv_store: K,
    write_lock: Mutex<()>,
    cache: Mutex<StoreCache>,
}

/// Lifecycle methods.
impl<K: KVStore> BlockStore<K> {
    /// Open the block store on top of `kv_store`, upgrading its schema and generating a node ID if
    /// needed.
    pub fn open(kv_store: K) -> Result<Self, BlockStoreError> {
        let store = BlockStore {
            kv_store,
            write_lock: Mutex::new(()),
            cache: Mutex::new(StoreCache::new()),
        };

        let mut txn = store.tx_begin_write();
        migrations::upgrade(&mut txn)?;
        if txn.node_id()?.is_none() {
            let mut node_id = [0u8; 32];
            OsRng.fill_bytes(&mut node_id);
            txn.node_id_put(&node_id)?;
        }
        txn.commit();

        Ok(store)
    }

    /// Begin a write transaction. Blocks until no other write transaction is open.
    pub fn tx_begin_write(&self) -> Transaction<'_, K> {
        let write_lock = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Transaction::new_write(&self.kv_store, write_lock)
    }

    pub fn tx_begin_read(&self) -> Transaction<'_, K> {
        Transaction::new_read(&self.kv_store)
    }

    pub fn kv_store(&self) -> &K {
        &self.kv_store
    }

    /// Write the whole contents of the in-memory cache into `txn`.
    ///
    /// The flushed entries stay in the cache, and visible to readers, until `txn` commits; they are then
    /// removed from it. Blocks and votes inserted after the flush stay in the cache for the next one.
    /// Returns the number of unchecked blocks and the number of votes flushed.
    pub fn flush<'a>(&'a self, txn: &mut Transaction<'a, K>) -> Result<(usize, usize), BlockStoreError> {
        let flushed = self.cache().contents();
        for (dependency, block) in &flushed.unchecked {
            txn.unchecked_put_stored(dependency, block)?;
        }
        for vote in &flushed.votes {
            txn.vote_put_stored(vote)?;
        }

        let counts = (flushed.unchecked.len(), flushed.votes.len());
        txn.add_flushed(&self.cache, flushed);
        Ok(counts)
    }

    /// Delete the node ID. A new one is generated the next time the store is opened.
    pub fn delete_node_id(&self, txn: &mut Transaction<'_, K>) {
        txn.node_id_del()
    }

    /// A uniformly random stored block, if any are stored.
    pub fn block_random(&self, txn: &Transaction<'_, K>) -> Result<Option<Block>, BlockStoreError> {
        let hashes: Vec<Hash> = BlockKind::LOOKUP_ORDER
            .iter()
            .flat_map(|kind| txn.block_hashes(*kind))
            .collect();
        match hashes.choose(&mut rand::thread_rng()) {
            Some(hash) => Ok(txn.block(hash)?),
            None => Ok(None),
        }
    }

    fn cache(&self) -> MutexGuard<'_, StoreCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unchecked blocks.
impl<K: KVStore> BlockStore<K> {
    /// Every block waiting on `dependency`, cached or stored.
    pub fn unchecked_get(
        &self,
        txn: &Transaction<'_, K>,
        dependency: &Hash,
    ) -> Result<Vec<Block>, BlockStoreError> {
        let mut blocks: Vec<Block> = self
            .cache()
            .unchecked(dependency)
            .iter()
            .filter(|block| txn.get(&unchecked_key(dependency, &block.hash())).is_none())
            .cloned()
            .collect();
        blocks.extend(txn.unchecked_stored(dependency)?);
        Ok(blocks)
    }

    /// Record that `block` is waiting on `dependency`. Returns `false`, and does nothing, if the same
    /// block is already waiting on `dependency`.
    pub fn unchecked_put(
        &self,
        txn: &Transaction<'_, K>,
        dependency: &Hash,
        block: Block,
    ) -> Result<bool, BlockStoreError> {
        let hash = block.hash();
        let stored = txn.unchecked_stored(dependency)?;
        let mut cache = self.cache();
        let duplicate = cache
            .unchecked(dependency)
            .iter()
            .chain(stored.iter())
            .any(|waiting| waiting.hash() == hash);
        if duplicate {
            return Ok(false);
        }
        cache.insert_unchecked(*dependency, block);
        Ok(true)
    }

    pub fn unchecked_del(&self, txn: &mut Transaction<'_, K>, dependency: &Hash, block: &Hash) {
        self.cache().remove_unchecked(dependency, block);
        txn.unchecked_del_stored(dependency, block);
    }

    pub fn unchecked_count(&self, txn: &Transaction<'_, K>) -> usize {
        let cached = self
            .cache()
            .unchecked_iter()
            .filter(|(dependency, block)| txn.get(&unchecked_key(dependency, &block.hash())).is_none())
            .count();
        cached + txn.unchecked_stored_count()
    }

    pub fn unchecked_clear(&self, txn: &mut Transaction<'_, K>) {
        self.cache().clear_unchecked();
        txn.unchecked_clear_stored();
    }
}

/// Votes.
impl<K: KVStore> BlockStore<K> {
    /// The latest vote of `account`, cached or stored.
    pub fn vote_current(
        &self,
        txn: &Transaction<'_, K>,
        account: &Account,
    ) -> Result<Option<Vote>, BlockStoreError> {
        let stored = txn.vote_stored(account)?;
        let cached = self.cache().vote(account).cloned();
        Ok(match (cached, stored) {
            (Some(cached), Some(stored)) if stored.sequence > cached.sequence => Some(stored),
            (Some(cached), _) => Some(cached),
            (None, stored) => stored,
        })
    }

    /// Create, sign and cache a vote by `keypair` for `block`, with a sequence one higher than any vote
    /// `keypair` has produced so far.
    ///
    /// The stored vote is read from the store itself while the cache is locked, not from a transaction,
    /// so a flush committing concurrently cannot hide the latest vote from both.
    pub fn vote_generate(&self, keypair: &Keypair, block: Block) -> Result<Vote, BlockStoreError> {
        let account = keypair.account();
        let mut cache = self.cache();
        let stored = self.kv_store.vote_stored(&account)?.map(|vote| vote.sequence);
        let cached = cache.vote(&account).map(|vote| vote.sequence);
        let sequence = stored.max(cached).map_or(1, |sequence| sequence + 1);

        let vote = Vote::new(keypair, sequence, block);
        cache.insert_vote(vote.clone());
        Ok(vote)
    }

    /// Return whichever of `vote` and the current vote of `vote.account` has the higher sequence, and
    /// cache it as the current vote. Reads the stored vote the same way as
    /// [`vote_generate`](Self::vote_generate).
    pub fn vote_max(&self, vote: Vote) -> Result<Vote, BlockStoreError> {
        let mut cache = self.cache();
        let stored = self.kv_store.vote_stored(&vote.account)?;
        let current = match (cache.vote(&vote.account).cloned(), stored) {
            (Some(cached), Some(stored)) if stored.sequence > cached.sequence => Some(stored),
            (Some(cached), _) => Some(cached),
            (None, stored) => stored,
        };

        let result = match current {
            Some(current) if current.sequence > vote.sequence => current,
            _ => vote,
        };
        cache.insert_vote(result.clone());
        Ok(result)
    }
}

/// Error when reading from or writing into the block store.
#[derive(Debug, thiserror::Error)]
pub enum BlockStoreError {
    #[error(transparent)]
    KVGetError(#[from] KVGetError),

    #[error(transparent)]
    KVSetError(#[from] KVSetError),

    /// Unable to find a block with the specific hash, even though an invariant of the store says that
    /// the block should exist.
    #[error("block {block} expected but not found")]
    BlockExpectedButNotFound { block: Hash },

    /// Unable to find an account record, even though an invariant of the store says that it should exist.
    #[error("account {account} expected but not found")]
    AccountExpectedButNotFound { account: Account },

    /// The store was written by a newer version of this library.
    #[error("store has schema version {version}, which is newer than the newest supported version")]
    UnsupportedVersion { version: u64 },
}
