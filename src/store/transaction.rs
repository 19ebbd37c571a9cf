/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Atomic, isolated units of work over the block store.
//!
//! A [`Transaction`] buffers every write in memory and reads its own writes: a `get` first consults the
//! buffered writes, then falls back to the underlying [`KVStore`]. Nothing reaches the store until
//! [`commit`](Transaction::commit), at which point all buffered writes are applied as one
//! [`WriteBatch`], so either all of a transaction's effects become durable or none do.
//!
//! Write transactions hold the store's writer lock for their whole lifetime, so at most one write
//! transaction is open at a time, and read the store directly. Read transactions take no lock and read
//! from a [snapshot](KVStore::snapshot) taken when they begin, so writes committed by other threads
//! while a read transaction is open are not visible to it.

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Mutex, MutexGuard, PoisonError},
};

use borsh::BorshSerialize;

use crate::types::{
    block::Block,
    data_types::{Account, Amount, Hash},
    records::{AccountInfo, BlockInfo, PendingInfo, PendingKey},
    vote::Vote,
};

use super::{
    block_store::BlockStoreError,
    cache::{Flushed, StoreCache},
    pluggables::{pending_key, unchecked_key, KVGet, KVSetError, KVStore, Key, WriteBatch},
    variables::{self, block_table, checksum_key, concat},
};

pub struct Transaction<'a, K: KVStore> {
    kv_store: &'a K,
    snapshot: Option<K::Snapshot<'a>>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    write_lock: Option<MutexGuard<'a, ()>>,
    flushed: Option<(&'a Mutex<StoreCache>, Flushed)>,
}

/// Lifecycle methods.
impl<'a, K: KVStore> Transaction<'a, K> {
    pub(crate) fn new_read(kv_store: &'a K) -> Self {
        Self {
            kv_store,
            snapshot: Some(kv_store.snapshot()),
            writes: BTreeMap::new(),
            write_lock: None,
            flushed: None,
        }
    }

    pub(crate) fn new_write(kv_store: &'a K, write_lock: MutexGuard<'a, ()>) -> Self {
        Self {
            kv_store,
            snapshot: None,
            writes: BTreeMap::new(),
            write_lock: Some(write_lock),
            flushed: None,
        }
    }

    pub fn is_write(&self) -> bool {
        self.write_lock.is_some()
    }

    /// Number of keys this transaction would set or delete if it were committed now.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Atomically apply every buffered write to the store. Committing a read transaction with buffered
    /// writes is a no-op that discards them.
    ///
    /// If cache entries were [flushed](super::block_store::BlockStore::flush) into this transaction, they
    /// are retired from the cache while its lock is held across the write.
    pub fn commit(self) {
        let Transaction {
            kv_store,
            snapshot,
            writes,
            write_lock,
            flushed,
        } = self;
        drop(snapshot);
        if write_lock.is_none() {
            if !writes.is_empty() {
                log::warn!("Discarding {} writes made in a read transaction.", writes.len());
            }
            return;
        }

        let mut wb = K::WriteBatch::new();
        for (key, value) in &writes {
            match value {
                Some(value) => wb.set(key, value),
                None => wb.delete(key),
            }
        }
        let mut kv_store = kv_store.clone();
        match flushed {
            Some((cache, flushed)) => {
                let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
                kv_store.write(wb);
                cache.retire(&flushed);
            }
            None => kv_store.write(wb),
        }
    }

    /// Record that `flushed` was written into this transaction from `cache`.
    pub(crate) fn add_flushed(&mut self, cache: &'a Mutex<StoreCache>, flushed: Flushed) {
        match &mut self.flushed {
            Some((_, existing)) => existing.extend(flushed),
            None => self.flushed = Some((cache, flushed)),
        }
    }

    pub(crate) fn set(&mut self, key: &[u8], value: &[u8]) {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
    }

    pub(crate) fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }
}

impl<K: KVStore> KVGet for Transaction<'_, K> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.writes.get(key) {
            Some(value) => value.clone(),
            None => match &self.snapshot {
                Some(snapshot) => snapshot.get(key),
                None => self.kv_store.get(key),
            },
        }
    }

    fn get_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let stored = match &self.snapshot {
            Some(snapshot) => snapshot.get_prefix(prefix),
            None => self.kv_store.get_prefix(prefix),
        };
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = stored.into_iter().collect();
        let overlay = self
            .writes
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix));
        for (key, value) in overlay {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }
}

/// Block table writers.
impl<K: KVStore> Transaction<'_, K> {
    /// Store `block` under `hash` with the given `successor`, and set `hash` as the successor of the
    /// block's predecessor. The stored block count goes up by one unless `hash` was already stored.
    ///
    /// # Errors
    ///
    /// Fails with [`BlockStoreError::BlockExpectedButNotFound`] if `successor` is non-zero but not stored,
    /// or if the block has a predecessor that is not stored.
    pub fn block_put(&mut self, hash: &Hash, block: &Block, successor: &Hash) -> Result<(), BlockStoreError> {
        if !successor.is_zero() && !self.block_exists(successor) {
            return Err(BlockStoreError::BlockExpectedButNotFound { block: *successor });
        }

        if !self.block_exists(hash) {
            let count = self.block_count_stored()?;
            self.block_count_put(count + 1)?;
        }

        let mut value = encode_block(hash, block)?;
        value.extend_from_slice(&successor.bytes());
        self.set(&concat(&block_table(block.kind()), &hash.bytes()), &value);

        let previous = block.previous();
        if !previous.is_zero() {
            self.block_successor_set(&previous, hash)?;
        }
        Ok(())
    }

    /// Rewrite the trailing successor field of the stored block `hash`, without deserializing the block.
    pub fn block_successor_set(&mut self, hash: &Hash, successor: &Hash) -> Result<(), BlockStoreError> {
        let (mut bytes, kind) = self
            .block_raw(hash)
            .ok_or(BlockStoreError::BlockExpectedButNotFound { block: *hash })?;
        let len = bytes.len();
        if len < 32 {
            return Err(BlockStoreError::BlockExpectedButNotFound { block: *hash });
        }
        bytes[len - 32..].copy_from_slice(&successor.bytes());
        self.set(&concat(&block_table(kind), &hash.bytes()), &bytes);
        Ok(())
    }

    pub fn block_successor_clear(&mut self, hash: &Hash) -> Result<(), BlockStoreError> {
        self.block_successor_set(hash, &Hash::zero())
    }

    /// Delete `hash` from whichever block table holds it, lowering the stored block count. Returns whether
    /// a block was deleted.
    pub fn block_del(&mut self, hash: &Hash) -> Result<bool, BlockStoreError> {
        match self.block_raw(hash) {
            Some((_, kind)) => {
                self.delete(&concat(&block_table(kind), &hash.bytes()));
                let count = self.block_count_stored()?;
                self.block_count_put(count.saturating_sub(1))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn block_count_put(&mut self, count: u64) -> Result<(), BlockStoreError> {
        let value = encode(Key::BlockCount, &count)?;
        self.set(&concat(&variables::META, &variables::BLOCK_COUNT), &value);
        Ok(())
    }

    pub fn block_info_put(&mut self, hash: &Hash, info: &BlockInfo) -> Result<(), BlockStoreError> {
        let value = encode(Key::BlockInfo { block: *hash }, info)?;
        self.set(&concat(&variables::BLOCK_INFO, &hash.bytes()), &value);
        Ok(())
    }

    pub fn block_info_del(&mut self, hash: &Hash) {
        self.delete(&concat(&variables::BLOCK_INFO, &hash.bytes()))
    }
}

/// Account table writers.
impl<K: KVStore> Transaction<'_, K> {
    pub fn account_put(&mut self, account: &Account, info: &AccountInfo) -> Result<(), BlockStoreError> {
        let value = encode(Key::Account { account: *account }, info)?;
        self.set(&concat(&variables::ACCOUNTS, &account.bytes()), &value);
        Ok(())
    }

    pub fn account_del(&mut self, account: &Account) {
        self.delete(&concat(&variables::ACCOUNTS, &account.bytes()))
    }

    pub fn frontier_put(&mut self, hash: &Hash, account: &Account) -> Result<(), BlockStoreError> {
        let value = encode(Key::Frontier { block: *hash }, account)?;
        self.set(&concat(&variables::FRONTIERS, &hash.bytes()), &value);
        Ok(())
    }

    pub fn frontier_del(&mut self, hash: &Hash) {
        self.delete(&concat(&variables::FRONTIERS, &hash.bytes()))
    }

    pub fn pending_put(&mut self, key: &PendingKey, info: &PendingInfo) -> Result<(), BlockStoreError> {
        let value = encode(Key::Pending { key: *key }, info)?;
        self.set(&pending_key(key), &value);
        Ok(())
    }

    pub fn pending_del(&mut self, key: &PendingKey) {
        self.delete(&pending_key(key))
    }

    pub fn representation_put(
        &mut self,
        representative: &Account,
        weight: Amount,
    ) -> Result<(), BlockStoreError> {
        let key = concat(&variables::REPRESENTATION, &representative.bytes());
        if weight.is_zero() {
            self.delete(&key);
        } else {
            let value = encode(
                Key::Representation {
                    representative: *representative,
                },
                &weight,
            )?;
            self.set(&key, &value);
        }
        Ok(())
    }

    pub fn checksum_put(&mut self, prefix: u64, mask: u8, hash: &Hash) -> Result<(), BlockStoreError> {
        let value = encode(Key::Checksum { prefix, mask }, hash)?;
        self.set(&checksum_key(prefix, mask), &value);
        Ok(())
    }

    pub fn checksum_del(&mut self, prefix: u64, mask: u8) {
        self.delete(&checksum_key(prefix, mask))
    }
}

/// Cache and meta table writers.
impl<K: KVStore> Transaction<'_, K> {
    pub(crate) fn unchecked_put_stored(
        &mut self,
        dependency: &Hash,
        block: &Block,
    ) -> Result<(), BlockStoreError> {
        let value = encode(
            Key::Unchecked {
                dependency: *dependency,
            },
            block,
        )?;
        self.set(&unchecked_key(dependency, &block.hash()), &value);
        Ok(())
    }

    pub(crate) fn unchecked_del_stored(&mut self, dependency: &Hash, block: &Hash) {
        self.delete(&unchecked_key(dependency, block))
    }

    pub(crate) fn unchecked_clear_stored(&mut self) {
        for (key, _) in self.get_prefix(&variables::UNCHECKED) {
            self.delete(&key);
        }
    }

    pub(crate) fn vote_put_stored(&mut self, vote: &Vote) -> Result<(), BlockStoreError> {
        let value = encode(
            Key::Vote {
                account: vote.account,
            },
            vote,
        )?;
        self.set(&concat(&variables::VOTES, &vote.account.bytes()), &value);
        Ok(())
    }

    pub fn version_put(&mut self, version: u64) -> Result<(), BlockStoreError> {
        let value = encode(Key::Version, &version)?;
        self.set(&concat(&variables::META, &variables::VERSION), &value);
        Ok(())
    }

    pub fn node_id_put(&mut self, node_id: &[u8; 32]) -> Result<(), BlockStoreError> {
        let value = encode(Key::NodeId, node_id)?;
        self.set(&concat(&variables::META, &variables::NODE_ID), &value);
        Ok(())
    }

    pub fn node_id_del(&mut self) {
        self.delete(&concat(&variables::META, &variables::NODE_ID))
    }
}

fn encode<T: BorshSerialize>(key: Key, value: &T) -> Result<Vec<u8>, KVSetError> {
    value
        .try_to_vec()
        .map_err(|err| KVSetError::SerializeValueError { key, source: err })
}

/// Serialize the kind-specific body of `block`. The kind itself is implied by the table it is stored in.
fn encode_block(hash: &Hash, block: &Block) -> Result<Vec<u8>, KVSetError> {
    let key = Key::Block { block: *hash };
    match block {
        Block::Send(block) => encode(key, block),
        Block::Receive(block) => encode(key, block),
        Block::Open(block) => encode(key, block),
        Block::Change(block) => encode(key, block),
        Block::State(block) => encode(key, block),
        Block::Tx(block) => encode(key, block),
    }
}
