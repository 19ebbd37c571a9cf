/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable block store persistence.
//!
//! The block store does not depend on any particular storage engine. Library users implement
//! [`KVStore`] for the engine of their choice; the engine merely has to provide point reads, ordered
//! prefix scans, and atomic application of a [`WriteBatch`].
//!
//! [`KVGet`] also provides typed getters for every [table](super::variables). These are implemented in
//! terms of [`get`](KVGet::get) and [`get_prefix`](KVGet::get_prefix), and so are available on the raw
//! store, on its [snapshots](KVStore::snapshot), and on a [`Transaction`](super::transaction::Transaction),
//! which overlays uncommitted writes on top of the store.

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::types::{
    block::{Block, BlockKind, ChangeBlock, OpenBlock, ReceiveBlock, SendBlock, StateBlock, TxBlock},
    data_types::{Account, Amount, Hash},
    records::{AccountInfo, BlockInfo, PendingInfo, PendingKey},
    vote::Vote,
};

use super::variables::{self, block_table, checksum_key, concat};

pub trait KVStore: KVGet + Clone + Send + Sync + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);

    /// A point-in-time view of the store. Writes made after the snapshot is taken are not visible
    /// through it, and a live snapshot must not block [`write`](KVStore::write).
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Get every key-value pair whose key starts with `prefix`, in ascending key order.
    fn get_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    /* ↓↓↓ Blocks ↓↓↓ */

    /// Search every block table, in [`BlockKind::LOOKUP_ORDER`], for `hash`. Returns the raw stored bytes
    /// (serialized block followed by successor) and the kind of the table that holds them.
    fn block_raw(&self, hash: &Hash) -> Option<(Vec<u8>, BlockKind)> {
        BlockKind::LOOKUP_ORDER.iter().find_map(|kind| {
            self.get(&concat(&block_table(*kind), &hash.bytes()))
                .map(|bytes| (bytes, *kind))
        })
    }

    fn block(&self, hash: &Hash) -> Result<Option<Block>, KVGetError> {
        match self.block_raw(hash) {
            Some((bytes, kind)) => Ok(Some(decode_block(hash, &bytes, kind)?.0)),
            None => Ok(None),
        }
    }

    fn block_exists(&self, hash: &Hash) -> bool {
        BlockKind::LOOKUP_ORDER
            .iter()
            .any(|kind| self.get(&concat(&block_table(*kind), &hash.bytes())).is_some())
    }

    /// Get the successor of `hash`: the next block in the same account chain. Zero if `hash` is the head
    /// of its chain or is not stored.
    fn block_successor(&self, hash: &Hash) -> Result<Hash, KVGetError> {
        match self.block_raw(hash) {
            Some((bytes, kind)) => Ok(decode_block(hash, &bytes, kind)?.1),
            None => Ok(Hash::zero()),
        }
    }

    fn block_count(&self, kind: BlockKind) -> usize {
        self.get_prefix(&block_table(kind)).len()
    }

    /// Total number of stored blocks, of all kinds, counted by scanning every block table. See
    /// [`block_count_stored`](KVGet::block_count_stored) for the counter kept alongside the tables.
    fn block_count_total(&self) -> usize {
        BlockKind::LOOKUP_ORDER
            .iter()
            .map(|kind| self.block_count(*kind))
            .sum()
    }

    /// Hashes of every stored block of `kind`, in ascending order.
    fn block_hashes(&self, kind: BlockKind) -> Vec<Hash> {
        self.get_prefix(&block_table(kind))
            .into_iter()
            .filter_map(|(key, _)| hash_from_key(&key[1..]))
            .collect()
    }

    /// Walk back from `hash` along `previous` links to the nearest block that names a representative,
    /// and return its hash.
    fn rep_block(&self, hash: &Hash) -> Result<Hash, KVGetError> {
        let mut current = *hash;
        loop {
            let block = self
                .block(&current)?
                .ok_or(KVGetError::ValueExpectedButNotFound {
                    key: Key::Block { block: current },
                })?;
            if block.representative().is_some() {
                return Ok(current);
            }
            current = block.previous();
        }
    }

    fn block_info(&self, hash: &Hash) -> Result<Option<BlockInfo>, KVGetError> {
        self.get(&concat(&variables::BLOCK_INFO, &hash.bytes()))
            .map(|bytes| decode(Key::BlockInfo { block: *hash }, &bytes))
            .transpose()
    }

    fn block_info_exists(&self, hash: &Hash) -> bool {
        self.get(&concat(&variables::BLOCK_INFO, &hash.bytes()))
            .is_some()
    }

    /// Whether `root` is the hash of a stored block or the address of an opened account.
    fn root_exists(&self, root: &Hash) -> bool {
        self.block_exists(root)
            || self
                .get(&concat(&variables::ACCOUNTS, &root.bytes()))
                .is_some()
    }

    /* ↓↓↓ Accounts ↓↓↓ */

    fn account(&self, account: &Account) -> Result<Option<AccountInfo>, KVGetError> {
        self.get(&concat(&variables::ACCOUNTS, &account.bytes()))
            .map(|bytes| decode(Key::Account { account: *account }, &bytes))
            .transpose()
    }

    /// Every opened account and its latest information, in ascending order of account.
    fn accounts(&self) -> Result<Vec<(Account, AccountInfo)>, KVGetError> {
        self.get_prefix(&variables::ACCOUNTS)
            .into_iter()
            .filter_map(|(key, value)| hash_from_key(&key[1..]).map(|hash| (Account::from(hash), value)))
            .map(|(account, value)| Ok((account, decode(Key::Account { account }, &value)?)))
            .collect()
    }

    fn account_count(&self) -> usize {
        self.get_prefix(&variables::ACCOUNTS).len()
    }

    fn frontier(&self, hash: &Hash) -> Result<Option<Account>, KVGetError> {
        self.get(&concat(&variables::FRONTIERS, &hash.bytes()))
            .map(|bytes| decode(Key::Frontier { block: *hash }, &bytes))
            .transpose()
    }

    fn frontiers(&self) -> Result<Vec<(Hash, Account)>, KVGetError> {
        self.get_prefix(&variables::FRONTIERS)
            .into_iter()
            .filter_map(|(key, value)| hash_from_key(&key[1..]).map(|hash| (hash, value)))
            .map(|(block, value)| Ok((block, decode(Key::Frontier { block }, &value)?)))
            .collect()
    }

    fn pending(&self, key: &PendingKey) -> Result<Option<PendingInfo>, KVGetError> {
        self.get(&pending_key(key))
            .map(|bytes| decode(Key::Pending { key: *key }, &bytes))
            .transpose()
    }

    fn pending_exists(&self, key: &PendingKey) -> bool {
        self.get(&pending_key(key)).is_some()
    }

    /// Every receivable entry of `account`, in ascending order of send block hash.
    fn pending_of(&self, account: &Account) -> Result<Vec<(PendingKey, PendingInfo)>, KVGetError> {
        self.get_prefix(&concat(&variables::PENDING, &account.bytes()))
            .into_iter()
            .filter_map(|(key, value)| {
                hash_from_key(&key[33..]).map(|hash| (PendingKey::new(*account, hash), value))
            })
            .map(|(key, value)| Ok((key, decode(Key::Pending { key }, &value)?)))
            .collect()
    }

    fn representation(&self, representative: &Account) -> Result<Amount, KVGetError> {
        Ok(self
            .get(&concat(&variables::REPRESENTATION, &representative.bytes()))
            .map(|bytes| {
                decode(
                    Key::Representation {
                        representative: *representative,
                    },
                    &bytes,
                )
            })
            .transpose()?
            .unwrap_or_default())
    }

    fn checksum(&self, prefix: u64, mask: u8) -> Result<Option<Hash>, KVGetError> {
        self.get(&checksum_key(prefix, mask))
            .map(|bytes| decode(Key::Checksum { prefix, mask }, &bytes))
            .transpose()
    }

    /* ↓↓↓ Caches ↓↓↓ */

    /// Blocks waiting on `dependency` that have been flushed to the store.
    fn unchecked_stored(&self, dependency: &Hash) -> Result<Vec<Block>, KVGetError> {
        self.get_prefix(&concat(&variables::UNCHECKED, &dependency.bytes()))
            .into_iter()
            .map(|(_, value)| {
                decode(
                    Key::Unchecked {
                        dependency: *dependency,
                    },
                    &value,
                )
            })
            .collect()
    }

    fn unchecked_stored_count(&self) -> usize {
        self.get_prefix(&variables::UNCHECKED).len()
    }

    /// The latest vote of `account` that has been flushed to the store.
    fn vote_stored(&self, account: &Account) -> Result<Option<Vote>, KVGetError> {
        self.get(&concat(&variables::VOTES, &account.bytes()))
            .map(|bytes| decode(Key::Vote { account: *account }, &bytes))
            .transpose()
    }

    /* ↓↓↓ Meta ↓↓↓ */

    /// Schema version of the store. Stores that predate versioning are version 1.
    fn version(&self) -> Result<u64, KVGetError> {
        Ok(self
            .get(&concat(&variables::META, &variables::VERSION))
            .map(|bytes| decode(Key::Version, &bytes))
            .transpose()?
            .unwrap_or(1))
    }

    /// Number of stored blocks, as tracked by [`Transaction::block_put`](super::transaction::Transaction::block_put)
    /// and [`Transaction::block_del`](super::transaction::Transaction::block_del).
    fn block_count_stored(&self) -> Result<u64, KVGetError> {
        Ok(self
            .get(&concat(&variables::META, &variables::BLOCK_COUNT))
            .map(|bytes| decode(Key::BlockCount, &bytes))
            .transpose()?
            .unwrap_or(0))
    }

    fn node_id(&self) -> Result<Option<[u8; 32]>, KVGetError> {
        self.get(&concat(&variables::META, &variables::NODE_ID))
            .map(|bytes| decode(Key::NodeId, &bytes))
            .transpose()
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

pub(crate) fn pending_key(key: &PendingKey) -> Vec<u8> {
    concat(
        &concat(&variables::PENDING, &key.account.bytes()),
        &key.hash.bytes(),
    )
}

pub(crate) fn unchecked_key(dependency: &Hash, block: &Hash) -> Vec<u8> {
    concat(
        &concat(&variables::UNCHECKED, &dependency.bytes()),
        &block.bytes(),
    )
}

fn hash_from_key(bytes: &[u8]) -> Option<Hash> {
    let bytes: [u8; 32] = bytes.get(..32)?.try_into().ok()?;
    Some(Hash::new(bytes))
}

fn decode<T: BorshDeserialize>(key: Key, bytes: &[u8]) -> Result<T, KVGetError> {
    T::deserialize(&mut &*bytes).map_err(|err| KVGetError::DeserializeValueError { key, source: err })
}

/// Decode the raw bytes stored in the table of `kind` into the block and its successor.
pub(crate) fn decode_block(
    hash: &Hash,
    bytes: &[u8],
    kind: BlockKind,
) -> Result<(Block, Hash), KVGetError> {
    let key = || Key::Block { block: *hash };
    let mut buf = bytes;
    let block = match kind {
        BlockKind::Send => SendBlock::deserialize(&mut buf).map(Block::Send),
        BlockKind::Receive => ReceiveBlock::deserialize(&mut buf).map(Block::Receive),
        BlockKind::Open => OpenBlock::deserialize(&mut buf).map(Block::Open),
        BlockKind::Change => ChangeBlock::deserialize(&mut buf).map(Block::Change),
        BlockKind::State => StateBlock::deserialize(&mut buf).map(Block::State),
        BlockKind::Tx => TxBlock::deserialize(&mut buf).map(Block::Tx),
    }
    .map_err(|err| KVGetError::DeserializeValueError {
        key: key(),
        source: err,
    })?;
    let successor = hash_from_key(buf).ok_or(KVGetError::ValueExpectedButNotFound {
        key: Key::BlockSuccessor { block: *hash },
    })?;
    Ok((block, successor))
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found, even though an invariant of the store
///    says that it must exist.
#[derive(Debug, thiserror::Error)]
pub enum KVGetError {
    #[error("could not deserialize the value of {key}")]
    DeserializeValueError {
        key: Key,
        #[source]
        source: std::io::Error,
    },
    #[error("expected a value for {key}, but found none")]
    ValueExpectedButNotFound { key: Key },
}

/// Error when trying to serialize a value before setting it into the key value store.
#[derive(Debug, thiserror::Error)]
pub enum KVSetError {
    #[error("could not serialize the value of {key}")]
    SerializeValueError {
        key: Key,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub enum Key {
    Block { block: Hash },
    BlockSuccessor { block: Hash },
    BlockInfo { block: Hash },
    Account { account: Account },
    Frontier { block: Hash },
    Pending { key: PendingKey },
    Representation { representative: Account },
    Checksum { prefix: u64, mask: u8 },
    Unchecked { dependency: Hash },
    Vote { account: Account },
    Version,
    NodeId,
    BlockCount,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            &Key::Block { block } => write!(f, "Block {}", block),
            &Key::BlockSuccessor { block } => write!(f, "Successor of block {}", block),
            &Key::BlockInfo { block } => write!(f, "Block Info for block {}", block),
            &Key::Account { account } => write!(f, "Account Info for account {}", account),
            &Key::Frontier { block } => write!(f, "Frontier for block {}", block),
            &Key::Pending { key } => {
                write!(f, "Pending entry of account {} for block {}", key.account, key.hash)
            }
            &Key::Representation { representative } => {
                write!(f, "Representation of representative {}", representative)
            }
            &Key::Checksum { prefix, mask } => write!(f, "Checksum ({}, {})", prefix, mask),
            &Key::Unchecked { dependency } => write!(f, "Unchecked blocks for dependency {}", dependency),
            &Key::Vote { account } => write!(f, "Vote of representative {}", account),
            &Key::Version => write!(f, "Version"),
            &Key::NodeId => write!(f, "Node ID"),
            &Key::BlockCount => write!(f, "Block Count"),
        }
    }
}
