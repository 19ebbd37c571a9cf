/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Versioned schema upgrades of the block store.
//!
//! The store records its schema version in the meta table. Every change to the on-disk layout gets a
//! new version and a [`Migration`] from the previous version, appended to the list returned by
//! [`migrations`]. Existing migrations are never edited.
//!
//! On [open](super::block_store::BlockStore::open), [`upgrade`] applies, in order, every migration whose
//! `from` version is at or above the store's current version, bumping the stored version after each
//! one. A store at version `v` therefore runs every migration from `v` onwards exactly once.
//!
//! |From|To|Change|
//! |---|---|---|
//! |1|2|Account records gain `rep_block`.|
//! |2|3|The representation table is rebuilt from account records.|
//! |3|4|The whole-ledger checksum is rebuilt from account heads.|
//! |4|5|Unchecked blocks are keyed by (dependency, block hash). Old unchecked entries are dropped.|
//! |5|6|The total block count is stored in the meta table.|

use std::collections::HashMap;

use borsh::BorshDeserialize;

use crate::types::{
    data_types::{Account, Amount, Hash},
    records::{AccountInfo, AccountInfoV1},
};

use super::{
    block_store::BlockStoreError,
    pluggables::{KVGet, KVGetError, KVStore, Key},
    transaction::Transaction,
    variables,
};

/// Schema version written by this version of the library.
pub const CURRENT_VERSION: u64 = 6;

/// One schema upgrade step, from version `from` to version `from + 1`.
pub struct Migration<K: KVStore> {
    pub from: u64,
    pub name: &'static str,
    pub apply: fn(&mut Transaction<'_, K>) -> Result<(), BlockStoreError>,
}

/// Every migration, in ascending order of `from`.
pub fn migrations<K: KVStore>() -> Vec<Migration<K>> {
    vec![
        Migration {
            from: 1,
            name: "account rep blocks",
            apply: upgrade_v1_to_v2,
        },
        Migration {
            from: 2,
            name: "representation table",
            apply: upgrade_v2_to_v3,
        },
        Migration {
            from: 3,
            name: "checksum",
            apply: upgrade_v3_to_v4,
        },
        Migration {
            from: 4,
            name: "unchecked keys",
            apply: upgrade_v4_to_v5,
        },
        Migration {
            from: 5,
            name: "block count",
            apply: upgrade_v5_to_v6,
        },
    ]
}

/// Bring the store that `txn` writes to up to [`CURRENT_VERSION`].
pub fn upgrade<K: KVStore>(txn: &mut Transaction<'_, K>) -> Result<(), BlockStoreError> {
    let version = txn.version()?;
    if version > CURRENT_VERSION {
        return Err(BlockStoreError::UnsupportedVersion { version });
    }

    for migration in migrations::<K>()
        .into_iter()
        .filter(|migration| migration.from >= version)
    {
        log::info!(
            "Upgrading block store from version {} to {} ({}).",
            migration.from,
            migration.from + 1,
            migration.name
        );
        (migration.apply)(txn)?;
        txn.version_put(migration.from + 1)?;
    }
    Ok(())
}

fn upgrade_v1_to_v2<K: KVStore>(txn: &mut Transaction<'_, K>) -> Result<(), BlockStoreError> {
    for (key, value) in txn.get_prefix(&variables::ACCOUNTS) {
        let account = Account::new(key[1..].try_into().unwrap_or([0u8; 32]));
        let old = AccountInfoV1::deserialize(&mut &*value).map_err(|err| {
            KVGetError::DeserializeValueError {
                key: Key::Account { account },
                source: err,
            }
        })?;
        let rep_block = txn.rep_block(&old.head)?;
        let info = AccountInfo {
            head: old.head,
            rep_block,
            open_block: old.open_block,
            balance: old.balance,
            modified: old.modified,
            block_count: old.block_count,
        };
        txn.account_put(&account, &info)?;
    }
    Ok(())
}

fn upgrade_v2_to_v3<K: KVStore>(txn: &mut Transaction<'_, K>) -> Result<(), BlockStoreError> {
    for (key, _) in txn.get_prefix(&variables::REPRESENTATION) {
        txn.delete(&key);
    }

    let mut weights: HashMap<Account, Amount> = HashMap::new();
    for (_, info) in txn.accounts()? {
        let representative = txn
            .block(&info.rep_block)?
            .and_then(|block| block.representative())
            .ok_or(BlockStoreError::BlockExpectedButNotFound {
                block: info.rep_block,
            })?;
        let weight = weights.entry(representative).or_default();
        *weight = weight.saturating_add(info.balance);
    }
    for (representative, weight) in weights {
        txn.representation_put(&representative, weight)?;
    }
    Ok(())
}

fn upgrade_v3_to_v4<K: KVStore>(txn: &mut Transaction<'_, K>) -> Result<(), BlockStoreError> {
    let checksum = txn
        .accounts()?
        .into_iter()
        .fold(Hash::zero(), |checksum, (_, info)| checksum ^ info.head);
    txn.checksum_put(0, 0, &checksum)
}

fn upgrade_v4_to_v5<K: KVStore>(txn: &mut Transaction<'_, K>) -> Result<(), BlockStoreError> {
    txn.unchecked_clear_stored();
    Ok(())
}

fn upgrade_v5_to_v6<K: KVStore>(txn: &mut Transaction<'_, K>) -> Result<(), BlockStoreError> {
    let count = txn.block_count_total() as u64;
    txn.block_count_put(count)
}
