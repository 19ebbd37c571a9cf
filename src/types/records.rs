/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-account and per-block metadata records kept in the block store alongside the blocks themselves.

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{Account, Amount, Hash};

/// Latest information about an account.
///
/// # Invariants
///
/// - `head` always resolves to a stored block of the account's chain.
/// - `block_count` is the number of blocks from `open_block` to `head`, inclusive.
/// - `rep_block` is the most recent block in the chain (at or before `head`) that names a
///   representative.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountInfo {
    pub head: Hash,
    pub rep_block: Hash,
    pub open_block: Hash,
    pub balance: Amount,
    /// Seconds since the Unix Epoch at which this record was last written.
    pub modified: u64,
    pub block_count: u64,
}

/// Account record as stored by schema version 1, before accounts tracked their representative block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountInfoV1 {
    pub head: Hash,
    pub open_block: Hash,
    pub balance: Amount,
    pub modified: u64,
    pub block_count: u64,
}

/// Key of a receivable entry: the account that can receive it and the hash of the send block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct PendingKey {
    pub account: Account,
    pub hash: Hash,
}

impl PendingKey {
    pub fn new(account: Account, hash: Hash) -> Self {
        Self { account, hash }
    }
}

/// Value of a receivable entry: who sent it, and how much.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PendingInfo {
    pub source: Account,
    pub amount: Amount,
}

impl PendingInfo {
    pub fn new(source: Account, amount: Amount) -> Self {
        Self { source, amount }
    }
}

/// Checkpoint stored for every `block_info_max`th block of a legacy chain, so that the owning
/// account and balance at that block can be found without walking to the chain's head or tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockInfo {
    pub account: Account,
    pub balance: Amount,
}
