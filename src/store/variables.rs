/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each block store table is stored in the user-provided key-value
//! store.
//!
//! # List of tables
//!
//! The block store structures its state into the following tables, grouped into 4 categories:
//!
//! ## Blocks
//!
//! |Table|Type|Description|
//! |---|---|---|
//! |Send Blocks|[`Hash`](crate::types::data_types::Hash) -> ([`SendBlock`](crate::types::block::SendBlock), successor)|Legacy send blocks.|
//! |Receive Blocks|[`Hash`](crate::types::data_types::Hash) -> ([`ReceiveBlock`](crate::types::block::ReceiveBlock), successor)|Legacy receive blocks.|
//! |Open Blocks|[`Hash`](crate::types::data_types::Hash) -> ([`OpenBlock`](crate::types::block::OpenBlock), successor)|Legacy open blocks.|
//! |Change Blocks|[`Hash`](crate::types::data_types::Hash) -> ([`ChangeBlock`](crate::types::block::ChangeBlock), successor)|Legacy change blocks.|
//! |State Blocks|[`Hash`](crate::types::data_types::Hash) -> ([`StateBlock`](crate::types::block::StateBlock), successor)|State blocks.|
//! |Tx Blocks|[`Hash`](crate::types::data_types::Hash) -> ([`TxBlock`](crate::types::block::TxBlock), successor)|Unified transaction blocks.|
//! |Block Info|[`Hash`](crate::types::data_types::Hash) -> [`BlockInfo`](crate::types::records::BlockInfo)|Account and balance checkpoints for every `block_info_max`th legacy block.|
//!
//! ## Accounts
//!
//! |Table|Type|Description|
//! |---|---|---|
//! |Accounts|[`Account`](crate::types::data_types::Account) -> [`AccountInfo`](crate::types::records::AccountInfo)|Latest information about every opened account.|
//! |Frontiers|[`Hash`](crate::types::data_types::Hash) -> [`Account`](crate::types::data_types::Account)|Head block of every account chain, mapped to the account.|
//! |Pending|[`PendingKey`](crate::types::records::PendingKey) -> [`PendingInfo`](crate::types::records::PendingInfo)|Funds sent but not yet received.|
//! |Representation|[`Account`](crate::types::data_types::Account) -> [`Amount`](crate::types::data_types::Amount)|Total balance delegated to each representative.|
//! |Checksum|(`u64` prefix, `u8` mask) -> [`Hash`](crate::types::data_types::Hash)|XOR of the heads of all account chains.|
//!
//! ## Caches
//!
//! |Table|Type|Description|
//! |---|---|---|
//! |Unchecked|([`Hash`](crate::types::data_types::Hash) dependency, [`Hash`](crate::types::data_types::Hash) block) -> [`Block`](crate::types::block::Block)|Blocks waiting for a missing dependency. Several blocks may wait on the same dependency.|
//! |Votes|[`Account`](crate::types::data_types::Account) -> [`Vote`](crate::types::vote::Vote)|The latest vote seen from every representative.|
//!
//! ## Meta
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Version|`u64`|Schema version of the store. Absent means version 1.|
//! |Node ID|`[u8; 32]`|Random identity of the node, generated when the store is first opened.|
//! |Block Count|`u64`|Number of blocks across all block tables. Kept in step by every block put and delete.|
//!
//! # Persistence of tables
//!
//! Every value is Borsh-serialized. Keys of mappings are the one-byte table prefix followed by the raw
//! bytes of the key (for composite keys, the raw bytes of each component in order). Because keys sort
//! bytewise, all pending entries of one account, and all unchecked blocks waiting on one dependency,
//! are contiguous and can be read with a single prefix scan.
//!
//! Blocks are stored with the 32 bytes of their **successor** hash appended after the serialized block.
//! The successor of a block is the next block in the same account chain, or zero if the block is its
//! chain's head.

use crate::types::block::BlockKind;

// Blocks
pub const SEND_BLOCKS: [u8; 1] = [0];
pub const RECEIVE_BLOCKS: [u8; 1] = [1];
pub const OPEN_BLOCKS: [u8; 1] = [2];
pub const CHANGE_BLOCKS: [u8; 1] = [3];
pub const STATE_BLOCKS: [u8; 1] = [4];
pub const TX_BLOCKS: [u8; 1] = [5];
pub const BLOCK_INFO: [u8; 1] = [6];

// Accounts
pub const ACCOUNTS: [u8; 1] = [7];
pub const FRONTIERS: [u8; 1] = [8];
pub const PENDING: [u8; 1] = [9];
pub const REPRESENTATION: [u8; 1] = [10];
pub const CHECKSUM: [u8; 1] = [11];

// Caches
pub const UNCHECKED: [u8; 1] = [12];
pub const VOTES: [u8; 1] = [13];

// Meta
pub const META: [u8; 1] = [14];
pub const VERSION: [u8; 1] = [1];
pub const NODE_ID: [u8; 1] = [3];
pub const BLOCK_COUNT: [u8; 1] = [4];

/// Byte-prefix of the table that blocks of `kind` are stored in.
pub const fn block_table(kind: BlockKind) -> [u8; 1] {
    match kind {
        BlockKind::Send => SEND_BLOCKS,
        BlockKind::Receive => RECEIVE_BLOCKS,
        BlockKind::Open => OPEN_BLOCKS,
        BlockKind::Change => CHANGE_BLOCKS,
        BlockKind::State => STATE_BLOCKS,
        BlockKind::Tx => TX_BLOCKS,
    }
}

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

/// Key of the checksum stored for `prefix` and `mask`. The whole-ledger checksum is at `(0, 0)`.
pub fn checksum_key(prefix: u64, mask: u8) -> Vec<u8> {
    let mut key = concat(&CHECKSUM, &prefix.to_be_bytes());
    key.push(mask);
    key
}
