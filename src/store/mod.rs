/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The persistent state of a node.
//!
//! # The Block Store
//!
//! The block store durably holds every ledger entity: the blocks of every account chain, the latest
//! information about every account, receivable (pending) entries, frontiers, balance checkpoints,
//! representative weights, the whole-ledger checksum, unchecked blocks, and the latest vote of every
//! representative. The documentation for the [`variables`] submodule lists every table.
//!
//! # Pluggable persistence
//!
//! - The block store is kept in persistent storage, most probably in the host's filesystem.
//! - Library users get to choose how exactly this is done.
//! - The block store merely requires that whatever the user provides as a persistence mechanism
//!   implements the abstract functionality of a key-value store with ordered prefix scans and atomic,
//!   batched writes.
//! - This abstract functionality is made concrete by the traits defined in the [`pluggables`] module.
//!
//! # Accessing the Block Store
//!
//! - Implementations of the pluggable persistence traits get wrapped inside a [`BlockStore`], which
//!   hands out [`Transaction`]s.
//! - Transactions put every table in the right place in the key-value store and provide typed readers
//!   and writers for them.

pub mod block_store;

pub mod cache;

pub mod migrations;

pub mod pluggables;

pub mod transaction;

pub mod variables;

pub use block_store::{BlockStore, BlockStoreError};
pub use pluggables::{KVGet, KVStore, WriteBatch};
pub use transaction::Transaction;
