/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust library for the core of block-lattice cryptocurrency nodes: a transactional block store, the
//! ledger state machine that validates, applies and rolls back blocks, and the representative voting
//! engine that resolves forks.
//!
//! In a block lattice, every account owns a chain of blocks and only its owner can extend it. Transfers
//! take two blocks: a send on the sender's chain, and a receive (or open) on the recipient's. Accounts
//! delegate their balance to a representative; when two blocks compete for the same slot in a chain,
//! representatives vote, weighted by delegated balance, and the node adopts the winner.
//!
//! ## Getting started
//!
//! 1. Implement [`KVStore`](store::KVStore) for the key-value store the node should persist into.
//! 2. Implement [`Network`](networking::Network) for the peer-to-peer transport.
//! 3. [Initialize](node::Node::initialize) the store with a [genesis](ledger::Genesis) block.
//! 4. Build and [start](node::NodeSpec::start) a [node](node::Node).

pub mod block_processor;

pub mod config;

pub mod election;

pub(crate) mod event_bus;

pub mod events;

pub mod ledger;

pub mod logging;

pub mod networking;

pub mod node;

pub mod store;

pub mod types;
