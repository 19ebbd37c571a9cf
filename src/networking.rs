/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking.
//!
//! lattice-rs does not implement a wire protocol. Messages received from peers are handed to the node by
//! the embedding application, through [`Node::process_active`](crate::node::Node::process_active) for
//! published blocks and [`Node::vote`](crate::node::Node::vote) for votes. Messages the node wants to
//! send go out through the application's implementation of [`Network`].

use std::net::SocketAddr;

use crate::types::{block::Block, data_types::Account, vote::Vote};

/// Address of a peer.
pub type Endpoint = SocketAddr;

pub trait Network: Clone + Send {
    /// Publish `block` to a random subset of peers, without blocking.
    fn republish_block(&mut self, block: Block);

    /// Relay `vote` to a random subset of peers, without blocking.
    fn republish_vote(&mut self, vote: Vote);

    /// Ask for votes on `block`. If `representatives` is `Some`, ask only the peers that are known to be
    /// those representatives; otherwise ask every peer.
    fn confirm_req(&mut self, block: Block, representatives: Option<Vec<Account>>);

    /// Send `vote` to the peer at `endpoint`.
    fn send_vote(&mut self, endpoint: Endpoint, vote: Vote);
}
