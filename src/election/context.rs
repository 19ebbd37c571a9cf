/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`ElectionContext`] trait: everything an election needs to know about the rest of the node.

use crate::types::{block::Block, data_types::Amount, data_types::Account};

use super::election::Votes;

/// Read-only view of the node that elections tally votes against.
///
/// A node implements this over its ledger, store, online representatives and configuration. Tests
/// implement it over fixed, synthetic weights.
pub trait ElectionContext {
    /// Voting weight of `representative`.
    fn weight(&self, representative: &Account) -> Amount;

    /// Voting weight that is currently online, never less than
    /// [`online_weight_minimum`](Self::online_weight_minimum).
    fn online_stake(&self) -> Amount;

    /// Total voting weight an election's votes must add up to before the election may change its
    /// winner.
    fn online_weight_minimum(&self) -> Amount;

    /// The margin by which the leading block of an election must beat the runner-up for the election to
    /// be confirmed.
    fn quorum_delta(&self) -> Amount;

    /// Whether the node is on a test network, where the minimum vote weight is not enforced.
    fn is_test_network(&self) -> bool;

    /// Sum the weights of the representatives voting for each block in `votes`, in descending order of
    /// total weight.
    fn tally(&self, votes: &Votes) -> Vec<(Amount, Block)>;
}
