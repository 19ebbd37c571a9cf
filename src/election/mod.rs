/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Representative voting: elections over contested roots, and everything that feeds them.
//!
//! When two blocks compete for the same root (a fork), or when a block first arrives, the node starts an
//! [election](election::Election) for the root in [`ActiveElections`]. Representatives vote for the
//! block they prefer; each vote is weighted by the balance delegated to the representative. An election
//! confirms its leading block once that block beats the runner-up by a margin proportional to the
//! stake that is online, as tracked by [`OnlineReps`].
//!
//! Votes come in through the [`VoteProcessor`]. Votes for blocks the node has not seen yet are tallied
//! in the [`GapCache`], which tells the node when enough weight stands behind a missing block that it
//! is worth fetching.
//!
//! Elections see the rest of the node only through the [`ElectionContext`] trait, so they can be
//! driven with synthetic weights.

pub mod active;

pub mod context;

pub mod election;

pub mod gap_cache;

pub mod online_reps;

pub mod vote_processor;

pub use active::{ActiveElections, AnnouncementRound, ConfirmRequest};
pub use context::ElectionContext;
pub use election::{ConfirmationAction, Election, ElectionStatus, ElectionVoteResult, TallyResult, Votes};
pub use gap_cache::GapCache;
pub use online_reps::OnlineReps;
pub use vote_processor::{VoteCode, VoteProcessor};
