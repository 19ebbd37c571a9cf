/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Entry point for votes received from the network.
//!
//! The [`VoteProcessor`] checks a vote's signature, records it as its representative's latest vote if
//! its sequence is the highest seen, and applies it to the live election it is for. The resulting
//! [`VoteCode`] tells the network layer whether the vote is worth relaying.

use std::{sync::Arc, time::Instant};

use crate::{
    store::{BlockStore, BlockStoreError, KVStore},
    types::vote::Vote,
};

use super::{active::ActiveElections, context::ElectionContext, election::ElectionVoteResult};

/// If the latest stored vote of a representative is more than this many sequences ahead of a vote
/// received from a peer, the stored vote is sent back to the peer.
pub const VOTE_SEQUENCE_RESEND_GAP: u64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteCode {
    /// The vote's signature is invalid.
    Invalid,
    /// The vote is old, or a repeat of one already seen.
    Replay,
    /// The vote is new.
    Vote,
}

pub struct VoteOutcome {
    pub code: VoteCode,
    /// What the vote did to the election it is for.
    pub election: ElectionVoteResult,
    /// A newer vote by the same representative, to be sent back to the peer the vote came from.
    pub reply: Option<Vote>,
}

pub struct VoteProcessor<K: KVStore> {
    block_store: Arc<BlockStore<K>>,
    active: Arc<ActiveElections>,
}

impl<K: KVStore> VoteProcessor<K> {
    pub fn new(block_store: Arc<BlockStore<K>>, active: Arc<ActiveElections>) -> Self {
        Self {
            block_store,
            active,
        }
    }

    pub fn vote(
        &self,
        context: &impl ElectionContext,
        vote: &Vote,
        now: Instant,
    ) -> Result<VoteOutcome, BlockStoreError> {
        if !vote.validate() {
            log::debug!("Invalid vote from {}", vote.account);
            return Ok(VoteOutcome {
                code: VoteCode::Invalid,
                election: ElectionVoteResult::default(),
                reply: None,
            });
        }

        let max_vote = self.block_store.vote_max(vote.clone())?;
        let election = self.active.vote(context, vote, now);
        let code = if !election.replay || max_vote.sequence > vote.sequence {
            VoteCode::Vote
        } else {
            VoteCode::Replay
        };

        let reply = if max_vote.sequence > vote.sequence.saturating_add(VOTE_SEQUENCE_RESEND_GAP) {
            Some(max_vote)
        } else {
            None
        };

        log::debug!(
            "Vote from: {} sequence: {} block: {} status: {:?}",
            vote.account,
            vote.sequence,
            vote.block.hash(),
            code
        );
        Ok(VoteOutcome {
            code,
            election,
            reply,
        })
    }
}
