/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A single election: the consensus process for one contested root.
//!
//! An [`Election`] collects the latest vote of every representative for the blocks competing for its
//! root, in [`Votes`]. Every vote it accepts is folded into the tally, after which the election checks
//! for quorum. The election is confirmed when its leading block beats the runner-up by more than the
//! quorum delta; confirmation happens at most once.
//!
//! ## Accepting votes
//!
//! Votes from representatives with little weight are ignored: below 0.1% of online stake a vote is
//! treated as a replay. Above that, a representative's votes are rate-limited with a cooldown that
//! shrinks as the representative's weight grows:
//!
//! |Weight, as a fraction of online stake|Cooldown|
//! |---|---|
//! |0.1% to 1%|15 s|
//! |1% to 5%|5 s|
//! |5% or above|1 s|
//!
//! The first vote from a representative is always accepted. A later vote is accepted if it supersedes
//! the last accepted one (higher sequence, or same sequence and higher block hash) and the cooldown has
//! passed since the last accepted one. Every other vote is a replay.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::types::{
    block::Block,
    data_types::{Account, Amount, Hash},
    vote::Vote,
};

use super::context::ElectionContext;

/// Stand-in representative that "votes" for the block an election or gap entry was created with, so
/// that that block always appears in the tally, with zero weight.
pub const NOT_AN_ACCOUNT: Account = Account::new([0xff; 32]);

/// Callback run with the winning block once an election is confirmed.
pub type ConfirmationAction = Arc<dyn Fn(&Block) + Send + Sync>;

/// What a vote did to a [`Votes`] tally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TallyResult {
    /// First vote seen from this representative.
    Vote,
    /// The representative changed the block it votes for.
    Changed,
    /// The representative voted for the same block again.
    Confirm,
}

/// The latest block each representative voted for, for one root.
#[derive(Clone, Debug)]
pub struct Votes {
    /// The root the votes are for.
    pub id: Hash,
    pub rep_votes: HashMap<Account, Block>,
}

impl Votes {
    pub fn new(block: Block) -> Self {
        let id = block.root();
        let mut rep_votes = HashMap::new();
        rep_votes.insert(NOT_AN_ACCOUNT, block);
        Self { id, rep_votes }
    }

    pub fn vote(&mut self, vote: &Vote) -> TallyResult {
        match self.rep_votes.get_mut(&vote.account) {
            None => {
                self.rep_votes.insert(vote.account, vote.block.clone());
                TallyResult::Vote
            }
            Some(existing) if existing.hash() != vote.block.hash() => {
                *existing = vote.block.clone();
                TallyResult::Changed
            }
            Some(_) => TallyResult::Confirm,
        }
    }

    /// Whether every vote is for the same block.
    pub fn uncontested(&self) -> bool {
        let mut hashes = self.rep_votes.values().map(Block::hash);
        match hashes.next() {
            Some(first) => hashes.all(|hash| hash == first),
            None => true,
        }
    }
}

/// When a representative last had a vote accepted, and what it was.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteInfo {
    pub time: Instant,
    pub sequence: u64,
    pub hash: Hash,
}

impl VoteInfo {
    /// Whether `vote` supersedes the vote this records.
    pub fn is_superseded_by(&self, vote: &Vote) -> bool {
        self.sequence < vote.sequence
            || (self.sequence == vote.sequence && self.hash < vote.block.hash())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElectionStatus {
    pub winner: Block,
    pub tally: Amount,
}

/// A confirmed election's winner, to be processed once the election registry has been unlocked.
#[derive(Clone)]
pub struct Confirmation {
    pub root: Hash,
    pub winner: Block,
    pub tally: Amount,
    pub action: Option<ConfirmationAction>,
}

/// Result of [`Election::vote`].
#[derive(Clone, Default)]
pub struct ElectionVoteResult {
    /// The vote was a replay of, or older than, a vote already accepted from the same representative.
    pub replay: bool,
    /// The vote was accepted and folded into the tally. Accepted votes should be republished.
    pub processed: bool,
    /// The election's winner changed to this block, which should be forced into the ledger.
    pub new_winner: Option<Block>,
    /// The vote confirmed the election.
    pub confirmation: Option<Confirmation>,
}

pub struct Election {
    pub votes: Votes,
    last_votes: HashMap<Account, VoteInfo>,
    pub status: ElectionStatus,
    confirmed: AtomicBool,
    confirmation_action: Option<ConfirmationAction>,
}

impl Election {
    pub fn new(block: Block, confirmation_action: Option<ConfirmationAction>) -> Self {
        Self {
            votes: Votes::new(block.clone()),
            last_votes: HashMap::new(),
            status: ElectionStatus {
                winner: block,
                tally: Amount::zero(),
            },
            confirmed: AtomicBool::new(false),
            confirmation_action,
        }
    }

    pub fn root(&self) -> Hash {
        self.votes.id
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::SeqCst)
    }

    pub fn last_vote(&self, representative: &Account) -> Option<&VoteInfo> {
        self.last_votes.get(representative)
    }

    /// Apply `vote`, received at `now`, to this election.
    pub fn vote(&mut self, context: &impl ElectionContext, vote: &Vote, now: Instant) -> ElectionVoteResult {
        let online_stake = context.online_stake();
        let weight = context.weight(&vote.account);
        if !context.is_test_network() && weight <= Amount::new(online_stake.int() / 1000) {
            return ElectionVoteResult {
                replay: true,
                ..Default::default()
            };
        }

        let cooldown = if weight < Amount::new(online_stake.int() / 100) {
            Duration::from_secs(15)
        } else if weight < Amount::new(online_stake.int() / 20) {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(1)
        };

        let should_process = match self.last_votes.get(&vote.account) {
            None => true,
            Some(last_vote) => {
                last_vote.is_superseded_by(vote)
                    && now.saturating_duration_since(last_vote.time) >= cooldown
            }
        };
        if !should_process {
            return ElectionVoteResult {
                replay: true,
                ..Default::default()
            };
        }

        self.last_votes.insert(
            vote.account,
            VoteInfo {
                time: now,
                sequence: vote.sequence,
                hash: vote.block.hash(),
            },
        );
        self.votes.vote(vote);
        let (new_winner, confirmation) = self.confirm_if_quorum(context);
        ElectionVoteResult {
            replay: false,
            processed: true,
            new_winner,
            confirmation,
        }
    }

    /// Re-tally the votes. If the votes seen add up to at least the online weight minimum, the leading
    /// block becomes the winner; if it beats the runner-up by more than the quorum delta, the election is
    /// confirmed.
    ///
    /// Returns the new winner if the winner changed, and the confirmation if this call confirmed the
    /// election.
    pub fn confirm_if_quorum(
        &mut self,
        context: &impl ElectionContext,
    ) -> (Option<Block>, Option<Confirmation>) {
        let tally = context.tally(&self.votes);
        let Some((leading_weight, leading_block)) = tally.first() else {
            return (None, None);
        };
        self.status.tally = *leading_weight;

        let sum: Amount = tally.iter().map(|(weight, _)| *weight).sum();
        let mut new_winner = None;
        if sum >= context.online_weight_minimum() && leading_block.hash() != self.status.winner.hash() {
            self.status.winner = leading_block.clone();
            new_winner = Some(leading_block.clone());
        }

        if !Self::have_quorum(&tally, context.quorum_delta()) {
            return (new_winner, None);
        }

        if !self.votes.uncontested() {
            log::info!("Vote tally for root {}:", self.votes.id);
            for (weight, block) in &tally {
                log::info!("Block {} weight {}", block.hash(), weight);
            }
        }
        (new_winner, self.confirm_once())
    }

    /// Whether the leading block in `tally` beats the runner-up by more than `delta`.
    pub fn have_quorum(tally: &[(Amount, Block)], delta: Amount) -> bool {
        let Some((first, _)) = tally.first() else {
            return false;
        };
        let second = tally.get(1).map_or(Amount::zero(), |(weight, _)| *weight);
        *first > second.saturating_add(delta)
    }

    /// Mark the election as confirmed. Returns the confirmation the first time it is called, and `None`
    /// on every later call.
    pub fn confirm_once(&self) -> Option<Confirmation> {
        if self.confirmed.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(Confirmation {
            root: self.votes.id,
            winner: self.status.winner.clone(),
            tally: self.status.tally,
            action: self.confirmation_action.clone(),
        })
    }
}
