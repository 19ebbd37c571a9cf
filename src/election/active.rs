/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The registry of live elections, keyed by root.
//!
//! [`ActiveElections`] holds every election that has not yet been retired, plus a bounded history of
//! the elections that were retired after being confirmed. All of it sits behind one mutex. Methods that
//! can lead to network traffic or block processing do not perform either themselves; they return what
//! needs to be done so that the caller can do it after the registry has been unlocked.
//!
//! ## Announcement rounds
//!
//! Every [announce interval](crate::config::NetworkKind::announce_interval), the node calls
//! [`announce_votes`](ActiveElections::announce_votes). For each live election, in one round:
//! 1. If its root is no longer in the ledger, or it has been confirmed and has lived through at least
//!    `ANNOUNCEMENT_MIN - 1` rounds, the election is retired.
//! 2. Otherwise, its winner is rebroadcast, and every `ANNOUNCEMENT_MIN` rounds confirmation of the
//!    winner is requested from the online representatives that have not voted in it yet.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use crate::types::{
    block::Block,
    data_types::{Account, Hash},
    vote::Vote,
};

use super::{
    context::ElectionContext,
    election::{ConfirmationAction, Election, ElectionStatus, ElectionVoteResult},
};

/// Number of announcement rounds a confirmed election lives through before it is retired. Also the
/// period, in rounds, of confirmation requests.
pub const ANNOUNCEMENT_MIN: u32 = 4;

/// Number of announcement rounds after which an unconfirmed election counts as long-running.
pub const ANNOUNCEMENT_LONG: u32 = 20;

/// Upper bound on the confirmation requests made in one announcement round.
pub const ANNOUNCEMENTS_PER_INTERVAL: usize = 32;

pub struct ConflictInfo {
    pub root: Hash,
    pub election: Election,
    pub announcements: u32,
    /// The latest block seen competing with the block the election was started for, if the election is
    /// over a fork.
    pub competing: Option<Block>,
}

/// Request for representatives to confirm `block`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub block: Block,
    /// The representatives to ask. `None` if no online representative is known that has not voted yet,
    /// in which case every peer should be asked.
    pub representatives: Option<Vec<Account>>,
}

/// What the caller of [`ActiveElections::announce_votes`] must do to complete an announcement round.
#[derive(Clone, Debug, Default)]
pub struct AnnouncementRound {
    /// Roots of the elections retired in this round, and whether each was confirmed.
    pub retired: Vec<(Hash, bool)>,
    /// Winners of the live elections. Each should be republished, and voted for by every local
    /// representative.
    pub rebroadcast: Vec<Block>,
    pub confirm_requests: Vec<ConfirmRequest>,
}

struct Roots {
    roots: BTreeMap<Hash, ConflictInfo>,
    confirmed: VecDeque<ElectionStatus>,
}

pub struct ActiveElections {
    inner: Mutex<Roots>,
    confirmation_history_size: usize,
}

impl ActiveElections {
    pub fn new(confirmation_history_size: usize) -> Self {
        Self {
            inner: Mutex::new(Roots {
                roots: BTreeMap::new(),
                confirmed: VecDeque::new(),
            }),
            confirmation_history_size,
        }
    }

    /// Start an election for `block`'s root, unless one is already live. Returns whether one was.
    pub fn start(&self, block: Block, confirmation_action: Option<ConfirmationAction>) -> bool {
        self.start_with(block, None, confirmation_action)
    }

    /// Start an election over the fork between `ours` and `theirs`, unless one is already live for their
    /// root. Either way, `theirs` is recorded as the election's competing block. Returns whether an
    /// election was live.
    pub fn start_fork(&self, ours: Block, theirs: Block) -> bool {
        self.start_with(ours, Some(theirs), None)
    }

    /// The block recorded as competing in the live election for `block`'s root.
    pub fn competing(&self, block: &Block) -> Option<Block> {
        self.inner()
            .roots
            .get(&block.root())
            .and_then(|info| info.competing.clone())
    }

    fn start_with(
        &self,
        block: Block,
        competing: Option<Block>,
        confirmation_action: Option<ConfirmationAction>,
    ) -> bool {
        let root = block.root();
        let mut inner = self.inner();
        if let Some(info) = inner.roots.get_mut(&root) {
            if competing.is_some() {
                info.competing = competing;
            }
            return true;
        }
        inner.roots.insert(
            root,
            ConflictInfo {
                root,
                election: Election::new(block, confirmation_action),
                announcements: 0,
                competing,
            },
        );
        false
    }

    /// Apply `vote` to the election for the root of the block it votes for. If there is no such election,
    /// the result is neither a replay nor processed.
    pub fn vote(
        &self,
        context: &impl ElectionContext,
        vote: &Vote,
        now: Instant,
    ) -> ElectionVoteResult {
        let root = vote.block.root();
        let mut inner = self.inner();
        match inner.roots.get_mut(&root) {
            Some(info) => info.election.vote(context, vote, now),
            None => ElectionVoteResult::default(),
        }
    }

    /// Whether an election is live for `block`'s root.
    pub fn active(&self, block: &Block) -> bool {
        self.inner().roots.contains_key(&block.root())
    }

    /// The current winner of every live election.
    pub fn list_blocks(&self) -> Vec<Block> {
        self.inner()
            .roots
            .values()
            .map(|info| info.election.status.winner.clone())
            .collect()
    }

    /// Drop the election for `block`'s root without recording it in the confirmation history.
    pub fn erase(&self, block: &Block) {
        let root = block.root();
        if self.inner().roots.remove(&root).is_some() {
            log::info!("Election erased for root {}", root);
        }
    }

    /// Drop every live election.
    pub fn stop(&self) {
        self.inner().roots.clear();
    }

    pub fn len(&self) -> usize {
        self.inner().roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Statuses of recently retired, confirmed elections, oldest first.
    pub fn confirmed(&self) -> Vec<ElectionStatus> {
        self.inner().confirmed.iter().cloned().collect()
    }

    /// Run one announcement round.
    ///
    /// `root_exists` tells whether a root is still in the ledger; `representatives` are the online
    /// representatives.
    pub fn announce_votes(
        &self,
        context: &impl ElectionContext,
        root_exists: impl Fn(&Hash) -> bool,
        representatives: &[Account],
    ) -> AnnouncementRound {
        let mut round = AnnouncementRound::default();
        let mut inner = self.inner();
        let mut unconfirmed_long = 0;
        let mut retire = Vec::new();

        for (root, info) in inner.roots.iter_mut() {
            let confirmed = info.election.is_confirmed();
            if !root_exists(root) || (confirmed && info.announcements >= ANNOUNCEMENT_MIN - 1) {
                retire.push((*root, confirmed));
            } else {
                if !confirmed && info.announcements > ANNOUNCEMENT_LONG {
                    unconfirmed_long += 1;
                }
                let winner = info.election.status.winner.clone();
                round.rebroadcast.push(winner.clone());

                if info.announcements % ANNOUNCEMENT_MIN == 2
                    && round.confirm_requests.len() < ANNOUNCEMENTS_PER_INTERVAL
                {
                    let not_voted: Vec<Account> = representatives
                        .iter()
                        .filter(|rep| !info.election.votes.rep_votes.contains_key(rep))
                        .copied()
                        .collect();
                    let representatives = if !not_voted.is_empty()
                        && context.online_stake() != context.online_weight_minimum()
                    {
                        Some(not_voted)
                    } else {
                        None
                    };
                    round.confirm_requests.push(ConfirmRequest {
                        block: winner,
                        representatives,
                    });
                }
            }
            info.announcements += 1;
        }

        for (root, confirmed) in &retire {
            if let Some(info) = inner.roots.remove(root) {
                if *confirmed {
                    inner.confirmed.push_back(info.election.status);
                    if inner.confirmed.len() > self.confirmation_history_size {
                        inner.confirmed.pop_front();
                    }
                }
            }
        }
        round.retired = retire;

        if unconfirmed_long > 0 {
            log::info!(
                "{} elections have been unconfirmed for more than {} announcements",
                unconfirmed_long,
                ANNOUNCEMENT_LONG
            );
        }
        round
    }

    fn inner(&self) -> MutexGuard<'_, Roots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
