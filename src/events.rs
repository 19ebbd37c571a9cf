/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a node emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published on
//! an optional channel; the [event bus](crate::event_bus) thread of a [node](crate::node) drains the
//! channel and passes every event to the handlers registered for its type.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::{
    election::vote_processor::VoteCode,
    ledger::ProcessResult,
    types::data_types::{Account, Amount, Hash},
};

pub enum Event {
    // Events that change the ledger.
    ProcessBlock(ProcessBlockEvent),
    RollbackBlock(RollbackBlockEvent),
    ConfirmBlock(ConfirmBlockEvent),
    FlushStore(FlushStoreEvent),
    // Events that involve receiving a vote.
    ReceiveVote(ReceiveVoteEvent),
    // Election events.
    StartElection(StartElectionEvent),
    UpdateWinner(UpdateWinnerEvent),
    ConfirmElection(ConfirmElectionEvent),
    RetireElection(RetireElectionEvent),
    // Gap events.
    BootstrapNeeded(BootstrapNeededEvent),
}

impl Event {
    /// Send this event on `event_publisher`, if there is one. Events published after the event bus has
    /// shut down are dropped.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A block was run through the ledger, with the given result.
pub struct ProcessBlockEvent {
    pub timestamp: SystemTime,
    pub block: Hash,
    pub result: ProcessResult,
}

pub struct RollbackBlockEvent {
    pub timestamp: SystemTime,
    pub block: Hash,
}

/// An applied block was confirmed by an election.
pub struct ConfirmBlockEvent {
    pub timestamp: SystemTime,
    pub block: Hash,
    pub account: Account,
    pub amount: Amount,
    pub is_send: bool,
}

/// The store's in-memory caches were written to durable storage.
pub struct FlushStoreEvent {
    pub timestamp: SystemTime,
    pub unchecked: usize,
    pub votes: usize,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub representative: Account,
    pub sequence: u64,
    pub block: Hash,
    pub code: VoteCode,
}

pub struct StartElectionEvent {
    pub timestamp: SystemTime,
    pub root: Hash,
    pub block: Hash,
}

/// Votes moved the lead of an election to a different block.
pub struct UpdateWinnerEvent {
    pub timestamp: SystemTime,
    pub root: Hash,
    pub winner: Hash,
}

pub struct ConfirmElectionEvent {
    pub timestamp: SystemTime,
    pub root: Hash,
    pub winner: Hash,
    pub tally: Amount,
}

/// An election was removed from the set of active elections.
pub struct RetireElectionEvent {
    pub timestamp: SystemTime,
    pub root: Hash,
    pub confirmed: bool,
}

/// Enough voting weight was seen for a block that the node does not have for the node to go and fetch
/// it.
pub struct BootstrapNeededEvent {
    pub timestamp: SystemTime,
    pub block: Hash,
}
