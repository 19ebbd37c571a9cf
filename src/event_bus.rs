/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that passes published [events](crate::events) to their handlers.
//!
//! Handlers are registered per event type when a [node](crate::node::NodeSpec) is built. If the node is
//! configured with `log_events`, the default [logger](crate::logging) of every event type is registered
//! ahead of the user's handlers.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) process_block_handlers: Vec<HandlerPtr<ProcessBlockEvent>>,
    pub(crate) rollback_block_handlers: Vec<HandlerPtr<RollbackBlockEvent>>,
    pub(crate) confirm_block_handlers: Vec<HandlerPtr<ConfirmBlockEvent>>,
    pub(crate) flush_store_handlers: Vec<HandlerPtr<FlushStoreEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) start_election_handlers: Vec<HandlerPtr<StartElectionEvent>>,
    pub(crate) update_winner_handlers: Vec<HandlerPtr<UpdateWinnerEvent>>,
    pub(crate) confirm_election_handlers: Vec<HandlerPtr<ConfirmElectionEvent>>,
    pub(crate) retire_election_handlers: Vec<HandlerPtr<RetireElectionEvent>>,
    pub(crate) bootstrap_needed_handlers: Vec<HandlerPtr<BootstrapNeededEvent>>,
}

impl EventHandlers {
    /// Handlers that do nothing but log every event with its default logger.
    pub(crate) fn with_default_loggers() -> Self {
        EventHandlers {
            process_block_handlers: vec![ProcessBlockEvent::get_logger()],
            rollback_block_handlers: vec![RollbackBlockEvent::get_logger()],
            confirm_block_handlers: vec![ConfirmBlockEvent::get_logger()],
            flush_store_handlers: vec![FlushStoreEvent::get_logger()],
            receive_vote_handlers: vec![ReceiveVoteEvent::get_logger()],
            start_election_handlers: vec![StartElectionEvent::get_logger()],
            update_winner_handlers: vec![UpdateWinnerEvent::get_logger()],
            confirm_election_handlers: vec![ConfirmElectionEvent::get_logger()],
            retire_election_handlers: vec![RetireElectionEvent::get_logger()],
            bootstrap_needed_handlers: vec![BootstrapNeededEvent::get_logger()],
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.process_block_handlers.is_empty()
            && self.rollback_block_handlers.is_empty()
            && self.confirm_block_handlers.is_empty()
            && self.flush_store_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.start_election_handlers.is_empty()
            && self.update_winner_handlers.is_empty()
            && self.confirm_election_handlers.is_empty()
            && self.retire_election_handlers.is_empty()
            && self.bootstrap_needed_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::ProcessBlock(process_block_event) => self
                .process_block_handlers
                .iter()
                .for_each(|handler| handler(&process_block_event)),

            Event::RollbackBlock(rollback_block_event) => self
                .rollback_block_handlers
                .iter()
                .for_each(|handler| handler(&rollback_block_event)),

            Event::ConfirmBlock(confirm_block_event) => self
                .confirm_block_handlers
                .iter()
                .for_each(|handler| handler(&confirm_block_event)),

            Event::FlushStore(flush_store_event) => self
                .flush_store_handlers
                .iter()
                .for_each(|handler| handler(&flush_store_event)),

            Event::ReceiveVote(receive_vote_event) => self
                .receive_vote_handlers
                .iter()
                .for_each(|handler| handler(&receive_vote_event)),

            Event::StartElection(start_election_event) => self
                .start_election_handlers
                .iter()
                .for_each(|handler| handler(&start_election_event)),

            Event::UpdateWinner(update_winner_event) => self
                .update_winner_handlers
                .iter()
                .for_each(|handler| handler(&update_winner_event)),

            Event::ConfirmElection(confirm_election_event) => self
                .confirm_election_handlers
                .iter()
                .for_each(|handler| handler(&confirm_election_event)),

            Event::RetireElection(retire_election_event) => self
                .retire_election_handlers
                .iter()
                .for_each(|handler| handler(&retire_election_event)),

            Event::BootstrapNeeded(bootstrap_needed_event) => self
                .bootstrap_needed_handlers
                .iter()
                .for_each(|handler| handler(&bootstrap_needed_event)),
        }
    }
}

/// Start the event bus thread. The thread exits when it receives on `shutdown_signal`, or when every
/// publisher of `event_subscriber` has been dropped.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
