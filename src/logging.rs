/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [config](crate::config::Configuration).
//!
//! lattice-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ConfirmBlock](crate::events::ConfirmBlockEvent) is printed:
//!
//! ```text
//! ConfirmBlock, 1701329264, fNGCJyk, Id5u7f6, 1000000, true
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the hash of the confirmed
//!   block.
//! - The fourth value is the first seven characters of the Base64 encoding of the account that owns it.
//! - The fifth value is the amount the block moved, in raw units.
//! - The sixth value is whether the block was a send.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const PROCESS_BLOCK: &str = "ProcessBlock";
pub const ROLLBACK_BLOCK: &str = "RollbackBlock";
pub const CONFIRM_BLOCK: &str = "ConfirmBlock";
pub const FLUSH_STORE: &str = "FlushStore";

pub const RECEIVE_VOTE: &str = "ReceiveVote";

pub const START_ELECTION: &str = "StartElection";
pub const UPDATE_WINNER: &str = "UpdateWinner";
pub const CONFIRM_ELECTION: &str = "ConfirmElection";
pub const RETIRE_ELECTION: &str = "RetireElection";

pub const BOOTSTRAP_NEEDED: &str = "BootstrapNeeded";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ProcessBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |process_block_event: &ProcessBlockEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                PROCESS_BLOCK,
                secs_since_unix_epoch(process_block_event.timestamp),
                first_seven_base64_chars(&process_block_event.block.bytes()),
                process_block_event.result
            )
        };
        Box::new(logger)
    }
}

impl Logger for RollbackBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |rollback_block_event: &RollbackBlockEvent| {
            log::info!(
                "{}, {}, {}",
                ROLLBACK_BLOCK,
                secs_since_unix_epoch(rollback_block_event.timestamp),
                first_seven_base64_chars(&rollback_block_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConfirmBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |confirm_block_event: &ConfirmBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                CONFIRM_BLOCK,
                secs_since_unix_epoch(confirm_block_event.timestamp),
                first_seven_base64_chars(&confirm_block_event.block.bytes()),
                first_seven_base64_chars(&confirm_block_event.account.bytes()),
                confirm_block_event.amount,
                confirm_block_event.is_send
            )
        };
        Box::new(logger)
    }
}

impl Logger for FlushStoreEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |flush_store_event: &FlushStoreEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FLUSH_STORE,
                secs_since_unix_epoch(flush_store_event.timestamp),
                flush_store_event.unchecked,
                flush_store_event.votes
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_vote_event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {:?}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(receive_vote_event.timestamp),
                first_seven_base64_chars(&receive_vote_event.representative.bytes()),
                receive_vote_event.sequence,
                first_seven_base64_chars(&receive_vote_event.block.bytes()),
                receive_vote_event.code
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartElectionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_election_event: &StartElectionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_ELECTION,
                secs_since_unix_epoch(start_election_event.timestamp),
                first_seven_base64_chars(&start_election_event.root.bytes()),
                first_seven_base64_chars(&start_election_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateWinnerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_winner_event: &UpdateWinnerEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_WINNER,
                secs_since_unix_epoch(update_winner_event.timestamp),
                first_seven_base64_chars(&update_winner_event.root.bytes()),
                first_seven_base64_chars(&update_winner_event.winner.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConfirmElectionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |confirm_election_event: &ConfirmElectionEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                CONFIRM_ELECTION,
                secs_since_unix_epoch(confirm_election_event.timestamp),
                first_seven_base64_chars(&confirm_election_event.root.bytes()),
                first_seven_base64_chars(&confirm_election_event.winner.bytes()),
                confirm_election_event.tally
            )
        };
        Box::new(logger)
    }
}

impl Logger for RetireElectionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |retire_election_event: &RetireElectionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RETIRE_ELECTION,
                secs_since_unix_epoch(retire_election_event.timestamp),
                first_seven_base64_chars(&retire_election_event.root.bytes()),
                retire_election_event.confirmed
            )
        };
        Box::new(logger)
    }
}

impl Logger for BootstrapNeededEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |bootstrap_needed_event: &BootstrapNeededEvent| {
            log::info!(
                "{}, {}, {}",
                BOOTSTRAP_NEEDED,
                secs_since_unix_epoch(bootstrap_needed_event.timestamp),
                first_seven_base64_chars(&bootstrap_needed_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
