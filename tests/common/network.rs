use std::sync::{Arc, Mutex};

use lattice_rs::{
    networking::{Endpoint, Network},
    types::{block::Block, data_types::Account, vote::Vote},
};

/// A message the node asked the network to send.
#[derive(Clone, Debug)]
pub(crate) enum Sent {
    Block(Block),
    Vote(Vote),
    ConfirmReq(Block, Option<Vec<Account>>),
    VoteTo(Endpoint, Vote),
}

/// A network that sends nothing, and records everything it is asked to send.
#[derive(Clone)]
pub(crate) struct RecordingNetwork {
    sent: Arc<Mutex<Vec<Sent>>>,
}

impl RecordingNetwork {
    pub(crate) fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn republished_votes(&self) -> Vec<Vote> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Vote(vote) => Some(vote),
                _ => None,
            })
            .collect()
    }

    fn record(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent)
    }
}

impl Network for RecordingNetwork {
    fn republish_block(&mut self, block: Block) {
        self.record(Sent::Block(block))
    }

    fn republish_vote(&mut self, vote: Vote) {
        self.record(Sent::Vote(vote))
    }

    fn confirm_req(&mut self, block: Block, representatives: Option<Vec<Account>>) {
        self.record(Sent::ConfirmReq(block, representatives))
    }

    fn send_vote(&mut self, endpoint: Endpoint, vote: Vote) {
        self.record(Sent::VoteTo(endpoint, vote))
    }
}
