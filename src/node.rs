/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and initialize the storage of a node.
//!
//! A [`Node`] wires together the [block store](crate::store), the [ledger](crate::ledger), the
//! [block processor](crate::block_processor) and the [election engine](crate::election), and talks to
//! peers through the application's implementation of [`Network`].
//!
//! ## Starting a node
//!
//! ```ignore
//! Node::initialize(kv_store.clone(), &genesis)?;
//!
//! let node = NodeSpec::builder()
//!     .kv_store(kv_store)
//!     .network(network)
//!     .configuration(configuration)
//!     .representatives(vec![representative_keypair])
//!     .on_confirm_block(confirm_block_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! Starting a node spawns three threads:
//! 1. The block processing thread, which drains the [`BlockProcessor`] and starts elections for the
//!    live blocks it applies and the forks it reports.
//! 2. The ongoing thread, which runs an announcement round every
//!    [announce interval](crate::config::NetworkKind::announce_interval), purges the gap cache, and
//!    periodically flushes the store's caches.
//! 3. The event bus thread, if any event handlers are registered.
//!
//! All three are shut down when the `Node` is dropped.
//!
//! ## Failure
//!
//! Public methods return [`LedgerError`]s. On the node's own threads, a `LedgerError` means the ledger
//! can no longer be trusted: it is logged and the thread panics.

use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use typed_builder::TypedBuilder;

use crate::{
    block_processor::{BatchOutcome, BlockProcessor, Fork},
    config::{Configuration, ElectionConfiguration},
    election::{
        ActiveElections, AnnouncementRound, ConfirmationAction, ElectionContext, ElectionVoteResult,
        GapCache, OnlineReps, VoteCode, VoteProcessor, Votes,
    },
    event_bus::*,
    events::*,
    ledger::{Genesis, Ledger, LedgerError, ProcessReturn, RepWeights},
    networking::{Endpoint, Network},
    store::{BlockStore, KVGet, KVStore},
    types::{
        block::Block,
        data_types::{Account, Amount, Hash},
        keypair::Keypair,
        vote::Vote,
    },
};

/// Interval between flushes of the store's in-memory caches by the ongoing thread.
pub const STORE_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.kv_store(...)`
    - `.network(...)`
    - `.configuration(...)`

    Optional:
    - `.representatives(...)`
    - `.on_process_block(...)`
    - `.on_rollback_block(...)`
    - `.on_confirm_block(...)`
    - `.on_flush_store(...)`
    - `.on_receive_vote(...)`
    - `.on_start_election(...)`
    - `.on_update_winner(...)`
    - `.on_confirm_election(...)`
    - `.on_retire_election(...)`
    - `.on_bootstrap_needed(...)`
"))]
pub struct NodeSpec<K: KVStore, N: Network + 'static> {
    #[builder(setter(doc = "Set the implementation of the node's Key-Value store. The argument must implement the [KVStore](crate::store::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the parameters of the node. Required."))]
    configuration: Configuration,
    #[builder(default, setter(doc = "Set the keypairs of the representatives this node votes as. Optional, defaults to none."))]
    representatives: Vec<Keypair>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProcessBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProcessBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is run through the ledger by the block processor. Optional."))]
    on_process_block: Option<HandlerPtr<ProcessBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RollbackBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RollbackBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is rolled back to make way for an election's winner. Optional."))]
    on_rollback_block: Option<HandlerPtr<RollbackBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ConfirmBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ConfirmBlockEvent>),
    doc = "Register a handler closure to be invoked after a block in the ledger is confirmed by an election. Optional."))]
    on_confirm_block: Option<HandlerPtr<ConfirmBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FlushStoreEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FlushStoreEvent>),
    doc = "Register a handler closure to be invoked after the store's caches are flushed. Optional."))]
    on_flush_store: Option<HandlerPtr<FlushStoreEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the node processes a vote. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartElectionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartElectionEvent>),
    doc = "Register a handler closure to be invoked after an election is started. Optional."))]
    on_start_election: Option<HandlerPtr<StartElectionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateWinnerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateWinnerEvent>),
    doc = "Register a handler closure to be invoked after an election changes its winner. Optional."))]
    on_update_winner: Option<HandlerPtr<UpdateWinnerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ConfirmElectionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ConfirmElectionEvent>),
    doc = "Register a handler closure to be invoked after an election is confirmed. Optional."))]
    on_confirm_election: Option<HandlerPtr<ConfirmElectionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RetireElectionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RetireElectionEvent>),
    doc = "Register a handler closure to be invoked after an election is retired. Optional."))]
    on_retire_election: Option<HandlerPtr<RetireElectionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BootstrapNeededEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BootstrapNeededEvent>),
    doc = "Register a handler closure to be invoked when enough weight has voted for a missing block that it should be fetched. Optional."))]
    on_bootstrap_needed: Option<HandlerPtr<BootstrapNeededEvent>>,
}

impl<K: KVStore, N: Network + 'static> NodeSpec<K, N> {
    /// Open the block store and start all threads of the node, returning a handle to them.
    pub fn start(self) -> Result<Node<K, N>, LedgerError> {
        let log_events = self.configuration.log_events;
        let (ledger_config, election_config, block_processor_config, gap_cache_config) =
            self.configuration.split();

        let mut event_handlers = if log_events {
            EventHandlers::with_default_loggers()
        } else {
            EventHandlers::default()
        };
        event_handlers.process_block_handlers.extend(self.on_process_block);
        event_handlers.rollback_block_handlers.extend(self.on_rollback_block);
        event_handlers.confirm_block_handlers.extend(self.on_confirm_block);
        event_handlers.flush_store_handlers.extend(self.on_flush_store);
        event_handlers.receive_vote_handlers.extend(self.on_receive_vote);
        event_handlers.start_election_handlers.extend(self.on_start_election);
        event_handlers.update_winner_handlers.extend(self.on_update_winner);
        event_handlers.confirm_election_handlers.extend(self.on_confirm_election);
        event_handlers.retire_election_handlers.extend(self.on_retire_election);
        event_handlers.bootstrap_needed_handlers.extend(self.on_bootstrap_needed);

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let block_store = Arc::new(BlockStore::open(self.kv_store)?);
        let ledger = Arc::new(Ledger::new(
            ledger_config.block_info_max,
            RepWeights::new(
                ledger_config.bootstrap_weights,
                ledger_config.bootstrap_weight_max_blocks,
            ),
        ));
        let gap_cache = Arc::new(GapCache::new(
            gap_cache_config.max,
            gap_cache_config.bootstrap_fraction_numerator,
        ));
        let block_processor = Arc::new(BlockProcessor::new(
            block_processor_config,
            block_store.clone(),
            ledger.clone(),
            gap_cache.clone(),
            event_publisher.clone(),
        ));
        let active = Arc::new(ActiveElections::new(
            election_config.confirmation_history_size,
        ));
        let core = Arc::new(NodeCore {
            vote_processor: VoteProcessor::new(block_store.clone(), active.clone()),
            online_reps: OnlineReps::new(election_config.online_weight_minimum),
            block_store,
            ledger,
            block_processor,
            active,
            gap_cache,
            network: Mutex::new(self.network),
            election_config,
            representatives: self.representatives,
            event_publisher,
        });

        let block_processing = start_block_processing(core.clone());

        let (ongoing_shutdown, ongoing_shutdown_receiver) = mpsc::channel();
        let ongoing = start_ongoing(core.clone(), ongoing_shutdown_receiver);

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Ok(Node {
            core,
            block_processing: Some(block_processing),
            ongoing: Some(ongoing),
            ongoing_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a node. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Node<K: KVStore, N: Network + 'static> {
    core: Arc<NodeCore<K, N>>,
    block_processing: Option<JoinHandle<()>>,
    ongoing: Option<JoinHandle<()>>,
    ongoing_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore, N: Network + 'static> Node<K, N> {
    /// Write `genesis` into the empty store `kv_store`.
    pub fn initialize(kv_store: K, genesis: &Genesis) -> Result<(), LedgerError> {
        let block_store = BlockStore::open(kv_store)?;
        let mut txn = block_store.tx_begin_write();
        genesis.initialize(&mut txn)?;
        txn.commit();
        Ok(())
    }

    /// Queue `block`, published by a peer, for processing.
    pub fn process_active(&self, block: Block) {
        self.core.block_processor.add(block, Instant::now());
    }

    /// Process `block` immediately in its own write transaction, bypassing the block processor queue. No
    /// election is started for it.
    pub fn process(&self, block: &Block) -> Result<ProcessReturn, LedgerError> {
        let mut txn = self.core.block_store.tx_begin_write();
        let result = self.core.ledger.process(&mut txn, block)?;
        txn.commit();
        Ok(result)
    }

    /// Process `vote`, received from the peer at `sender`.
    pub fn vote(&self, vote: &Vote, sender: Endpoint) -> Result<VoteCode, LedgerError> {
        self.core.receive_vote(vote, sender)
    }

    /// Start an election for `block`'s root, running `confirmation_action` with the winner once it is
    /// confirmed. Returns whether an election for the root was already live.
    pub fn start_election(&self, block: Block, confirmation_action: Option<ConfirmationAction>) -> bool {
        self.core.start_election(block, confirmation_action)
    }

    /// Report a confirmed block that is in the ledger through a [`ConfirmBlockEvent`].
    pub fn process_confirmed(&self, block: &Block) -> Result<(), LedgerError> {
        self.core.process_confirmed(block)
    }

    /// Flush the store's caches. Returns the number of unchecked blocks and votes flushed.
    pub fn flush(&self) -> Result<(usize, usize), LedgerError> {
        self.core.flush()
    }

    /// Block until the block processor is idle.
    pub fn flush_blocks(&self) {
        self.core.block_processor.flush()
    }

    /// Run one announcement round now, in addition to the rounds the ongoing thread runs.
    pub fn ongoing_announce(&self) -> Result<AnnouncementRound, LedgerError> {
        self.core.ongoing_announce()
    }

    pub fn block_store(&self) -> &BlockStore<K> {
        &self.core.block_store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.core.ledger
    }

    pub fn active_elections(&self) -> &ActiveElections {
        &self.core.active
    }

    pub fn online_reps(&self) -> &OnlineReps {
        &self.core.online_reps
    }

    pub fn gap_cache(&self) -> &GapCache {
        &self.core.gap_cache
    }
}

impl<K: KVStore, N: Network + 'static> Drop for Node<K, N> {
    fn drop(&mut self) {
        self.core.block_processor.stop();
        if let Some(block_processing) = self.block_processing.take() {
            let _ = block_processing.join();
        }

        let _ = self.ongoing_shutdown.send(());
        if let Some(ongoing) = self.ongoing.take() {
            let _ = ongoing.join();
        }

        self.core.active.stop();

        if let Some(event_bus_shutdown) = &self.event_bus_shutdown {
            let _ = event_bus_shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}

/// State shared between a [`Node`] handle and its threads.
struct NodeCore<K: KVStore, N: Network> {
    block_store: Arc<BlockStore<K>>,
    ledger: Arc<Ledger>,
    block_processor: Arc<BlockProcessor<K>>,
    active: Arc<ActiveElections>,
    vote_processor: VoteProcessor<K>,
    online_reps: OnlineReps,
    gap_cache: Arc<GapCache>,
    network: Mutex<N>,
    election_config: ElectionConfiguration,
    representatives: Vec<Keypair>,
    event_publisher: Option<Sender<Event>>,
}

/// Votes.
impl<K: KVStore, N: Network> NodeCore<K, N> {
    fn receive_vote(&self, vote: &Vote, sender: Endpoint) -> Result<VoteCode, LedgerError> {
        let now = Instant::now();
        if vote.validate() {
            let txn = self.block_store.tx_begin_read();
            self.online_reps
                .vote(&self.ledger, &txn, &vote.account, now)?;
            let bootstrap_needed = self.gap_cache.vote(
                &self.ledger,
                &txn,
                vote,
                self.online_reps.online_stake(),
            )?;
            let hash = vote.block.hash();
            if bootstrap_needed && !txn.block_exists(&hash) {
                log::info!("Missing block {} has enough votes to warrant fetching it", hash);
                Event::BootstrapNeeded(BootstrapNeededEvent {
                    timestamp: SystemTime::now(),
                    block: hash,
                })
                .publish(&self.event_publisher);
            }
        }
        self.process_vote(vote, Some(sender), now)
    }

    /// Run `vote` through the vote processor and act on what it did to its election. `sender` is `None`
    /// for votes by this node's own representatives.
    fn process_vote(
        &self,
        vote: &Vote,
        sender: Option<Endpoint>,
        now: Instant,
    ) -> Result<VoteCode, LedgerError> {
        let outcome = self.vote_processor.vote(self, vote, now)?;
        self.apply_election_result(vote, outcome.election)?;
        if let (Some(reply), Some(sender)) = (outcome.reply, sender) {
            self.network().send_vote(sender, reply);
        }

        Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            representative: vote.account,
            sequence: vote.sequence,
            block: vote.block.hash(),
            code: outcome.code,
        })
        .publish(&self.event_publisher);
        Ok(outcome.code)
    }

    fn apply_election_result(&self, vote: &Vote, result: ElectionVoteResult) -> Result<(), LedgerError> {
        if result.processed {
            self.network().republish_vote(vote.clone());
        }

        if let Some(winner) = result.new_winner {
            Event::UpdateWinner(UpdateWinnerEvent {
                timestamp: SystemTime::now(),
                root: winner.root(),
                winner: winner.hash(),
            })
            .publish(&self.event_publisher);
            self.block_processor.force(winner);
        }

        if let Some(confirmation) = result.confirmation {
            Event::ConfirmElection(ConfirmElectionEvent {
                timestamp: SystemTime::now(),
                root: confirmation.root,
                winner: confirmation.winner.hash(),
                tally: confirmation.tally,
            })
            .publish(&self.event_publisher);
            self.process_confirmed(&confirmation.winner)?;
            if let Some(action) = confirmation.action {
                action(&confirmation.winner);
            }
        }
        Ok(())
    }
}

/// Elections.
impl<K: KVStore, N: Network> NodeCore<K, N> {
    fn start_election(&self, block: Block, confirmation_action: Option<ConfirmationAction>) -> bool {
        let root = block.root();
        let hash = block.hash();
        let existed = self.active.start(block, confirmation_action);
        self.publish_start_election(existed, root, hash);
        existed
    }

    fn start_fork_election(&self, fork: &Fork) -> bool {
        let root = fork.ours.root();
        let hash = fork.ours.hash();
        let existed = self.active.start_fork(fork.ours.clone(), fork.theirs.clone());
        self.publish_start_election(existed, root, hash);
        existed
    }

    fn publish_start_election(&self, existed: bool, root: Hash, hash: Hash) {
        if !existed {
            Event::StartElection(StartElectionEvent {
                timestamp: SystemTime::now(),
                root,
                block: hash,
            })
            .publish(&self.event_publisher);
        }
    }

    fn process_confirmed(&self, block: &Block) -> Result<(), LedgerError> {
        let txn = self.block_store.tx_begin_read();
        let hash = block.hash();
        if !txn.block_exists(&hash) {
            return Ok(());
        }
        let account = self.ledger.account(&txn, &hash)?;
        let amount = self.ledger.amount(&txn, &hash)?;
        let is_send = self.ledger.is_send(&txn, block)?;
        Event::ConfirmBlock(ConfirmBlockEvent {
            timestamp: SystemTime::now(),
            block: hash,
            account,
            amount,
            is_send,
        })
        .publish(&self.event_publisher);
        Ok(())
    }

    fn ongoing_announce(&self) -> Result<AnnouncementRound, LedgerError> {
        let representatives = self.online_reps.list();
        let round = {
            let txn = self.block_store.tx_begin_read();
            self.active
                .announce_votes(self, |root| txn.root_exists(root), &representatives)
        };

        for (root, confirmed) in &round.retired {
            Event::RetireElection(RetireElectionEvent {
                timestamp: SystemTime::now(),
                root: *root,
                confirmed: *confirmed,
            })
            .publish(&self.event_publisher);
        }

        for winner in &round.rebroadcast {
            for keypair in &self.representatives {
                let vote = self.block_store.vote_generate(keypair, winner.clone())?;
                self.process_vote(&vote, None, Instant::now())?;
            }
            self.network().republish_block(winner.clone());
        }

        for request in &round.confirm_requests {
            self.network()
                .confirm_req(request.block.clone(), request.representatives.clone());
        }
        Ok(round)
    }

    /// Start an election for every block the block processor applied from live traffic, and for every
    /// fork it reported.
    fn handle_batch(&self, outcome: BatchOutcome) {
        for block in outcome.applied {
            self.start_election(block, None);
        }
        for fork in outcome.forks {
            if !self.start_fork_election(&fork) {
                log::info!(
                    "Resolving fork between our block: {} and block {} both with root {}",
                    fork.ours.hash(),
                    fork.theirs.hash(),
                    fork.theirs.root()
                );
                self.network().confirm_req(fork.ours, None);
            }
        }
    }
}

/// Housekeeping.
impl<K: KVStore, N: Network> NodeCore<K, N> {
    fn flush(&self) -> Result<(usize, usize), LedgerError> {
        let mut txn = self.block_store.tx_begin_write();
        let (unchecked, votes) = self.block_store.flush(&mut txn)?;
        txn.commit();
        Event::FlushStore(FlushStoreEvent {
            timestamp: SystemTime::now(),
            unchecked,
            votes,
        })
        .publish(&self.event_publisher);
        Ok((unchecked, votes))
    }

    fn recalculate_online_stake(&self) -> Result<(), LedgerError> {
        let txn = self.block_store.tx_begin_read();
        self.online_reps.recalculate_stake(&self.ledger, &txn)
    }

    fn network(&self) -> MutexGuard<'_, N> {
        self.network.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: KVStore, N: Network> ElectionContext for NodeCore<K, N> {
    fn weight(&self, representative: &Account) -> Amount {
        let txn = self.block_store.tx_begin_read();
        self.ledger
            .weight(&txn, representative)
            .unwrap_or_else(|err| fatal(err))
    }

    fn online_stake(&self) -> Amount {
        self.online_reps.online_stake()
    }

    fn online_weight_minimum(&self) -> Amount {
        self.election_config.online_weight_minimum
    }

    fn quorum_delta(&self) -> Amount {
        self.election_config.quorum_delta(self.online_stake())
    }

    fn is_test_network(&self) -> bool {
        self.election_config.network.is_test()
    }

    fn tally(&self, votes: &Votes) -> Vec<(Amount, Block)> {
        let txn = self.block_store.tx_begin_read();
        self.ledger
            .tally(&txn, votes.rep_votes.iter())
            .unwrap_or_else(|err| fatal(err))
    }
}

fn start_block_processing<K: KVStore, N: Network + 'static>(core: Arc<NodeCore<K, N>>) -> JoinHandle<()> {
    thread::spawn(move || {
        let result = core
            .block_processor
            .process_blocks(|outcome| core.handle_batch(outcome));
        if let Err(err) = result {
            fatal::<()>(err);
        }
    })
}

fn start_ongoing<K: KVStore, N: Network + 'static>(
    core: Arc<NodeCore<K, N>>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let interval = core.election_config.network.announce_interval();
        let mut next_flush = Instant::now() + STORE_FLUSH_INTERVAL;
        loop {
            match shutdown_signal.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => (),
            }

            if let Err(err) = core.ongoing_announce() {
                fatal::<()>(err);
            }
            let now = Instant::now();
            core.gap_cache.purge_old(now);
            if now >= next_flush {
                next_flush = now + STORE_FLUSH_INTERVAL;
                if let Err(err) = core.flush().and_then(|_| core.recalculate_online_stake()) {
                    fatal::<()>(err);
                }
            }
        }
    })
}

/// Log `err` and panic. Used where a [`LedgerError`] cannot be returned to a caller.
fn fatal<T>(err: LedgerError) -> T {
    log::error!("Fatal ledger error: {}", err);
    panic!("fatal ledger error: {}", err)
}
