/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The queue through which every block reaches the ledger.
//!
//! Blocks received from the network are [added](BlockProcessor::add) to the back of a FIFO queue,
//! tagged with the time they arrived. Blocks that won an election are [forced](BlockProcessor::force)
//! into a separate queue that is always drained first.
//!
//! ## Batches
//!
//! The queues are drained in batches of at most
//! [`batch_max`](crate::config::BlockProcessorConfiguration) blocks, each batch in a single write
//! transaction. Before a forced block is processed, whichever different block currently occupies its
//! root is rolled back, along with everything that depends on it. Then each block is processed, and
//! routed according to its [`ProcessResult`]:
//!
//! |Result|Action|
//! |---|---|
//! |`Progress`|Re-queue the blocks that were waiting on this block. If the block was not forced and arrived recently, report it as applied so that an election can be started for it.|
//! |`Old`|Re-queue the blocks that were waiting on this block.|
//! |`GapPrevious`, `GapSource`|Park the block in the unchecked table under the missing block, and track the missing block in the [gap cache](crate::election::GapCache).|
//! |`Fork`|If the block did not arrive in the last 15 seconds, report the fork so that an election can be started for it.|
//! |Any other|Drop the block.|
//!
//! ## Threads
//!
//! [`process_blocks`](BlockProcessor::process_blocks) is the body of the node's block processing
//! thread. [`process_batch`](BlockProcessor::process_batch) can also be called directly, which is what
//! callers that do not run a processing thread do.

use std::{
    collections::VecDeque,
    sync::{mpsc::Sender, Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    config::BlockProcessorConfiguration,
    election::GapCache,
    events::{Event, ProcessBlockEvent, RollbackBlockEvent},
    ledger::{Ledger, LedgerError, ProcessResult, ProcessReturn},
    store::{BlockStore, KVGet, KVStore, Transaction},
    types::{block::Block, data_types::Hash},
};

/// Forks are only reported for blocks that arrived longer ago than this.
pub const FORK_MIN_AGE: Duration = Duration::from_secs(15);

/// Blocks applied within this long of arriving are live traffic, and are put to an election.
pub const LIVE_ARRIVAL_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Minimum interval between log lines reporting the length of the queue.
const QUEUE_LOG_INTERVAL: Duration = Duration::from_secs(15);

/// A block that conflicts with the block already occupying its root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fork {
    /// The block in the ledger.
    pub ours: Block,
    /// The block that was processed.
    pub theirs: Block,
}

/// What one batch did.
#[derive(Clone, Debug, Default)]
pub struct BatchOutcome {
    /// Every block processed, in order, with its result.
    pub processed: Vec<(Block, ProcessReturn)>,
    /// Blocks rolled back to make way for forced blocks, in the order they were rolled back.
    pub rolled_back: Vec<Block>,
    pub forks: Vec<Fork>,
    /// Blocks that were applied within [`LIVE_ARRIVAL_WINDOW`] of arriving, other than forced blocks.
    pub applied: Vec<Block>,
}

struct Queue {
    /// Blocks with the time they arrived. `None` for blocks re-queued from the unchecked table, which
    /// count as having arrived long ago.
    blocks: VecDeque<(Block, Option<Instant>)>,
    forced: VecDeque<Block>,
    active: bool,
    stopped: bool,
    next_log: Instant,
}

impl Queue {
    fn have_blocks(&self) -> bool {
        !self.blocks.is_empty() || !self.forced.is_empty()
    }
}

pub struct BlockProcessor<K: KVStore> {
    queue: Mutex<Queue>,
    condition: Condvar,
    block_store: Arc<BlockStore<K>>,
    ledger: Arc<Ledger>,
    gap_cache: Arc<GapCache>,
    config: BlockProcessorConfiguration,
    event_publisher: Option<Sender<Event>>,
}

/// Queue methods.
impl<K: KVStore> BlockProcessor<K> {
    pub fn new(
        config: BlockProcessorConfiguration,
        block_store: Arc<BlockStore<K>>,
        ledger: Arc<Ledger>,
        gap_cache: Arc<GapCache>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            queue: Mutex::new(Queue {
                blocks: VecDeque::new(),
                forced: VecDeque::new(),
                active: false,
                stopped: false,
                next_log: Instant::now(),
            }),
            condition: Condvar::new(),
            block_store,
            ledger,
            gap_cache,
            config,
            event_publisher,
        }
    }

    /// Queue `block`, which arrived at `arrival`.
    pub fn add(&self, block: Block, arrival: Instant) {
        self.enqueue(block, Some(arrival));
    }

    /// Queue `block` ahead of every block queued with [`add`](Self::add), to replace whatever block
    /// occupies its root.
    pub fn force(&self, block: Block) {
        let mut queue = self.queue();
        queue.forced.push_back(block);
        self.condition.notify_all();
    }

    /// Whether more blocks are queued than fit in one batch.
    pub fn full(&self) -> bool {
        self.queue().blocks.len() > self.config.batch_max
    }

    pub fn have_blocks(&self) -> bool {
        self.queue().have_blocks()
    }

    /// Block until the queues are empty and no batch is being processed, or until the processor is
    /// stopped.
    pub fn flush(&self) {
        let mut queue = self.queue();
        while !queue.stopped && (queue.have_blocks() || queue.active) {
            queue = self
                .condition
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn stop(&self) {
        let mut queue = self.queue();
        queue.stopped = true;
        self.condition.notify_all();
    }

    fn enqueue(&self, block: Block, arrival: Option<Instant>) {
        let mut queue = self.queue();
        queue.blocks.push_back((block, arrival));
        self.condition.notify_all();
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Processing.
impl<K: KVStore> BlockProcessor<K> {
    /// Process batches until the processor is [stopped](Self::stop), waiting for blocks when the queues
    /// are empty. `on_batch` is called with the outcome of every batch after its transaction has been
    /// committed.
    pub fn process_blocks(&self, mut on_batch: impl FnMut(BatchOutcome)) -> Result<(), LedgerError> {
        let mut queue = self.queue();
        while !queue.stopped {
            if queue.have_blocks() {
                queue.active = true;
                drop(queue);
                let outcome = self.process_batch()?;
                on_batch(outcome);
                queue = self.queue();
                queue.active = false;
            } else {
                self.condition.notify_all();
                queue = self
                    .condition
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        Ok(())
    }

    /// Drain up to one batch from the queues in a single write transaction, forced blocks first.
    pub fn process_batch(&self) -> Result<BatchOutcome, LedgerError> {
        let mut outcome = BatchOutcome::default();
        let mut txn = self.block_store.tx_begin_write();

        for _ in 0..self.config.batch_max {
            let next = {
                let mut queue = self.queue();
                let now = Instant::now();
                if queue.blocks.len() > 64 && queue.next_log < now {
                    queue.next_log = now + QUEUE_LOG_INTERVAL;
                    log::info!("{} blocks in processing queue", queue.blocks.len());
                }
                match queue.forced.pop_front() {
                    Some(block) => Some((block, Some(now), true)),
                    None => queue
                        .blocks
                        .pop_front()
                        .map(|(block, arrival)| (block, arrival, false)),
                }
            };
            let Some((block, arrival, forced)) = next else {
                break;
            };

            if forced {
                let hash = block.hash();
                if let Some(successor) = self.ledger.successor(&txn, &block.root())? {
                    if successor.hash() != hash {
                        log::info!("Rolling back {} and replacing with {}", successor.hash(), hash);
                        let rolled_back = self.ledger.rollback(&mut txn, &successor.hash())?;
                        outcome.rolled_back.extend(rolled_back);
                    }
                }
            }

            let result = self.process_one(&mut txn, &block, arrival, &mut outcome)?;
            let live = arrival.is_some_and(|arrival| arrival.elapsed() < LIVE_ARRIVAL_WINDOW);
            if result.code == ProcessResult::Progress && live && !forced {
                outcome.applied.push(block.clone());
            }
            outcome.processed.push((block, result));
        }

        txn.commit();
        self.publish(&outcome);
        Ok(outcome)
    }

    /// Process `block` in `txn` and route it according to the result.
    fn process_one(
        &self,
        txn: &mut Transaction<'_, K>,
        block: &Block,
        arrival: Option<Instant>,
        outcome: &mut BatchOutcome,
    ) -> Result<ProcessReturn, LedgerError> {
        let hash = block.hash();
        let result = self.ledger.process(txn, block)?;
        match result.code {
            ProcessResult::Progress => {
                log::debug!("Processing block {}", hash);
                self.queue_unchecked(txn, &hash)?;
            }
            ProcessResult::Old => {
                log::debug!("Old for: {}", hash);
                self.queue_unchecked(txn, &hash)?;
            }
            ProcessResult::GapPrevious => {
                log::debug!("Gap previous for: {}", hash);
                self.block_store
                    .unchecked_put(txn, &block.previous(), block.clone())?;
                self.gap_cache.add(block, Instant::now());
            }
            ProcessResult::GapSource => {
                log::debug!("Gap source for: {}", hash);
                let source = block.source().unwrap_or(Hash::zero());
                self.block_store.unchecked_put(txn, &source, block.clone())?;
                self.gap_cache.add(block, Instant::now());
            }
            ProcessResult::Fork => {
                log::debug!("Fork for: {} root: {}", hash, block.root());
                let old_enough = arrival.map_or(true, |arrival| arrival.elapsed() > FORK_MIN_AGE);
                if old_enough {
                    if let Some(fork) = self.resolve_fork(txn, block)? {
                        outcome.forks.push(fork);
                    }
                }
            }
            ProcessResult::OpenedBurnAccount => {
                log::warn!("Rejecting open block for burn account: {}", hash);
            }
            ProcessResult::BlockPosition => {
                log::debug!("Block {} cannot follow predecessor {}", hash, block.previous());
            }
            ProcessResult::BadSignature
            | ProcessResult::NegativeSpend
            | ProcessResult::Unreceivable
            | ProcessResult::BalanceMismatch => {
                log::debug!("{} for: {}", result.code, hash);
            }
        }
        Ok(result)
    }

    /// Re-queue every block that was waiting on `hash`, and stop tracking `hash` as missing.
    pub fn queue_unchecked(&self, txn: &mut Transaction<'_, K>, hash: &Hash) -> Result<(), LedgerError> {
        for waiting in self.block_store.unchecked_get(txn, hash)? {
            self.block_store.unchecked_del(txn, hash, &waiting.hash());
            self.enqueue(waiting, None);
        }
        self.gap_cache.erase(hash);
        Ok(())
    }

    /// The fork between `block` and the block in the ledger that occupies its root, if `block` is not in
    /// the ledger and its root is.
    fn resolve_fork(&self, txn: &Transaction<'_, K>, block: &Block) -> Result<Option<Fork>, LedgerError> {
        if txn.block_exists(&block.hash()) || !txn.root_exists(&block.root()) {
            return Ok(None);
        }
        let fork = self
            .ledger
            .forked_block(txn, block)?
            .map(|ours| Fork {
                ours,
                theirs: block.clone(),
            });
        Ok(fork)
    }

    fn publish(&self, outcome: &BatchOutcome) {
        for block in &outcome.rolled_back {
            Event::RollbackBlock(RollbackBlockEvent {
                timestamp: SystemTime::now(),
                block: block.hash(),
            })
            .publish(&self.event_publisher);
        }
        for (block, result) in &outcome.processed {
            Event::ProcessBlock(ProcessBlockEvent {
                timestamp: SystemTime::now(),
                block: block.hash(),
                result: result.code,
            })
            .publish(&self.event_publisher);
        }
    }
}
