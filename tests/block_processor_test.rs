use std::{
    sync::{mpsc, Arc},
    thread,
    time::{Duration, Instant},
};

use lattice_rs::{
    block_processor::{BlockProcessor, Fork, FORK_MIN_AGE},
    config::BlockProcessorConfiguration,
    election::GapCache,
    events::Event,
    ledger::ProcessResult,
    types::{
        block::{Block, TxBlock},
        data_types::Amount,
    },
};
use log::LevelFilter;

mod common;

use common::{
    fixtures::{keypair, TestLedger, SUPPLY},
    logging::{log_with_context, setup_logger},
    mem_db::MemDB,
};

fn block_processor(
    test_ledger: &TestLedger,
    gap_cache: Arc<GapCache>,
    event_publisher: Option<mpsc::Sender<Event>>,
) -> BlockProcessor<MemDB> {
    BlockProcessor::new(
        BlockProcessorConfiguration { batch_max: 16 },
        Arc::clone(&test_ledger.block_store),
        Arc::clone(&test_ledger.ledger),
        gap_cache,
        event_publisher,
    )
}

/// Tests that blocks arriving before the blocks they depend on are parked, tracked in the gap cache, and
/// processed as soon as their dependencies are.
#[test]
fn out_of_order_arrival_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Build a chain of dependencies: genesis sends to A, A opens, A sends back.
    let test_ledger = TestLedger::new();
    let gap_cache = Arc::new(GapCache::new(16, 1));
    let block_processor = block_processor(&test_ledger, Arc::clone(&gap_cache), None);
    let a_keypair = keypair();
    let genesis_send = Block::Tx(TxBlock::send(
        test_ledger.genesis.hash(),
        a_keypair.account(),
        SUPPLY - Amount::new(100),
        &test_ledger.genesis_keypair,
    ));
    let a_open = Block::Tx(TxBlock::open(genesis_send.hash(), Amount::new(100), &a_keypair));
    let a_send = Block::Tx(TxBlock::send(
        a_open.hash(),
        test_ledger.genesis.account(),
        Amount::new(40),
        &a_keypair,
    ));

    // 2. Queue them in reverse order.
    log_with_context(None, "Queueing blocks in reverse dependency order.");
    let now = Instant::now();
    block_processor.add(a_send.clone(), now);
    block_processor.add(a_open.clone(), now);
    block_processor.add(genesis_send.clone(), now);
    assert!(block_processor.have_blocks());
    assert!(!block_processor.full());

    // 3. One batch processes all three: each parked block is re-queued when its dependency lands.
    let outcome = block_processor.process_batch().unwrap();
    let codes: Vec<(Block, ProcessResult)> = outcome
        .processed
        .into_iter()
        .map(|(block, result)| (block, result.code))
        .collect();
    assert_eq!(
        codes,
        vec![
            (a_send.clone(), ProcessResult::GapPrevious),
            (a_open.clone(), ProcessResult::GapSource),
            (genesis_send.clone(), ProcessResult::Progress),
            (a_open, ProcessResult::Progress),
            (a_send.clone(), ProcessResult::Progress),
        ]
    );
    assert!(outcome.forks.is_empty());
    assert!(!block_processor.have_blocks());

    // 3.1. Only the block that arrived from the network counts as live; the re-queued blocks do not.
    assert_eq!(outcome.applied, vec![genesis_send]);

    // 3.1. Nothing is left waiting, or tracked as missing.
    assert_eq!(test_ledger.latest(&a_keypair.account()), a_send.hash());
    assert_eq!(
        test_ledger
            .block_store
            .unchecked_count(&test_ledger.block_store.tx_begin_read()),
        0
    );
    assert!(gap_cache.is_empty());
}

/// Tests that forks are only reported for blocks that have been around for a while, and that forcing the
/// competing block rolls back the block in the ledger to make room for it.
#[test]
fn fork_and_force_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Apply a send from genesis, and the open block that receives it.
    let test_ledger = TestLedger::new();
    let (event_publisher, event_subscriber) = mpsc::channel();
    let block_processor = block_processor(
        &test_ledger,
        Arc::new(GapCache::new(16, 1)),
        Some(event_publisher),
    );
    let recipient_keypair = keypair();
    let ours = Block::Tx(TxBlock::send(
        test_ledger.genesis.hash(),
        recipient_keypair.account(),
        SUPPLY - Amount::new(100),
        &test_ledger.genesis_keypair,
    ));
    let open = Block::Tx(TxBlock::open(ours.hash(), Amount::new(100), &recipient_keypair));
    let theirs = Block::Tx(TxBlock::send(
        test_ledger.genesis.hash(),
        keypair().account(),
        SUPPLY - Amount::new(200),
        &test_ledger.genesis_keypair,
    ));
    block_processor.add(ours.clone(), Instant::now());
    block_processor.add(open.clone(), Instant::now());
    let outcome = block_processor.process_batch().unwrap();
    assert_eq!(outcome.applied, vec![ours.clone(), open.clone()]);

    // 2. A competing block that just arrived is a fork, but is not reported yet.
    block_processor.add(theirs.clone(), Instant::now());
    let outcome = block_processor.process_batch().unwrap();
    assert_eq!(outcome.processed[0].1.code, ProcessResult::Fork);
    assert!(outcome.forks.is_empty());

    // 3. One that arrived long enough ago is reported, with the block it competes with.
    let long_ago = Instant::now() - FORK_MIN_AGE - Duration::from_secs(1);
    block_processor.add(theirs.clone(), long_ago);
    let outcome = block_processor.process_batch().unwrap();
    assert_eq!(
        outcome.forks,
        vec![Fork {
            ours: ours.clone(),
            theirs: theirs.clone(),
        }]
    );

    // 4. Force their block. Ours, and the open block that depends on it, are rolled back.
    log_with_context(None, "Forcing the competing block.");
    while event_subscriber.try_recv().is_ok() {}
    block_processor.force(theirs.clone());
    let outcome = block_processor.process_batch().unwrap();
    assert_eq!(outcome.rolled_back, vec![open.clone(), ours.clone()]);
    assert_eq!(outcome.processed[0].1.code, ProcessResult::Progress);
    assert_eq!(test_ledger.latest(&test_ledger.genesis.account()), theirs.hash());
    assert!(!test_ledger.exists(&ours.hash()));
    assert!(!test_ledger.exists(&open.hash()));

    // 4.1. The forced block is not reported as live traffic.
    assert!(outcome.applied.is_empty());

    // 4.2. Rollbacks are published before the block that replaced them.
    let events: Vec<Event> = event_subscriber.try_iter().collect();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], Event::RollbackBlock(event) if event.block == open.hash()));
    assert!(matches!(&events[1], Event::RollbackBlock(event) if event.block == ours.hash()));
    assert!(
        matches!(&events[2], Event::ProcessBlock(event) if event.block == theirs.hash() && event.result == ProcessResult::Progress)
    );

    // 5. Forcing a block that is already in place rolls nothing back.
    block_processor.force(theirs.clone());
    let outcome = block_processor.process_batch().unwrap();
    assert!(outcome.rolled_back.is_empty());
    assert_eq!(outcome.processed[0].1.code, ProcessResult::Old);
}

/// Tests the processing thread: blocks added from another thread are processed in arrival order, `flush`
/// waits until they all are, and `stop` ends the thread.
#[test]
fn processing_thread_test() {
    setup_logger(LevelFilter::Debug);

    let test_ledger = TestLedger::new();
    let block_processor = Arc::new(block_processor(&test_ledger, Arc::new(GapCache::new(16, 1)), None));

    // 1. Start the processing thread, counting the blocks it processes.
    let (batch_sender, batch_receiver) = mpsc::channel();
    let processing = {
        let block_processor = Arc::clone(&block_processor);
        thread::spawn(move || {
            block_processor
                .process_blocks(|outcome| {
                    let _ = batch_sender.send(outcome.processed.len());
                })
                .unwrap()
        })
    };

    // 2. Queue a chain of 20 sends, more than fit in one batch.
    let mut previous = test_ledger.genesis.hash();
    let mut balance = SUPPLY;
    let recipient = keypair().account();
    for _ in 0..20 {
        balance = balance - Amount::new(1);
        let send = Block::Tx(TxBlock::send(previous, recipient, balance, &test_ledger.genesis_keypair));
        previous = send.hash();
        block_processor.add(send, Instant::now());
    }

    // 3. Once flushed, every send has been applied.
    block_processor.flush();
    assert!(!block_processor.have_blocks());
    assert_eq!(test_ledger.latest(&test_ledger.genesis.account()), previous);
    assert_eq!(test_ledger.pending(&recipient), Amount::new(20));

    // 4. Stop the thread.
    block_processor.stop();
    processing.join().unwrap();
    assert_eq!(batch_receiver.try_iter().sum::<usize>(), 20);
}
