use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use lattice_rs::{
    config::{Configuration, NetworkKind},
    election::{ConfirmationAction, VoteCode},
    ledger::{Genesis, ProcessResult},
    node::{Node, NodeSpec},
    store::KVGet,
    types::{
        block::{Block, TxBlock},
        data_types::{Amount, Hash},
        keypair::Keypair,
        vote::Vote,
    },
};
use log::LevelFilter;

mod common;

use common::{
    fixtures::{keypair, SUPPLY},
    logging::{log_with_context, setup_logger},
    mem_db::MemDB,
    network::RecordingNetwork,
};

const PEER: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 7075);

/// Initialize a fresh store with a genesis block owned by `genesis_keypair`, and start a node on it that
/// votes as `representatives`.
fn start_node(
    genesis_keypair: &Keypair,
    representatives: Vec<Keypair>,
    network: RecordingNetwork,
    confirmed_blocks: Arc<Mutex<Vec<Hash>>>,
) -> (Genesis, Node<MemDB, RecordingNetwork>) {
    let genesis = Genesis::new(genesis_keypair, SUPPLY);
    let kv_store = MemDB::new();
    Node::<MemDB, RecordingNetwork>::initialize(kv_store.clone(), &genesis).unwrap();

    let configuration = Configuration::builder()
        .network(NetworkKind::Test)
        .supply(SUPPLY)
        .online_weight_minimum(Amount::new(1000))
        .log_events(true)
        .build();
    let node = NodeSpec::builder()
        .kv_store(kv_store)
        .network(network)
        .configuration(configuration)
        .representatives(representatives)
        .on_confirm_block(move |event| confirmed_blocks.lock().unwrap().push(event.block))
        .build()
        .start()
        .unwrap();
    (genesis, node)
}

/// Poll `condition` until it holds, failing the test after 10 seconds.
fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(10));
    }
}

/// Tests that a node that holds all the voting weight confirms the blocks it is asked to elect on its
/// own: every announcement round, its representative votes for the winner.
#[test]
fn local_representative_confirms_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start a node that votes as the genesis account.
    let genesis_keypair = keypair();
    let network = RecordingNetwork::new();
    let confirmed_blocks = Arc::new(Mutex::new(Vec::new()));
    let (genesis, node) = start_node(
        &genesis_keypair,
        vec![genesis_keypair.clone()],
        network.clone(),
        Arc::clone(&confirmed_blocks),
    );

    // 2. Apply a send directly, bypassing the block processor.
    let send = Block::Tx(TxBlock::send(
        genesis.hash(),
        keypair().account(),
        SUPPLY - Amount::new(100),
        &genesis_keypair,
    ));
    assert_eq!(node.process(&send).unwrap().code, ProcessResult::Progress);
    assert!(node.block_store().tx_begin_read().block_exists(&send.hash()));
    assert!(node.active_elections().is_empty());

    // 3. Start an election for it, with an action that records the confirmation.
    log_with_context(Some(&genesis.account()), "Starting an election for the send.");
    let confirmed = Arc::new(AtomicBool::new(false));
    let action: ConfirmationAction = {
        let confirmed = Arc::clone(&confirmed);
        Arc::new(move |_: &Block| confirmed.store(true, Ordering::SeqCst))
    };
    assert!(!node.start_election(send.clone(), Some(action)));

    // 4. The ongoing thread's announcement rounds vote, confirm, and eventually retire the election.
    wait_until(|| confirmed.load(Ordering::SeqCst));
    wait_until(|| confirmed_blocks.lock().unwrap().contains(&send.hash()));
    wait_until(|| node.active_elections().is_empty());
    let history = node.active_elections().confirmed();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].winner, send);

    // 4.1. The local vote was relayed to peers, and the winner republished.
    assert!(network
        .republished_votes()
        .iter()
        .any(|vote| vote.account == genesis.account() && vote.block == send));

    // 5. Flushing persists the representative's latest vote.
    let (_, votes) = node.flush().unwrap();
    assert!(votes <= 1);
    let txn = node.block_store().tx_begin_read();
    assert!(txn.vote_stored(&genesis.account()).unwrap().is_some());
}

/// Tests that a block published by a peer is put to an election as soon as the block processor applies
/// it, and confirmed by the node's representative without anyone asking.
#[test]
fn live_block_is_elected_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start a node that votes as the genesis account.
    let genesis_keypair = keypair();
    let network = RecordingNetwork::new();
    let confirmed_blocks = Arc::new(Mutex::new(Vec::new()));
    let (genesis, node) = start_node(
        &genesis_keypair,
        vec![genesis_keypair.clone()],
        network.clone(),
        Arc::clone(&confirmed_blocks),
    );

    // 2. Publish a send to the node through the block processor.
    log_with_context(Some(&genesis.account()), "Publishing a send.");
    let send = Block::Tx(TxBlock::send(
        genesis.hash(),
        keypair().account(),
        SUPPLY - Amount::new(100),
        &genesis_keypair,
    ));
    node.process_active(send.clone());
    node.flush_blocks();
    assert!(node.block_store().tx_begin_read().block_exists(&send.hash()));

    // 3. The election started for it is confirmed and retired.
    wait_until(|| confirmed_blocks.lock().unwrap().contains(&send.hash()));
    wait_until(|| node.active_elections().is_empty());
    let history = node.active_elections().confirmed();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].winner, send);
}

/// Tests that a vote from a peer representative with most of the weight makes the node switch from its
/// own block to the competing one.
#[test]
fn remote_vote_switches_fork_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start a node without representatives of its own.
    let genesis_keypair = keypair();
    let network = RecordingNetwork::new();
    let confirmed_blocks = Arc::new(Mutex::new(Vec::new()));
    let (genesis, node) = start_node(
        &genesis_keypair,
        Vec::new(),
        network.clone(),
        Arc::clone(&confirmed_blocks),
    );

    // 2. Apply our send, and start an election for its root.
    let ours = Block::Tx(TxBlock::send(
        genesis.hash(),
        keypair().account(),
        SUPPLY - Amount::new(100),
        &genesis_keypair,
    ));
    let theirs = Block::Tx(TxBlock::send(
        genesis.hash(),
        keypair().account(),
        SUPPLY - Amount::new(300),
        &genesis_keypair,
    ));
    assert_eq!(node.process(&ours).unwrap().code, ProcessResult::Progress);
    assert_eq!(node.process(&theirs).unwrap().code, ProcessResult::Fork);
    node.start_election(ours.clone(), None);

    // 3. The genesis representative votes for their block.
    log_with_context(Some(&genesis.account()), "Voting for the competing block.");
    let vote = Vote::new(&genesis_keypair, 1, theirs.clone());
    assert_eq!(node.vote(&vote, PEER).unwrap(), VoteCode::Vote);
    assert_eq!(node.online_reps().list(), vec![genesis.account()]);

    // 4. The node forces their block into the ledger in place of ours.
    node.flush_blocks();
    wait_until(|| {
        let txn = node.block_store().tx_begin_read();
        txn.block_exists(&theirs.hash()) && !txn.block_exists(&ours.hash())
    });
    {
        let txn = node.block_store().tx_begin_read();
        assert_eq!(node.ledger().latest(&txn, &genesis.account()).unwrap(), theirs.hash());
    }

    // 4.1. The vote was relayed, once.
    assert_eq!(network.republished_votes(), vec![vote]);
}

/// Tests that a peer that sends a very old vote is sent the newest one back.
#[test]
fn stale_vote_reply_test() {
    setup_logger(LevelFilter::Debug);

    let genesis_keypair = keypair();
    let network = RecordingNetwork::new();
    let (genesis, node) = start_node(
        &genesis_keypair,
        Vec::new(),
        network.clone(),
        Arc::new(Mutex::new(Vec::new())),
    );

    // 1. The node has seen a vote with a high sequence.
    let newest = Vote::new(&genesis_keypair, 50_000, genesis.block());
    node.vote(&newest, PEER).unwrap();

    // 2. A vote far behind it gets the newest vote sent back to the peer.
    let stale = Vote::new(&genesis_keypair, 1, genesis.block());
    node.vote(&stale, PEER).unwrap();
    assert!(network.sent().iter().any(|sent| matches!(
        sent,
        common::network::Sent::VoteTo(endpoint, vote) if *endpoint == PEER && *vote == newest
    )));
}
