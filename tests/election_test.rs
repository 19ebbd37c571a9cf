use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use lattice_rs::{
    election::{
        gap_cache::GapCache, online_reps::ONLINE_CUTOFF, ActiveElections, ConfirmRequest, ConfirmationAction,
        Election, ElectionContext, OnlineReps, VoteCode, VoteProcessor, Votes,
    },
    ledger::ProcessResult,
    types::{
        block::{Block, TxBlock},
        data_types::{Account, Amount, Hash},
        keypair::Keypair,
        vote::Vote,
    },
};
use log::LevelFilter;

mod common;

use common::{
    fixtures::{keypair, TestLedger, SUPPLY},
    logging::{log_with_context, setup_logger},
};

/// An election context over fixed weights.
struct FixedWeights {
    weights: HashMap<Account, Amount>,
    online_stake: Amount,
    online_weight_minimum: Amount,
    quorum_delta: Amount,
    test_network: bool,
}

impl FixedWeights {
    fn new(online_stake: u128, quorum_delta: u128) -> Self {
        Self {
            weights: HashMap::new(),
            online_stake: Amount::new(online_stake),
            online_weight_minimum: Amount::new(10),
            quorum_delta: Amount::new(quorum_delta),
            test_network: false,
        }
    }

    /// Create a representative with `weight`.
    fn representative(&mut self, weight: u128) -> Keypair {
        let keypair = keypair();
        self.weights.insert(keypair.account(), Amount::new(weight));
        keypair
    }
}

impl ElectionContext for FixedWeights {
    fn weight(&self, representative: &Account) -> Amount {
        self.weights.get(representative).copied().unwrap_or(Amount::zero())
    }

    fn online_stake(&self) -> Amount {
        self.online_stake
    }

    fn online_weight_minimum(&self) -> Amount {
        self.online_weight_minimum
    }

    fn quorum_delta(&self) -> Amount {
        self.quorum_delta
    }

    fn is_test_network(&self) -> bool {
        self.test_network
    }

    fn tally(&self, votes: &Votes) -> Vec<(Amount, Block)> {
        let mut totals: Vec<(Amount, Block)> = Vec::new();
        for (representative, block) in &votes.rep_votes {
            let weight = self.weight(representative);
            match totals.iter_mut().find(|(_, candidate)| candidate == block) {
                Some((total, _)) => *total = total.saturating_add(weight),
                None => totals.push((weight, block.clone())),
            }
        }
        totals.sort_by(|(a, _), (b, _)| b.cmp(a));
        totals
    }
}

/// Two blocks that fork: both open the same fresh account.
fn forks() -> (Block, Block) {
    let owner = keypair();
    let source = Hash::new([1; 32]);
    (
        Block::Tx(TxBlock::open(source, Amount::new(1), &owner)),
        Block::Tx(TxBlock::open(source, Amount::new(2), &owner)),
    )
}

/// Tests that a representative's votes in one election are only accepted in increasing order of
/// sequence, and no faster than the cooldown allows.
#[test]
fn vote_sequence_and_cooldown_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Create a heavy representative (1 second cooldown) and a light one (15 second cooldown). Quorum
    //    is out of reach, so that the election stays open.
    let mut context = FixedWeights::new(1000, 1000);
    let heavy = context.representative(100);
    let light = context.representative(5);
    let (block, _) = forks();
    let mut election = Election::new(block.clone(), None);
    let start = Instant::now();

    // 2. The heavy representative's first vote is accepted; repeating it is a replay.
    log_with_context(Some(&heavy.account()), "Voting with sequence 1.");
    let result = election.vote(&context, &Vote::new(&heavy, 1, block.clone()), start);
    assert!(result.processed);
    assert!(!result.replay);
    assert!(election.vote(&context, &Vote::new(&heavy, 1, block.clone()), start).replay);

    // 2.1. A newer vote within the cooldown is a replay; after the cooldown it is accepted.
    let newer = Vote::new(&heavy, 2, block.clone());
    assert!(election.vote(&context, &newer, start + Duration::from_millis(500)).replay);
    assert!(election.vote(&context, &newer, start + Duration::from_secs(1)).processed);
    assert_eq!(election.last_vote(&heavy.account()).unwrap().sequence, 2);

    // 2.2. An older vote is a replay no matter how late it comes.
    assert!(election.vote(&context, &Vote::new(&heavy, 1, block.clone()), start + Duration::from_secs(60)).replay);

    // 3. The light representative has to wait 15 seconds between votes.
    log_with_context(Some(&light.account()), "Voting with sequences 1 and 2.");
    assert!(election.vote(&context, &Vote::new(&light, 1, block.clone()), start).processed);
    let newer = Vote::new(&light, 2, block.clone());
    assert!(election.vote(&context, &newer, start + Duration::from_secs(5)).replay);
    assert!(election.vote(&context, &newer, start + Duration::from_secs(15)).processed);

    // 4. Neither vote confirmed the election.
    assert!(!election.is_confirmed());
}

/// Tests that votes from representatives with negligible weight are ignored, except on test networks.
#[test]
fn minimum_vote_weight_test() {
    let mut context = FixedWeights::new(100_000, 100_000);
    let negligible = context.representative(100);
    let (block, _) = forks();
    let vote = Vote::new(&negligible, 1, block.clone());

    // 1. 100 is no more than a thousandth of the online stake.
    let mut election = Election::new(block.clone(), None);
    let result = election.vote(&context, &vote, Instant::now());
    assert!(result.replay);
    assert!(!result.processed);
    assert!(election.last_vote(&negligible.account()).is_none());

    // 2. On a test network the same vote counts.
    context.test_network = true;
    let result = election.vote(&context, &vote, Instant::now());
    assert!(result.processed);
    assert!(election.votes.rep_votes.contains_key(&negligible.account()));
}

/// Tests an election between two forks: the winner follows the tally once enough weight has voted, the
/// election is confirmed exactly once when the leader's margin exceeds the quorum delta, and confirmed
/// elections are retired into the confirmation history after a few announcement rounds.
#[test]
fn fork_election_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Initialize representatives with 60, 30, 30 and 10 out of an online stake of 130, with a quorum
    //    delta of 50.
    let mut context = FixedWeights::new(130, 50);
    let r1 = context.representative(60);
    let r2 = context.representative(30);
    let r3 = context.representative(30);
    let r4 = context.representative(10);
    let (ours, theirs) = forks();

    // 2. Start an election with our block, counting how often the confirmation action runs.
    let active = ActiveElections::new(8);
    let confirmations = Arc::new(AtomicUsize::new(0));
    let action: ConfirmationAction = {
        let confirmations = Arc::clone(&confirmations);
        Arc::new(move |_: &Block| {
            confirmations.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(!active.start(ours.clone(), Some(action)));
    assert!(active.start(theirs.clone(), None));
    assert!(active.active(&theirs));
    let now = Instant::now();

    // 3. r2 votes for their block, which becomes the winner.
    let result = active.vote(&context, &Vote::new(&r2, 1, theirs.clone()), now);
    assert_eq!(result.new_winner, Some(theirs.clone()));
    assert!(result.confirmation.is_none());
    assert_eq!(active.list_blocks(), vec![theirs.clone()]);

    // 4. r1 votes for ours, which wins back the lead, but not by enough to confirm.
    let result = active.vote(&context, &Vote::new(&r1, 1, ours.clone()), now);
    assert_eq!(result.new_winner, Some(ours.clone()));
    assert!(result.confirmation.is_none());

    // 5. r3 joins r1. 90 beats 30 by more than 50, confirming ours.
    let result = active.vote(&context, &Vote::new(&r3, 1, ours.clone()), now);
    assert!(result.new_winner.is_none());
    let confirmation = result.confirmation.unwrap();
    assert_eq!(confirmation.winner, ours);
    assert_eq!(confirmation.tally, Amount::new(90));
    (confirmation.action.unwrap())(&confirmation.winner);
    assert_eq!(confirmations.load(Ordering::SeqCst), 1);

    // 5.1. Later votes do not confirm it again.
    let result = active.vote(&context, &Vote::new(&r2, 2, ours.clone()), now + Duration::from_secs(1));
    assert!(result.processed);
    assert!(result.confirmation.is_none());

    // 6. Run announcement rounds. The third round asks the representative that has not voted yet; the
    //    fourth retires the confirmed election.
    let representatives = [r1.account(), r2.account(), r3.account(), r4.account()];
    for round in 1..=3 {
        let announcement = active.announce_votes(&context, |_| true, &representatives);
        assert!(announcement.retired.is_empty());
        assert_eq!(announcement.rebroadcast, vec![ours.clone()]);
        if round == 3 {
            assert_eq!(
                announcement.confirm_requests,
                vec![ConfirmRequest {
                    block: ours.clone(),
                    representatives: Some(vec![r4.account()]),
                }]
            );
        } else {
            assert!(announcement.confirm_requests.is_empty());
        }
    }
    let announcement = active.announce_votes(&context, |_| true, &representatives);
    assert_eq!(announcement.retired, vec![(ours.root(), true)]);
    assert!(active.is_empty());

    // 6.1. The retired election is in the confirmation history.
    let history = active.confirmed();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].winner, ours);
    assert_eq!(history[0].tally, Amount::new(120));
}

/// Tests the vote processor's verdicts: invalid signatures, new votes, replays, and replying with a much
/// newer stored vote.
#[test]
fn vote_processor_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Initialize a store, an election and a representative.
    let test_ledger = TestLedger::new();
    let mut context = FixedWeights::new(1000, 1000);
    let representative = context.representative(500);
    let active = Arc::new(ActiveElections::new(8));
    let vote_processor = VoteProcessor::new(Arc::clone(&test_ledger.block_store), Arc::clone(&active));
    let (block, _) = forks();
    let now = Instant::now();

    // 2. A vote that was tampered with is invalid.
    let mut tampered = Vote::new(&representative, 1, block.clone());
    tampered.sequence = 2;
    let outcome = vote_processor.vote(&context, &tampered, now).unwrap();
    assert_eq!(outcome.code, VoteCode::Invalid);

    // 3. A vote for a block without an election is still a new vote.
    let vote = Vote::new(&representative, 1, block.clone());
    let outcome = vote_processor.vote(&context, &vote, now).unwrap();
    assert_eq!(outcome.code, VoteCode::Vote);
    assert!(!outcome.election.processed);

    // 4. With an election, the first vote is processed by it, and a repeat is a replay.
    active.start(block.clone(), None);
    let vote = Vote::new(&representative, 2, block.clone());
    let outcome = vote_processor.vote(&context, &vote, now).unwrap();
    assert_eq!(outcome.code, VoteCode::Vote);
    assert!(outcome.election.processed);
    let outcome = vote_processor.vote(&context, &vote, now).unwrap();
    assert_eq!(outcome.code, VoteCode::Replay);
    assert!(outcome.reply.is_none());

    // 5. If the store has a vote by the same representative that is far ahead, it is sent back.
    let far_ahead = Vote::new(&representative, 20_000, block.clone());
    test_ledger.block_store.vote_max(far_ahead.clone()).unwrap();
    let stale = Vote::new(&representative, 3, block);
    let outcome = vote_processor.vote(&context, &stale, now + Duration::from_secs(1)).unwrap();
    assert_eq!(outcome.code, VoteCode::Vote);
    assert_eq!(outcome.reply, Some(far_ahead));
}

/// Tests that online stake follows the weight of representatives heard from recently, and never drops
/// below the configured minimum.
#[test]
fn online_reps_test() {
    setup_logger(LevelFilter::Debug);

    let test_ledger = TestLedger::new();
    let txn = test_ledger.block_store.tx_begin_read();
    let ledger = &test_ledger.ledger;
    let genesis = test_ledger.genesis.account();
    let online_reps = OnlineReps::new(Amount::new(100));
    let start = Instant::now();

    // 1. Nothing heard yet: the minimum.
    assert_eq!(online_reps.online_stake(), Amount::new(100));

    // 2. Hearing from genesis brings its whole weight online, once.
    online_reps.vote(ledger, &txn, &genesis, start).unwrap();
    online_reps.vote(ledger, &txn, &genesis, start).unwrap();
    assert_eq!(online_reps.online_stake(), SUPPLY);

    // 3. A weightless representative heard after the cutoff pushes genesis out.
    let other = keypair().account();
    online_reps
        .vote(ledger, &txn, &other, start + ONLINE_CUTOFF + Duration::from_secs(1))
        .unwrap();
    assert_eq!(online_reps.list(), vec![other]);
    assert_eq!(online_reps.online_stake(), Amount::new(100));

    // 4. Recalculation agrees.
    online_reps.recalculate_stake(ledger, &txn).unwrap();
    assert_eq!(online_reps.online_stake(), online_reps.online_weight_minimum());
}

/// Tests that a representative dropping offline takes away the weight it was counted with, even if its
/// weight has changed since.
#[test]
fn online_reps_expiry_test() {
    setup_logger(LevelFilter::Debug);

    let test_ledger = TestLedger::new();
    let ledger = &test_ledger.ledger;
    let genesis = test_ledger.genesis.account();
    let online_reps = OnlineReps::new(Amount::new(10));
    let start = Instant::now();

    // 1. Genesis comes online with the whole supply.
    {
        let txn = test_ledger.block_store.tx_begin_read();
        online_reps.vote(ledger, &txn, &genesis, start).unwrap();
    }
    assert_eq!(online_reps.online_stake(), SUPPLY);

    // 2. Genesis sends 100 away, so its weight drops while it is online.
    let send = Block::Tx(TxBlock::send(
        test_ledger.genesis.hash(),
        keypair().account(),
        SUPPLY - Amount::new(100),
        &test_ledger.genesis_keypair,
    ));
    assert_eq!(test_ledger.process(&send), ProcessResult::Progress);
    assert_eq!(test_ledger.weight(&genesis), SUPPLY - Amount::new(100));

    // 3. Once genesis expires, none of its weight is left behind.
    let other = keypair().account();
    let txn = test_ledger.block_store.tx_begin_read();
    online_reps
        .vote(ledger, &txn, &other, start + ONLINE_CUTOFF + Duration::from_secs(1))
        .unwrap();
    assert_eq!(online_reps.list(), vec![other]);
    assert_eq!(online_reps.online_stake(), Amount::new(10));
}

/// Tests that votes for a missing block report it as worth fetching once their weight passes the
/// bootstrap threshold.
#[test]
fn gap_cache_vote_test() {
    setup_logger(LevelFilter::Debug);

    let test_ledger = TestLedger::new();
    let txn = test_ledger.block_store.tx_begin_read();
    let gap_cache = GapCache::new(16, 1);
    let (missing, untracked) = forks();
    gap_cache.add(&missing, Instant::now());

    // 1. A vote from a weightless representative is not enough.
    let weightless = keypair();
    let vote = Vote::new(&weightless, 1, missing.clone());
    assert!(!gap_cache.vote(&test_ledger.ledger, &txn, &vote, SUPPLY).unwrap());

    // 2. Genesis holds far more than 1/256 of the online stake.
    let vote = Vote::new(&test_ledger.genesis_keypair, 1, missing.clone());
    assert!(gap_cache.vote(&test_ledger.ledger, &txn, &vote, SUPPLY).unwrap());

    // 3. Votes for blocks that are not tracked are ignored.
    let vote = Vote::new(&test_ledger.genesis_keypair, 2, untracked);
    assert!(!gap_cache.vote(&test_ledger.ledger, &txn, &vote, SUPPLY).unwrap());

    // 4. Once the block arrives, it is no longer tracked.
    gap_cache.erase(&missing.hash());
    assert!(!gap_cache.contains(&missing.hash()));
}
