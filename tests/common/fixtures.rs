//! Keys, genesis and a ledger over an in-memory store, shared by the integration tests.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use lattice_rs::{
    ledger::{Genesis, Ledger, LedgerError, ProcessResult, RepWeights},
    store::{BlockStore, KVGet},
    types::{
        block::Block,
        data_types::{Account, Amount, Hash},
        keypair::Keypair,
    },
};
use rand_core::OsRng;

use super::mem_db::MemDB;

/// Supply used by every test ledger.
pub(crate) const SUPPLY: Amount = Amount::new(1_000_000);

pub(crate) fn keypair() -> Keypair {
    let mut csprg = OsRng {};
    Keypair::new(SigningKey::generate(&mut csprg))
}

/// A ledger over a fresh in-memory store, initialized with a genesis block that gives the whole supply
/// to `genesis_keypair`.
pub(crate) struct TestLedger {
    pub(crate) kv_store: MemDB,
    pub(crate) block_store: Arc<BlockStore<MemDB>>,
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) genesis: Genesis,
    pub(crate) genesis_keypair: Keypair,
}

impl TestLedger {
    pub(crate) fn new() -> Self {
        Self::with_supply(SUPPLY)
    }

    pub(crate) fn with_supply(supply: Amount) -> Self {
        Self::build(supply, Ledger::new(32, RepWeights::local()))
    }

    /// A test ledger whose blocks are processed by `ledger`, for tests that need a particular checkpoint
    /// interval or bootstrap weights.
    pub(crate) fn with_ledger(ledger: Ledger) -> Self {
        Self::build(SUPPLY, ledger)
    }

    fn build(supply: Amount, ledger: Ledger) -> Self {
        let genesis_keypair = keypair();
        let genesis = Genesis::new(&genesis_keypair, supply);
        let kv_store = MemDB::new();
        let block_store = Arc::new(BlockStore::open(kv_store.clone()).unwrap());
        {
            let mut txn = block_store.tx_begin_write();
            genesis.initialize(&mut txn).unwrap();
            txn.commit();
        }

        Self {
            kv_store,
            block_store,
            ledger: Arc::new(ledger),
            genesis,
            genesis_keypair,
        }
    }

    /// Process `block` in its own write transaction, and commit it.
    pub(crate) fn process(&self, block: &Block) -> ProcessResult {
        let mut txn = self.block_store.tx_begin_write();
        let result = self.ledger.process(&mut txn, block).unwrap();
        txn.commit();
        result.code
    }

    /// Roll back `hash` in its own write transaction, commit, and return the hashes of the blocks rolled
    /// back.
    pub(crate) fn rollback(&self, hash: &Hash) -> Result<Vec<Hash>, LedgerError> {
        let mut txn = self.block_store.tx_begin_write();
        let rolled_back = self.ledger.rollback(&mut txn, hash)?;
        txn.commit();
        Ok(rolled_back.iter().map(Block::hash).collect())
    }

    pub(crate) fn balance(&self, account: &Account) -> Amount {
        let txn = self.block_store.tx_begin_read();
        self.ledger.account_balance(&txn, account).unwrap()
    }

    pub(crate) fn pending(&self, account: &Account) -> Amount {
        let txn = self.block_store.tx_begin_read();
        self.ledger.account_pending(&txn, account).unwrap()
    }

    pub(crate) fn weight(&self, representative: &Account) -> Amount {
        let txn = self.block_store.tx_begin_read();
        self.ledger.weight(&txn, representative).unwrap()
    }

    pub(crate) fn latest(&self, account: &Account) -> Hash {
        let txn = self.block_store.tx_begin_read();
        self.ledger.latest(&txn, account).unwrap()
    }

    pub(crate) fn exists(&self, hash: &Hash) -> bool {
        self.block_store.tx_begin_read().block_exists(hash)
    }

    pub(crate) fn checksum(&self) -> Hash {
        let txn = self.block_store.tx_begin_read();
        self.ledger.checksum(&txn).unwrap()
    }

    /// Sum of the balances of `accounts` and the amounts receivable by them.
    pub(crate) fn total(&self, accounts: &[Account]) -> Amount {
        accounts
            .iter()
            .map(|account| self.balance(account).saturating_add(self.pending(account)))
            .sum()
    }
}
