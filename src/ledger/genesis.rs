/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The genesis block: the first block of the first account chain, which holds the whole supply.

use crate::{
    store::{KVGet, KVStore, Transaction},
    types::{
        block::{Block, TxBlock},
        data_types::{seconds_since_epoch, Account, Amount, Hash},
        keypair::Keypair,
        records::AccountInfo,
    },
};

use super::LedgerError;

#[derive(Clone, Debug)]
pub struct Genesis {
    block: TxBlock,
}

impl Genesis {
    /// Create a genesis block that opens the chain of `keypair`'s account with a balance of `amount`.
    pub fn new(keypair: &Keypair, amount: Amount) -> Self {
        Self {
            block: TxBlock::open(Hash::from(keypair.account()), amount, keypair),
        }
    }

    pub fn hash(&self) -> Hash {
        self.block.hash()
    }

    pub fn account(&self) -> Account {
        self.block.account
    }

    pub fn amount(&self) -> Amount {
        self.block.balance
    }

    pub fn block(&self) -> Block {
        Block::Tx(self.block.clone())
    }

    /// Write the genesis block and its account into an empty ledger.
    ///
    /// The genesis account starts out representing itself with the whole supply.
    pub fn initialize<K: KVStore>(&self, txn: &mut Transaction<'_, K>) -> Result<(), LedgerError> {
        let hash = self.hash();
        let account = self.account();
        if txn.account_count() != 0 {
            return Err(LedgerError::InvariantViolation {
                block: hash,
                reason: "genesis can only be written into an empty ledger",
            });
        }

        txn.block_put(&hash, &self.block(), &Hash::zero())?;
        txn.account_put(
            &account,
            &AccountInfo {
                head: hash,
                rep_block: hash,
                open_block: hash,
                balance: self.amount(),
                modified: seconds_since_epoch(),
                block_count: 1,
            },
        )?;
        txn.checksum_put(0, 0, &hash)?;
        txn.frontier_put(&hash, &account)?;
        txn.representation_put(&account, self.amount())?;

        log::info!("Initialized ledger with genesis block {} of account {}.", hash, account);
        Ok(())
    }
}
