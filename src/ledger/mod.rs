/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block-processing state machine.
//!
//! The [`Ledger`] validates and applies one block at a time against a write [`Transaction`]
//! ([`process`](Ledger::process)), undoes blocks to resolve forks ([`rollback`](Ledger::rollback)), and
//! computes quantities that are not stored directly: the balance after any block, the amount a block
//! moved, the account that owns a block, and the voting weight of a representative.
//!
//! # Block kinds
//!
//! State blocks carry their owner's account and resulting balance, and are validated by their own set of
//! rules. Every other kind is first resolved against the chain it extends and then
//! [upcast](crate::types::block::Block::upcast) into a unified transaction block, so legacy send,
//! receive, open and change blocks share the unified transaction rules instead of duplicating them.
//!
//! # Failure
//!
//! Invalid *input* is never an error: [`process`](Ledger::process) reports it as a
//! [`ProcessResult`] code and leaves the transaction untouched. [`LedgerError`]s are reserved for
//! failures of the store and for violated invariants of the ledger itself (e.g. an account whose head
//! block is missing). Callers should treat them as fatal.

pub mod genesis;

pub mod process;

pub mod process_result;

pub mod rollback;

pub mod weights;

use crate::{
    store::{pluggables::KVGetError, BlockStoreError, KVGet, KVStore, Transaction},
    types::{
        block::{Block, BlockKind, TxKind},
        data_types::{seconds_since_epoch, Account, Amount, Hash},
        records::{AccountInfo, BlockInfo},
    },
};

pub use genesis::Genesis;
pub use process_result::{ProcessResult, ProcessReturn};
pub use weights::{RepWeights, WeightMode};

pub struct Ledger {
    block_info_max: u64,
    weights: RepWeights,
}

/// What applying a block did to the ledger's receivable entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// The block made `amount` receivable by `destination`.
    Send { destination: Account, amount: Amount },
    /// The block credited `amount` sent by the block `source`.
    Receive { source: Hash, amount: Amount },
    /// The block moved no funds.
    Change,
}

impl Effect {
    pub fn amount(&self) -> Amount {
        match self {
            Effect::Send { amount, .. } | Effect::Receive { amount, .. } => *amount,
            Effect::Change => Amount::zero(),
        }
    }

    pub fn is_send(&self) -> bool {
        matches!(self, Effect::Send { .. })
    }
}

impl Ledger {
    /// Create a ledger that writes a balance checkpoint every `block_info_max` blocks of a legacy chain.
    pub fn new(block_info_max: u64, weights: RepWeights) -> Self {
        Self {
            block_info_max,
            weights,
        }
    }

    pub fn weights(&self) -> &RepWeights {
        &self.weights
    }
}

/// Derived reads.
impl Ledger {
    /// Balance of the owning account immediately after the block `hash`. Zero for the zero hash.
    pub fn balance(&self, store: &impl KVGet, hash: &Hash) -> Result<Amount, LedgerError> {
        let mut total = Amount::zero();
        let mut current = *hash;
        while !current.is_zero() {
            match self.block_or_err(store, &current)? {
                Block::Send(send) => return Ok(total.saturating_add(send.balance)),
                Block::State(state) => return Ok(total.saturating_add(state.balance)),
                Block::Tx(tx) => return Ok(total.saturating_add(tx.balance)),
                Block::Open(open) => {
                    return Ok(total.saturating_add(self.amount(store, &open.source)?))
                }
                Block::Receive(receive) => {
                    if let Some(info) = store.block_info(&current)? {
                        return Ok(total.saturating_add(info.balance));
                    }
                    total = total.saturating_add(self.amount(store, &receive.source)?);
                    current = receive.previous;
                }
                Block::Change(change) => {
                    if let Some(info) = store.block_info(&current)? {
                        return Ok(total.saturating_add(info.balance));
                    }
                    current = change.previous;
                }
            }
        }
        Ok(total)
    }

    /// Amount moved by the block `hash`: the amount sent or received, or zero for representative
    /// changes.
    pub fn amount(&self, store: &impl KVGet, hash: &Hash) -> Result<Amount, LedgerError> {
        if hash.is_zero() {
            return Ok(Amount::zero());
        }
        match self.block_or_err(store, hash)? {
            Block::Send(send) => Ok(self.balance(store, &send.previous)?.saturating_sub(send.balance)),
            Block::Receive(receive) => self.amount(store, &receive.source),
            Block::Open(open) => self.amount(store, &open.source),
            Block::Change(_) => Ok(Amount::zero()),
            Block::State(state) => Ok(state.balance.abs_diff(self.balance(store, &state.previous)?)),
            Block::Tx(tx) => Ok(tx.balance.abs_diff(self.balance(store, &tx.previous)?)),
        }
    }

    /// The account whose chain contains the block `hash`.
    ///
    /// Blocks that carry their account answer directly. For other blocks, successors are followed until
    /// a block that carries its account, a balance checkpoint, or the chain's head (which has a frontier
    /// entry) is reached.
    pub fn account(&self, store: &impl KVGet, hash: &Hash) -> Result<Account, LedgerError> {
        let mut current = *hash;
        loop {
            if let Some(account) = self.block_or_err(store, &current)?.account() {
                return Ok(account);
            }
            if let Some(info) = store.block_info(&current)? {
                return Ok(info.account);
            }
            let successor = store.block_successor(&current)?;
            if successor.is_zero() {
                return store
                    .frontier(&current)?
                    .ok_or(LedgerError::InvariantViolation {
                        block: current,
                        reason: "head block has no frontier entry",
                    });
            }
            current = successor;
        }
    }

    /// Head of `account`'s chain, or zero if the account is not open.
    pub fn latest(&self, store: &impl KVGet, account: &Account) -> Result<Hash, LedgerError> {
        Ok(store
            .account(account)?
            .map_or(Hash::zero(), |info| info.head))
    }

    /// The root that the next block of `account` would have: its head, or the account itself if the
    /// account is not open.
    pub fn latest_root(&self, store: &impl KVGet, account: &Account) -> Result<Hash, LedgerError> {
        Ok(store
            .account(account)?
            .map_or(Hash::from(*account), |info| info.head))
    }

    /// The block that occupies the slot after `root`: the open block if `root` is an opened account,
    /// otherwise the successor of the block `root`.
    pub fn successor(&self, store: &impl KVGet, root: &Hash) -> Result<Option<Block>, LedgerError> {
        let successor = match store.account(&Account::from(*root))? {
            Some(info) => info.open_block,
            None => store.block_successor(root)?,
        };
        if successor.is_zero() {
            return Ok(None);
        }
        Ok(store.block(&successor)?)
    }

    /// The block in the ledger that `block` would fork with: the block already stored at `block`'s root.
    pub fn forked_block(&self, store: &impl KVGet, block: &Block) -> Result<Option<Block>, LedgerError> {
        let root = block.root();
        let mut forked = store.block_successor(&root)?;
        if forked.is_zero() {
            if let Some(info) = store.account(&Account::from(root))? {
                forked = info.open_block;
            }
        }
        if forked.is_zero() {
            return Ok(None);
        }
        Ok(store.block(&forked)?)
    }

    /// Current balance of `account`. Zero if the account is not open.
    pub fn account_balance(&self, store: &impl KVGet, account: &Account) -> Result<Amount, LedgerError> {
        Ok(store
            .account(account)?
            .map_or(Amount::zero(), |info| info.balance))
    }

    /// Total amount receivable by `account`.
    pub fn account_pending(&self, store: &impl KVGet, account: &Account) -> Result<Amount, LedgerError> {
        Ok(store
            .pending_of(account)?
            .into_iter()
            .map(|(_, info)| info.amount)
            .sum())
    }

    /// Voting weight of `representative`.
    pub fn weight(&self, store: &impl KVGet, representative: &Account) -> Result<Amount, LedgerError> {
        Ok(self.weights.weight(store, representative)?)
    }

    /// The representative of the owner of `hash` as of that block.
    pub fn representative(&self, store: &impl KVGet, hash: &Hash) -> Result<Account, LedgerError> {
        let rep_block = store.rep_block(hash)?;
        self.representative_of(store, &rep_block)
    }

    /// Sum the weights of the representatives voting for each block, and return the blocks in
    /// descending order of total weight.
    pub fn tally<'a>(
        &self,
        store: &impl KVGet,
        votes: impl IntoIterator<Item = (&'a Account, &'a Block)>,
    ) -> Result<Vec<(Amount, Block)>, LedgerError> {
        let mut totals: Vec<(Amount, Block)> = Vec::new();
        for (representative, block) in votes {
            let weight = self.weight(store, representative)?;
            let hash = block.hash();
            match totals.iter_mut().find(|(_, candidate)| candidate.hash() == hash) {
                Some((total, _)) => *total = total.saturating_add(weight),
                None => totals.push((weight, block.clone())),
            }
        }
        totals.sort_by(|(a, a_block), (b, b_block)| b.cmp(a).then(a_block.hash().cmp(&b_block.hash())));
        Ok(totals)
    }

    /// The block with the highest tallied weight among `votes`, and that weight.
    pub fn winner<'a>(
        &self,
        store: &impl KVGet,
        votes: impl IntoIterator<Item = (&'a Account, &'a Block)>,
    ) -> Result<Option<(Amount, Block)>, LedgerError> {
        Ok(self.tally(store, votes)?.into_iter().next())
    }

    /// XOR of the heads of every account chain.
    pub fn checksum(&self, store: &impl KVGet) -> Result<Hash, LedgerError> {
        Ok(store.checksum(0, 0)?.unwrap_or(Hash::zero()))
    }

    /// Whether every block that `block` depends on is in the ledger, so that processing it cannot
    /// result in a gap.
    pub fn could_fit(&self, store: &impl KVGet, block: &Block) -> Result<bool, LedgerError> {
        let previous = block.previous();
        if !previous.is_zero() && !store.block_exists(&previous) {
            return Ok(false);
        }
        let fits = match block {
            Block::State(state) => {
                state.link.is_zero()
                    || self.is_send(store, block)?
                    || store.block_exists(&state.link)
            }
            _ => block.source().map_or(true, |source| store.block_exists(&source)),
        };
        Ok(fits)
    }

    /// Whether `block` decreases its owner's balance. State blocks are sends if their balance is lower
    /// than the balance after their predecessor.
    pub fn is_send(&self, store: &impl KVGet, block: &Block) -> Result<bool, LedgerError> {
        match block {
            Block::Send(_) => Ok(true),
            Block::Tx(tx) => Ok(tx.kind() == TxKind::Send),
            Block::State(state) => Ok(!state.previous.is_zero()
                && state.balance < self.balance(store, &state.previous)?),
            Block::Receive(_) | Block::Open(_) | Block::Change(_) => Ok(false),
        }
    }

    /// What the stored block `hash` did to the receivable entries when it was applied.
    pub fn effect(&self, store: &impl KVGet, hash: &Hash) -> Result<Effect, LedgerError> {
        let block = self.block_or_err(store, hash)?;
        let effect = match &block {
            Block::Send(send) => Effect::Send {
                destination: send.destination,
                amount: self.amount(store, hash)?,
            },
            Block::Receive(_) | Block::Open(_) => Effect::Receive {
                source: block.source().unwrap_or(Hash::zero()),
                amount: self.amount(store, hash)?,
            },
            Block::Change(_) => Effect::Change,
            Block::State(state) => {
                if self.is_send(store, &block)? {
                    Effect::Send {
                        destination: Account::from(state.link),
                        amount: self.amount(store, hash)?,
                    }
                } else if !state.link.is_zero() {
                    Effect::Receive {
                        source: state.link,
                        amount: self.amount(store, hash)?,
                    }
                } else {
                    Effect::Change
                }
            }
            Block::Tx(tx) => match tx.kind() {
                TxKind::Send => Effect::Send {
                    destination: tx.destination,
                    amount: self.amount(store, hash)?,
                },
                TxKind::Receive | TxKind::Open => Effect::Receive {
                    source: tx.source,
                    amount: self.amount(store, hash)?,
                },
                TxKind::Change => Effect::Change,
            },
        };
        Ok(effect)
    }
}

/// Shared internals.
impl Ledger {
    /// Point `account` at a new head `hash`, or delete the account if `hash` is zero, keeping the
    /// whole-ledger checksum and the balance checkpoints in step.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn change_latest<K: KVStore>(
        &self,
        txn: &mut Transaction<'_, K>,
        account: &Account,
        hash: &Hash,
        rep_block: &Hash,
        balance: Amount,
        block_count: u64,
        kind: BlockKind,
    ) -> Result<(), LedgerError> {
        let old = txn.account(account)?;
        let mut checksum = txn.checksum(0, 0)?.unwrap_or(Hash::zero());
        let open_block = match &old {
            Some(info) => {
                checksum ^= info.head;
                info.open_block
            }
            None => *hash,
        };

        if !hash.is_zero() {
            let info = AccountInfo {
                head: *hash,
                rep_block: *rep_block,
                open_block,
                balance,
                modified: seconds_since_epoch(),
                block_count,
            };
            txn.account_put(account, &info)?;
            if self.block_info_max > 0
                && block_count % self.block_info_max == 0
                && !kind.is_self_describing()
            {
                txn.block_info_put(
                    hash,
                    &BlockInfo {
                        account: *account,
                        balance,
                    },
                )?;
            }
            checksum ^= *hash;
        } else {
            txn.account_del(account);
        }
        txn.checksum_put(0, 0, &checksum)?;
        Ok(())
    }

    /// The representative named by the block `rep_block`.
    pub(crate) fn representative_of(
        &self,
        store: &impl KVGet,
        rep_block: &Hash,
    ) -> Result<Account, LedgerError> {
        self.block_or_err(store, rep_block)?
            .representative()
            .ok_or(LedgerError::InvariantViolation {
                block: *rep_block,
                reason: "representative block names no representative",
            })
    }

    pub(crate) fn block_or_err(&self, store: &impl KVGet, hash: &Hash) -> Result<Block, LedgerError> {
        store
            .block(hash)?
            .ok_or(LedgerError::BlockStoreError(BlockStoreError::BlockExpectedButNotFound {
                block: *hash,
            }))
    }

    pub(crate) fn account_or_err(
        &self,
        store: &impl KVGet,
        account: &Account,
    ) -> Result<AccountInfo, LedgerError> {
        store
            .account(account)?
            .ok_or(LedgerError::BlockStoreError(BlockStoreError::AccountExpectedButNotFound {
                account: *account,
            }))
    }
}

/// Error raised by the ledger when the store fails or one of the ledger's invariants turns out not to
/// hold. Never raised because of an invalid input block.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    BlockStoreError(#[from] BlockStoreError),

    /// Rolling back a block required rolling back a block that was already waiting on it.
    #[error("rollback of block {block} depends on itself")]
    RollbackCycle { block: Hash },

    #[error("ledger invariant violated at block {block}: {reason}")]
    InvariantViolation { block: Hash, reason: &'static str },
}

impl From<KVGetError> for LedgerError {
    fn from(err: KVGetError) -> Self {
        LedgerError::BlockStoreError(BlockStoreError::KVGetError(err))
    }
}
