/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validation and application of a single block.
//!
//! [`Ledger::process`] first rejects blocks that are already stored, then dispatches on the block's
//! kind:
//! - State blocks are validated by [`process_state`](Ledger::process_state).
//! - Every other kind is resolved against the chain it extends (finding its owner and resulting
//!   balance), upcast into a unified transaction block, and validated by
//!   [`process_tx`](Ledger::process_tx).
//!
//! Either way, nothing is written unless the block passes every check. A block that passes is applied by
//! [`commit`](Ledger::commit).

use crate::{
    store::{KVGet, KVStore, Transaction},
    types::{
        block::{Block, BlockKind, StateBlock, TxBlock, TxKind},
        data_types::{Account, Amount, Hash},
        keypair::validate_message,
        records::{AccountInfo, PendingInfo, PendingKey},
    },
};

use super::{Effect, Ledger, LedgerError, ProcessResult, ProcessReturn};

impl Ledger {
    /// Validate `block` against the state that `txn` sees and, if it is valid, apply it.
    ///
    /// Returns [`ProcessResult::Progress`] if the block was applied. Any other code means that `txn` was
    /// left unchanged.
    pub fn process<K: KVStore>(
        &self,
        txn: &mut Transaction<'_, K>,
        block: &Block,
    ) -> Result<ProcessReturn, LedgerError> {
        let hash = block.hash();
        if txn.block_exists(&hash) {
            return Ok(ProcessReturn::new(ProcessResult::Old));
        }

        let result = match block {
            Block::State(state) => self.process_state(txn, &hash, block, state)?,
            _ => match self.resolve_legacy(txn, block)? {
                Ok(tx) => self.process_tx(txn, &hash, block, &tx)?,
                Err(code) => ProcessReturn::new(code),
            },
        };

        if result.is_progress() {
            log::debug!("Applied {:?} block {} of account {}.", block.kind(), hash, result.account);
        } else {
            log::debug!("Rejected {:?} block {}: {}.", block.kind(), hash, result.code);
        }
        Ok(result)
    }

    /// Find the owner and resulting balance of `block` from the chain it extends, and upcast it into a
    /// unified transaction block.
    ///
    /// Returns a rejection code if the chain cannot be found: [`GapPrevious`](ProcessResult::GapPrevious)
    /// if `previous` is not stored, or [`Fork`](ProcessResult::Fork) if `previous` is stored but is no
    /// longer the head of its chain.
    fn resolve_legacy<K: KVStore>(
        &self,
        txn: &Transaction<'_, K>,
        block: &Block,
    ) -> Result<Result<TxBlock, ProcessResult>, LedgerError> {
        let (account, balance) = match block {
            Block::Tx(tx) => return Ok(Ok(tx.clone())),
            Block::Open(open) => {
                let pending = txn.pending(&PendingKey::new(open.account, open.source))?;
                (open.account, pending.map_or(Amount::zero(), |pending| pending.amount))
            }
            Block::Send(_) | Block::Receive(_) | Block::Change(_) => {
                let previous = block.previous();
                if !txn.block_exists(&previous) {
                    return Ok(Err(ProcessResult::GapPrevious));
                }
                let Some(account) = txn.frontier(&previous)? else {
                    return Ok(Err(ProcessResult::Fork));
                };
                let info = self.account_or_err(txn, &account)?;
                let balance = match block.source() {
                    Some(source) => {
                        let pending = txn.pending(&PendingKey::new(account, source))?;
                        pending.map_or(info.balance, |pending| info.balance.saturating_add(pending.amount))
                    }
                    None => info.balance,
                };
                (account, balance)
            }
            Block::State(_) => {
                return Err(LedgerError::InvariantViolation {
                    block: block.hash(),
                    reason: "state blocks have no unified transaction form",
                })
            }
        };

        block
            .upcast(account, balance)
            .map(Ok)
            .ok_or(LedgerError::InvariantViolation {
                block: block.hash(),
                reason: "block has no unified transaction form",
            })
    }

    /// Validate and apply a unified transaction block, or a legacy block upcast into one.
    ///
    /// `hash` and `block` are the hash and form of the block as received: they are what is verified
    /// against the signature and what is stored.
    fn process_tx<K: KVStore>(
        &self,
        txn: &mut Transaction<'_, K>,
        hash: &Hash,
        block: &Block,
        tx: &TxBlock,
    ) -> Result<ProcessReturn, LedgerError> {
        let mut result = ProcessReturn::new(ProcessResult::Progress);

        if !validate_message(&tx.account, hash, &tx.signature) {
            return Ok(result.with_code(ProcessResult::BadSignature));
        }
        if tx.account.is_zero() {
            return Ok(result.with_code(ProcessResult::OpenedBurnAccount));
        }
        result.account = tx.account;

        let info = txn.account(&tx.account)?;
        let old_balance = match &info {
            Some(info) => {
                if tx.previous.is_zero() {
                    return Ok(result.with_code(ProcessResult::Fork));
                }
                let Some(previous) = txn.block(&tx.previous)? else {
                    return Ok(result.with_code(ProcessResult::GapPrevious));
                };
                if previous.kind() == BlockKind::State {
                    return Ok(result.with_code(ProcessResult::BlockPosition));
                }
                if tx.previous != info.head {
                    return Ok(result.with_code(ProcessResult::Fork));
                }
                info.balance
            }
            None => {
                if !tx.previous.is_zero() {
                    return Ok(result.with_code(ProcessResult::GapPrevious));
                }
                if tx.source.is_zero() {
                    return Ok(result.with_code(ProcessResult::GapSource));
                }
                Amount::zero()
            }
        };

        let effect = match tx.kind() {
            TxKind::Send => {
                let Some(amount) = old_balance.checked_sub(tx.balance) else {
                    return Ok(result.with_code(ProcessResult::NegativeSpend));
                };
                result.pending_account = tx.destination;
                Effect::Send {
                    destination: tx.destination,
                    amount,
                }
            }
            TxKind::Receive | TxKind::Open => {
                if !txn.block_exists(&tx.source) {
                    return Ok(result.with_code(ProcessResult::GapSource));
                }
                let Some(pending) = txn.pending(&PendingKey::new(tx.account, tx.source))? else {
                    return Ok(result.with_code(ProcessResult::Unreceivable));
                };
                if old_balance.checked_add(pending.amount) != Some(tx.balance) {
                    return Ok(result.with_code(ProcessResult::BalanceMismatch));
                }
                Effect::Receive {
                    source: tx.source,
                    amount: pending.amount,
                }
            }
            TxKind::Change => {
                if tx.balance != old_balance {
                    return Ok(result.with_code(ProcessResult::BalanceMismatch));
                }
                Effect::Change
            }
        };
        result.amount = effect.amount();

        self.commit(txn, hash, block, &tx.account, info, tx.balance, effect)?;
        Ok(result)
    }

    /// Validate and apply a state block.
    fn process_state<K: KVStore>(
        &self,
        txn: &mut Transaction<'_, K>,
        hash: &Hash,
        block: &Block,
        state: &StateBlock,
    ) -> Result<ProcessReturn, LedgerError> {
        let mut result = ProcessReturn::new(ProcessResult::Progress);

        if !validate_message(&state.account, hash, &state.signature) {
            return Ok(result.with_code(ProcessResult::BadSignature));
        }
        if state.account.is_zero() {
            return Ok(result.with_code(ProcessResult::OpenedBurnAccount));
        }
        result.account = state.account;

        let info = txn.account(&state.account)?;
        let (is_send, amount) = match &info {
            Some(info) => {
                if state.previous.is_zero() {
                    return Ok(result.with_code(ProcessResult::Fork));
                }
                if !txn.block_exists(&state.previous) {
                    return Ok(result.with_code(ProcessResult::GapPrevious));
                }
                let is_send = state.balance < info.balance;
                let amount = state.balance.abs_diff(info.balance);
                if state.previous != info.head {
                    return Ok(result.with_code(ProcessResult::Fork));
                }
                (is_send, amount)
            }
            None => {
                if !state.previous.is_zero() {
                    return Ok(result.with_code(ProcessResult::GapPrevious));
                }
                if state.link.is_zero() {
                    return Ok(result.with_code(ProcessResult::GapSource));
                }
                (false, state.balance)
            }
        };
        result.state_is_send = Some(is_send);
        result.amount = amount;

        let effect = if is_send {
            let destination = Account::from(state.link);
            result.pending_account = destination;
            Effect::Send {
                destination,
                amount,
            }
        } else if !state.link.is_zero() {
            if !txn.block_exists(&state.link) {
                return Ok(result.with_code(ProcessResult::GapSource));
            }
            let Some(pending) = txn.pending(&PendingKey::new(state.account, state.link))? else {
                return Ok(result.with_code(ProcessResult::Unreceivable));
            };
            if pending.amount != amount {
                return Ok(result.with_code(ProcessResult::BalanceMismatch));
            }
            Effect::Receive {
                source: state.link,
                amount,
            }
        } else {
            if !amount.is_zero() {
                return Ok(result.with_code(ProcessResult::BalanceMismatch));
            }
            Effect::Change
        };

        self.commit(txn, hash, block, &state.account, info, state.balance, effect)?;
        Ok(result)
    }

    /// Apply a validated block: store it, update receivable entries and representative weights, and make
    /// it the head of `account`'s chain.
    #[allow(clippy::too_many_arguments)]
    fn commit<K: KVStore>(
        &self,
        txn: &mut Transaction<'_, K>,
        hash: &Hash,
        block: &Block,
        account: &Account,
        info: Option<AccountInfo>,
        balance: Amount,
        effect: Effect,
    ) -> Result<(), LedgerError> {
        txn.block_put(hash, block, &Hash::zero())?;

        match effect {
            Effect::Send {
                destination,
                amount,
            } => txn.pending_put(
                &PendingKey::new(destination, *hash),
                &PendingInfo::new(*account, amount),
            )?,
            Effect::Receive { source, .. } => txn.pending_del(&PendingKey::new(*account, source)),
            Effect::Change => (),
        }

        let rep_block = match block.representative() {
            Some(_) => *hash,
            None => match &info {
                Some(info) => info.rep_block,
                None => {
                    return Err(LedgerError::InvariantViolation {
                        block: *hash,
                        reason: "first block of a chain names no representative",
                    })
                }
            },
        };
        if let Some(info) = &info {
            let old_representative = self.representative_of(&*txn, &info.rep_block)?;
            self.weights.sub(txn, &old_representative, info.balance)?;
        }
        let representative = self.representative_of(&*txn, &rep_block)?;
        self.weights.add(txn, &representative, balance)?;

        let block_count = info.as_ref().map_or(0, |info| info.block_count) + 1;
        self.change_latest(txn, account, hash, &rep_block, balance, block_count, block.kind())?;

        if let Some(info) = &info {
            txn.frontier_del(&info.head);
        }
        txn.frontier_put(hash, account)?;
        Ok(())
    }
}
