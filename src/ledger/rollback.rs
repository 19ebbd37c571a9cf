/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Undoing blocks.
//!
//! [`Ledger::rollback`] removes a block and every block after it in its chain. Blocks can only be undone
//! from the head of a chain, so the ledger repeatedly undoes the current head of the target's chain until
//! the target is gone.
//!
//! Rollback is not local to one chain. Undoing a send requires the funds it sent to be receivable again,
//! so if the destination has already received them, the destination's chain must first be rolled back
//! past the receive, which can in turn require rolling back further chains. These dependencies are kept
//! on an explicit work-list instead of the call stack. Every block pushed onto the work-list is recorded;
//! being asked to push the same block twice means that the rollback cannot make progress, and is
//! reported as [`LedgerError::RollbackCycle`].

use std::collections::HashSet;

use crate::{
    store::{KVGet, KVStore, Transaction},
    types::{
        block::Block,
        data_types::{Account, Amount, Hash},
        records::{AccountInfo, PendingInfo, PendingKey},
    },
};

use super::{Effect, Ledger, LedgerError};

/// Outcome of trying to undo the head of a chain.
enum Step {
    /// The head was undone.
    Undone(Block),
    /// The head is a send whose funds have already been received. The given block, the head of the
    /// destination's chain, has to be undone first.
    Blocked(Hash),
}

impl Ledger {
    /// Roll back the block `hash` and every block after it in its chain, along with every block in other
    /// chains that depends on any of these.
    ///
    /// Returns the blocks that were rolled back, in the order they were rolled back. Rolling back a block
    /// that is not stored does nothing.
    pub fn rollback<K: KVStore>(
        &self,
        txn: &mut Transaction<'_, K>,
        hash: &Hash,
    ) -> Result<Vec<Block>, LedgerError> {
        let mut rolled_back = Vec::new();
        let mut work_list = vec![*hash];
        let mut pushed: HashSet<Hash> = HashSet::from([*hash]);

        while let Some(target) = work_list.last().copied() {
            if !txn.block_exists(&target) {
                work_list.pop();
                continue;
            }

            let account = self.account(&*txn, &target)?;
            let info = self.account_or_err(&*txn, &account)?;
            match self.undo_head(txn, &account, &info)? {
                Step::Undone(block) => {
                    log::debug!("Rolled back block {} of account {}.", info.head, account);
                    rolled_back.push(block);
                }
                Step::Blocked(dependency) => {
                    if !pushed.insert(dependency) {
                        return Err(LedgerError::RollbackCycle { block: dependency });
                    }
                    work_list.push(dependency);
                }
            }
        }

        Ok(rolled_back)
    }

    /// Undo the head block of `account`, whose current information is `info`.
    fn undo_head<K: KVStore>(
        &self,
        txn: &mut Transaction<'_, K>,
        account: &Account,
        info: &AccountInfo,
    ) -> Result<Step, LedgerError> {
        let hash = info.head;
        let block = self.block_or_err(&*txn, &hash)?;
        let previous = block.previous();

        match self.effect(&*txn, &hash)? {
            Effect::Send {
                destination,
                amount: _,
            } => {
                let key = PendingKey::new(destination, hash);
                if !txn.pending_exists(&key) {
                    let blocker = self.latest(&*txn, &destination)?;
                    if blocker.is_zero() {
                        return Err(LedgerError::InvariantViolation {
                            block: hash,
                            reason: "sent funds are neither receivable nor received",
                        });
                    }
                    return Ok(Step::Blocked(blocker));
                }
                txn.pending_del(&key);
            }
            Effect::Receive { source, amount } => {
                let source_account = self.account(&*txn, &source)?;
                txn.pending_put(
                    &PendingKey::new(*account, source),
                    &PendingInfo::new(source_account, amount),
                )?;
            }
            Effect::Change => (),
        }

        let current_representative = self.representative_of(&*txn, &info.rep_block)?;
        self.weights.sub(txn, &current_representative, info.balance)?;

        if previous.is_zero() {
            self.change_latest(txn, account, &Hash::zero(), &Hash::zero(), Amount::zero(), 0, block.kind())?;
        } else {
            let previous_block = self.block_or_err(&*txn, &previous)?;
            let previous_balance = self.balance(&*txn, &previous)?;
            let previous_rep_block = txn.rep_block(&previous)?;
            let previous_representative = self.representative_of(&*txn, &previous_rep_block)?;
            self.weights.add(txn, &previous_representative, previous_balance)?;
            self.change_latest(
                txn,
                account,
                &previous,
                &previous_rep_block,
                previous_balance,
                info.block_count.saturating_sub(1),
                previous_block.kind(),
            )?;
            txn.frontier_put(&previous, account)?;
            txn.block_successor_clear(&previous)?;
        }

        txn.block_del(&hash)?;
        txn.frontier_del(&hash);
        txn.block_info_del(&hash);
        Ok(Step::Undone(block))
    }
}
