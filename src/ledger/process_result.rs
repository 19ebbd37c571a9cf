/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Outcome of processing a block: [`ProcessResult`] codes and the [`ProcessReturn`] record.
//!
//! These codes are part of the public interface of the ledger. Anything that submits blocks (the block
//! processor, a wallet, an RPC server) matches on them, so their names and meanings are stable.

use std::fmt::{self, Display, Formatter};

use crate::types::data_types::{Account, Amount};

/// Result code of [`Ledger::process`](super::Ledger::process).
///
/// Every code except `Progress` means that the ledger was left unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessResult {
    /// The block was valid and has been applied.
    Progress,
    /// The block's signature is not a signature by its account over its hash.
    BadSignature,
    /// The block is already in the ledger.
    Old,
    /// The block's balance is higher than its predecessor's, but it claims to be a send.
    NegativeSpend,
    /// The block conflicts with a block already in the ledger: it extends a block that is no longer
    /// its chain's head, or opens an account that is already open.
    Fork,
    /// The source block is not receivable by this account: it was already received, or was never sent
    /// to it.
    Unreceivable,
    /// The block's predecessor is not in the ledger yet.
    GapPrevious,
    /// The block's source is not in the ledger yet.
    GapSource,
    /// The block tries to open the burn account.
    OpenedBurnAccount,
    /// The balance of the block does not match the amount it claims to move.
    BalanceMismatch,
    /// The block's kind cannot follow its predecessor, e.g. a legacy block after a state block.
    BlockPosition,
}

impl ProcessResult {
    /// Stable, human-readable description of this code, suitable for returning to an RPC client.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProcessResult::Progress => "Progress",
            ProcessResult::BadSignature => "Bad signature",
            ProcessResult::Old => "Old block",
            ProcessResult::NegativeSpend => "Negative spend",
            ProcessResult::Fork => "Fork",
            ProcessResult::Unreceivable => "Unreceivable",
            ProcessResult::GapPrevious => "Gap previous block",
            ProcessResult::GapSource => "Gap source block",
            ProcessResult::OpenedBurnAccount => "Block attempts to open the burn account",
            ProcessResult::BalanceMismatch => "Balance and amount delta do not match",
            ProcessResult::BlockPosition => "This block cannot follow the previous block",
        }
    }
}

impl Display for ProcessResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full result of processing a block.
///
/// `account`, `amount`, `pending_account` and `state_is_send` are only meaningful when `code` is
/// [`ProcessResult::Progress`]; otherwise they may hold whatever had been determined when validation
/// stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessReturn {
    pub code: ProcessResult,
    /// Owner of the processed block.
    pub account: Account,
    /// Amount moved by the block: sent, received, or zero for representative changes.
    pub amount: Amount,
    /// For sends, the account that can now receive `amount`.
    pub pending_account: Account,
    /// For state blocks, whether the block was a send.
    pub state_is_send: Option<bool>,
}

impl ProcessReturn {
    pub(crate) fn new(code: ProcessResult) -> Self {
        ProcessReturn {
            code,
            account: Account::burn(),
            amount: Amount::zero(),
            pending_account: Account::burn(),
            state_is_send: None,
        }
    }

    pub(crate) fn with_code(self, code: ProcessResult) -> Self {
        ProcessReturn { code, ..self }
    }

    pub fn is_progress(&self) -> bool {
        self.code == ProcessResult::Progress
    }
}
