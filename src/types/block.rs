/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Block`] type and the block kinds it is a closed union over.
//!
//! # Block kinds
//!
//! Every account chain is a hash-linked list of blocks. A block is one of six kinds:
//!
//! |Kind|Fields|Meaning|
//! |---|---|---|
//! |[Send](SendBlock)|previous, destination, balance|Debit the chain owner down to `balance`, making the difference receivable by `destination`.|
//! |[Receive](ReceiveBlock)|previous, source|Credit the amount sent by the `source` block.|
//! |[Open](OpenBlock)|source, representative, account|First block of an account chain. Credits the amount sent by `source`.|
//! |[Change](ChangeBlock)|previous, representative|Change the chain owner's representative without moving funds.|
//! |[State](StateBlock)|account, previous, representative, balance, link|Any of the above, distinguished by comparing `balance` with the previous balance.|
//! |[Tx](TxBlock)|previous, destination, source, account, balance, tx info, epoch|Unified transaction. Send if `destination` is set, otherwise receive (open) if `source` is set, otherwise change.|
//!
//! The first four kinds are **legacy** kinds. They do not carry the chain owner's account (except
//! `Open`) nor, in general, the resulting balance, so the ledger resolves both from the chain the block
//! extends and then [upcasts](Block::upcast) the block into a [`TxBlock`]. All legacy business rules are
//! therefore the rules of the unified transaction kind.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    data_types::{Account, Amount, EpochHash, Hash, SignatureBytes},
    keypair::{validate_message, Keypair},
};

/// Discriminant of a [`Block`], which also identifies the block table that a block is stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum BlockKind {
    Send,
    Receive,
    Open,
    Change,
    State,
    Tx,
}

impl BlockKind {
    /// All block kinds, in the order in which block tables are searched when looking up a hash.
    pub const LOOKUP_ORDER: [BlockKind; 6] = [
        BlockKind::Send,
        BlockKind::Receive,
        BlockKind::Open,
        BlockKind::Change,
        BlockKind::State,
        BlockKind::Tx,
    ];

    fn tag(&self) -> u8 {
        match self {
            BlockKind::Send => 2,
            BlockKind::Receive => 3,
            BlockKind::Open => 4,
            BlockKind::Change => 5,
            BlockKind::State => 6,
            BlockKind::Tx => 7,
        }
    }

    /// Whether this kind carries its own account and balance, and therefore never needs balance
    /// checkpoints.
    pub fn is_self_describing(&self) -> bool {
        matches!(self, BlockKind::State | BlockKind::Tx)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SendBlock {
    pub previous: Hash,
    pub destination: Account,
    pub balance: Amount,
    pub signature: SignatureBytes,
}

impl SendBlock {
    pub fn new(previous: Hash, destination: Account, balance: Amount, keypair: &Keypair) -> Self {
        let mut block = SendBlock {
            previous,
            destination,
            balance,
            signature: SignatureBytes::zero(),
        };
        block.signature = keypair.sign(&block.hash());
        block
    }

    pub fn hash(&self) -> Hash {
        Hash::digest([
            [BlockKind::Send.tag()].as_slice(),
            &self.previous.bytes(),
            &self.destination.bytes(),
            &self.balance.to_be_bytes(),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ReceiveBlock {
    pub previous: Hash,
    pub source: Hash,
    pub signature: SignatureBytes,
}

impl ReceiveBlock {
    pub fn new(previous: Hash, source: Hash, keypair: &Keypair) -> Self {
        let mut block = ReceiveBlock {
            previous,
            source,
            signature: SignatureBytes::zero(),
        };
        block.signature = keypair.sign(&block.hash());
        block
    }

    pub fn hash(&self) -> Hash {
        Hash::digest([
            [BlockKind::Receive.tag()].as_slice(),
            &self.previous.bytes(),
            &self.source.bytes(),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OpenBlock {
    pub source: Hash,
    pub representative: Account,
    pub account: Account,
    pub signature: SignatureBytes,
}

impl OpenBlock {
    pub fn new(source: Hash, representative: Account, keypair: &Keypair) -> Self {
        let mut block = OpenBlock {
            source,
            representative,
            account: keypair.account(),
            signature: SignatureBytes::zero(),
        };
        block.signature = keypair.sign(&block.hash());
        block
    }

    pub fn hash(&self) -> Hash {
        Hash::digest([
            [BlockKind::Open.tag()].as_slice(),
            &self.source.bytes(),
            &self.representative.bytes(),
            &self.account.bytes(),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChangeBlock {
    pub previous: Hash,
    pub representative: Account,
    pub signature: SignatureBytes,
}

impl ChangeBlock {
    pub fn new(previous: Hash, representative: Account, keypair: &Keypair) -> Self {
        let mut block = ChangeBlock {
            previous,
            representative,
            signature: SignatureBytes::zero(),
        };
        block.signature = keypair.sign(&block.hash());
        block
    }

    pub fn hash(&self) -> Hash {
        Hash::digest([
            [BlockKind::Change.tag()].as_slice(),
            &self.previous.bytes(),
            &self.representative.bytes(),
        ])
    }
}

/// A block that states the full resulting state of its account chain.
///
/// Whether a state block sends, receives, or only changes representative is not encoded in the block.
/// It is determined at processing time by comparing `balance` with the balance of `previous`: a
/// decrease is a send to the account in `link`, an increase is a receive of the send block whose hash
/// is `link`, and no change with a zero `link` is a representative change.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StateBlock {
    pub account: Account,
    pub previous: Hash,
    pub representative: Account,
    pub balance: Amount,
    pub link: Hash,
    pub signature: SignatureBytes,
}

impl StateBlock {
    pub fn new(
        account: Account,
        previous: Hash,
        representative: Account,
        balance: Amount,
        link: Hash,
        keypair: &Keypair,
    ) -> Self {
        let mut block = StateBlock {
            account,
            previous,
            representative,
            balance,
            link,
            signature: SignatureBytes::zero(),
        };
        block.signature = keypair.sign(&block.hash());
        block
    }

    pub fn hash(&self) -> Hash {
        Hash::digest([
            [BlockKind::State.tag()].as_slice(),
            &self.account.bytes(),
            &self.previous.bytes(),
            &self.representative.bytes(),
            &self.balance.to_be_bytes(),
            &self.link.bytes(),
        ])
    }
}

/// Application payload carried by a [`TxBlock`].
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxInfo {
    pub value: u64,
    pub data: String,
    pub gas: u64,
    pub gas_price: u64,
}

/// What a [`TxBlock`] does to its account chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxKind {
    Send,
    Receive,
    Open,
    Change,
}

/// Unified transaction block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxBlock {
    pub previous: Hash,
    pub destination: Account,
    pub source: Hash,
    pub account: Account,
    pub balance: Amount,
    pub tx_info: TxInfo,
    pub epoch: EpochHash,
    pub signature: SignatureBytes,
}

impl TxBlock {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        previous: Hash,
        destination: Account,
        source: Hash,
        balance: Amount,
        tx_info: TxInfo,
        epoch: EpochHash,
        keypair: &Keypair,
    ) -> Self {
        let mut block = TxBlock {
            previous,
            destination,
            source,
            account: keypair.account(),
            balance,
            tx_info,
            epoch,
            signature: SignatureBytes::zero(),
        };
        block.signature = keypair.sign(&block.hash());
        block
    }

    /// Create a send that leaves the signer with `balance`.
    pub fn send(previous: Hash, destination: Account, balance: Amount, keypair: &Keypair) -> Self {
        Self::new(
            previous,
            destination,
            Hash::zero(),
            balance,
            TxInfo::default(),
            EpochHash::zero(),
            keypair,
        )
    }

    /// Create a receive of `source` that leaves the signer with `balance`.
    pub fn receive(previous: Hash, source: Hash, balance: Amount, keypair: &Keypair) -> Self {
        Self::new(
            previous,
            Account::burn(),
            source,
            balance,
            TxInfo::default(),
            EpochHash::zero(),
            keypair,
        )
    }

    /// Create the first block of the signer's chain, receiving `source`.
    pub fn open(source: Hash, balance: Amount, keypair: &Keypair) -> Self {
        Self::receive(Hash::zero(), source, balance, keypair)
    }

    pub fn hash(&self) -> Hash {
        Hash::digest([
            [BlockKind::Tx.tag()].as_slice(),
            &self.previous.bytes(),
            &self.destination.bytes(),
            &self.source.bytes(),
            &self.balance.to_be_bytes(),
            &self.account.bytes(),
            &self.tx_info.value.to_le_bytes(),
            self.tx_info.data.as_bytes(),
            &self.tx_info.gas.to_le_bytes(),
            &self.tx_info.gas_price.to_le_bytes(),
            &self.epoch.bytes(),
        ])
    }

    pub fn kind(&self) -> TxKind {
        if !self.destination.is_zero() {
            TxKind::Send
        } else if !self.source.is_zero() {
            if self.previous.is_zero() {
                TxKind::Open
            } else {
                TxKind::Receive
            }
        } else {
            TxKind::Change
        }
    }
}

/// A signed, hash-identified unit of account chain history.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
    State(StateBlock),
    Tx(TxBlock),
}

impl Block {
    pub fn hash(&self) -> Hash {
        match self {
            Block::Send(block) => block.hash(),
            Block::Receive(block) => block.hash(),
            Block::Open(block) => block.hash(),
            Block::Change(block) => block.hash(),
            Block::State(block) => block.hash(),
            Block::Tx(block) => block.hash(),
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Send(_) => BlockKind::Send,
            Block::Receive(_) => BlockKind::Receive,
            Block::Open(_) => BlockKind::Open,
            Block::Change(_) => BlockKind::Change,
            Block::State(_) => BlockKind::State,
            Block::Tx(_) => BlockKind::Tx,
        }
    }

    /// Hash of the previous block in the same account chain. Zero for open blocks.
    pub fn previous(&self) -> Hash {
        match self {
            Block::Send(block) => block.previous,
            Block::Receive(block) => block.previous,
            Block::Open(_) => Hash::zero(),
            Block::Change(block) => block.previous,
            Block::State(block) => block.previous,
            Block::Tx(block) => block.previous,
        }
    }

    /// The account that this block names as its owner, if the block carries one.
    ///
    /// Legacy send, receive, and change blocks do not; the owner of such a block is the owner of the
    /// chain it extends.
    pub fn account(&self) -> Option<Account> {
        match self {
            Block::Open(block) => Some(block.account),
            Block::State(block) => Some(block.account),
            Block::Tx(block) => Some(block.account),
            Block::Send(_) | Block::Receive(_) | Block::Change(_) => None,
        }
    }

    /// The balance of the account chain after this block, if the block carries it.
    pub fn balance(&self) -> Option<Amount> {
        match self {
            Block::Send(block) => Some(block.balance),
            Block::State(block) => Some(block.balance),
            Block::Tx(block) => Some(block.balance),
            Block::Receive(_) | Block::Open(_) | Block::Change(_) => None,
        }
    }

    /// The hash that identifies the "slot" this block occupies: `previous`, or the account for blocks
    /// that open a chain. Two different blocks with the same root are a fork.
    pub fn root(&self) -> Hash {
        let previous = self.previous();
        if !previous.is_zero() {
            return previous;
        }
        match self.account() {
            Some(account) => Hash::from(account),
            None => previous,
        }
    }

    /// The send block this block receives from, if it is a receive-type block. For state blocks this is
    /// the `link` field, whatever the block turns out to be.
    pub fn source(&self) -> Option<Hash> {
        match self {
            Block::Receive(block) => Some(block.source),
            Block::Open(block) => Some(block.source),
            Block::State(block) => Some(block.link),
            Block::Tx(block) => Some(block.source),
            Block::Send(_) | Block::Change(_) => None,
        }
        .filter(|source| !source.is_zero())
    }

    /// The representative this block delegates the chain owner's weight to, if it names one.
    ///
    /// A unified transaction block that opens a chain names its own account as representative. Other
    /// unified transaction blocks, legacy sends and legacy receives keep the previous representative.
    pub fn representative(&self) -> Option<Account> {
        match self {
            Block::Open(block) => Some(block.representative),
            Block::Change(block) => Some(block.representative),
            Block::State(block) => Some(block.representative),
            Block::Tx(block) if block.previous.is_zero() => Some(block.account),
            Block::Tx(_) | Block::Send(_) | Block::Receive(_) => None,
        }
    }

    pub fn signature(&self) -> SignatureBytes {
        match self {
            Block::Send(block) => block.signature,
            Block::Receive(block) => block.signature,
            Block::Open(block) => block.signature,
            Block::Change(block) => block.signature,
            Block::State(block) => block.signature,
            Block::Tx(block) => block.signature,
        }
    }

    /// Check that this block is signed by `account`.
    pub fn is_signed_by(&self, account: &Account) -> bool {
        validate_message(account, &self.hash(), &self.signature())
    }

    /// Convert a legacy or unified transaction block into a [`TxBlock`], given the `account` that owns
    /// the chain it extends and the `balance` the chain would have after it.
    ///
    /// Fields the legacy block carries itself take precedence over the arguments. The resulting block's
    /// signature is the legacy block's signature, which is over the legacy block's hash, so the upcast
    /// block must never be stored or hashed in place of the original. Returns `None` for state blocks,
    /// which have their own processing rules.
    pub fn upcast(&self, account: Account, balance: Amount) -> Option<TxBlock> {
        let tx = |previous, destination, source, account, balance, signature| TxBlock {
            previous,
            destination,
            source,
            account,
            balance,
            tx_info: TxInfo::default(),
            epoch: EpochHash::zero(),
            signature,
        };
        match self {
            Block::Send(block) => Some(tx(
                block.previous,
                block.destination,
                Hash::zero(),
                account,
                block.balance,
                block.signature,
            )),
            Block::Receive(block) => Some(tx(
                block.previous,
                Account::burn(),
                block.source,
                account,
                balance,
                block.signature,
            )),
            Block::Open(block) => Some(tx(
                Hash::zero(),
                Account::burn(),
                block.source,
                block.account,
                balance,
                block.signature,
            )),
            Block::Change(block) => Some(tx(
                block.previous,
                Account::burn(),
                Hash::zero(),
                account,
                balance,
                block.signature,
            )),
            Block::Tx(block) => Some(block.clone()),
            Block::State(_) => None,
        }
    }
}

impl From<SendBlock> for Block {
    fn from(block: SendBlock) -> Self {
        Block::Send(block)
    }
}

impl From<ReceiveBlock> for Block {
    fn from(block: ReceiveBlock) -> Self {
        Block::Receive(block)
    }
}

impl From<OpenBlock> for Block {
    fn from(block: OpenBlock) -> Self {
        Block::Open(block)
    }
}

impl From<ChangeBlock> for Block {
    fn from(block: ChangeBlock) -> Self {
        Block::Change(block)
    }
}

impl From<StateBlock> for Block {
    fn from(block: StateBlock) -> Self {
        Block::State(block)
    }
}

impl From<TxBlock> for Block {
    fn from(block: TxBlock) -> Self {
        Block::Tx(block)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use super::*;

    #[test]
    fn hashes_of_different_kinds_never_collide() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng {}));
        let previous = Hash::digest([b"previous".as_slice()]);
        let representative = keypair.account();

        let change: Block = ChangeBlock::new(previous, representative, &keypair).into();
        let receive: Block = ReceiveBlock::new(previous, Hash::from(representative), &keypair).into();
        assert_ne!(change.hash(), receive.hash());
    }

    #[test]
    fn tx_kind_follows_destination_then_source() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng {}));
        let other = Keypair::new(SigningKey::generate(&mut OsRng {})).account();
        let previous = Hash::digest([b"previous".as_slice()]);
        let source = Hash::digest([b"source".as_slice()]);

        assert_eq!(TxBlock::send(previous, other, Amount::new(1), &keypair).kind(), TxKind::Send);
        assert_eq!(TxBlock::receive(previous, source, Amount::new(1), &keypair).kind(), TxKind::Receive);
        assert_eq!(TxBlock::open(source, Amount::new(1), &keypair).kind(), TxKind::Open);
        let change = TxBlock::new(
            previous,
            Account::burn(),
            Hash::zero(),
            Amount::new(1),
            TxInfo::default(),
            EpochHash::zero(),
            &keypair,
        );
        assert_eq!(change.kind(), TxKind::Change);
    }

    #[test]
    fn upcast_keeps_legacy_signature_valid_against_legacy_hash() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng {}));
        let previous = Hash::digest([b"previous".as_slice()]);
        let send: Block = SendBlock::new(previous, keypair.account(), Amount::new(7), &keypair).into();

        let tx = send.upcast(keypair.account(), Amount::zero()).unwrap();
        assert_eq!(tx.balance, Amount::new(7));
        assert_eq!(tx.kind(), TxKind::Send);
        assert!(send.is_signed_by(&keypair.account()));
        assert_ne!(tx.hash(), send.hash());
    }

    #[test]
    fn root_of_open_block_is_its_account() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng {}));
        let source = Hash::digest([b"source".as_slice()]);
        let open: Block = OpenBlock::new(source, keypair.account(), &keypair).into();
        assert_eq!(open.root(), Hash::from(keypair.account()));
        assert_eq!(open.source(), Some(source));
    }
}
