/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Vote`] type: a representative's signed assertion of the block it prefers for
//! some root.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::Block,
    data_types::{Account, Hash, SignatureBytes},
    keypair::{validate_message, Keypair},
};

/// A representative's vote for `block`.
///
/// `sequence` only ever increases for the votes produced by a given representative. A vote with a
/// higher sequence supersedes all of the same representative's votes with lower sequences.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub account: Account,
    pub signature: SignatureBytes,
    pub sequence: u64,
    pub block: Block,
}

impl Vote {
    /// Create a vote by `keypair` for `block`, and sign it.
    pub fn new(keypair: &Keypair, sequence: u64, block: Block) -> Self {
        let mut vote = Vote {
            account: keypair.account(),
            signature: SignatureBytes::zero(),
            sequence,
            block,
        };
        vote.signature = keypair.sign(&vote.hash());
        vote
    }

    /// The hash that `signature` is over: the voted block's hash followed by `sequence`.
    pub fn hash(&self) -> Hash {
        Hash::digest([
            self.block.hash().bytes().as_slice(),
            &self.sequence.to_le_bytes(),
        ])
    }

    /// Check whether `signature` is a signature by `account` over [`hash`](Self::hash).
    pub fn validate(&self) -> bool {
        validate_message(&self.account, &self.hash(), &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use crate::types::{block::TxBlock, data_types::Amount};

    use super::*;

    #[test]
    fn tampered_sequence_invalidates_vote() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng {}));
        let block: Block =
            TxBlock::open(Hash::digest([b"source".as_slice()]), Amount::new(1), &keypair).into();

        let mut vote = Vote::new(&keypair, 3, block);
        assert!(vote.validate());

        vote.sequence = 4;
        assert!(!vote.validate());
    }
}
