/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash as StdHash,
    ops::{Add, AddAssign, BitXor, BitXorAssign, Sub, SubAssign},
    time::{SystemTime, UNIX_EPOCH},
};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

/// 32-byte cryptographic hash.
///
/// Block hashes and vote hashes are SHA256 hashes over the hashable fields of the block or vote, in a
/// fixed order. The all-zero `Hash` is used throughout the ledger as "no block": an open block has a
/// zero `previous`, a head block has a zero successor, and so on.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, StdHash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Create a new `Hash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Get the inner `[u8; 32]` value of this `Hash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }

    /// Compute the SHA256 hash of the concatenation of `parts`.
    pub fn digest<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }
}

impl BitXor for Hash {
    type Output = Hash;
    fn bitxor(self, rhs: Hash) -> Self::Output {
        let mut bytes = self.0;
        bytes
            .iter_mut()
            .zip(rhs.0.iter())
            .for_each(|(left, right)| *left ^= right);
        Hash(bytes)
    }
}

impl BitXorAssign for Hash {
    fn bitxor_assign(&mut self, rhs: Hash) {
        *self = *self ^ rhs
    }
}

impl From<Account> for Hash {
    fn from(account: Account) -> Self {
        Hash(account.0)
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Public key of an account, which is also the account's address.
///
/// An `Account` is the 32-byte encoding of an Ed25519 verifying key. Accounts own account chains,
/// receive funds, and may act as representatives for other accounts.
///
/// The all-zero `Account` is the **burn account**: funds sent to it can never be received, because
/// no one holds the corresponding private key, and blocks that try to open it are rejected.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, StdHash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct Account([u8; 32]);

impl Account {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The burn account.
    pub const fn burn() -> Self {
        Self([0u8; 32])
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }
}

impl From<Hash> for Account {
    fn from(hash: Hash) -> Self {
        Account(hash.0)
    }
}

impl From<ed25519_dalek::VerifyingKey> for Account {
    fn from(verifying_key: ed25519_dalek::VerifyingKey) -> Self {
        Account(verifying_key.to_bytes())
    }
}

impl Display for Account {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&Hash(self.0), f)
    }
}

impl Debug for Account {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// An amount of the ledger's native currency, in raw units.
///
/// The total supply of the ledger (the balance of the genesis block) fits in a `u128`, so no
/// arithmetic on `Amount`s that conserves supply can overflow.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    StdHash,
    Default,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct Amount(u128);

/// Number of raw units in one Gxrb.
pub const GXRB_RATIO: u128 = 1_000_000_000_000_000_000_000_000_000_000_000;

/// Number of raw units in one Mxrb.
pub const MXRB_RATIO: u128 = 1_000_000_000_000_000_000_000_000_000_000;

impl Amount {
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn max() -> Self {
        Self(u128::MAX)
    }

    pub const fn int(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Absolute difference between two amounts.
    pub fn abs_diff(&self, other: Amount) -> Amount {
        Amount(self.0.abs_diff(other.0))
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_add(&self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Get the big-endian representation of the inner value. This is the representation that is hashed.
    pub fn to_be_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0.add_assign(rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0.sub_assign(rhs.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |total, amount| total.saturating_add(amount))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Signature represented in bytes.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; 64])
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02X}", byte)?;
        }
        write!(f, "..")
    }
}

/// Hash of the epoch that a unified transaction block was created in.
pub type EpochHash = Hash;

/// Seconds since the Unix Epoch, as recorded in [`AccountInfo::modified`](super::records::AccountInfo).
pub fn seconds_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_of_hash_with_itself_is_zero() {
        let hash = Hash::digest([b"lattice".as_slice()]);
        assert!(!hash.is_zero());
        assert!((hash ^ hash).is_zero());

        let mut accumulator = Hash::zero();
        accumulator ^= hash;
        assert_eq!(accumulator, hash);
        accumulator ^= hash;
        assert!(accumulator.is_zero());
    }

    #[test]
    fn amount_abs_diff_is_symmetric() {
        let small = Amount::new(50);
        let large = Amount::new(80);
        assert_eq!(small.abs_diff(large), Amount::new(30));
        assert_eq!(large.abs_diff(small), Amount::new(30));
    }
}
