/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [Keypair] type as an object used to sign block and vote hashes, and helpers
//! for verifying the resulting signatures against an [`Account`].

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use super::data_types::{Account, Hash, SignatureBytes};

/// A wrapper around [SigningKey](ed25519_dalek::SigningKey) which implements a [convenience method](Keypair::sign) for
/// signing hashes.
#[derive(Clone)]
pub struct Keypair(pub(crate) SigningKey);

impl Keypair {
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign the bytes of `hash`.
    pub fn sign(&self, hash: &Hash) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(&hash.bytes()).to_bytes())
    }

    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// The account whose chain this keypair signs for.
    pub fn account(&self) -> Account {
        Account::from(self.0.verifying_key())
    }
}

/// Check that `signature` is a signature by `account` over the bytes of `hash`.
///
/// Returns `false`, rather than an error, if `account` is not a valid Ed25519 point (for example, the
/// burn account).
pub fn validate_message(account: &Account, hash: &Hash, signature: &SignatureBytes) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&account.bytes()) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key.verify(&hash.bytes(), &signature).is_ok()
}
