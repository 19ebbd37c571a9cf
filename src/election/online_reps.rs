/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tracking of the representatives that are currently voting, and of how much weight they hold.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    ledger::{Ledger, LedgerError},
    store::KVGet,
    types::data_types::{Account, Amount},
};

/// A representative that has not voted for this long no longer counts as online.
pub const ONLINE_CUTOFF: Duration = Duration::from_secs(5 * 60);

/// An online representative, and the weight it was counted with.
struct OnlineRep {
    last_heard: Instant,
    weight: Amount,
}

struct Reps {
    reps: HashMap<Account, OnlineRep>,
    total: Amount,
}

pub struct OnlineReps {
    inner: Mutex<Reps>,
    online_weight_minimum: Amount,
}

impl OnlineReps {
    pub fn new(online_weight_minimum: Amount) -> Self {
        Self {
            inner: Mutex::new(Reps {
                reps: HashMap::new(),
                total: Amount::zero(),
            }),
            online_weight_minimum,
        }
    }

    /// Record that `representative` voted at `now`, and forget representatives that have not voted
    /// within [`ONLINE_CUTOFF`] of `now`.
    ///
    /// A forgotten representative takes away the weight it was counted with, whatever its weight is now.
    pub fn vote(
        &self,
        ledger: &Ledger,
        store: &impl KVGet,
        representative: &Account,
        now: Instant,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner();

        let expired: Vec<Account> = inner
            .reps
            .iter()
            .filter(|(_, rep)| now.saturating_duration_since(rep.last_heard) > ONLINE_CUTOFF)
            .map(|(account, _)| *account)
            .collect();
        for account in expired {
            if let Some(rep) = inner.reps.remove(&account) {
                inner.total = inner.total.saturating_sub(rep.weight);
            }
        }

        match inner.reps.get_mut(representative) {
            Some(rep) => rep.last_heard = now,
            None => {
                let weight = ledger.weight(store, representative)?;
                inner.reps.insert(
                    *representative,
                    OnlineRep {
                        last_heard: now,
                        weight,
                    },
                );
                inner.total = inner.total.saturating_add(weight);
            }
        }
        Ok(())
    }

    /// Recompute the online weight from the current weights of the online representatives.
    pub fn recalculate_stake(&self, ledger: &Ledger, store: &impl KVGet) -> Result<(), LedgerError> {
        let mut inner = self.inner();
        let mut total = Amount::zero();
        for (account, rep) in inner.reps.iter_mut() {
            rep.weight = ledger.weight(store, account)?;
            total = total.saturating_add(rep.weight);
        }
        inner.total = total;
        Ok(())
    }

    /// Online weight, or the online weight minimum if that is higher.
    pub fn online_stake(&self) -> Amount {
        self.inner().total.max(self.online_weight_minimum)
    }

    pub fn online_weight_minimum(&self) -> Amount {
        self.online_weight_minimum
    }

    pub fn list(&self) -> Vec<Account> {
        self.inner().reps.keys().copied().collect()
    }

    fn inner(&self) -> MutexGuard<'_, Reps> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
