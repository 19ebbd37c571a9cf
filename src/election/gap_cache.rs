/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Votes for blocks the node cannot process yet.
//!
//! When a block is found to depend on a block the node does not have, the missing block's hash is added
//! to the [`GapCache`]. Votes that arrive for the missing block are tallied there. Once representatives
//! holding enough weight have voted for it, the node concludes that the rest of the network has the
//! block and that it should fetch it.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    ledger::{Ledger, LedgerError},
    store::KVGet,
    types::{
        block::Block,
        data_types::{Amount, Hash},
        vote::Vote,
    },
};

use super::election::Votes;

/// Entries older than this are dropped by [`GapCache::purge_old`].
pub const GAP_CACHE_MAX_AGE: Duration = Duration::from_secs(10);

pub struct GapInformation {
    pub arrival: Instant,
    pub hash: Hash,
    pub votes: Votes,
}

pub struct GapCache {
    blocks: Mutex<HashMap<Hash, GapInformation>>,
    max: usize,
    bootstrap_fraction_numerator: u32,
}

impl GapCache {
    pub fn new(max: usize, bootstrap_fraction_numerator: u32) -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            max,
            bootstrap_fraction_numerator,
        }
    }

    /// Track `block`, refreshing its arrival time if it is already tracked. Evicts the entry that
    /// arrived earliest if the cache grows over its capacity.
    pub fn add(&self, block: &Block, now: Instant) {
        let hash = block.hash();
        let mut blocks = self.blocks();
        if let Some(existing) = blocks.get_mut(&hash) {
            existing.arrival = now;
            return;
        }

        blocks.insert(
            hash,
            GapInformation {
                arrival: now,
                hash,
                votes: Votes::new(block.clone()),
            },
        );
        if blocks.len() > self.max {
            let oldest = blocks
                .values()
                .min_by_key(|info| info.arrival)
                .map(|info| info.hash);
            if let Some(oldest) = oldest {
                blocks.remove(&oldest);
            }
        }
    }

    /// Tally `vote` if it is for a tracked block. Returns `true` if the tracked block has now been voted
    /// for by enough weight that it should be fetched from the network.
    pub fn vote(
        &self,
        ledger: &Ledger,
        store: &impl KVGet,
        vote: &Vote,
        online_stake: Amount,
    ) -> Result<bool, LedgerError> {
        let hash = vote.block.hash();
        let mut blocks = self.blocks();
        let Some(info) = blocks.get_mut(&hash) else {
            return Ok(false);
        };

        info.votes.vote(vote);
        let winner = ledger.winner(store, info.votes.rep_votes.iter())?;
        let threshold = self.bootstrap_threshold(online_stake);
        Ok(winner.map_or(false, |(weight, _)| weight > threshold))
    }

    /// Voted weight above which a tracked block is considered worth fetching.
    pub fn bootstrap_threshold(&self, online_stake: Amount) -> Amount {
        Amount::new((online_stake.int() / 256).saturating_mul(self.bootstrap_fraction_numerator as u128))
    }

    pub fn erase(&self, hash: &Hash) {
        self.blocks().remove(hash);
    }

    /// Drop every entry that arrived more than [`GAP_CACHE_MAX_AGE`] before `now`.
    pub fn purge_old(&self, now: Instant) {
        self.blocks()
            .retain(|_, info| now.saturating_duration_since(info.arrival) <= GAP_CACHE_MAX_AGE);
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn blocks(&self) -> MutexGuard<'_, HashMap<Hash, GapInformation>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use crate::types::{block::TxBlock, keypair::Keypair};

    use super::*;

    fn block(source: &[u8]) -> Block {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng {}));
        TxBlock::open(Hash::digest([source]), Amount::new(1), &keypair).into()
    }

    #[test]
    fn oldest_entry_is_evicted_over_capacity() {
        let gap_cache = GapCache::new(2, 1);
        let start = Instant::now();
        let (block_1, block_2, block_3) = (block(b"1"), block(b"2"), block(b"3"));

        gap_cache.add(&block_1, start);
        gap_cache.add(&block_2, start + Duration::from_millis(1));
        // Refreshing block 1 makes block 2 the oldest.
        gap_cache.add(&block_1, start + Duration::from_millis(2));
        gap_cache.add(&block_3, start + Duration::from_millis(3));

        assert_eq!(gap_cache.len(), 2);
        assert!(gap_cache.contains(&block_1.hash()));
        assert!(!gap_cache.contains(&block_2.hash()));
        assert!(gap_cache.contains(&block_3.hash()));
    }

    #[test]
    fn purge_drops_stale_entries() {
        let gap_cache = GapCache::new(256, 1);
        let start = Instant::now();
        let (block_1, block_2) = (block(b"1"), block(b"2"));
        gap_cache.add(&block_1, start);
        gap_cache.add(&block_2, start + Duration::from_secs(5));

        gap_cache.purge_old(start + Duration::from_secs(12));
        assert!(!gap_cache.contains(&block_1.hash()));
        assert!(gap_cache.contains(&block_2.hash()));
    }

    #[test]
    fn threshold_scales_with_numerator() {
        let stake = Amount::new(256_000);
        assert_eq!(GapCache::new(1, 1).bootstrap_threshold(stake), Amount::new(1000));
        assert_eq!(GapCache::new(1, 3).bootstrap_threshold(stake), Amount::new(3000));
    }
}
