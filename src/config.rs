/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of a [node](crate::node).
//!
//! [`Configuration`] is what the operator specifies. Before being handed to the node's components, it
//! is split into smaller, component-specific configuration structs.

use std::{collections::HashMap, time::Duration};

use typed_builder::TypedBuilder;

use crate::types::data_types::{Account, Amount, GXRB_RATIO};

/// Which network a node takes part in. Selects protocol constants that differ between networks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkKind {
    Live,
    Beta,
    /// A local test network. Elections announce far more often, and the minimum vote weight is not
    /// enforced, so that tests with a handful of representatives run quickly.
    Test,
}

impl NetworkKind {
    /// Interval between rounds of election announcements.
    pub fn announce_interval(&self) -> Duration {
        match self {
            NetworkKind::Test => Duration::from_millis(10),
            NetworkKind::Live | NetworkKind::Beta => Duration::from_secs(16),
        }
    }

    pub fn is_test(&self) -> bool {
        *self == NetworkKind::Test
    }
}

/// Stores the parameters of a node.
///
/// ## Defaults
///
/// Every field except `network`, `supply` and `log_events` has a default suitable for the live network.
#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.network(...)`
    - `.supply(...)`
    - `.log_events(...)`

    Optional:
    - `.online_weight_minimum(...)`
    - `.online_weight_quorum(...)`
    - `.block_info_max(...)`
    - `.bootstrap_weight_max_blocks(...)`
    - `.bootstrap_weights(...)`
    - `.bootstrap_fraction_numerator(...)`
    - `.block_processor_batch_max(...)`
    - `.confirmation_history_size(...)`
    - `.gap_cache_max(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the network the node takes part in. Required."))]
    pub network: NetworkKind,
    #[builder(setter(doc = "Set the total supply of the ledger, i.e. the balance of the genesis block. Required."))]
    pub supply: Amount,
    #[builder(default = Amount::new(60_000 * GXRB_RATIO), setter(doc = "Set the least online stake the node assumes, no matter how little voting weight it has seen. Optional, defaults to 60 000 Gxrb."))]
    pub online_weight_minimum: Amount,
    #[builder(default = 50, setter(doc = "Set the margin, as a percentage of online stake, by which an election's leading block must beat the runner-up to be confirmed. Optional, defaults to 50."))]
    pub online_weight_quorum: u8,
    #[builder(default = 32, setter(doc = "Set the number of blocks between balance checkpoints of legacy chains. Optional, defaults to 32."))]
    pub block_info_max: u64,
    #[builder(default = 0, setter(doc = "Set the number of stored blocks below which bootstrap weights are used. Optional, defaults to 0 (bootstrap weights disabled)."))]
    pub bootstrap_weight_max_blocks: u64,
    #[builder(default, setter(doc = "Set the representative weights used while bootstrapping. Optional, defaults to none."))]
    pub bootstrap_weights: HashMap<Account, Amount>,
    #[builder(default = 1, setter(doc = "Set the numerator of the fraction of online stake that must vote for a missing block before the node goes to fetch it. Optional, defaults to 1 (1/256 of online stake)."))]
    pub bootstrap_fraction_numerator: u32,
    #[builder(default = 16384, setter(doc = "Set the number of blocks processed in one write transaction. Optional, defaults to 16 384."))]
    pub block_processor_batch_max: usize,
    #[builder(default = 2048, setter(doc = "Set the number of confirmed elections kept for observability. Optional, defaults to 2048."))]
    pub confirmation_history_size: usize,
    #[builder(default = 256, setter(doc = "Set the number of missing blocks whose votes are tracked. Optional, defaults to 256."))]
    pub gap_cache_max: usize,
    #[builder(setter(doc = "Enable logging of events? Required."))]
    pub log_events: bool,
}

impl Configuration {
    pub(crate) fn split(
        self,
    ) -> (
        LedgerConfiguration,
        ElectionConfiguration,
        BlockProcessorConfiguration,
        GapCacheConfiguration,
    ) {
        let ledger_config = LedgerConfiguration {
            block_info_max: self.block_info_max,
            bootstrap_weights: self.bootstrap_weights,
            bootstrap_weight_max_blocks: self.bootstrap_weight_max_blocks,
        };
        let election_config = ElectionConfiguration {
            network: self.network,
            supply: self.supply,
            online_weight_minimum: self.online_weight_minimum,
            online_weight_quorum: self.online_weight_quorum,
            confirmation_history_size: self.confirmation_history_size,
        };
        let block_processor_config = BlockProcessorConfiguration {
            batch_max: self.block_processor_batch_max,
        };
        let gap_cache_config = GapCacheConfiguration {
            max: self.gap_cache_max,
            bootstrap_fraction_numerator: self.bootstrap_fraction_numerator,
        };
        (
            ledger_config,
            election_config,
            block_processor_config,
            gap_cache_config,
        )
    }
}

#[derive(Clone, Debug)]
pub struct LedgerConfiguration {
    pub block_info_max: u64,
    pub bootstrap_weights: HashMap<Account, Amount>,
    pub bootstrap_weight_max_blocks: u64,
}

#[derive(Clone, Debug)]
pub struct ElectionConfiguration {
    pub network: NetworkKind,
    pub supply: Amount,
    pub online_weight_minimum: Amount,
    pub online_weight_quorum: u8,
    pub confirmation_history_size: usize,
}

impl ElectionConfiguration {
    /// The margin by which an election's leading block must beat the runner-up, given `online_stake`.
    pub fn quorum_delta(&self, online_stake: Amount) -> Amount {
        Amount::new(online_stake.int() / 100 * self.online_weight_quorum as u128)
    }
}

#[derive(Clone, Debug)]
pub struct BlockProcessorConfiguration {
    pub batch_max: usize,
}

#[derive(Clone, Debug)]
pub struct GapCacheConfiguration {
    pub max: usize,
    pub bootstrap_fraction_numerator: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_delta_is_percentage_of_online_stake() {
        let configuration = Configuration::builder()
            .network(NetworkKind::Test)
            .supply(Amount::max())
            .log_events(false)
            .build();
        let (_, election_config, _, _) = configuration.split();
        assert_eq!(
            election_config.quorum_delta(Amount::new(1000)),
            Amount::new(500)
        );
    }
}
