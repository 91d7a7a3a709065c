//! Cross-cutting constants, grouped by concern (mirrors engine/src/constants.rs's
//! `// ===== X =====` section-comment idiom).
//!
//! Indexer detail-ingestion retries (`DETAIL_INGESTION_*`) bound how long a single
//! block's ingestion will retry before it's left for a later resweep, keeping one stuck
//! block from stalling the head-event consumer loop indefinitely.

use std::time::Duration;

// ======= Pool / scanning =======

pub const DEFAULT_POOL_SIZE: usize = 5;
pub const MAX_CONCURRENT_CONNECTIONS: usize = 5;
pub const DEFAULT_MAX_BLOCKS_TO_SCAN: u64 = 10_000;
pub const MAX_BLOCKS_TO_SCAN_CAP: u64 = 1_000_000;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 1_000;

// ======= Timeouts =======

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(120_000);
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_millis(1_200_000);
pub const ENDPOINT_SWAP_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const SUBSCRIPTION_CANCEL_TIMEOUT: Duration = Duration::from_secs(1);

// ======= Address-search deadline buckets =======

pub const ADDRESS_SEARCH_DEADLINE_BUCKETS: &[(u64, Duration)] = &[
    (100, Duration::from_secs(60)),
    (1_000, Duration::from_secs(5 * 60)),
    (10_000, Duration::from_secs(10 * 60)),
    (u64::MAX, Duration::from_secs(20 * 60)),
];

pub const EXTRINSIC_SEARCH_MIN_DEADLINE: Duration = Duration::from_secs(10 * 60);
pub const EXTRINSIC_SEARCH_MAX_DEADLINE: Duration = Duration::from_secs(20 * 60);

// ======= Cache TTLs =======

pub const CACHE_TTL_ADDRESS_SEARCH: Duration = Duration::from_secs(5 * 60);
pub const CACHE_TTL_EXTRINSIC_SEARCH: Duration = Duration::from_secs(10 * 60);
pub const CACHE_TTL_BLOCK_INFO: Duration = Duration::from_secs(2 * 60);
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

// ======= Staking / era readout =======

pub const BLOCK_TIME_SECS: u64 = 5;
pub const ERA_DURATION_SECS: u64 = 10 * 60;
pub const BLOCKS_PER_ERA: u64 = ERA_DURATION_SECS / BLOCK_TIME_SECS;

// ======= Address heuristic =======

pub const ADDRESS_LEN_SHORT: usize = 47;
pub const ADDRESS_LEN_LONG: usize = 48;

// ======= Retrier =======

pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10 * 60);
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);

// ======= Indexer detail ingestion =======

/// Per-attempt timeout passed to `retry_with_backoff` while ingesting one block's
/// extrinsics/events.
pub const DETAIL_INGESTION_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Total wall-clock budget across all attempts before a block is left header-only for
/// a later resweep to finish.
pub const DETAIL_INGESTION_RETRY_BUDGET: Duration = Duration::from_secs(10 * 60);

// ======= Environment variable names (config knob overrides) =======

pub const ENV_PREFIX: &str = "EXPLORER";
pub const ENV_RPC_ENDPOINT: &str = "EXPLORER_CHAIN__RPC_ENDPOINT";
pub const ENV_DATABASE_URL: &str = "EXPLORER_DATABASE__URL";
pub const ENV_PORT: &str = "EXPLORER_HTTP__PORT";
pub const ENV_LOG_LEVEL: &str = "EXPLORER_LOG_LEVEL";

/// Deadline bucket lookup for address/extrinsic searches.
pub fn address_search_deadline(blocks_to_scan: u64) -> Duration {
    for (threshold, deadline) in ADDRESS_SEARCH_DEADLINE_BUCKETS {
        if blocks_to_scan <= *threshold {
            return *deadline;
        }
    }
    EXTRINSIC_SEARCH_MAX_DEADLINE
}

pub fn extrinsic_search_deadline(max_blocks: u64) -> Duration {
    address_search_deadline(max_blocks).clamp(EXTRINSIC_SEARCH_MIN_DEADLINE, EXTRINSIC_SEARCH_MAX_DEADLINE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_per_era_is_120() {
        assert_eq!(BLOCKS_PER_ERA, 120);
    }

    #[test]
    fn address_search_deadline_buckets() {
        assert_eq!(address_search_deadline(50), Duration::from_secs(60));
        assert_eq!(address_search_deadline(500), Duration::from_secs(300));
        assert_eq!(address_search_deadline(5_000), Duration::from_secs(600));
        assert_eq!(address_search_deadline(50_000), Duration::from_secs(1200));
    }

    #[test]
    fn extrinsic_search_deadline_has_a_floor() {
        assert_eq!(extrinsic_search_deadline(50), EXTRINSIC_SEARCH_MIN_DEADLINE);
    }
}
