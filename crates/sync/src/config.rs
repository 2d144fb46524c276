//! Ledger sync configuration.

use std::time::Duration;

/// Tunables for the ledger sync service. Supplied by the embedding node
/// process; defaults are sized for small test networks.
#[derive(Debug, Clone)]
pub struct LedgerSyncConfig {
    /// Interval between periodic sync health checks.
    pub check_interval: Duration,

    /// How long to collect status responses before picking a sync source.
    pub status_window: Duration,

    /// How long to wait for a sync response before retrying elsewhere.
    pub request_timeout: Duration,

    /// Sync requests sent per round (first try plus retries against other
    /// responders) before the round is abandoned as stalled.
    pub max_attempts: u32,

    /// Maximum transactions served per sync response.
    pub max_transactions_per_response: usize,
}

impl Default for LedgerSyncConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            status_window: Duration::from_millis(500),
            request_timeout: Duration::from_secs(2),
            max_attempts: 3,
            max_transactions_per_response: 512,
        }
    }
}
