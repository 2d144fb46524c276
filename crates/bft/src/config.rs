//! BFT engine configuration.

use std::time::Duration;

/// Tunables for the consensus engine. Supplied by the embedding node
/// process; defaults are sized for small test networks.
#[derive(Debug, Clone)]
pub struct BftConfig {
    /// Pacemaker timeout for a view with no consecutive timeouts.
    pub pacemaker_base_timeout: Duration,

    /// Backoff multiplier applied per consecutive timeout since the last
    /// observed progress.
    pub pacemaker_backoff_rate: u32,

    /// Cap on the backoff exponent.
    pub pacemaker_max_exponent: u32,

    /// Maximum transactions pulled from the mempool per proposal.
    pub max_transactions_per_proposal: usize,

    /// Ancestors requested per `GetVerticesRequest`.
    pub vertex_request_count: u32,

    /// How long to wait for a vertex response before retrying elsewhere.
    pub vertex_request_patience: Duration,

    /// Attempts per missing ancestor (first try plus retries) before the
    /// gap is abandoned.
    pub vertex_request_attempts: u32,

    /// Outbound vertex-request rate limit.
    pub vertex_request_rate: RateLimitConfig,

    /// Reject proposals timestamped further than this behind our clock.
    pub max_timestamp_delay_ms: u64,

    /// Reject proposals timestamped further than this ahead of our clock.
    pub max_timestamp_rush_ms: u64,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            pacemaker_base_timeout: Duration::from_secs(1),
            pacemaker_backoff_rate: 2,
            pacemaker_max_exponent: 6,
            max_transactions_per_proposal: 256,
            vertex_request_count: 8,
            vertex_request_patience: Duration::from_secs(2),
            vertex_request_attempts: 2,
            vertex_request_rate: RateLimitConfig::default(),
            max_timestamp_delay_ms: 30_000,
            max_timestamp_rush_ms: 5_000,
        }
    }
}

/// Token-bucket parameters for outbound vertex requests.
///
/// The invariant: across any window, emitted requests never exceed
/// `permits_per_second × window + burst`, no matter how many
/// missing-ancestor triggers fire.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Sustained requests per second.
    pub permits_per_second: u32,
    /// Bucket capacity (burst size).
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            permits_per_second: 50,
            burst: 20,
        }
    }
}
