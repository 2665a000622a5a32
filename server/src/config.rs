//! Engine configuration. All knobs are set once at construction; there is no
//! live reconfiguration.

use std::time::Duration;

/// Default session tick period. One tick of input lag is the accepted
/// latency budget, so the period is a throughput/latency tuning knob.
pub const DEFAULT_TICK_MS: u64 = 500;

/// Default matcher period (matchmaking mode only).
pub const DEFAULT_MATCH_MS: u64 = 100;

/// Default retention of ended sessions' result tokens.
pub const DEFAULT_RETENTION_SECS: u64 = 600;

/// Default expiry of tokens minted by the engine.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Construction-time parameters for both engine flavors.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the session tick driver.
    pub tick_period: Duration,
    /// Period of the matcher invocation. Ignored in game mode.
    pub match_period: Duration,
    /// How long an ended session's result tokens stay retrievable for late
    /// reconnects.
    pub archive_retention: Duration,
    /// Lifetime stamped into the `exp` claim of minted tokens.
    pub token_ttl: Duration,
    /// Number of concurrent chunk tasks the tick driver dispatches the live
    /// session list across. `1` ticks sessions sequentially.
    pub tick_workers: usize,
    /// Runtime worker threads. Consumed by the binaries when building the
    /// runtime, not by the engine itself.
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(DEFAULT_TICK_MS),
            match_period: Duration::from_millis(DEFAULT_MATCH_MS),
            archive_retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            tick_workers: 1,
            worker_threads: 4,
        }
    }
}
