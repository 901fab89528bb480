// Core configuration model
// Wraps `config::Config` and exposes typed accessors for the object lock manager

use std::path::Path;

use config::{Config, Environment};

pub const DEFAULT_FANOUT_DEADLINE_MS: u64 = 10_000;
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 1024;

/// Application configuration wrapper
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Create a new configuration from a Config instance
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Load from a config file plus `DDLOCK_`-prefixed environment overrides
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                Environment::with_prefix("DDLOCK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("failed to load configuration from {}: {}", path.display(), e))?;
        Ok(Self::from_config(config))
    }

    // ===================== Object Lock Configuration =====================

    /// Total deadline of one lock-update fan-out in milliseconds (default: 10000ms)
    pub fn object_lock_fanout_deadline_ms(&self) -> u64 {
        self.config
            .get_int("ddlock.object-lock.fanout-deadline")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_FANOUT_DEADLINE_MS)
    }

    /// Timeout of a single member call in milliseconds (default: 2000ms)
    pub fn object_lock_rpc_timeout_ms(&self) -> u64 {
        self.config
            .get_int("ddlock.object-lock.rpc-timeout")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_RPC_TIMEOUT_MS)
    }

    /// Attempts per member before it is reported unreachable (default: 5)
    pub fn object_lock_max_attempts(&self) -> u32 {
        self.config
            .get_int("ddlock.object-lock.max-attempts")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .map(|v| v.max(1))
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    /// Backoff before the first retry in milliseconds (default: 100ms)
    pub fn object_lock_initial_backoff_ms(&self) -> u64 {
        self.config
            .get_int("ddlock.object-lock.initial-backoff")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS)
    }

    /// Backoff ceiling in milliseconds (default: 2000ms)
    pub fn object_lock_max_backoff_ms(&self) -> u64 {
        self.config
            .get_int("ddlock.object-lock.max-backoff")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_MAX_BACKOFF_MS)
    }

    /// Backoff growth factor between attempts (default: 2.0)
    pub fn object_lock_backoff_multiplier(&self) -> f64 {
        self.config
            .get_float("ddlock.object-lock.backoff-multiplier")
            .ok()
            .filter(|v| *v >= 1.0)
            .unwrap_or(DEFAULT_BACKOFF_MULTIPLIER)
    }

    /// Whether members that join or come back up get a full lock resync (default: true)
    pub fn object_lock_resync_on_join(&self) -> bool {
        self.config
            .get_bool("ddlock.object-lock.resync-on-join")
            .unwrap_or(true)
    }

    /// Capacity of the member change event channel (default: 1024)
    pub fn member_event_queue_size(&self) -> usize {
        self.config
            .get_int("ddlock.member.event-queue-size")
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_EVENT_QUEUE_SIZE)
    }
}
