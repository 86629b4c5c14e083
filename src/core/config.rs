/*!
 * Synchronization Configuration
 *
 * Tunables for the contended paths of the primitives. The fast paths never
 * consult configuration; the slow paths read the process-wide value once per
 * call through [`SyncConfig::global`].
 */

use super::errors::{SyncError, SyncResult};
use std::sync::OnceLock;
use std::time::Duration;

static GLOBAL: OnceLock<SyncConfig> = OnceLock::new();

/// Synchronization configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Wait time after which a mutex waiter switches the lock to starvation mode
    pub starvation_threshold: Duration,
    /// Maximum spin iterations an arriving locker performs before queueing
    pub active_spin: u32,
    /// CPU spin hints issued per spin iteration
    pub active_spin_cycles: u32,
    /// Interval between pool sweeps when driven by a `Sweeper`
    pub sweep_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            starvation_threshold: Duration::from_millis(1),
            active_spin: 4,
            active_spin_cycles: 30,
            sweep_interval: Duration::from_secs(2),
        }
    }
}

impl SyncConfig {
    /// Configuration favouring latency: no spinning, early starvation hand-off
    pub const fn low_latency() -> Self {
        Self {
            starvation_threshold: Duration::from_micros(250),
            active_spin: 0,
            active_spin_cycles: 0,
            sweep_interval: Duration::from_secs(2),
        }
    }

    /// Configuration favouring throughput under heavy contention
    pub const fn throughput() -> Self {
        Self {
            starvation_threshold: Duration::from_millis(5),
            active_spin: 8,
            active_spin_cycles: 60,
            sweep_interval: Duration::from_secs(5),
        }
    }

    /// Build a configuration from `SYNC_*` environment variables
    ///
    /// Unset variables keep their default; malformed ones are rejected.
    pub fn from_env() -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(us) = env_u64("SYNC_STARVATION_THRESHOLD_US")? {
            config.starvation_threshold = Duration::from_micros(us);
        }
        if let Some(spins) = env_u64("SYNC_ACTIVE_SPIN")? {
            config.active_spin = u32::try_from(spins)
                .map_err(|_| SyncError::InvalidConfig("SYNC_ACTIVE_SPIN out of range".into()))?;
        }
        if let Some(cycles) = env_u64("SYNC_ACTIVE_SPIN_CYCLES")? {
            config.active_spin_cycles = u32::try_from(cycles).map_err(|_| {
                SyncError::InvalidConfig("SYNC_ACTIVE_SPIN_CYCLES out of range".into())
            })?;
        }
        if let Some(ms) = env_u64("SYNC_SWEEP_INTERVAL_MS")? {
            config.sweep_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the values are usable
    pub fn validate(&self) -> SyncResult<()> {
        if self.starvation_threshold.is_zero() {
            return Err(SyncError::InvalidConfig(
                "starvation_threshold must be non-zero".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "sweep_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Install this configuration process-wide
    ///
    /// Fails if a configuration was already installed or read.
    pub fn install(self) -> SyncResult<()> {
        self.validate()?;
        GLOBAL
            .set(self)
            .map_err(|_| SyncError::ConfigAlreadyInstalled)?;
        tracing::debug!(config = ?GLOBAL.get(), "sync configuration installed");
        Ok(())
    }

    /// Process-wide configuration (defaults if none was installed)
    #[inline]
    pub fn global() -> &'static SyncConfig {
        GLOBAL.get_or_init(SyncConfig::default)
    }
}

fn env_u64(name: &str) -> SyncResult<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| SyncError::InvalidConfig(format!("{}={:?}: {}", name, raw, e))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(SyncError::InvalidConfig(format!("{}: {}", name, e))),
    }
}
