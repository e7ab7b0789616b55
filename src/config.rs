//! Engine configuration loaded via Figment.
//!
//! Tunables come from a TOML file plus environment variables prefixed with
//! `NEXUS_SYNC_`, so deployments can override single values without
//! shipping a file (e.g. `NEXUS_SYNC_ACK_TIMEOUT=30s`).

use crate::error::{SyncError, SyncResult};
use crate::reconcile::ReconcileSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Reconciliation poller tunables.
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    /// Bounded wait for realtime acknowledgements.
    #[serde(default = "default_ack_timeout", with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// Capability token lifetime after a successful elevation.
    #[serde(default = "default_token_ttl", with = "humantime_serde")]
    pub token_ttl: Duration,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_ack_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_token_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile: ReconcileSettings::default(),
            ack_timeout: default_ack_timeout(),
            token_ttl: default_token_ttl(),
            log_level: default_log_level(),
        }
    }
}

impl SyncConfig {
    /// Load from `nexus-sync.toml` in the working directory plus the
    /// `NEXUS_SYNC_` environment.
    pub fn load() -> SyncResult<Self> {
        Self::load_from("nexus-sync.toml")
    }

    /// Load from a specific file path plus the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let config: SyncConfig = Figment::new()
            .merge(Serialized::defaults(SyncConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("NEXUS_SYNC_"))
            .extract()
            .map_err(|err| SyncError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation after parsing.
    pub fn validate(&self) -> SyncResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(SyncError::Config(format!(
                "invalid log_level '{}'; must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }
        if self.ack_timeout.is_zero() {
            return Err(SyncError::Config("ack_timeout must be non-zero".into()));
        }
        // tokio::time::interval panics on a zero period, and the poller
        // runs detached; catch it here instead.
        if self.reconcile.value_refresh.is_zero() {
            return Err(SyncError::Config(
                "reconcile.value_refresh must be non-zero".into(),
            ));
        }
        if self.reconcile.history_refresh.is_zero() {
            return Err(SyncError::Config(
                "reconcile.history_refresh must be non-zero".into(),
            ));
        }
        if self.reconcile.history_limit == 0 {
            return Err(SyncError::Config(
                "reconcile.history_limit must be at least 1".into(),
            ));
        }
        if self.reconcile.edit_debounce >= self.reconcile.value_refresh {
            return Err(SyncError::Config(
                "edit_debounce must be shorter than value_refresh".into(),
            ));
        }
        Ok(())
    }
}
