//! Engine configuration
//!
//! Backoff durations and per-kind classification overrides. Values can be
//! embedded in a host's own config file (serde, camelCase) or read from the
//! environment through the [`EnvSource`] trait so tests never touch global
//! process state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Fixed backoff for Wait verdicts
pub const DEFAULT_WAIT_BACKOFF_SECS: u64 = 30;
/// Requeue after an asynchronous update was submitted
pub const DEFAULT_ASYNC_UPDATE_REQUEUE_SECS: u64 = 15;
/// Backoff after a remote conflict with an in-flight operation
pub const DEFAULT_CONFLICT_BACKOFF_SECS: u64 = 15;
/// Requeue after convergence, to notice out-of-band drift
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 10 * 60 * 60;

/// Environment variable names read by [`EngineConfig::from_env`]
pub mod env {
    /// Wait verdict backoff in seconds
    pub const WAIT_BACKOFF_SECS: &str = "CONVERGE_WAIT_BACKOFF_SECS";
    /// Post-update requeue in seconds
    pub const ASYNC_UPDATE_REQUEUE_SECS: &str = "CONVERGE_ASYNC_UPDATE_REQUEUE_SECS";
    /// Conflict backoff in seconds
    pub const CONFLICT_BACKOFF_SECS: &str = "CONVERGE_CONFLICT_BACKOFF_SECS";
    /// Resync period in seconds
    pub const RESYNC_PERIOD_SECS: &str = "CONVERGE_RESYNC_PERIOD_SECS";
    /// Comma-separated remote error codes to treat as terminal
    pub const EXTRA_TERMINAL_CODES: &str = "CONVERGE_EXTRA_TERMINAL_CODES";
    /// Comma-separated resource kinds for which Degraded is terminal
    pub const DEGRADED_TERMINAL_KINDS: &str = "CONVERGE_DEGRADED_TERMINAL_KINDS";
}

/// Source of environment variables
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Read a variable, `None` when unset
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment
#[derive(Clone, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Tunables for the convergence engine
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Backoff attached to Wait verdicts
    pub wait_backoff_secs: u64,
    /// Requeue after an Applied verdict on an asynchronous resource
    pub async_update_requeue_secs: u64,
    /// Backoff attached to TransientConflict classifications
    pub conflict_backoff_secs: u64,
    /// Requeue after a Converged verdict
    pub resync_period_secs: u64,
    /// Remote error codes treated as terminal in addition to the built-in list
    pub extra_terminal_codes: Vec<String>,
    /// Resource kinds (e.g. "Addon") for which the Degraded status is terminal
    pub degraded_terminal_kinds: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_backoff_secs: DEFAULT_WAIT_BACKOFF_SECS,
            async_update_requeue_secs: DEFAULT_ASYNC_UPDATE_REQUEUE_SECS,
            conflict_backoff_secs: DEFAULT_CONFLICT_BACKOFF_SECS,
            resync_period_secs: DEFAULT_RESYNC_PERIOD_SECS,
            extra_terminal_codes: Vec::new(),
            degraded_terminal_kinds: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Build a config from environment variables, falling back to defaults
    pub fn from_env(source: &dyn EnvSource) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            wait_backoff_secs: read_secs(source, env::WAIT_BACKOFF_SECS, defaults.wait_backoff_secs)?,
            async_update_requeue_secs: read_secs(
                source,
                env::ASYNC_UPDATE_REQUEUE_SECS,
                defaults.async_update_requeue_secs,
            )?,
            conflict_backoff_secs: read_secs(
                source,
                env::CONFLICT_BACKOFF_SECS,
                defaults.conflict_backoff_secs,
            )?,
            resync_period_secs: read_secs(
                source,
                env::RESYNC_PERIOD_SECS,
                defaults.resync_period_secs,
            )?,
            extra_terminal_codes: read_list(source, env::EXTRA_TERMINAL_CODES),
            degraded_terminal_kinds: read_list(source, env::DEGRADED_TERMINAL_KINDS),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would requeue in a hot loop
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("waitBackoffSecs", self.wait_backoff_secs),
            ("asyncUpdateRequeueSecs", self.async_update_requeue_secs),
            ("conflictBackoffSecs", self.conflict_backoff_secs),
            ("resyncPeriodSecs", self.resync_period_secs),
        ] {
            if value == 0 {
                return Err(Error::validation_for_field(
                    "engine-config",
                    field,
                    "must be greater than zero",
                ));
            }
        }
        Ok(())
    }

    /// Backoff attached to Wait verdicts
    pub fn wait_backoff(&self) -> Duration {
        Duration::from_secs(self.wait_backoff_secs)
    }

    /// Requeue after an asynchronous update was applied
    pub fn async_update_requeue(&self) -> Duration {
        Duration::from_secs(self.async_update_requeue_secs)
    }

    /// Backoff for transient conflicts
    pub fn conflict_backoff(&self) -> Duration {
        Duration::from_secs(self.conflict_backoff_secs)
    }

    /// Requeue after convergence
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// Whether Degraded is terminal for the given resource kind
    pub fn degraded_is_terminal(&self, kind: &str) -> bool {
        self.degraded_terminal_kinds
            .iter()
            .any(|k| k.eq_ignore_ascii_case(kind))
    }
}

fn read_secs(source: &dyn EnvSource, key: &str, default: u64) -> Result<u64> {
    match source.var(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
            Error::validation_for_field("engine-config", key, format!("'{}': {}", raw, e))
        }),
    }
}

fn read_list(source: &dyn EnvSource, key: &str) -> Vec<String> {
    source
        .var(key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
