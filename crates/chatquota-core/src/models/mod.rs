//! Configuration model for the usage tracker

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::services::quota::plans::{self, LimitTable};
use crate::services::quota::timer::{SweepConfig, DEFAULT_FULL_SWEEP_EVERY, DEFAULT_TICK_SECS};
use crate::services::quota::types::{
    AlertLevel, PlanId, UsageView, DEFAULT_CRITICAL_THRESHOLD, DEFAULT_WARNING_THRESHOLD,
};
use crate::utils::{RetryPolicy, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};

/// Default per-attempt wait for a tracker reply
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2_000;

/// Upper bound on configured retry attempts
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Tracker settings, stored as `config.json`
///
/// Every field has a default so partial files load; `validate` clamps
/// out-of-range values instead of rejecting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Plan used until one is persisted in the database
    pub default_plan: PlanId,
    /// Seconds between light sweeps (minimum 1)
    pub tick_secs: u64,
    /// Run a full sweep every N ticks (minimum 1)
    pub full_sweep_every: u32,
    /// Attempts per tracker request, first try included
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Wait per attempt for the tracker to reply
    pub request_timeout_ms: u64,
    /// Percentage used at which a model shows as warning (0-100)
    pub warning_threshold: f64,
    /// Percentage used at which a model shows as critical (0-100)
    pub critical_threshold: f64,
    /// Replacement limit tables keyed by plan id ("free", "plus", ...)
    pub limit_overrides: BTreeMap<String, LimitTable>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            default_plan: PlanId::default(),
            tick_secs: DEFAULT_TICK_SECS,
            full_sweep_every: DEFAULT_FULL_SWEEP_EVERY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
            limit_overrides: BTreeMap::new(),
        }
    }
}

impl TrackerConfig {
    /// Load from `path`, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.check_overrides()?;
        Ok(config.validate())
    }

    /// Reject override tables with blank model patterns, which would match
    /// every model
    fn check_overrides(&self) -> Result<()> {
        for (plan, table) in &self.limit_overrides {
            if table.entries().iter().any(|e| e.pattern.trim().is_empty()) {
                return Err(Error::validation(format!(
                    "Empty model pattern in limits for plan '{}'",
                    plan
                )));
            }
        }
        Ok(())
    }

    /// Write as pretty JSON, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        let warning_threshold = self.warning_threshold.clamp(0.0, 100.0);
        Self {
            default_plan: self.default_plan.clone(),
            tick_secs: self.tick_secs.max(1),
            full_sweep_every: self.full_sweep_every.max(1),
            retry_attempts: self.retry_attempts.clamp(1, MAX_RETRY_ATTEMPTS),
            retry_delay_ms: self.retry_delay_ms,
            request_timeout_ms: self.request_timeout_ms.max(100),
            warning_threshold,
            critical_threshold: self.critical_threshold.clamp(warning_threshold, 100.0),
            limit_overrides: self
                .limit_overrides
                .iter()
                .map(|(plan, table)| (plan.clone(), table.normalized()))
                .collect(),
        }
    }

    /// Limit table for a plan: the override if present, else the built-in one
    pub fn limits_for(&self, plan: &PlanId) -> LimitTable {
        match self.limit_overrides.get(&plan.to_string()) {
            Some(table) => {
                log::debug!("Using configured limits for plan {}", plan);
                table.clone()
            }
            None => plans::limits_for(plan),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Alert level of a view against the configured thresholds
    pub fn alert_level(&self, view: &UsageView) -> AlertLevel {
        view.alert_level_with(self.warning_threshold, self.critical_threshold)
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            tick_secs: self.tick_secs,
            full_sweep_every: self.full_sweep_every,
        }
    }
}
