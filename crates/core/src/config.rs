//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. TOML config file (optional)
//! 3. Environment variables: `WARDEN_*`
//!
//! # Example Config
//!
//! ```toml
//! [failover]
//! heartbeat_timeout_minutes = 10
//! cooldown_minutes = 15
//!
//! [reconciliation]
//! auto_heal_enabled = true
//! max_operation_history = 1000
//!
//! [scheduler]
//! lock_ttl_seconds = 300
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

/// Top-level configuration for the reconciliation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WardenConfig {
    pub failover: FailoverConfig,
    pub reconciliation: ReconciliationConfig,
    pub scheduler: SchedulerConfig,
}

/// Failure detection and recovery thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FailoverConfig {
    pub enabled: bool,
    pub heartbeat_timeout_minutes: u32,
    pub max_consecutive_failures: u32,
    pub auto_recreate_enabled: bool,
    pub snapshot_recovery_enabled: bool,
    pub max_recovery_attempts: u32,
    pub cooldown_minutes: u32,
    pub detection_interval_minutes: u32,
}

/// State consistency checking and journaling options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub auto_heal_enabled: bool,
    pub record_operations: bool,
    pub max_operation_history: usize,
    pub check_interval_minutes: u32,
}

/// Cluster-wide scheduling options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub failover_lock_key: String,
    pub consistency_lock_key: String,
    pub lock_ttl_seconds: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_timeout_minutes: 10,
            max_consecutive_failures: 3,
            auto_recreate_enabled: true,
            snapshot_recovery_enabled: true,
            max_recovery_attempts: 3,
            cooldown_minutes: 15,
            detection_interval_minutes: 5,
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_heal_enabled: true,
            record_operations: true,
            max_operation_history: 1000,
            check_interval_minutes: 15,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failover_lock_key: "warden:failover:detect-and-recover".to_string(),
            consistency_lock_key: "warden:reconciliation:consistency-check".to_string(),
            lock_ttl_seconds: 300,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PARTIAL UPDATES
// ═══════════════════════════════════════════════════════════════════════════

/// Partial update for [`FailoverConfig`]; `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FailoverConfigUpdate {
    pub enabled: Option<bool>,
    pub heartbeat_timeout_minutes: Option<u32>,
    pub max_consecutive_failures: Option<u32>,
    pub auto_recreate_enabled: Option<bool>,
    pub snapshot_recovery_enabled: Option<bool>,
    pub max_recovery_attempts: Option<u32>,
    pub cooldown_minutes: Option<u32>,
    pub detection_interval_minutes: Option<u32>,
}

/// Partial update for [`ReconciliationConfig`]; `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconciliationConfigUpdate {
    pub enabled: Option<bool>,
    pub auto_heal_enabled: Option<bool>,
    pub record_operations: Option<bool>,
    pub max_operation_history: Option<usize>,
    pub check_interval_minutes: Option<u32>,
}

impl FailoverConfig {
    /// Apply a partial update, returning the validated merged config.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the merged values are out of range.
    pub fn merged(&self, update: &FailoverConfigUpdate) -> Result<Self> {
        let merged = Self {
            enabled: update.enabled.unwrap_or(self.enabled),
            heartbeat_timeout_minutes: update
                .heartbeat_timeout_minutes
                .unwrap_or(self.heartbeat_timeout_minutes),
            max_consecutive_failures: update
                .max_consecutive_failures
                .unwrap_or(self.max_consecutive_failures),
            auto_recreate_enabled: update
                .auto_recreate_enabled
                .unwrap_or(self.auto_recreate_enabled),
            snapshot_recovery_enabled: update
                .snapshot_recovery_enabled
                .unwrap_or(self.snapshot_recovery_enabled),
            max_recovery_attempts: update
                .max_recovery_attempts
                .unwrap_or(self.max_recovery_attempts),
            cooldown_minutes: update.cooldown_minutes.unwrap_or(self.cooldown_minutes),
            detection_interval_minutes: update
                .detection_interval_minutes
                .unwrap_or(self.detection_interval_minutes),
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout_minutes == 0 {
            return Err(Error::invalid_config(
                "failover.heartbeat_timeout_minutes must be positive",
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::invalid_config(
                "failover.max_consecutive_failures must be at least 1",
            ));
        }
        if self.max_recovery_attempts == 0 {
            return Err(Error::invalid_config(
                "failover.max_recovery_attempts must be at least 1",
            ));
        }
        if self.detection_interval_minutes == 0 {
            return Err(Error::invalid_config(
                "failover.detection_interval_minutes must be positive",
            ));
        }
        Ok(())
    }

    /// Heartbeat timeout as a chrono duration.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.heartbeat_timeout_minutes))
    }

    /// Cooldown window as a chrono duration.
    #[must_use]
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cooldown_minutes))
    }

    /// Interval between failover cycles.
    #[must_use]
    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.detection_interval_minutes).saturating_mul(60))
    }
}

impl ReconciliationConfig {
    /// Apply a partial update, returning the validated merged config.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the merged values are out of range.
    pub fn merged(&self, update: &ReconciliationConfigUpdate) -> Result<Self> {
        let merged = Self {
            enabled: update.enabled.unwrap_or(self.enabled),
            auto_heal_enabled: update.auto_heal_enabled.unwrap_or(self.auto_heal_enabled),
            record_operations: update.record_operations.unwrap_or(self.record_operations),
            max_operation_history: update
                .max_operation_history
                .unwrap_or(self.max_operation_history),
            check_interval_minutes: update
                .check_interval_minutes
                .unwrap_or(self.check_interval_minutes),
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_operation_history == 0 {
            return Err(Error::invalid_config(
                "reconciliation.max_operation_history must be at least 1",
            ));
        }
        if self.check_interval_minutes == 0 {
            return Err(Error::invalid_config(
                "reconciliation.check_interval_minutes must be positive",
            ));
        }
        Ok(())
    }

    /// Interval between consistency cycles.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.check_interval_minutes).saturating_mul(60))
    }
}

impl SchedulerConfig {
    /// Lock time-to-live.
    #[must_use]
    pub const fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for empty lock keys or a zero TTL.
    pub fn validate(&self) -> Result<()> {
        if self.failover_lock_key.is_empty() || self.consistency_lock_key.is_empty() {
            return Err(Error::invalid_config("scheduler lock keys must not be empty"));
        }
        if self.lock_ttl_seconds == 0 {
            return Err(Error::invalid_config(
                "scheduler.lock_ttl_seconds must be positive",
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

impl WardenConfig {
    /// Load configuration from defaults, an optional TOML file and the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The config file cannot be read or is malformed TOML
    /// - An environment override cannot be parsed
    /// - The resulting values fail validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; missing sections and keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and
    /// `Error::ConfigParse` if the TOML is malformed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::config_parse(path, e.to_string()))
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first `Error::InvalidConfig` found.
    pub fn validate(&self) -> Result<()> {
        self.failover.validate()?;
        self.reconciliation.validate()?;
        self.scheduler.validate()
    }

    /// Apply `WARDEN_*` overrides using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a variable holds an unparsable value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let f = &mut self.failover;
        env_override(&lookup, "WARDEN_FAILOVER_ENABLED", &mut f.enabled)?;
        env_override(
            &lookup,
            "WARDEN_FAILOVER_HEARTBEAT_TIMEOUT_MINUTES",
            &mut f.heartbeat_timeout_minutes,
        )?;
        env_override(
            &lookup,
            "WARDEN_FAILOVER_MAX_CONSECUTIVE_FAILURES",
            &mut f.max_consecutive_failures,
        )?;
        env_override(
            &lookup,
            "WARDEN_FAILOVER_AUTO_RECREATE_ENABLED",
            &mut f.auto_recreate_enabled,
        )?;
        env_override(
            &lookup,
            "WARDEN_FAILOVER_SNAPSHOT_RECOVERY_ENABLED",
            &mut f.snapshot_recovery_enabled,
        )?;
        env_override(
            &lookup,
            "WARDEN_FAILOVER_MAX_RECOVERY_ATTEMPTS",
            &mut f.max_recovery_attempts,
        )?;
        env_override(&lookup, "WARDEN_FAILOVER_COOLDOWN_MINUTES", &mut f.cooldown_minutes)?;
        env_override(
            &lookup,
            "WARDEN_FAILOVER_DETECTION_INTERVAL_MINUTES",
            &mut f.detection_interval_minutes,
        )?;

        let r = &mut self.reconciliation;
        env_override(&lookup, "WARDEN_RECONCILIATION_ENABLED", &mut r.enabled)?;
        env_override(
            &lookup,
            "WARDEN_RECONCILIATION_AUTO_HEAL_ENABLED",
            &mut r.auto_heal_enabled,
        )?;
        env_override(
            &lookup,
            "WARDEN_RECONCILIATION_RECORD_OPERATIONS",
            &mut r.record_operations,
        )?;
        env_override(
            &lookup,
            "WARDEN_RECONCILIATION_MAX_OPERATION_HISTORY",
            &mut r.max_operation_history,
        )?;
        env_override(
            &lookup,
            "WARDEN_RECONCILIATION_CHECK_INTERVAL_MINUTES",
            &mut r.check_interval_minutes,
        )?;

        env_override(
            &lookup,
            "WARDEN_SCHEDULER_LOCK_TTL_SECONDS",
            &mut self.scheduler.lock_ttl_seconds,
        )?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

fn env_override<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| Error::invalid_config(format!("Invalid {key} value '{raw}': {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = WardenConfig::default();
        assert_eq!(config.failover.heartbeat_timeout_minutes, 10);
        assert_eq!(config.failover.max_consecutive_failures, 3);
        assert_eq!(config.failover.cooldown_minutes, 15);
        assert_eq!(config.reconciliation.max_operation_history, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[failover]\ncooldown_minutes = 30\n").unwrap();

        let config = WardenConfig::from_file(file.path()).unwrap();
        assert_eq!(config.failover.cooldown_minutes, 30);
        assert_eq!(config.failover.heartbeat_timeout_minutes, 10);
        assert!(config.reconciliation.auto_heal_enabled);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[failover\n").unwrap();

        let err = WardenConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("WARDEN_FAILOVER_COOLDOWN_MINUTES", "1"),
            ("WARDEN_RECONCILIATION_AUTO_HEAL_ENABLED", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = WardenConfig::default();
        config
            .apply_env_overrides(|k| vars.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.failover.cooldown_minutes, 1);
        assert!(!config.reconciliation.auto_heal_enabled);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = WardenConfig::default();
        let err = config
            .apply_env_overrides(|k| {
                (k == "WARDEN_FAILOVER_MAX_CONSECUTIVE_FAILURES").then(|| "three".to_string())
            })
            .unwrap_err();
        assert!(err.to_string().contains("WARDEN_FAILOVER_MAX_CONSECUTIVE_FAILURES"));
    }

    #[test]
    fn test_merged_preserves_unset_fields() {
        let base = FailoverConfig::default();
        let merged = base
            .merged(&FailoverConfigUpdate {
                snapshot_recovery_enabled: Some(false),
                ..FailoverConfigUpdate::default()
            })
            .unwrap();
        assert!(!merged.snapshot_recovery_enabled);
        assert_eq!(merged.cooldown_minutes, base.cooldown_minutes);
    }

    #[test]
    fn test_merged_rejects_zero_ceiling() {
        let err = FailoverConfig::default()
            .merged(&FailoverConfigUpdate {
                max_consecutive_failures: Some(0),
                ..FailoverConfigUpdate::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_reconciliation_merged_rejects_empty_history() {
        let err = ReconciliationConfig::default()
            .merged(&ReconciliationConfigUpdate {
                max_operation_history: Some(0),
                ..ReconciliationConfigUpdate::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("max_operation_history"));
    }
}
