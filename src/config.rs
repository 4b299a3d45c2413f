/*!
 * Configuration types for Sacristan
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SacristanError};

/// Verbosity for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Main configuration for the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Base URL of the identity API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Session throttle interval in milliseconds
    #[serde(default = "default_throttle_ms")]
    pub session_throttle_ms: u64,

    /// Session cache lifetime in milliseconds
    #[serde(default = "default_cache_ttl_ms")]
    pub session_cache_ttl_ms: u64,

    /// Inactivity timeout in milliseconds before sessions expire
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,

    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// Circuit cooldown in milliseconds before a probe is admitted
    #[serde(default = "default_cooldown_ms")]
    pub breaker_cooldown_ms: u64,

    /// Maximum credential age in milliseconds before forced re-entry
    #[serde(default = "default_max_credential_age_ms")]
    pub max_credential_age_ms: u64,

    /// Interval between credential revalidations in milliseconds
    #[serde(default = "default_refresh_interval_ms")]
    pub credential_refresh_interval_ms: u64,

    /// Interval between background fingerprint rechecks in milliseconds
    #[serde(default = "default_recheck_interval_ms")]
    pub fingerprint_recheck_ms: u64,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    /// State directory for persisted session and credential data
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_throttle_ms() -> u64 {
    1_000
}

fn default_cache_ttl_ms() -> u64 {
    500
}

fn default_inactivity_timeout_ms() -> u64 {
    8 * 60 * 60 * 1_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_max_credential_age_ms() -> u64 {
    180 * 24 * 60 * 60 * 1_000
}

fn default_refresh_interval_ms() -> u64 {
    7 * 24 * 60 * 60 * 1_000
}

fn default_recheck_interval_ms() -> u64 {
    60_000
}

/// A timestamped snapshot of a configuration that is about to be
/// replaced. Persisted under the `config.backups` key, newest last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigBackup {
    /// Milliseconds since the Unix epoch when the snapshot was taken
    pub saved_at_ms: u64,
    pub config: ConsoleConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            api_base: default_api_base(),
            session_throttle_ms: default_throttle_ms(),
            session_cache_ttl_ms: default_cache_ttl_ms(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            breaker_failure_threshold: default_failure_threshold(),
            breaker_cooldown_ms: default_cooldown_ms(),
            max_credential_age_ms: default_max_credential_age_ms(),
            credential_refresh_interval_ms: default_refresh_interval_ms(),
            fingerprint_recheck_ms: default_recheck_interval_ms(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            state_dir: None,
        }
    }
}

impl ConsoleConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(ConsoleConfig::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SacristanError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: ConsoleConfig = toml::from_str(&raw)
            .map_err(|e| SacristanError::Config(format!("invalid TOML in {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.api_base.is_empty() {
            return Err(SacristanError::Config("api_base must not be empty".into()));
        }
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(SacristanError::Config(format!(
                "api_base must be an http(s) URL, got {}",
                self.api_base
            )));
        }
        if self.session_cache_ttl_ms > self.session_throttle_ms {
            return Err(SacristanError::Config(
                "session_cache_ttl_ms must not exceed session_throttle_ms".into(),
            ));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(SacristanError::Config(
                "breaker_failure_threshold must be at least 1".into(),
            ));
        }
        if self.credential_refresh_interval_ms > self.max_credential_age_ms {
            return Err(SacristanError::Config(
                "credential_refresh_interval_ms must not exceed max_credential_age_ms".into(),
            ));
        }
        Ok(())
    }

    /// Restore every timing parameter to its default value.
    ///
    /// Endpoint, logging, and state directory settings are kept.
    pub fn reset_timings(&mut self) {
        self.session_throttle_ms = default_throttle_ms();
        self.session_cache_ttl_ms = default_cache_ttl_ms();
        self.inactivity_timeout_ms = default_inactivity_timeout_ms();
        self.breaker_failure_threshold = default_failure_threshold();
        self.breaker_cooldown_ms = default_cooldown_ms();
        self.max_credential_age_ms = default_max_credential_age_ms();
        self.credential_refresh_interval_ms = default_refresh_interval_ms();
        self.fingerprint_recheck_ms = default_recheck_interval_ms();
    }

    /// Resolve the state directory, creating it if needed.
    pub fn resolve_state_dir(&self) -> Result<PathBuf> {
        let dir = match &self.state_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .map(|d| d.join("sacristan"))
                .ok_or_else(|| SacristanError::Config("no local data directory available".into()))?,
        };
        std::fs::create_dir_all(&dir).map_err(|_| SacristanError::StateDir(dir.clone()))?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConsoleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session_throttle_ms, 1_000);
        assert_eq!(config.session_cache_ttl_ms, 500);
        assert_eq!(config.breaker_failure_threshold, 5);
    }

    #[test]
    fn test_cache_ttl_bounded_by_throttle() {
        let config = ConsoleConfig {
            session_cache_ttl_ms: 2_000,
            session_throttle_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_http_api_base() {
        let config = ConsoleConfig {
            api_base: "ftp://example.com".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reset_timings_keeps_endpoint_and_logging() {
        let mut config = ConsoleConfig {
            api_base: "https://github.example.com/api/v3".into(),
            session_throttle_ms: 5_000,
            session_cache_ttl_ms: 4_000,
            breaker_cooldown_ms: 120_000,
            log_level: LogLevel::Trace,
            ..Default::default()
        };
        config.reset_timings();

        assert_eq!(config.session_throttle_ms, 1_000);
        assert_eq!(config.session_cache_ttl_ms, 500);
        assert_eq!(config.breaker_cooldown_ms, 30_000);
        assert_eq!(config.api_base, "https://github.example.com/api/v3");
        assert_eq!(config.log_level, LogLevel::Trace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = ConsoleConfig::load(Path::new("/nonexistent/sacristan.toml")).unwrap();
        assert_eq!(config.api_base, "https://api.github.com");
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.toml");
        std::fs::write(&path, "session_throttle_ms = 2000\nverbose = true\n").unwrap();
        let config = ConsoleConfig::load(&path).unwrap();
        assert_eq!(config.session_throttle_ms, 2_000);
        assert!(config.verbose);
        assert_eq!(config.session_cache_ttl_ms, 500);
    }
}
