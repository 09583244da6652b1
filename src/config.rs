//! Berth configuration
//!
//! Settings come from an optional YAML file and are then overridden by
//! `BERTH_*` environment variables. Every field has a default, so a missing
//! file is not an error.

use crate::container::detector::{CrashSignature, DEFAULT_CRASH_SIGNATURES};
use crate::error::{BerthError, Result};
use crate::port::DEFAULT_HOST_IP;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Label key attached to every container and volume for bulk teardown
pub const DEFAULT_CLEANUP_LABEL_KEY: &str = "berth.cleanup";

/// Default config file name under the user config directory
pub const CONFIG_FILE: &str = "berth/config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BerthConfig {
    /// How long a container must survive after start
    pub grace_period_ms: u64,
    /// Graceful stop timeout before the runtime kills the container
    pub stop_timeout_secs: u64,
    /// Upper bound on reading logs during crash detection
    pub log_fetch_timeout_ms: u64,
    /// Regexes marking a fatal crash in container logs
    pub crash_signatures: Vec<String>,
    /// Label key carrying the cleanup scope
    pub cleanup_label_key: String,
    /// Host address reserved ports are bound and published on
    pub host_ip: String,
    /// Pull images that are not present locally
    pub pull_missing_images: bool,
}

impl Default for BerthConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 2000,
            stop_timeout_secs: 30,
            log_fetch_timeout_ms: 5000,
            crash_signatures: DEFAULT_CRASH_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cleanup_label_key: DEFAULT_CLEANUP_LABEL_KEY.to_string(),
            host_ip: DEFAULT_HOST_IP.to_string(),
            pull_missing_images: true,
        }
    }
}

impl BerthConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_FILE))
    }

    /// Load from `path` (or the default location), then apply the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config file from path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    /// Parse config from YAML
    pub fn parse_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `BERTH_*` overrides from `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn number(key: &str, value: String) -> Result<u64> {
            value
                .trim()
                .parse()
                .map_err(|_| BerthError::InvalidConfig(format!("{}={:?} is not a number", key, value)))
        }

        if let Some(v) = lookup("BERTH_GRACE_PERIOD_MS") {
            self.grace_period_ms = number("BERTH_GRACE_PERIOD_MS", v)?;
        }
        if let Some(v) = lookup("BERTH_STOP_TIMEOUT_SECS") {
            self.stop_timeout_secs = number("BERTH_STOP_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("BERTH_LOG_FETCH_TIMEOUT_MS") {
            self.log_fetch_timeout_ms = number("BERTH_LOG_FETCH_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("BERTH_CLEANUP_LABEL_KEY") {
            self.cleanup_label_key = v;
        }
        if let Some(v) = lookup("BERTH_HOST_IP") {
            self.host_ip = v;
        }

        Ok(())
    }

    /// Reject settings that would only fail later
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_label_key.trim().is_empty() {
            return Err(BerthError::InvalidConfig(
                "cleanup_label_key must not be empty".to_string(),
            ));
        }
        if self.host_ip.parse::<std::net::IpAddr>().is_err() {
            return Err(BerthError::InvalidConfig(format!(
                "host_ip {:?} is not an IP address",
                self.host_ip
            )));
        }
        for pattern in &self.crash_signatures {
            CrashSignature::new(pattern)?;
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn log_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.log_fetch_timeout_ms)
    }
}
