//! Fast-failure detection
//!
//! Right after a container starts, wait a short grace period, then look for
//! a fatal-crash signature in its logs and check that the runtime still
//! reports it running. A container that is merely slow to become healthy
//! passes; only a crash signature or a dead process fails.

use super::runtime::ContainerRuntime;
use crate::config::BerthConfig;
use crate::error::{BerthError, Result};
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

/// Go runtime panic: `panic: <message>`
///
/// Leading tokens containing a digit (timestamps, pids) are allowed before
/// `panic:`; any other prefix is treated as ordinary log text.
pub const GO_PANIC: &str = r"^(?:\S*\d\S*\s+)*panic: (?P<message>.*)$";

/// Go runtime fatal error: `fatal error: <message>`, same prefix rule as [`GO_PANIC`]
pub const GO_FATAL_ERROR: &str = r"^(?:\S*\d\S*\s+)*fatal error: (?P<message>.+)$";

/// Rust panic; the message follows on the next line
pub const RUST_PANIC: &str = r"^thread '[^']*' panicked at \S+:\d+:\d+:$";

/// Signatures used when a workload does not configure its own
///
/// Each pattern is matched against one log line at a time. Lines written
/// through a logger that adds a non-numeric prefix (`ERR main: panic: ...`)
/// are not matched; configure a signature for such workloads.
pub const DEFAULT_CRASH_SIGNATURES: &[&str] = &[GO_PANIC, GO_FATAL_ERROR, RUST_PANIC];

/// A log line pattern marking an unrecoverable process error
///
/// If the pattern has a non-empty `message` capture, that is the crash
/// message. Otherwise the next non-empty log line is.
#[derive(Debug, Clone)]
pub struct CrashSignature {
    pattern: Regex,
}

impl CrashSignature {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| BerthError::InvalidSignature {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { pattern })
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    fn message(&self, lines: &[&str], index: usize) -> Option<String> {
        let caps = self.pattern.captures(lines[index])?;

        let inline = caps
            .name("message")
            .map(|m| m.as_str().trim())
            .filter(|m| !m.is_empty());
        if let Some(message) = inline {
            return Some(message.to_string());
        }

        let following = lines[index + 1..]
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty());
        Some(following.unwrap_or_else(|| lines[index].trim()).to_string())
    }
}

/// Post-start crash check
#[derive(Debug, Clone)]
pub struct FastFailureDetector {
    grace_period: Duration,
    log_timeout: Duration,
    signatures: Vec<CrashSignature>,
}

impl FastFailureDetector {
    pub fn new(grace_period: Duration, log_timeout: Duration, signatures: Vec<CrashSignature>) -> Self {
        Self {
            grace_period,
            log_timeout,
            signatures,
        }
    }

    pub fn from_config(config: &BerthConfig) -> Result<Self> {
        let signatures = config
            .crash_signatures
            .iter()
            .map(|p| CrashSignature::new(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(
            config.grace_period(),
            config.log_fetch_timeout(),
            signatures,
        ))
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// First crash message found in `logs`
    pub fn scan(&self, logs: &str) -> Option<String> {
        let lines: Vec<&str> = logs.lines().map(|l| l.trim_end_matches('\r')).collect();

        (0..lines.len()).find_map(|i| {
            self.signatures
                .iter()
                .find_map(|signature| signature.message(&lines, i))
        })
    }

    /// Wait out the grace period, then fail if the container crashed
    pub async fn check(&self, runtime: &dyn ContainerRuntime, id: &str, name: &str) -> Result<()> {
        tokio::time::sleep(self.grace_period).await;

        let crash = match tokio::time::timeout(self.log_timeout, runtime.container_logs(id)).await {
            Ok(Ok(logs)) => self.scan(&logs),
            Ok(Err(e)) => {
                warn!(container = %name, id = %id, "Failed to read logs for crash check: {}", e);
                None
            }
            Err(_) => {
                warn!(container = %name, id = %id, "Timed out reading logs for crash check");
                None
            }
        };

        let inspection = runtime.inspect_container(id).await;

        if let Some(message) = crash {
            let exit_code = inspection
                .ok()
                .filter(|i| !i.state.running)
                .and_then(|i| i.state.exit_code);
            return Err(BerthError::FastCrash {
                name: name.to_string(),
                id: id.to_string(),
                message,
                exit_code,
            });
        }

        let state = inspection
            .map_err(|e| BerthError::runtime(name, Some(id), "inspect", e))?
            .state;
        if !state.running {
            let status = match state.error.as_deref() {
                Some(error) if !error.is_empty() => format!("{} ({})", state.status, error),
                _ => state.status.clone(),
            };
            return Err(BerthError::ExitedEarly {
                name: name.to_string(),
                id: id.to_string(),
                exit_code: state.exit_code.unwrap_or(-1),
                status,
            });
        }

        debug!(container = %name, id = %id, "Container survived startup grace period");
        Ok(())
    }
}

impl Default for FastFailureDetector {
    fn default() -> Self {
        let config = BerthConfig::default();
        let signatures = DEFAULT_CRASH_SIGNATURES
            .iter()
            .filter_map(|p| CrashSignature::new(p).ok())
            .collect();
        Self::new(config.grace_period(), config.log_fetch_timeout(), signatures)
    }
}
