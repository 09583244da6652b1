//! Error types for Berth

use crate::container::runtime::RuntimeError;
use thiserror::Error;

/// Result type for Berth operations
pub type Result<T> = std::result::Result<T, BerthError>;

fn with_id(id: &Option<String>) -> String {
    id.as_deref().map(|id| format!(" ({})", id)).unwrap_or_default()
}

/// Berth error types
#[derive(Error, Debug)]
pub enum BerthError {
    #[error("Port reservation failed for {port}: {source}")]
    Reservation {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Container {container}{}: {operation} failed: {source}", with_id(.id))]
    Runtime {
        container: String,
        id: Option<String>,
        operation: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("Scope {scope}: {operation} failed: {source}")]
    Scope {
        scope: String,
        operation: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("Container {name} ({id}) crashed after start: {message}")]
    FastCrash {
        name: String,
        id: String,
        message: String,
        exit_code: Option<i64>,
    },

    #[error("Container {name} ({id}) exited after start with code {exit_code}: {status}")]
    ExitedEarly {
        name: String,
        id: String,
        exit_code: i64,
        status: String,
    },

    #[error("Container {name} ({id}) is not running: {status}")]
    NotRunning {
        name: String,
        id: String,
        status: String,
    },

    #[error("Container not created: {0}")]
    NotCreated(String),

    #[error("Container already created: {name} ({id})")]
    AlreadyCreated { name: String, id: String },

    #[error("Container removed: {name} ({id})")]
    Removed { name: String, id: String },

    #[error("Container {container} does not publish port {port}")]
    PortNotPublished { container: String, port: String },

    #[error("Invalid crash signature {pattern:?}: {message}")]
    InvalidSignature { pattern: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BerthError {
    /// Wrap a runtime failure with the container it happened to
    ///
    /// `id` is `None` only before the runtime has assigned one.
    pub fn runtime(
        container: &str,
        id: Option<&str>,
        operation: &'static str,
        source: RuntimeError,
    ) -> Self {
        BerthError::Runtime {
            container: container.to_string(),
            id: id.map(str::to_string),
            operation,
            source,
        }
    }

    /// Wrap a runtime failure in a scope-wide operation
    pub fn scope(scope: &str, operation: &'static str, source: RuntimeError) -> Self {
        BerthError::Scope {
            scope: scope.to_string(),
            operation,
            source,
        }
    }

    /// Whether this error reports a container that died right after start
    pub fn is_fast_failure(&self) -> bool {
        matches!(
            self,
            BerthError::FastCrash { .. } | BerthError::ExitedEarly { .. }
        )
    }
}
