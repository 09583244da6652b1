//! Container runtime boundary
//!
//! The lifecycle talks to the container engine only through
//! [`ContainerRuntime`]. Errors are classified at this boundary so that
//! idempotent stop/remove never depend on message text.

use super::config::ContainerSpec;
use crate::port::{HostBinding, PortBindingSet, PortRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a container runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The request had no effect (e.g. stopping a stopped container)
    #[error("not modified: {0}")]
    NotModified(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("runtime API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("runtime transport error: {0}")]
    Transport(String),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Everything the runtime needs to create a container
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub spec: ContainerSpec,
    /// Exact host bindings to publish
    pub bindings: PortBindingSet,
    pub labels: HashMap<String, String>,
}

/// Runtime-reported process state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub paused: bool,
    pub status: String,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
}

/// Result of inspecting a container
#[derive(Debug, Clone, Default)]
pub struct ContainerInspection {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    /// Published ports as reported by the runtime
    pub ports: HashMap<PortRequest, Vec<HostBinding>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSummary {
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Optional capability: a runtime client that knows its own cleanup scope
pub trait HasCleanupLabel {
    /// Value of the cleanup label for resources created through this client
    fn cleanup_label(&self) -> &str;
}

/// Container engine operations used by the lifecycle
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull `image` unless it is already present
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()>;

    /// Create (but do not start) a container. Returns its id.
    async fn create_container(&self, request: &CreateRequest) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    async fn pause_container(&self, id: &str) -> RuntimeResult<()>;

    async fn unpause_container(&self, id: &str) -> RuntimeResult<()>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> RuntimeResult<()>;

    async fn remove_container(&self, id: &str, force: bool, remove_volumes: bool)
        -> RuntimeResult<()>;

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInspection>;

    /// Combined stdout and stderr collected so far
    async fn container_logs(&self, id: &str) -> RuntimeResult<String>;

    /// Containers, running or not, carrying `key=value`
    async fn list_containers(&self, key: &str, value: &str) -> RuntimeResult<Vec<ContainerSummary>>;

    /// Volumes carrying `key=value`
    async fn list_volumes(&self, key: &str, value: &str) -> RuntimeResult<Vec<VolumeSummary>>;

    async fn remove_volume(&self, name: &str, force: bool) -> RuntimeResult<()>;

    /// Capability query for [`HasCleanupLabel`]
    fn as_cleanup_labeled(&self) -> Option<&dyn HasCleanupLabel> {
        None
    }
}

/// Cleanup scope of a runtime client, or `fallback` if it has none
pub fn cleanup_scope(runtime: &dyn ContainerRuntime, fallback: &str) -> String {
    runtime
        .as_cleanup_labeled()
        .map(|labeled| labeled.cleanup_label().to_string())
        .unwrap_or_else(|| fallback.to_string())
}
