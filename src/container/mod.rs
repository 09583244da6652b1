//! Container management module
//!
//! This module drives containers through the runtime: creation with
//! pre-reserved host ports, gated startup, crash detection, and
//! idempotent stop/remove.

pub mod config;
pub mod detector;
pub mod docker;
pub mod gate;
pub mod lifecycle;
pub mod runtime;

#[cfg(test)]
pub(crate) mod fake;

pub use config::{
    condense_hostname, sanitize_container_name, scoped_container_name, ContainerSpec, MountKind,
    VolumeMount,
};
pub use detector::{CrashSignature, FastFailureDetector};
pub use docker::DockerRuntime;
pub use gate::StartupGate;
pub use lifecycle::{Lifecycle, RemoveOptions};
pub use runtime::{ContainerRuntime, HasCleanupLabel, RuntimeError};
