//! Berth - host port reservation and container lifecycle for test topologies
//!
//! Test networks need each container's host-mapped ports before any of
//! them run, so one node's config can point at another. Berth provides:
//!
//! - Ephemeral host port reservation held open until container start
//! - A startup gate handing reserved ports to the runtime one container at a time
//! - Container create/start/pause/stop/remove with idempotent teardown
//! - Fast-failure detection from logs and runtime state right after start
//! - Label-scoped bulk cleanup of containers and volumes

pub mod cleanup;
pub mod config;
pub mod container;
pub mod error;
pub mod port;
pub mod storage;

pub use config::BerthConfig;
pub use container::{ContainerSpec, DockerRuntime, Lifecycle, RemoveOptions, StartupGate};
pub use error::{BerthError, Result};
pub use port::{PortRequest, PortReservation};
