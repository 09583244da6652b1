//! Container configuration

use crate::port::{HostBinding, PortBindingSet, PortRequest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Longest hostname the runtime accepts
pub const MAX_HOSTNAME_LEN: usize = 63;

/// Mount type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Named runtime volume
    #[default]
    Volume,
    /// Host directory
    Bind,
}

/// Volume mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub kind: MountKind,
    /// Volume name or host path
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to create one container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image name/tag
    pub image: String,
    /// Command to run
    pub cmd: Vec<String>,
    /// Entry point
    pub entrypoint: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Hostname
    pub hostname: String,
    /// User to run as
    pub user: String,
    /// Network to attach to
    pub network: Option<String>,
    /// Ports to reserve a free host port for
    pub ports: Vec<PortRequest>,
    /// Ports published on a caller-chosen host port
    pub fixed_ports: PortBindingSet,
    /// Bind strings in `source:target[:mode]` form
    pub binds: Vec<String>,
    /// Structured mounts
    pub mounts: Vec<VolumeMount>,
    /// Extra labels
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    /// Create a new container spec
    pub fn new(name: &str, image: &str) -> Self {
        let name = sanitize_container_name(name);
        Self {
            hostname: condense_hostname(&name),
            name,
            image: image.to_string(),
            ..Default::default()
        }
    }

    /// Set command to run
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Set entry point
    pub fn entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = entrypoint.into_iter().map(Into::into).collect();
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Set hostname
    pub fn hostname(mut self, hostname: &str) -> Self {
        self.hostname = condense_hostname(hostname);
        self
    }

    /// Set user
    pub fn user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    /// Attach to a network
    pub fn network(mut self, network: &str) -> Self {
        self.network = Some(network.to_string());
        self
    }

    /// Reserve a free host port for a container port
    pub fn port(mut self, request: PortRequest) -> Self {
        if !self.ports.contains(&request) {
            self.ports.push(request);
        }
        self
    }

    /// Publish a container port on a fixed host port
    pub fn fixed_port(mut self, request: PortRequest, host_ip: &str, host_port: u16) -> Self {
        self.fixed_ports
            .insert(request, HostBinding::new(host_ip, host_port));
        self
    }

    /// Add a bind in `source:target[:mode]` form
    pub fn bind(mut self, bind: &str) -> Self {
        self.binds.push(bind.to_string());
        self
    }

    /// Mount a named volume
    pub fn volume(mut self, volume: &str, target: &str) -> Self {
        self.mounts.push(VolumeMount {
            kind: MountKind::Volume,
            source: volume.to_string(),
            target: target.to_string(),
            read_only: false,
        });
        self
    }

    /// Add a label
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Environment in `KEY=value` form
    pub fn env_list(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Replace characters the runtime rejects in container names with `_`
pub fn sanitize_container_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Shorten a hostname to fit the runtime limit, keeping both ends
///
/// The limit is in bytes; each kept end is cut on a char boundary.
pub fn condense_hostname(name: &str) -> String {
    if name.len() <= MAX_HOSTNAME_LEN {
        return name.to_string();
    }

    let mut head = 30;
    while !name.is_char_boundary(head) {
        head -= 1;
    }
    let mut tail = name.len() - 30;
    while !name.is_char_boundary(tail) {
        tail += 1;
    }
    format!("{}_._{}", &name[..head], &name[tail..])
}

/// Unique container name for a node within a cleanup scope
pub fn scoped_container_name(scope: &str, node: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    sanitize_container_name(&format!("{}-{}-{}", scope, node, &suffix[..6]))
}
