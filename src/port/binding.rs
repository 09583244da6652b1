//! Port requests and host bindings

use crate::error::{BerthError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Host address used when the runtime reports an empty host IP
pub const DEFAULT_HOST_IP: &str = "0.0.0.0";

/// Network transport of a container port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Transport {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(BerthError::InvalidPort(format!(
                "unsupported transport {:?}",
                other
            ))),
        }
    }
}

/// A container-internal port, e.g. `26657/tcp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRequest {
    pub port: u16,
    pub transport: Transport,
}

impl PortRequest {
    /// TCP port request
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            transport: Transport::Tcp,
        }
    }

    /// UDP port request
    pub fn udp(port: u16) -> Self {
        Self {
            port,
            transport: Transport::Udp,
        }
    }
}

impl fmt::Display for PortRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.transport)
    }
}

/// Parses `7331/tcp`, `7331/udp` or a bare `7331` (tcp)
impl FromStr for PortRequest {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (port, transport) = match s.split_once('/') {
            Some((port, transport)) => (port, transport.parse()?),
            None => (s, Transport::Tcp),
        };

        let port: u16 = port
            .parse()
            .map_err(|_| BerthError::InvalidPort(format!("{:?} is not a port number", s)))?;
        if port == 0 {
            return Err(BerthError::InvalidPort(format!(
                "{:?}: container port must be non-zero",
                s
            )));
        }

        Ok(Self { port, transport })
    }
}

/// A host address a container port is published on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostBinding {
    pub host_ip: String,
    pub host_port: u16,
}

impl HostBinding {
    pub fn new(host_ip: &str, host_port: u16) -> Self {
        let host_ip = if host_ip.is_empty() {
            DEFAULT_HOST_IP
        } else {
            host_ip
        };

        Self {
            host_ip: host_ip.to_string(),
            host_port,
        }
    }
}

impl fmt::Display for HostBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host_ip.contains(':') {
            write!(f, "[{}]:{}", self.host_ip, self.host_port)
        } else {
            write!(f, "{}:{}", self.host_ip, self.host_port)
        }
    }
}

/// Mapping of container-internal ports to host bindings
///
/// The same set is declared to the runtime at create time and compared
/// against what the running container reports, so the host side is always
/// chosen before the container exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBindingSet {
    bindings: BTreeMap<PortRequest, HostBinding>,
}

impl PortBindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a binding, replacing any earlier one for the same port
    pub fn insert(&mut self, request: PortRequest, binding: HostBinding) -> Option<HostBinding> {
        self.bindings.insert(request, binding)
    }

    pub fn get(&self, request: &PortRequest) -> Option<&HostBinding> {
        self.bindings.get(request)
    }

    pub fn contains(&self, request: &PortRequest) -> bool {
        self.bindings.contains_key(request)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PortRequest, &HostBinding)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Merge another set in; entries from `other` win
    pub fn extend(&mut self, other: PortBindingSet) {
        self.bindings.extend(other.bindings);
    }
}

impl FromIterator<(PortRequest, HostBinding)> for PortBindingSet {
    fn from_iter<I: IntoIterator<Item = (PortRequest, HostBinding)>>(iter: I) -> Self {
        Self {
            bindings: iter.into_iter().collect(),
        }
    }
}
