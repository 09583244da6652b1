//! In-memory container runtime for tests
//!
//! Starting a container really binds its declared host ports, so a
//! reservation listener that is still open makes the start fail the same
//! way the real engine does.

use super::runtime::{
    ContainerInspection, ContainerRuntime, ContainerState, ContainerSummary, CreateRequest,
    HasCleanupLabel, RuntimeError, RuntimeResult, VolumeSummary,
};
use crate::port::{Listener, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr, TcpListener, UdpSocket};
use std::sync::Mutex;
use std::time::Duration;

struct FakeContainer {
    request: CreateRequest,
    state: ContainerState,
    logs: String,
    published: Vec<Listener>,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    volumes: Vec<VolumeSummary>,
    failing_volumes: HashSet<String>,
    pulled: Vec<String>,
    stop_timeouts: Vec<Duration>,
    fail_pull: bool,
    fail_create: bool,
    fail_logs: bool,
    crash_on_start: Option<(i64, String)>,
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    scope: Option<String>,
    state: Mutex<FakeState>,
}

fn not_found(id: &str) -> RuntimeError {
    RuntimeError::NotFound(format!("No such container: {}", id))
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runtime client that exposes a cleanup label
    pub(crate) fn with_scope(scope: &str) -> Self {
        Self {
            scope: Some(scope.to_string()),
            ..Default::default()
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub(crate) fn set_logs(&self, id: &str, logs: &str) {
        self.with_state(|s| {
            if let Some(c) = s.containers.get_mut(id) {
                c.logs = logs.to_string();
            }
        })
    }

    /// Make a running container exit with `code`
    pub(crate) fn exit(&self, id: &str, code: i64) {
        self.with_state(|s| {
            if let Some(c) = s.containers.get_mut(id) {
                c.state.running = false;
                c.state.status = "exited".to_string();
                c.state.exit_code = Some(code);
                c.published.clear();
            }
        })
    }

    /// Every container started from now on exits with `code` after writing `logs`
    pub(crate) fn crash_on_start(&self, code: i64, logs: &str) {
        self.with_state(|s| s.crash_on_start = Some((code, logs.to_string())))
    }

    pub(crate) fn fail_pull(&self, fail: bool) {
        self.with_state(|s| s.fail_pull = fail)
    }

    pub(crate) fn fail_create(&self, fail: bool) {
        self.with_state(|s| s.fail_create = fail)
    }

    pub(crate) fn fail_logs(&self, fail: bool) {
        self.with_state(|s| s.fail_logs = fail)
    }

    pub(crate) fn add_volume(&self, name: &str, labels: &[(&str, &str)]) {
        self.with_state(|s| {
            s.volumes.push(VolumeSummary {
                name: name.to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
        })
    }

    /// Removing this volume will fail as if it were in use
    pub(crate) fn fail_volume(&self, name: &str) {
        self.with_state(|s| {
            s.failing_volumes.insert(name.to_string());
        })
    }

    pub(crate) fn volume_names(&self) -> Vec<String> {
        self.with_state(|s| s.volumes.iter().map(|v| v.name.clone()).collect())
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.with_state(|s| s.containers.contains_key(id))
    }

    pub(crate) fn container_count(&self) -> usize {
        self.with_state(|s| s.containers.len())
    }

    pub(crate) fn request(&self, id: &str) -> Option<CreateRequest> {
        self.with_state(|s| s.containers.get(id).map(|c| c.request.clone()))
    }

    pub(crate) fn pulled(&self) -> Vec<String> {
        self.with_state(|s| s.pulled.clone())
    }

    pub(crate) fn stop_timeouts(&self) -> Vec<Duration> {
        self.with_state(|s| s.stop_timeouts.clone())
    }
}

fn publish(host_ip: &str, port: u16, transport: Transport) -> RuntimeResult<Listener> {
    let ip: IpAddr = host_ip
        .parse()
        .map_err(|_| RuntimeError::Api {
            status: 400,
            message: format!("invalid host ip {}", host_ip),
        })?;
    let addr = SocketAddr::new(ip, port);
    let bound = match transport {
        Transport::Tcp => TcpListener::bind(addr).map(Listener::Tcp),
        Transport::Udp => UdpSocket::bind(addr).map(Listener::Udp),
    };
    bound.map_err(|e| RuntimeError::Api {
        status: 500,
        message: format!("Bind for {} failed: port is already allocated ({})", addr, e),
    })
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()> {
        self.with_state(|s| {
            if s.fail_pull {
                return Err(RuntimeError::Api {
                    status: 500,
                    message: format!("pull access denied for {}", image),
                });
            }
            s.pulled.push(image.to_string());
            Ok(())
        })
    }

    async fn create_container(&self, request: &CreateRequest) -> RuntimeResult<String> {
        self.with_state(|s| {
            if s.fail_create {
                return Err(RuntimeError::Api {
                    status: 409,
                    message: format!("Conflict. The container name \"/{}\" is already in use", request.spec.name),
                });
            }
            s.next_id += 1;
            let id = format!("{:012x}", s.next_id);
            s.containers.insert(
                id.clone(),
                FakeContainer {
                    request: request.clone(),
                    state: ContainerState {
                        status: "created".to_string(),
                        ..Default::default()
                    },
                    logs: String::new(),
                    published: Vec::new(),
                },
            );
            Ok(id)
        })
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.with_state(|s| -> RuntimeResult<()> {
            let crash = s.crash_on_start.clone();
            let c = s.containers.get_mut(id).ok_or_else(|| not_found(id))?;
            if c.state.running {
                return Err(RuntimeError::NotModified(id.to_string()));
            }

            let mut published = Vec::new();
            for (request, binding) in c.request.bindings.iter() {
                published.push(publish(&binding.host_ip, binding.host_port, request.transport)?);
            }

            c.published = published;
            c.state.running = true;
            c.state.status = "running".to_string();
            c.state.exit_code = None;

            if let Some((code, logs)) = crash {
                c.logs = logs;
                c.state.running = false;
                c.state.status = "exited".to_string();
                c.state.exit_code = Some(code);
                c.published.clear();
            }
            Ok(())
        })
    }

    async fn pause_container(&self, id: &str) -> RuntimeResult<()> {
        self.with_state(|s| -> RuntimeResult<()> {
            let c = s.containers.get_mut(id).ok_or_else(|| not_found(id))?;
            if !c.state.running {
                return Err(RuntimeError::Api {
                    status: 409,
                    message: format!("Container {} is not running", id),
                });
            }
            c.state.paused = true;
            c.state.status = "paused".to_string();
            Ok(())
        })
    }

    async fn unpause_container(&self, id: &str) -> RuntimeResult<()> {
        self.with_state(|s| -> RuntimeResult<()> {
            let c = s.containers.get_mut(id).ok_or_else(|| not_found(id))?;
            if !c.state.paused {
                return Err(RuntimeError::Api {
                    status: 409,
                    message: format!("Container {} is not paused", id),
                });
            }
            c.state.paused = false;
            c.state.status = "running".to_string();
            Ok(())
        })
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> RuntimeResult<()> {
        self.with_state(|s| -> RuntimeResult<()> {
            s.stop_timeouts.push(timeout);
            let c = s.containers.get_mut(id).ok_or_else(|| not_found(id))?;
            if !c.state.running {
                return Err(RuntimeError::NotModified(id.to_string()));
            }
            c.state.running = false;
            c.state.paused = false;
            c.state.status = "exited".to_string();
            c.state.exit_code = Some(0);
            c.published.clear();
            Ok(())
        })
    }

    async fn remove_container(&self, id: &str, force: bool, _remove_volumes: bool) -> RuntimeResult<()> {
        self.with_state(|s| -> RuntimeResult<()> {
            let c = s.containers.get(id).ok_or_else(|| not_found(id))?;
            if c.state.running && !force {
                return Err(RuntimeError::Api {
                    status: 409,
                    message: format!("You cannot remove a running container {}", id),
                });
            }
            s.containers.remove(id);
            Ok(())
        })
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInspection> {
        self.with_state(|s| -> RuntimeResult<ContainerInspection> {
            let c = s.containers.get(id).ok_or_else(|| not_found(id))?;
            let ports = if c.state.running {
                c.request
                    .bindings
                    .iter()
                    .map(|(req, binding)| (*req, vec![binding.clone()]))
                    .collect()
            } else {
                HashMap::new()
            };
            Ok(ContainerInspection {
                id: id.to_string(),
                name: c.request.spec.name.clone(),
                state: c.state.clone(),
                ports,
            })
        })
    }

    async fn container_logs(&self, id: &str) -> RuntimeResult<String> {
        self.with_state(|s| -> RuntimeResult<String> {
            if s.fail_logs {
                return Err(RuntimeError::Transport("log stream reset".to_string()));
            }
            let c = s.containers.get(id).ok_or_else(|| not_found(id))?;
            Ok(c.logs.clone())
        })
    }

    async fn list_containers(&self, key: &str, value: &str) -> RuntimeResult<Vec<ContainerSummary>> {
        self.with_state(|s| {
            Ok(s.containers
                .iter()
                .filter(|(_, c)| c.request.labels.get(key).map(String::as_str) == Some(value))
                .map(|(id, c)| ContainerSummary {
                    id: id.clone(),
                    names: vec![format!("/{}", c.request.spec.name)],
                    state: c.state.status.clone(),
                })
                .collect())
        })
    }

    async fn list_volumes(&self, key: &str, value: &str) -> RuntimeResult<Vec<VolumeSummary>> {
        self.with_state(|s| {
            Ok(s.volumes
                .iter()
                .filter(|v| v.labels.get(key).map(String::as_str) == Some(value))
                .cloned()
                .collect())
        })
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> RuntimeResult<()> {
        self.with_state(|s| {
            if s.failing_volumes.contains(name) {
                return Err(RuntimeError::Api {
                    status: 409,
                    message: format!("remove {}: volume is in use", name),
                });
            }
            let before = s.volumes.len();
            s.volumes.retain(|v| v.name != name);
            if s.volumes.len() == before {
                return Err(RuntimeError::NotFound(format!("no such volume: {}", name)));
            }
            Ok(())
        })
    }

    fn as_cleanup_labeled(&self) -> Option<&dyn HasCleanupLabel> {
        self.scope.as_ref().map(|_| self as &dyn HasCleanupLabel)
    }
}

impl HasCleanupLabel for FakeRuntime {
    fn cleanup_label(&self) -> &str {
        self.scope.as_deref().unwrap_or_default()
    }
}
