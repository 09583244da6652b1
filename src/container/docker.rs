//! Docker engine backend
//!
//! Implements [`ContainerRuntime`] on top of the bollard client. This is
//! the only module that knows the engine's wire types.

use super::config::MountKind;
use super::runtime::{
    ContainerInspection, ContainerRuntime, ContainerState, ContainerSummary, CreateRequest,
    HasCleanupLabel, RuntimeError, RuntimeResult, VolumeSummary,
};
use crate::port::{HostBinding, PortBindingSet, PortRequest};
use async_trait::async_trait;
use bollard::errors::Error as DockerError;
use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, HostConfig, Mount, MountTypeEnum, PortBinding,
    PortMap,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, ListVolumesOptionsBuilder, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, RemoveVolumeOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use bollard::Docker;
use futures_util::TryStreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Map an engine error onto the runtime error categories
fn classify(err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 304,
            message,
        } => RuntimeError::NotModified(message),
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api {
            status: status_code,
            message,
        },
        other => RuntimeError::Transport(other.to_string()),
    }
}

/// Split `repo[:tag]` into repository and tag, defaulting to `latest`
///
/// Digest references are passed through whole with an empty tag.
fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn label_filter(key: &str, value: &str) -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), vec![format!("{}={}", key, value)])])
}

fn port_bindings(bindings: &PortBindingSet) -> PortMap {
    bindings
        .iter()
        .map(|(request, binding)| {
            (
                request.to_string(),
                Some(vec![PortBinding {
                    host_ip: Some(binding.host_ip.clone()),
                    host_port: Some(binding.host_port.to_string()),
                }]),
            )
        })
        .collect()
}

fn published_ports(ports: Option<PortMap>) -> HashMap<PortRequest, Vec<HostBinding>> {
    ports
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(port, bindings)| {
            let request = port.parse::<PortRequest>().ok()?;
            let bindings: Vec<HostBinding> = bindings
                .unwrap_or_default()
                .into_iter()
                .filter_map(|b| {
                    let host_port = b.host_port?.parse().ok()?;
                    Some(HostBinding::new(b.host_ip.as_deref().unwrap_or_default(), host_port))
                })
                .collect();
            Some((request, bindings))
        })
        .collect()
}

fn create_body(request: &CreateRequest) -> ContainerCreateBody {
    let spec = &request.spec;

    let mounts: Vec<Mount> = spec
        .mounts
        .iter()
        .map(|m| Mount {
            target: Some(m.target.clone()),
            source: Some(m.source.clone()),
            typ: Some(match m.kind {
                MountKind::Volume => MountTypeEnum::VOLUME,
                MountKind::Bind => MountTypeEnum::BIND,
            }),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    let host_config = HostConfig {
        port_bindings: Some(port_bindings(&request.bindings)),
        publish_all_ports: Some(true),
        binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
        mounts: (!mounts.is_empty()).then_some(mounts),
        network_mode: spec.network.clone(),
        ..Default::default()
    };

    let exposed_ports: HashMap<String, HashMap<(), ()>> = request
        .bindings
        .iter()
        .map(|(port, _)| (port.to_string(), HashMap::new()))
        .collect();

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
        entrypoint: (!spec.entrypoint.is_empty()).then(|| spec.entrypoint.clone()),
        env: Some(spec.env_list()),
        hostname: (!spec.hostname.is_empty()).then(|| spec.hostname.clone()),
        user: (!spec.user.is_empty()).then(|| spec.user.clone()),
        labels: Some(request.labels.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn inspection(id: &str, response: ContainerInspectResponse) -> ContainerInspection {
    let state = response.state.unwrap_or_default();

    ContainerInspection {
        id: response.id.unwrap_or_else(|| id.to_string()),
        name: response
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        state: ContainerState {
            running: state.running.unwrap_or(false),
            paused: state.paused.unwrap_or(false),
            status: state.status.map(|s| s.to_string()).unwrap_or_default(),
            exit_code: state.exit_code,
            error: state.error.filter(|e| !e.is_empty()),
        },
        ports: published_ports(response.network_settings.and_then(|n| n.ports)),
    }
}

/// Docker engine client
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    cleanup_label: Option<String>,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform default socket
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(classify)?;
        Ok(Self::from_client(docker))
    }

    pub fn from_client(docker: Docker) -> Self {
        Self {
            docker,
            cleanup_label: None,
        }
    }

    /// Tag everything created through this client with `scope`
    pub fn with_cleanup_label(mut self, scope: &str) -> Self {
        self.cleanup_label = Some(scope.to_string());
        self
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) => match classify(e) {
                RuntimeError::NotFound(_) => {}
                other => return Err(other),
            },
        }

        info!(image = %image, "Pulling image");
        let (repository, tag) = split_image_reference(image);
        let options = CreateImageOptionsBuilder::default()
            .from_image(repository)
            .tag(tag)
            .build();

        self.docker
            .create_image(Some(options), None, None)
            .try_for_each(|progress| async move {
                if let Some(status) = progress.status {
                    debug!(status = %status, "Pull progress");
                }
                Ok(())
            })
            .await
            .map_err(classify)
    }

    async fn create_container(&self, request: &CreateRequest) -> RuntimeResult<String> {
        let options = CreateContainerOptionsBuilder::default()
            .name(&request.spec.name)
            .build();

        let response = self
            .docker
            .create_container(Some(options), create_body(request))
            .await
            .map_err(classify)?;

        for warning in &response.warnings {
            debug!(container = %request.spec.name, "Create warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(classify)
    }

    async fn pause_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker.pause_container(id).await.map_err(classify)
    }

    async fn unpause_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker.unpause_container(id).await.map_err(classify)
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> RuntimeResult<()> {
        let secs = timeout.as_secs().min(i32::MAX as u64) as i32;
        let options = StopContainerOptionsBuilder::default().t(secs).build();

        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(classify)
    }

    async fn remove_container(&self, id: &str, force: bool, remove_volumes: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptionsBuilder::default()
            .force(force)
            .v(remove_volumes)
            .build();

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(classify)
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInspection> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(classify)?;
        Ok(inspection(id, response))
    }

    async fn container_logs(&self, id: &str) -> RuntimeResult<String> {
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .build();

        self.docker
            .logs(id, Some(options))
            .map_err(classify)
            .try_fold(String::new(), |mut logs, output| async move {
                logs.push_str(&output.to_string());
                Ok(logs)
            })
            .await
    }

    async fn list_containers(&self, key: &str, value: &str) -> RuntimeResult<Vec<ContainerSummary>> {
        let filters = label_filter(key, value);
        let options = ListContainersOptionsBuilder::default()
            .all(true)
            .filters(&filters)
            .build();

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(classify)?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerSummary {
                    id: c.id?,
                    names: c.names.unwrap_or_default(),
                    state: c.state.map(|s| s.to_string()).unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn list_volumes(&self, key: &str, value: &str) -> RuntimeResult<Vec<VolumeSummary>> {
        let filters = label_filter(key, value);
        let options = ListVolumesOptionsBuilder::default().filters(&filters).build();

        let response = self
            .docker
            .list_volumes(Some(options))
            .await
            .map_err(classify)?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| VolumeSummary {
                name: v.name,
                labels: v.labels,
            })
            .collect())
    }

    async fn remove_volume(&self, name: &str, force: bool) -> RuntimeResult<()> {
        let options = RemoveVolumeOptionsBuilder::default().force(force).build();

        self.docker
            .remove_volume(name, Some(options))
            .await
            .map_err(classify)
    }

    fn as_cleanup_labeled(&self) -> Option<&dyn HasCleanupLabel> {
        self.cleanup_label
            .as_ref()
            .map(|_| self as &dyn HasCleanupLabel)
    }
}

impl HasCleanupLabel for DockerRuntime {
    fn cleanup_label(&self) -> &str {
        self.cleanup_label.as_deref().unwrap_or_default()
    }
}
