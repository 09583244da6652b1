//! Container lifecycle management
//!
//! A [`Lifecycle`] drives one container through
//! `create -> start <-> pause -> stop -> remove`. Operations on one
//! lifecycle are expected to be serialized by the caller; many lifecycles
//! may run concurrently as long as they share a [`StartupGate`].

use super::config::ContainerSpec;
use super::detector::FastFailureDetector;
use super::gate::StartupGate;
use super::runtime::{cleanup_scope, ContainerRuntime, CreateRequest, RuntimeError};
use crate::config::BerthConfig;
use crate::error::{BerthError, Result};
use crate::port::{HostBinding, PortBindingSet, PortRequest, PortReservation};
use crate::storage::volume::remove_labeled_volumes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options for removing a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill the container first if it is running
    pub force: bool,
    /// Remove anonymous volumes; named volumes are never removed
    pub remove_volumes: bool,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            force: true,
            remove_volumes: true,
        }
    }
}

/// One container and the host ports reserved for it
pub struct Lifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    gate: StartupGate,
    detector: FastFailureDetector,
    config: BerthConfig,
    scope: String,
    name: String,
    image: String,
    network: Option<String>,
    id: Option<String>,
    bindings: PortBindingSet,
    reservation: Option<PortReservation>,
    started_at: Option<DateTime<Utc>>,
    removed: bool,
}

impl Lifecycle {
    /// Create a lifecycle bound to `runtime`
    ///
    /// The cleanup scope comes from the runtime client if it exposes one,
    /// otherwise `scope` is used.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        gate: StartupGate,
        config: BerthConfig,
        scope: &str,
    ) -> Result<Self> {
        config.validate()?;
        let detector = FastFailureDetector::from_config(&config)?;
        let scope = cleanup_scope(runtime.as_ref(), scope);

        Ok(Self {
            runtime,
            gate,
            detector,
            config,
            scope,
            name: String::new(),
            image: String::new(),
            network: None,
            id: None,
            bindings: PortBindingSet::new(),
            reservation: None,
            started_at: None,
            removed: false,
        })
    }

    /// Manage a container that already exists, e.g. from a previous process
    pub fn attach(mut self, id: &str, name: &str) -> Self {
        self.id = Some(id.to_string());
        self.name = name.to_string();
        self
    }

    /// Replace the crash detector
    pub fn with_detector(mut self, detector: FastFailureDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Runtime-assigned id, once created
    pub fn container_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    /// Cleanup scope attached to this container
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Host bindings declared at create time
    pub fn bindings(&self) -> &PortBindingSet {
        &self.bindings
    }

    /// Listeners still held for this container, if it has not started
    pub fn reservation(&self) -> Option<&PortReservation> {
        self.reservation.as_ref()
    }

    /// Reserve host ports for `spec.ports`, then create the container
    pub async fn create_container(&mut self, spec: ContainerSpec) -> Result<()> {
        let reservation = PortReservation::reserve(&self.config.host_ip, &spec.ports)?;
        self.create_container_with(spec, reservation).await
    }

    /// Create the container publishing the ports held by `reservation`
    ///
    /// Use this when other containers' configuration must reference these
    /// host ports before this container exists. The listeners stay open
    /// until [`start_container`](Self::start_container).
    pub async fn create_container_with(
        &mut self,
        spec: ContainerSpec,
        mut reservation: PortReservation,
    ) -> Result<()> {
        if let Some(id) = &self.id {
            return Err(BerthError::AlreadyCreated {
                name: self.name.clone(),
                id: id.clone(),
            });
        }

        if let Some(missing) = spec.ports.iter().find(|p| reservation.host_port(p).is_none()) {
            return Err(BerthError::InvalidPort(format!(
                "{} is not covered by the reservation for {}",
                missing, spec.name
            )));
        }

        let mut bindings = spec.fixed_ports.clone();
        bindings.extend(reservation.bindings());

        if self.config.pull_missing_images {
            if let Err(e) = self.runtime.ensure_image(&spec.image).await {
                reservation.release();
                return Err(BerthError::runtime(&spec.name, None, "pull image", e));
            }
        }

        let mut labels = spec.labels.clone();
        labels.insert(self.config.cleanup_label_key.clone(), self.scope.clone());

        let name = spec.name.clone();
        let image = spec.image.clone();
        let network = spec.network.clone();
        let request = CreateRequest {
            spec,
            bindings: bindings.clone(),
            labels,
        };

        let id = match self.runtime.create_container(&request).await {
            Ok(id) => id,
            Err(e) => {
                let released = reservation.release();
                warn!(container = %name, released, "Container create failed: {}", e);
                return Err(BerthError::runtime(&name, None, "create", e));
            }
        };

        info!(
            container = %name,
            id = %id,
            ports = bindings.len(),
            "Container created"
        );

        self.id = Some(id);
        self.name = name;
        self.image = image;
        self.network = network;
        self.bindings = bindings;
        self.reservation = Some(reservation);
        Ok(())
    }

    /// Start the container and make sure it survives the grace period
    ///
    /// Only releasing the reservation and the runtime start call run under
    /// the startup gate. A crash detected afterwards is returned even though
    /// the runtime accepted the start.
    pub async fn start_container(&mut self) -> Result<()> {
        let id = self.live_id()?.to_string();
        let reservation = self.reservation.take();

        let started = self
            .gate
            .hand_off(reservation, self.runtime.start_container(&id))
            .await;

        match started {
            Ok(()) => {}
            Err(RuntimeError::NotModified(_)) => {
                debug!(container = %self.name, id = %id, "Container already started");
            }
            Err(e) => {
                return Err(BerthError::runtime(&self.name, Some(id.as_str()), "start", e));
            }
        }

        self.started_at = Some(Utc::now());
        info!(container = %self.name, id = %id, "Container started");

        self.detector
            .check(self.runtime.as_ref(), &id, &self.name)
            .await
    }

    pub async fn pause_container(&self) -> Result<()> {
        let id = self.live_id()?;
        self.runtime
            .pause_container(id)
            .await
            .map_err(|e| BerthError::runtime(&self.name, Some(id), "pause", e))
    }

    pub async fn unpause_container(&self) -> Result<()> {
        let id = self.live_id()?;
        self.runtime
            .unpause_container(id)
            .await
            .map_err(|e| BerthError::runtime(&self.name, Some(id), "unpause", e))
    }

    /// Stop gracefully; stopping a container that is not running succeeds
    ///
    /// A stopped container is never started again, so listeners still held
    /// from create are closed here.
    pub async fn stop_container(&mut self) -> Result<()> {
        if let Some(mut reservation) = self.reservation.take() {
            let released = reservation.release();
            debug!(container = %self.name, released, "Released ports of unstarted container");
        }

        let id = self.live_id()?;

        match self
            .runtime
            .stop_container(id, self.config.stop_timeout())
            .await
        {
            Ok(()) => {
                info!(container = %self.name, id = %id, "Container stopped");
                Ok(())
            }
            Err(RuntimeError::NotModified(_)) | Err(RuntimeError::NotFound(_)) => {
                debug!(container = %self.name, id = %id, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(BerthError::runtime(&self.name, Some(id), "stop", e)),
        }
    }

    /// Remove the container; removing one that no longer exists succeeds
    pub async fn remove_container(&mut self, options: RemoveOptions) -> Result<()> {
        if let Some(mut reservation) = self.reservation.take() {
            reservation.release();
        }

        let id = match &self.id {
            Some(id) if !self.removed => id.clone(),
            _ => return Ok(()),
        };

        match self
            .runtime
            .remove_container(&id, options.force, options.remove_volumes)
            .await
        {
            Ok(()) => info!(container = %self.name, id = %id, "Container removed"),
            Err(RuntimeError::NotFound(_)) => {
                debug!(container = %self.name, id = %id, "Container already removed")
            }
            Err(e) => {
                return Err(BerthError::runtime(&self.name, Some(id.as_str()), "remove", e));
            }
        }

        self.removed = true;
        Ok(())
    }

    /// Remove every volume labelled with `scope`
    pub async fn remove_volumes(&self, scope: &str) -> Result<()> {
        remove_labeled_volumes(
            self.runtime.as_ref(),
            &self.config.cleanup_label_key,
            scope,
        )
        .await?;
        Ok(())
    }

    /// Host bindings the running container publishes for `ports`
    pub async fn host_bindings(&self, ports: &[PortRequest]) -> Result<Vec<HostBinding>> {
        let id = self.live_id()?;
        let inspection = self
            .runtime
            .inspect_container(id)
            .await
            .map_err(|e| BerthError::runtime(&self.name, Some(id), "inspect", e))?;

        ports
            .iter()
            .map(|port| {
                inspection
                    .ports
                    .get(port)
                    .and_then(|bindings| bindings.first())
                    .cloned()
                    .ok_or_else(|| BerthError::PortNotPublished {
                        container: self.name.clone(),
                        port: port.to_string(),
                    })
            })
            .collect()
    }

    /// Host addresses (`ip:port`) for container ports such as `"26657/tcp"`
    pub async fn get_host_ports(&self, ports: &[&str]) -> Result<Vec<String>> {
        let requests = ports
            .iter()
            .map(|p| p.parse::<PortRequest>())
            .collect::<Result<Vec<_>>>()?;

        Ok(self
            .host_bindings(&requests)
            .await?
            .iter()
            .map(HostBinding::to_string)
            .collect())
    }

    /// Ok if the runtime reports the container running
    pub async fn running(&self) -> Result<()> {
        let id = self.live_id()?;
        let inspection = self
            .runtime
            .inspect_container(id)
            .await
            .map_err(|e| BerthError::runtime(&self.name, Some(id), "inspect", e))?;

        if inspection.state.running {
            Ok(())
        } else {
            Err(BerthError::NotRunning {
                name: self.name.clone(),
                id: id.to_string(),
                status: inspection.state.status,
            })
        }
    }

    fn live_id(&self) -> Result<&str> {
        match &self.id {
            Some(id) if self.removed => Err(BerthError::Removed {
                name: self.name.clone(),
                id: id.clone(),
            }),
            Some(id) => Ok(id),
            None => Err(BerthError::NotCreated(self.name.clone())),
        }
    }
}
