//! Bulk teardown of a cleanup scope
//!
//! Every container and volume created for a test run carries the cleanup
//! label. Tearing the scope down removes the containers first, so their
//! volumes are no longer in use, then the volumes.

use crate::container::runtime::{ContainerRuntime, RuntimeError};
use crate::error::{BerthError, Result};
use crate::storage::volume::{remove_labeled_volumes, VolumeCleanup};
use tracing::{debug, info, warn};

/// Outcome of tearing down a scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeCleanup {
    pub containers_removed: Vec<String>,
    pub containers_failed: Vec<String>,
    pub volumes: VolumeCleanup,
}

/// Force-remove all containers and volumes labelled `key=scope`
pub async fn remove_scope(runtime: &dyn ContainerRuntime, key: &str, scope: &str) -> Result<ScopeCleanup> {
    let containers = runtime
        .list_containers(key, scope)
        .await
        .map_err(|e| BerthError::scope(scope, "list containers", e))?;

    let mut cleanup = ScopeCleanup::default();
    for container in containers {
        match runtime.remove_container(&container.id, true, true).await {
            Ok(()) => cleanup.containers_removed.push(container.id),
            Err(RuntimeError::NotFound(_)) => {
                debug!(id = %container.id, "Container vanished before cleanup");
            }
            Err(e) => {
                warn!(id = %container.id, names = ?container.names, "Failed to remove container: {}", e);
                cleanup.containers_failed.push(container.id);
            }
        }
    }

    cleanup.volumes = remove_labeled_volumes(runtime, key, scope).await?;

    info!(
        scope = %scope,
        containers = cleanup.containers_removed.len(),
        volumes = cleanup.volumes.removed.len(),
        "Cleaned up scope"
    );
    Ok(cleanup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BerthConfig;
    use crate::container::fake::FakeRuntime;
    use crate::container::{ContainerSpec, Lifecycle, StartupGate};
    use crate::port::PortRequest;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_remove_scope() {
        let runtime = Arc::new(FakeRuntime::new());
        let gate = StartupGate::new();
        let config = BerthConfig {
            grace_period_ms: 1,
            ..Default::default()
        };

        let mut ours = Lifecycle::new(runtime.clone(), gate.clone(), config.clone(), "TestScope").unwrap();
        ours.create_container(ContainerSpec::new("da-bridge-0", "celestia-node").port(PortRequest::tcp(26658)))
            .await
            .unwrap();
        ours.start_container().await.unwrap();

        let mut theirs = Lifecycle::new(runtime.clone(), gate, config, "TestOther").unwrap();
        theirs
            .create_container(ContainerSpec::new("da-bridge-0", "celestia-node"))
            .await
            .unwrap();

        runtime.add_volume("bridge-home", &[("berth.cleanup", "TestScope")]);
        runtime.add_volume("other-home", &[("berth.cleanup", "TestOther")]);

        let cleanup = remove_scope(runtime.as_ref(), "berth.cleanup", "TestScope")
            .await
            .unwrap();

        assert_eq!(cleanup.containers_removed, vec![ours.container_id().unwrap().to_string()]);
        assert!(cleanup.containers_failed.is_empty());
        assert_eq!(cleanup.volumes.removed, vec!["bridge-home"]);
        assert!(runtime.contains(theirs.container_id().unwrap()));
        assert_eq!(runtime.volume_names(), vec!["other-home"]);

        // the lifecycle still treats its container as removable
        ours.remove_container(Default::default()).await.unwrap();
    }
}
