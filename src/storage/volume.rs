//! Labelled volume cleanup

use crate::container::runtime::ContainerRuntime;
use crate::error::{BerthError, Result};
use tracing::{info, warn};

/// Outcome of a best-effort volume sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeCleanup {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

/// Force-remove every volume labelled `key=scope`
///
/// A volume that fails to remove is logged and skipped so one stuck volume
/// cannot block the rest. Only listing the volumes can fail the call.
pub async fn remove_labeled_volumes(
    runtime: &dyn ContainerRuntime,
    key: &str,
    scope: &str,
) -> Result<VolumeCleanup> {
    let volumes = runtime
        .list_volumes(key, scope)
        .await
        .map_err(|e| BerthError::scope(scope, "list volumes", e))?;

    let mut cleanup = VolumeCleanup::default();
    for volume in volumes {
        match runtime.remove_volume(&volume.name, true).await {
            Ok(()) => cleanup.removed.push(volume.name),
            Err(e) => {
                warn!(volume = %volume.name, scope = %scope, "Failed to remove volume: {}", e);
                cleanup.failed.push(volume.name);
            }
        }
    }

    info!(
        scope = %scope,
        removed = cleanup.removed.len(),
        failed = cleanup.failed.len(),
        "Removed labelled volumes"
    );
    Ok(cleanup)
}
