//! Client manager
//!
//! Owns the study runtimes of one client device and the cache of snapshots
//! they accepted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::client::cache::{SnapshotCache, SnapshotCacheEntry};
use crate::client::probe::CapabilityProbe;
use crate::client::runtime::{StudyRuntime, StudyRuntimeId, StudyRuntimeStatus};
use crate::errors::CoordinatorError;
use crate::models::registration::DeviceRegistration;
use crate::service::DeploymentService;

/// Manager options
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum cached snapshots
    pub snapshot_cache_capacity: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self { snapshot_cache_capacity: 100 }
    }
}

/// Manages [`StudyRuntime`]s on a client device.
pub struct ClientManager {
    deployment_service: Arc<dyn DeploymentService>,
    probe: Arc<dyn CapabilityProbe>,
    runtimes: RwLock<HashMap<String, StudyRuntime>>,
    snapshots: SnapshotCache,
}

impl ClientManager {
    pub fn new(
        deployment_service: Arc<dyn DeploymentService>,
        probe: Arc<dyn CapabilityProbe>,
        options: Options,
    ) -> Self {
        Self {
            deployment_service,
            probe,
            runtimes: RwLock::new(HashMap::new()),
            snapshots: SnapshotCache::new(options.snapshot_cache_capacity),
        }
    }

    /// Start running a study on this client by registering the device for
    /// the given role.
    ///
    /// Fails with a conflict when a runtime for the same (deployment, role)
    /// already exists.
    pub async fn add_study(
        &self,
        study_deployment_id: Uuid,
        device_role_name: &str,
        registration: DeviceRegistration,
    ) -> Result<StudyRuntimeStatus, CoordinatorError> {
        let id = StudyRuntimeId {
            study_deployment_id,
            device_role_name: device_role_name.to_string(),
        };
        let key = id.to_string();

        let mut runtimes = self.runtimes.write().await;
        if runtimes.contains_key(&key) {
            return Err(CoordinatorError::Conflict(format!(
                "A study runtime for '{}' already exists on this client",
                id
            )));
        }

        let runtime = StudyRuntime::initialize(
            self.deployment_service.as_ref(),
            self.probe.as_ref(),
            study_deployment_id,
            device_role_name,
            registration,
        )
        .await?;

        if let Some(deployment) = runtime.deployment_information() {
            self.snapshots.insert(key.clone(), deployment.clone());
        }
        let status = runtime.status();
        runtimes.insert(key, runtime);
        info!(runtime = %id, "Study added to client");
        Ok(status)
    }

    /// Retry deploying a study which is not yet deployed.
    pub async fn try_advance(
        &self,
        id: &StudyRuntimeId,
    ) -> Result<StudyRuntimeStatus, CoordinatorError> {
        let mut runtimes = self.runtimes.write().await;
        let runtime = runtimes.get_mut(&id.to_string()).ok_or_else(|| {
            CoordinatorError::NotFound(format!("No study runtime for '{}' on this client", id))
        })?;

        let status =
            runtime.try_advance(self.deployment_service.as_ref(), self.probe.as_ref()).await?;
        if let Some(deployment) = runtime.deployment_information() {
            self.snapshots.insert(id.to_string(), deployment.clone());
        }
        Ok(status)
    }

    /// Permanently stop a study on this client.
    pub async fn stop_study(
        &self,
        id: &StudyRuntimeId,
    ) -> Result<StudyRuntimeStatus, CoordinatorError> {
        let mut runtimes = self.runtimes.write().await;
        let runtime = runtimes.get_mut(&id.to_string()).ok_or_else(|| {
            CoordinatorError::NotFound(format!("No study runtime for '{}' on this client", id))
        })?;
        let status = runtime.stop(self.deployment_service.as_ref()).await?;
        self.snapshots.remove(&id.to_string());
        Ok(status)
    }

    /// The current status of one study runtime.
    pub async fn get_study_status(
        &self,
        id: &StudyRuntimeId,
    ) -> Result<StudyRuntimeStatus, CoordinatorError> {
        let runtimes = self.runtimes.read().await;
        let runtime = runtimes.get(&id.to_string()).ok_or_else(|| {
            CoordinatorError::NotFound(format!("No study runtime for '{}' on this client", id))
        })?;
        Ok(runtime.status())
    }

    /// The ids of all studies running on this client.
    pub async fn study_ids(&self) -> Vec<StudyRuntimeId> {
        let runtimes = self.runtimes.read().await;
        runtimes.values().map(|r| r.id().clone()).collect()
    }

    /// The cached snapshot accepted by a runtime, if any.
    pub fn cached_snapshot(&self, id: &StudyRuntimeId) -> Option<SnapshotCacheEntry> {
        self.snapshots.get(&id.to_string())
    }
}
