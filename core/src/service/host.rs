//! Deployment service host
//!
//! Serializes all mutating operations per deployment id with a
//! load-mutate-store discipline: concurrent requests against the same
//! aggregate queue on its lock, while distinct deployments proceed in
//! parallel. Events are published after the aggregate is stored.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::deployment::StudyDeployment;
use crate::errors::CoordinatorError;
use crate::events::{DeploymentEvent, EventBus};
use crate::models::device_deployment::MasterDeviceDeployment;
use crate::models::registration::DeviceRegistration;
use crate::models::status::StudyDeploymentStatus;
use crate::protocol::ProtocolSnapshot;
use crate::service::DeploymentService;
use crate::store::DeploymentRepository;

pub struct DeploymentServiceHost {
    repository: Arc<dyn DeploymentRepository>,
    event_bus: Arc<dyn EventBus>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl DeploymentServiceHost {
    pub fn new(repository: Arc<dyn DeploymentRepository>, event_bus: Arc<dyn EventBus>) -> Self {
        Self { repository, event_bus, locks: Mutex::new(HashMap::new()) }
    }

    /// The serialization lock for one deployment id.
    async fn lock_for(&self, study_deployment_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(study_deployment_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn load(&self, study_deployment_id: Uuid) -> Result<StudyDeployment, CoordinatorError> {
        self.repository
            .get_study_deployment_by(study_deployment_id)
            .await?
            .ok_or_else(|| {
                CoordinatorError::NotFound(format!(
                    "Unknown study deployment: {}",
                    study_deployment_id
                ))
            })
    }
}

#[async_trait]
impl DeploymentService for DeploymentServiceHost {
    async fn create_study_deployment(
        &self,
        protocol: ProtocolSnapshot,
    ) -> Result<StudyDeploymentStatus, CoordinatorError> {
        let deployment = StudyDeployment::new(protocol)?;
        let id = deployment.id();
        let master_device_role_names = deployment
            .protocol()
            .master_devices()
            .iter()
            .map(|d| d.role_name.clone())
            .collect();

        // The deployment id is derivable from the protocol, so a register
        // call can race creation. Publishing under the per-id lock keeps the
        // Created event ordered before any registration event.
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let status = deployment.status();
        self.repository.add(deployment).await?;
        info!(deployment = %id, "Created study deployment");

        self.event_bus
            .publish(DeploymentEvent::StudyDeploymentCreated {
                study_deployment_id: id,
                master_device_role_names,
            })
            .await;

        Ok(status)
    }

    async fn register_device(
        &self,
        study_deployment_id: Uuid,
        device_role_name: &str,
        registration: DeviceRegistration,
    ) -> Result<StudyDeploymentStatus, CoordinatorError> {
        let lock = self.lock_for(study_deployment_id).await;
        let _guard = lock.lock().await;

        let mut deployment = self.load(study_deployment_id).await?;
        let changed = deployment.register_device(device_role_name, registration.clone())?;
        let status = deployment.status();
        if changed {
            self.repository.update(deployment).await?;
            debug!(deployment = %study_deployment_id, role = device_role_name, "Device registered");
            self.event_bus
                .publish(DeploymentEvent::DeviceRegistrationChanged {
                    study_deployment_id,
                    device_role_name: device_role_name.to_string(),
                    registration: Some(registration),
                })
                .await;
        }
        Ok(status)
    }

    async fn unregister_device(
        &self,
        study_deployment_id: Uuid,
        device_role_name: &str,
    ) -> Result<StudyDeploymentStatus, CoordinatorError> {
        let lock = self.lock_for(study_deployment_id).await;
        let _guard = lock.lock().await;

        let mut deployment = self.load(study_deployment_id).await?;
        let changed = deployment.unregister_device(device_role_name)?;
        let status = deployment.status();
        if changed {
            self.repository.update(deployment).await?;
            debug!(deployment = %study_deployment_id, role = device_role_name, "Device unregistered");
            self.event_bus
                .publish(DeploymentEvent::DeviceRegistrationChanged {
                    study_deployment_id,
                    device_role_name: device_role_name.to_string(),
                    registration: None,
                })
                .await;
        }
        Ok(status)
    }

    async fn get_study_deployment_status(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<StudyDeploymentStatus, CoordinatorError> {
        Ok(self.load(study_deployment_id).await?.status())
    }

    async fn get_device_deployment_for(
        &self,
        study_deployment_id: Uuid,
        master_role_name: &str,
    ) -> Result<MasterDeviceDeployment, CoordinatorError> {
        self.load(study_deployment_id).await?.device_deployment_for(master_role_name)
    }

    async fn deployment_successful(
        &self,
        study_deployment_id: Uuid,
        master_role_name: &str,
        device_deployment_last_update: DateTime<Utc>,
    ) -> Result<StudyDeploymentStatus, CoordinatorError> {
        let lock = self.lock_for(study_deployment_id).await;
        let _guard = lock.lock().await;

        let mut deployment = self.load(study_deployment_id).await?;
        deployment.confirm_deployed(master_role_name, device_deployment_last_update)?;
        let status = deployment.status();
        self.repository.update(deployment).await?;
        info!(deployment = %study_deployment_id, role = master_role_name, "Device deployed");
        Ok(status)
    }

    async fn stop(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<StudyDeploymentStatus, CoordinatorError> {
        let lock = self.lock_for(study_deployment_id).await;
        let _guard = lock.lock().await;

        let mut deployment = self.load(study_deployment_id).await?;
        let newly_stopped = deployment.stop();
        let status = deployment.status();
        if newly_stopped {
            self.repository.update(deployment).await?;
            info!(deployment = %study_deployment_id, "Study deployment stopped");
            self.event_bus
                .publish(DeploymentEvent::StudyDeploymentStopped { study_deployment_id })
                .await;
        }
        Ok(status)
    }
}
