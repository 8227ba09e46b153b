//! Deployment service contract and host implementation

pub mod host;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::CoordinatorError;
use crate::models::device_deployment::MasterDeviceDeployment;
use crate::models::registration::DeviceRegistration;
use crate::models::status::StudyDeploymentStatus;
use crate::protocol::ProtocolSnapshot;

pub use host::DeploymentServiceHost;

/// Application service coordinating the deployment of a study protocol onto
/// its devices. Every operation is modeled as a possibly-remote call and is
/// atomic from the aggregate's perspective.
#[async_trait]
pub trait DeploymentService: Send + Sync {
    /// Instantiate a deployment for the given protocol snapshot.
    ///
    /// Fails with a conflict when a deployment for the derived id exists.
    async fn create_study_deployment(
        &self,
        protocol: ProtocolSnapshot,
    ) -> Result<StudyDeploymentStatus, CoordinatorError>;

    /// Register the device with the given role.
    ///
    /// Idempotent for an identical resent registration. Errors: unknown
    /// deployment or role, conflicting registration, duplicate device
    /// identity, stopped deployment.
    async fn register_device(
        &self,
        study_deployment_id: Uuid,
        device_role_name: &str,
        registration: DeviceRegistration,
    ) -> Result<StudyDeploymentStatus, CoordinatorError>;

    /// Clear the registration of the given role.
    async fn unregister_device(
        &self,
        study_deployment_id: Uuid,
        device_role_name: &str,
    ) -> Result<StudyDeploymentStatus, CoordinatorError>;

    /// The current status of a deployment.
    async fn get_study_deployment_status(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<StudyDeploymentStatus, CoordinatorError>;

    /// The deployment snapshot for a ready master device role.
    async fn get_device_deployment_for(
        &self,
        study_deployment_id: Uuid,
        master_role_name: &str,
    ) -> Result<MasterDeviceDeployment, CoordinatorError>;

    /// Confirm that a master device successfully deployed the snapshot
    /// stamped `device_deployment_last_update`.
    ///
    /// A stale timestamp is reported as a transient error; callers retry with
    /// a fresh snapshot.
    async fn deployment_successful(
        &self,
        study_deployment_id: Uuid,
        master_role_name: &str,
        device_deployment_last_update: DateTime<Utc>,
    ) -> Result<StudyDeploymentStatus, CoordinatorError>;

    /// Stop the deployment. Idempotent.
    async fn stop(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<StudyDeploymentStatus, CoordinatorError>;
}
