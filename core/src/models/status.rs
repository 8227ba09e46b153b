//! Deployment status models

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Readiness of a single master device within a study deployment.
///
/// Closed union; every consumption site matches exhaustively so an unexpected
/// state is a compile error rather than a silently handled default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceDeploymentStatus {
    /// The device itself has not registered yet
    Unregistered,

    /// The device registered but some of its dependencies have not
    Registered {
        /// Role names still to register before a snapshot can be issued
        remaining_devices: BTreeSet<String>,
    },

    /// All dependencies registered; a deployment snapshot can be issued
    SnapshotReady,

    /// The device confirmed deployment of its snapshot
    Deployed,

    /// A dependency registration changed after the device confirmed
    /// deployment, invalidating the snapshot it accepted
    NeedsRedeployment,
}

impl DeviceDeploymentStatus {
    /// Whether a deployment snapshot may currently be obtained for the device.
    ///
    /// A device needing redeployment may re-obtain a fresh snapshot at once;
    /// the previously issued one is stale for confirmation.
    pub fn can_obtain_deployment(&self) -> bool {
        match self {
            DeviceDeploymentStatus::Unregistered | DeviceDeploymentStatus::Registered { .. } => {
                false
            }
            DeviceDeploymentStatus::SnapshotReady
            | DeviceDeploymentStatus::Deployed
            | DeviceDeploymentStatus::NeedsRedeployment => true,
        }
    }
}

/// Status of one master device role within a [`StudyDeploymentStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatusEntry {
    pub device_role_name: String,
    pub status: DeviceDeploymentStatus,
}

/// Overall status of a study deployment: the coarsest-common view over all
/// master device statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StudyDeploymentStatus {
    /// Devices are still registering or deploying
    DeployingDevices {
        study_deployment_id: Uuid,
        devices: Vec<DeviceStatusEntry>,
    },

    /// Every master device has confirmed deployment
    Ready {
        study_deployment_id: Uuid,
        devices: Vec<DeviceStatusEntry>,
    },

    /// The deployment was stopped; no further changes are accepted
    Stopped {
        study_deployment_id: Uuid,
        devices: Vec<DeviceStatusEntry>,
    },
}

impl StudyDeploymentStatus {
    pub fn study_deployment_id(&self) -> Uuid {
        match self {
            StudyDeploymentStatus::DeployingDevices { study_deployment_id, .. }
            | StudyDeploymentStatus::Ready { study_deployment_id, .. }
            | StudyDeploymentStatus::Stopped { study_deployment_id, .. } => *study_deployment_id,
        }
    }

    pub fn devices(&self) -> &[DeviceStatusEntry] {
        match self {
            StudyDeploymentStatus::DeployingDevices { devices, .. }
            | StudyDeploymentStatus::Ready { devices, .. }
            | StudyDeploymentStatus::Stopped { devices, .. } => devices,
        }
    }

    /// The status of a single master device role, if present.
    pub fn device_status(&self, device_role_name: &str) -> Option<&DeviceDeploymentStatus> {
        self.devices()
            .iter()
            .find(|d| d.device_role_name == device_role_name)
            .map(|d| &d.status)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, StudyDeploymentStatus::Stopped { .. })
    }
}
