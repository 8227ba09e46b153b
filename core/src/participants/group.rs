//! Participant group mirror
//!
//! Mirrors the lifecycle of one study deployment on the participant side:
//! which master devices participants are assigned to, the registration
//! visibility of those devices, and collected participant data. Stopped
//! exactly when its deployment is stopped, never independently. All mutations
//! are idempotent so reprocessing a delivered event is a no-op.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoordinatorError;
use crate::models::registration::DeviceRegistration;
use crate::participants::invitations::AssignedMasterDevice;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantGroup {
    study_deployment_id: Uuid,
    assigned_master_devices: BTreeMap<String, Option<DeviceRegistration>>,
    data: BTreeMap<String, serde_json::Value>,
    is_stopped: bool,
}

impl ParticipantGroup {
    /// Create the participant record set for a newly created deployment.
    pub fn new(study_deployment_id: Uuid, master_device_role_names: BTreeSet<String>) -> Self {
        Self {
            study_deployment_id,
            assigned_master_devices: master_device_role_names
                .into_iter()
                .map(|role| (role, None))
                .collect(),
            data: BTreeMap::new(),
            is_stopped: false,
        }
    }

    pub fn study_deployment_id(&self) -> Uuid {
        self.study_deployment_id
    }

    pub fn is_stopped(&self) -> bool {
        self.is_stopped
    }

    /// The assigned master device with the given role and its registration
    /// visibility.
    pub fn assigned_master_device(
        &self,
        device_role_name: &str,
    ) -> Result<AssignedMasterDevice, CoordinatorError> {
        let registration =
            self.assigned_master_devices.get(device_role_name).ok_or_else(|| {
                CoordinatorError::NotFound(format!(
                    "Role '{}' is not an assigned master device of deployment {}",
                    device_role_name, self.study_deployment_id
                ))
            })?;
        Ok(AssignedMasterDevice {
            device_role_name: device_role_name.to_string(),
            registration: registration.clone(),
        })
    }

    /// Reflect a registration change of an assigned master device.
    ///
    /// Returns `true` when the visibility changed; repeating the same update
    /// is a no-op. Roles the group does not track (non-master roles) are
    /// ignored.
    pub fn update_registration(
        &mut self,
        device_role_name: &str,
        registration: Option<DeviceRegistration>,
    ) -> Result<bool, CoordinatorError> {
        let Some(current) = self.assigned_master_devices.get_mut(device_role_name) else {
            return Ok(false);
        };
        if *current == registration {
            return Ok(false);
        }
        *current = registration;
        Ok(true)
    }

    /// Record participant-supplied data for an input type.
    ///
    /// Fails once the group is stopped.
    pub fn set_data(
        &mut self,
        input_type: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        if self.is_stopped {
            return Err(CoordinatorError::InvalidState(format!(
                "Participant group for deployment {} has been stopped",
                self.study_deployment_id
            )));
        }
        self.data.insert(input_type.into(), value);
        Ok(())
    }

    /// Participant data for an input type, if supplied.
    pub fn data(&self, input_type: &str) -> Option<&serde_json::Value> {
        self.data.get(input_type)
    }

    /// Freeze the group because its deployment stopped. Idempotent; returns
    /// `true` when newly stopped.
    pub fn stop(&mut self) -> bool {
        if self.is_stopped {
            return false;
        }
        self.is_stopped = true;
        true
    }
}
