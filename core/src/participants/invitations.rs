//! Participation records and invitation views

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoordinatorError;
use crate::models::registration::DeviceRegistration;
use crate::participants::group::ParticipantGroup;

/// A description of a study, shared with participants when inviting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyInvitation {
    /// Name of the study to display to the participant
    pub name: String,

    /// Description of the study to display to the participant
    pub description: String,

    /// Application-specific data to be shared with the client
    #[serde(default)]
    pub application_data: serde_json::Value,
}

impl StudyInvitation {
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            application_data: serde_json::Value::Null,
        }
    }
}

/// Uniquely identifies the participation of an account in a study deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub study_deployment_id: Uuid,
    pub id: Uuid,
}

impl Participation {
    pub fn new(study_deployment_id: Uuid) -> Self {
        Self { study_deployment_id, id: Uuid::new_v4() }
    }
}

/// Links a participation to an account, the master device roles the account
/// was assigned to, and the invitation it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountParticipation {
    pub participation: Participation,
    pub assigned_master_device_role_names: BTreeSet<String>,
    pub account_id: Uuid,
    pub invitation: StudyInvitation,
}

/// A master device assigned to a participant, with its current registration
/// visibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedMasterDevice {
    pub device_role_name: String,
    pub registration: Option<DeviceRegistration>,
}

/// An invitation whose study deployment is still active, enriched with the
/// registration status of the assigned devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveParticipationInvitation {
    pub participation: Participation,
    pub invitation: StudyInvitation,
    pub assigned_devices: Vec<AssignedMasterDevice>,
}

/// Filter the given participations to those with active (non-stopped) study
/// deployments, appending the current device registration status to the
/// devices the participant was invited to use.
///
/// Fails when a participant group for one of the participations is missing or
/// when an assigned device role is not part of its group.
pub fn filter_active_participation_invitations(
    participations: &[AccountParticipation],
    groups: &[ParticipantGroup],
) -> Result<Vec<ActiveParticipationInvitation>, CoordinatorError> {
    let mut active = Vec::new();

    for participation in participations {
        let deployment_id = participation.participation.study_deployment_id;
        let group = groups
            .iter()
            .find(|g| g.study_deployment_id() == deployment_id)
            .ok_or_else(|| {
                CoordinatorError::NotFound(format!(
                    "No participant group for study deployment {}",
                    deployment_id
                ))
            })?;

        if group.is_stopped() {
            continue;
        }

        let assigned_devices = participation
            .assigned_master_device_role_names
            .iter()
            .map(|role| group.assigned_master_device(role))
            .collect::<Result<Vec<_>, _>>()?;

        active.push(ActiveParticipationInvitation {
            participation: participation.participation.clone(),
            invitation: participation.invitation.clone(),
            assigned_devices,
        });
    }

    Ok(active)
}
