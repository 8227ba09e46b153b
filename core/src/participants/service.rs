//! Participation service

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::CoordinatorError;
use crate::participants::invitations::{
    filter_active_participation_invitations, AccountParticipation, ActiveParticipationInvitation,
    Participation, StudyInvitation,
};
use crate::store::{DeploymentRepository, ParticipantGroupRepository};

/// Application service managing participations in study deployments.
#[async_trait]
pub trait ParticipationService: Send + Sync {
    /// Let an account participate in a study deployment, assigned to the
    /// given master device roles.
    ///
    /// Idempotent per (account, deployment): repeating the call returns the
    /// existing participation.
    async fn add_participation(
        &self,
        study_deployment_id: Uuid,
        account_id: Uuid,
        assigned_master_device_role_names: BTreeSet<String>,
        invitation: StudyInvitation,
    ) -> Result<Participation, CoordinatorError>;

    /// The invitations of an account whose study deployments are still
    /// active, with current device registration visibility.
    async fn get_active_participation_invitations(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<ActiveParticipationInvitation>, CoordinatorError>;

    /// Record participant-supplied data for an input type.
    async fn set_participant_data(
        &self,
        study_deployment_id: Uuid,
        input_type: &str,
        value: serde_json::Value,
    ) -> Result<(), CoordinatorError>;
}

pub struct ParticipationServiceHost {
    deployments: Arc<dyn DeploymentRepository>,
    groups: Arc<dyn ParticipantGroupRepository>,
}

impl ParticipationServiceHost {
    pub fn new(
        deployments: Arc<dyn DeploymentRepository>,
        groups: Arc<dyn ParticipantGroupRepository>,
    ) -> Self {
        Self { deployments, groups }
    }
}

#[async_trait]
impl ParticipationService for ParticipationServiceHost {
    async fn add_participation(
        &self,
        study_deployment_id: Uuid,
        account_id: Uuid,
        assigned_master_device_role_names: BTreeSet<String>,
        invitation: StudyInvitation,
    ) -> Result<Participation, CoordinatorError> {
        let deployment = self
            .deployments
            .get_study_deployment_by(study_deployment_id)
            .await?
            .ok_or_else(|| {
                CoordinatorError::NotFound(format!(
                    "Unknown study deployment: {}",
                    study_deployment_id
                ))
            })?;
        if deployment.is_stopped() {
            return Err(CoordinatorError::InvalidState(format!(
                "Cannot add participation: study deployment {} has been stopped",
                study_deployment_id
            )));
        }

        for role in &assigned_master_device_role_names {
            let known_master = deployment
                .protocol()
                .master_devices()
                .iter()
                .any(|d| &d.role_name == role);
            if !known_master {
                return Err(CoordinatorError::NotFound(format!(
                    "Role '{}' is not a master device of deployment {}",
                    role, study_deployment_id
                )));
            }
        }

        let existing = self
            .deployments
            .participations_for(study_deployment_id)
            .await?
            .into_iter()
            .find(|p| p.account_id == account_id);
        if let Some(existing) = existing {
            if existing.assigned_master_device_role_names != assigned_master_device_role_names {
                return Err(CoordinatorError::Conflict(format!(
                    "Account {} already participates in deployment {} with different assigned devices",
                    account_id, study_deployment_id
                )));
            }
            debug!(deployment = %study_deployment_id, account = %account_id,
                "Participation already exists; returning it");
            return Ok(existing.participation);
        }

        let participation = Participation::new(study_deployment_id);
        self.deployments
            .add_participation(
                study_deployment_id,
                AccountParticipation {
                    participation: participation.clone(),
                    assigned_master_device_role_names,
                    account_id,
                    invitation,
                },
            )
            .await?;
        info!(deployment = %study_deployment_id, account = %account_id, "Participation added");
        Ok(participation)
    }

    async fn get_active_participation_invitations(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<ActiveParticipationInvitation>, CoordinatorError> {
        let participations = self.deployments.participations_for_account(account_id).await?;
        let deployment_ids: Vec<Uuid> = participations
            .iter()
            .map(|p| p.participation.study_deployment_id)
            .collect();
        let groups = self.groups.groups_for(&deployment_ids).await?;
        filter_active_participation_invitations(&participations, &groups)
    }

    async fn set_participant_data(
        &self,
        study_deployment_id: Uuid,
        input_type: &str,
        value: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        let mut group =
            self.groups.get_group(study_deployment_id).await?.ok_or_else(|| {
                CoordinatorError::NotFound(format!(
                    "No participant group for study deployment {}",
                    study_deployment_id
                ))
            })?;
        group.set_data(input_type, value)?;
        self.groups.put_group(group).await
    }
}
