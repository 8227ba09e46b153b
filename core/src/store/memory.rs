//! In-memory repository implementations

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::deployment::StudyDeployment;
use crate::errors::CoordinatorError;
use crate::participants::{AccountParticipation, ParticipantGroup};
use crate::store::{DeploymentRepository, ParticipantGroupRepository};

/// In-memory [`DeploymentRepository`], suitable for tests and single-process
/// hosting.
#[derive(Default)]
pub struct InMemoryDeploymentRepository {
    deployments: RwLock<HashMap<Uuid, StudyDeployment>>,
    participations: RwLock<HashMap<Uuid, Vec<AccountParticipation>>>,
}

impl InMemoryDeploymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentRepository for InMemoryDeploymentRepository {
    async fn add(&self, deployment: StudyDeployment) -> Result<(), CoordinatorError> {
        let mut deployments = self.deployments.write().await;
        if deployments.contains_key(&deployment.id()) {
            return Err(CoordinatorError::Conflict(format!(
                "Study deployment {} already exists",
                deployment.id()
            )));
        }
        deployments.insert(deployment.id(), deployment);
        Ok(())
    }

    async fn get_study_deployment_by(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<Option<StudyDeployment>, CoordinatorError> {
        let deployments = self.deployments.read().await;
        Ok(deployments.get(&study_deployment_id).cloned())
    }

    async fn update(&self, deployment: StudyDeployment) -> Result<(), CoordinatorError> {
        let mut deployments = self.deployments.write().await;
        if !deployments.contains_key(&deployment.id()) {
            return Err(CoordinatorError::StorageError(format!(
                "Cannot update study deployment {}: never added",
                deployment.id()
            )));
        }
        deployments.insert(deployment.id(), deployment);
        Ok(())
    }

    async fn add_participation(
        &self,
        study_deployment_id: Uuid,
        participation: AccountParticipation,
    ) -> Result<(), CoordinatorError> {
        let mut participations = self.participations.write().await;
        participations.entry(study_deployment_id).or_default().push(participation);
        Ok(())
    }

    async fn participations_for(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<Vec<AccountParticipation>, CoordinatorError> {
        let participations = self.participations.read().await;
        Ok(participations.get(&study_deployment_id).cloned().unwrap_or_default())
    }

    async fn participations_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountParticipation>, CoordinatorError> {
        let participations = self.participations.read().await;
        Ok(participations
            .values()
            .flatten()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect())
    }
}

/// In-memory [`ParticipantGroupRepository`].
#[derive(Default)]
pub struct InMemoryParticipantGroupRepository {
    groups: RwLock<HashMap<Uuid, ParticipantGroup>>,
}

impl InMemoryParticipantGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParticipantGroupRepository for InMemoryParticipantGroupRepository {
    async fn put_group(&self, group: ParticipantGroup) -> Result<(), CoordinatorError> {
        let mut groups = self.groups.write().await;
        groups.insert(group.study_deployment_id(), group);
        Ok(())
    }

    async fn get_group(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<Option<ParticipantGroup>, CoordinatorError> {
        let groups = self.groups.read().await;
        Ok(groups.get(&study_deployment_id).cloned())
    }

    async fn groups_for(
        &self,
        study_deployment_ids: &[Uuid],
    ) -> Result<Vec<ParticipantGroup>, CoordinatorError> {
        let groups = self.groups.read().await;
        Ok(study_deployment_ids.iter().filter_map(|id| groups.get(id).cloned()).collect())
    }
}
