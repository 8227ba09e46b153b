//! Repository contracts for deployment and participant state
//!
//! Durability is a collaborator concern; the core only relies on these
//! contracts. The same-id serialization discipline required by the service
//! host (load, mutate, store under a per-id lock) is documented on
//! [`DeploymentRepository::update`].

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::deployment::StudyDeployment;
use crate::errors::CoordinatorError;
use crate::participants::{AccountParticipation, ParticipantGroup};

pub use memory::{InMemoryDeploymentRepository, InMemoryParticipantGroupRepository};

/// Storage for study deployments, with participation sub-collections keyed by
/// deployment id.
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Add a new study deployment.
    ///
    /// Fails with a conflict when a deployment with the same id exists.
    async fn add(&self, deployment: StudyDeployment) -> Result<(), CoordinatorError>;

    /// Return the deployment with the given id, or `None` when absent.
    async fn get_study_deployment_by(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<Option<StudyDeployment>, CoordinatorError>;

    /// Store an updated version of a previously added deployment.
    ///
    /// Storing an id that was never added is an error: updates must follow a
    /// load of the same id.
    async fn update(&self, deployment: StudyDeployment) -> Result<(), CoordinatorError>;

    /// Add a participation record to a deployment's sub-collection.
    async fn add_participation(
        &self,
        study_deployment_id: Uuid,
        participation: AccountParticipation,
    ) -> Result<(), CoordinatorError>;

    /// All participation records of a deployment.
    async fn participations_for(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<Vec<AccountParticipation>, CoordinatorError>;

    /// All participation records of an account, across deployments.
    async fn participations_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountParticipation>, CoordinatorError>;
}

/// Storage for participant group mirrors, keyed by deployment id.
#[async_trait]
pub trait ParticipantGroupRepository: Send + Sync {
    /// Insert or replace a participant group.
    async fn put_group(&self, group: ParticipantGroup) -> Result<(), CoordinatorError>;

    /// Return the group mirroring the given deployment, or `None` when absent.
    async fn get_group(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<Option<ParticipantGroup>, CoordinatorError>;

    /// The groups mirroring the given deployments, in no particular order.
    async fn groups_for(
        &self,
        study_deployment_ids: &[Uuid],
    ) -> Result<Vec<ParticipantGroup>, CoordinatorError>;
}
