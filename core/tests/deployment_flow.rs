//! Deployment service scenarios

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use cohort_core::deployment::StudyDeployment;
use cohort_core::errors::CoordinatorError;
use cohort_core::events::{DeploymentEvent, EventBus, InProcessEventBus};
use cohort_core::models::registration::DeviceRegistration;
use cohort_core::models::status::{DeviceDeploymentStatus, StudyDeploymentStatus};
use cohort_core::participants::AccountParticipation;
use cohort_core::service::{DeploymentService, DeploymentServiceHost};
use cohort_core::store::{DeploymentRepository, InMemoryDeploymentRepository};

use common::{make_host, phone_protocol, phone_watch_protocol};

#[tokio::test]
async fn creating_the_same_protocol_twice_conflicts() {
    let (host, _, _) = make_host();
    let protocol = phone_protocol();

    host.create_study_deployment(protocol.clone()).await.unwrap();
    let result = host.create_study_deployment(protocol).await;
    assert!(matches!(result, Err(CoordinatorError::Conflict(_))));
}

#[tokio::test]
async fn single_master_without_dependencies_is_ready_after_registration() {
    let (host, _, _) = make_host();
    let status = host.create_study_deployment(phone_protocol()).await.unwrap();
    let id = status.study_deployment_id();
    assert_eq!(
        status.device_status("Phone"),
        Some(&DeviceDeploymentStatus::Unregistered)
    );

    let status = host
        .register_device(id, "Phone", DeviceRegistration::new("phone-1"))
        .await
        .unwrap();
    assert_eq!(
        status.device_status("Phone"),
        Some(&DeviceDeploymentStatus::SnapshotReady)
    );
    assert!(host.get_device_deployment_for(id, "Phone").await.is_ok());
}

#[tokio::test]
async fn dependent_master_waits_for_connected_device() {
    let (host, _, _) = make_host();
    let status = host.create_study_deployment(phone_watch_protocol()).await.unwrap();
    let id = status.study_deployment_id();

    let status = host
        .register_device(id, "Phone", DeviceRegistration::new("phone-1"))
        .await
        .unwrap();
    assert_eq!(
        status.device_status("Phone"),
        Some(&DeviceDeploymentStatus::Registered {
            remaining_devices: ["Watch".to_string()].into_iter().collect()
        })
    );

    // The snapshot cannot be obtained yet.
    let result = host.get_device_deployment_for(id, "Phone").await;
    assert!(matches!(result, Err(CoordinatorError::InvalidState(_))));

    let status = host
        .register_device(id, "Watch", DeviceRegistration::new("watch-1"))
        .await
        .unwrap();
    assert_eq!(
        status.device_status("Phone"),
        Some(&DeviceDeploymentStatus::SnapshotReady)
    );
    assert!(host.get_device_deployment_for(id, "Phone").await.is_ok());
}

#[tokio::test]
async fn resending_a_registration_is_idempotent_but_conflicts_differ() {
    let (host, _, _) = make_host();
    let id = host
        .create_study_deployment(phone_protocol())
        .await
        .unwrap()
        .study_deployment_id();

    let registration = DeviceRegistration::new("phone-1");
    host.register_device(id, "Phone", registration.clone()).await.unwrap();
    host.register_device(id, "Phone", registration).await.unwrap();

    let result = host
        .register_device(id, "Phone", DeviceRegistration::new("phone-2"))
        .await;
    assert!(matches!(result, Err(CoordinatorError::Conflict(_))));
}

#[tokio::test]
async fn snapshot_is_reproducible_until_the_registry_changes() {
    let (host, _, _) = make_host();
    let id = host
        .create_study_deployment(phone_watch_protocol())
        .await
        .unwrap()
        .study_deployment_id();
    host.register_device(id, "Phone", DeviceRegistration::new("phone-1")).await.unwrap();
    host.register_device(id, "Watch", DeviceRegistration::new("watch-1")).await.unwrap();

    let first = host.get_device_deployment_for(id, "Phone").await.unwrap();
    let second = host.get_device_deployment_for(id, "Phone").await.unwrap();
    assert_eq!(first, second);

    host.unregister_device(id, "Watch").await.unwrap();
    host.register_device(id, "Watch", DeviceRegistration::new("watch-2")).await.unwrap();

    let third = host.get_device_deployment_for(id, "Phone").await.unwrap();
    assert!(third.last_update > first.last_update);
}

#[tokio::test]
async fn stale_confirmation_is_transient_and_recoverable() {
    let (host, _, _) = make_host();
    let id = host
        .create_study_deployment(phone_watch_protocol())
        .await
        .unwrap()
        .study_deployment_id();
    host.register_device(id, "Phone", DeviceRegistration::new("phone-1")).await.unwrap();
    host.register_device(id, "Watch", DeviceRegistration::new("watch-1")).await.unwrap();

    let snapshot = host.get_device_deployment_for(id, "Phone").await.unwrap();

    // A competing client replaces the watch registration in between.
    host.unregister_device(id, "Watch").await.unwrap();
    host.register_device(id, "Watch", DeviceRegistration::new("watch-2")).await.unwrap();

    let result = host.deployment_successful(id, "Phone", snapshot.last_update).await;
    assert!(matches!(&result, Err(e) if e.is_transient()));

    // A fresh snapshot confirms fine.
    let fresh = host.get_device_deployment_for(id, "Phone").await.unwrap();
    let status = host.deployment_successful(id, "Phone", fresh.last_update).await.unwrap();
    assert!(matches!(status, StudyDeploymentStatus::Ready { .. }));
}

#[tokio::test]
async fn unregistering_a_dependency_after_confirmation_invalidates_the_master() {
    let (host, _, _) = make_host();
    let id = host
        .create_study_deployment(phone_watch_protocol())
        .await
        .unwrap()
        .study_deployment_id();
    host.register_device(id, "Phone", DeviceRegistration::new("phone-1")).await.unwrap();
    host.register_device(id, "Watch", DeviceRegistration::new("watch-1")).await.unwrap();

    let snapshot = host.get_device_deployment_for(id, "Phone").await.unwrap();
    host.deployment_successful(id, "Phone", snapshot.last_update).await.unwrap();

    host.unregister_device(id, "Watch").await.unwrap();
    host.register_device(id, "Watch", DeviceRegistration::new("watch-2")).await.unwrap();

    let status = host.get_study_deployment_status(id).await.unwrap();
    assert_eq!(
        status.device_status("Phone"),
        Some(&DeviceDeploymentStatus::NeedsRedeployment)
    );

    // The revoked snapshot can no longer confirm; a fresh one can.
    let result = host.deployment_successful(id, "Phone", snapshot.last_update).await;
    assert!(matches!(&result, Err(e) if e.is_transient()));
    let fresh = host.get_device_deployment_for(id, "Phone").await.unwrap();
    host.deployment_successful(id, "Phone", fresh.last_update).await.unwrap();
}

#[tokio::test]
async fn stop_is_idempotent_and_terminal() {
    let (host, _, _) = make_host();
    let id = host
        .create_study_deployment(phone_protocol())
        .await
        .unwrap()
        .study_deployment_id();

    let first = host.stop(id).await.unwrap();
    let second = host.stop(id).await.unwrap();
    assert!(first.is_stopped());
    assert_eq!(first, second);

    let result = host
        .register_device(id, "Phone", DeviceRegistration::new("phone-1"))
        .await;
    assert!(matches!(result, Err(CoordinatorError::InvalidState(_))));
}

#[tokio::test]
async fn unknown_deployment_and_role_are_not_found() {
    let (host, _, _) = make_host();
    let id = host
        .create_study_deployment(phone_protocol())
        .await
        .unwrap()
        .study_deployment_id();

    let result = host
        .register_device(uuid::Uuid::new_v4(), "Phone", DeviceRegistration::new("p"))
        .await;
    assert!(matches!(result, Err(CoordinatorError::NotFound(_))));

    let result = host.register_device(id, "Tablet", DeviceRegistration::new("t")).await;
    assert!(matches!(result, Err(CoordinatorError::NotFound(_))));
}

/// Delegates to the in-memory repository, but holds `add` open after the
/// deployment is stored so a competing call can run while creation is still
/// in flight.
struct SlowAddRepository {
    inner: InMemoryDeploymentRepository,
    added: Notify,
}

#[async_trait]
impl DeploymentRepository for SlowAddRepository {
    async fn add(&self, deployment: StudyDeployment) -> Result<(), CoordinatorError> {
        self.inner.add(deployment).await?;
        self.added.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    async fn get_study_deployment_by(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<Option<StudyDeployment>, CoordinatorError> {
        self.inner.get_study_deployment_by(study_deployment_id).await
    }

    async fn update(&self, deployment: StudyDeployment) -> Result<(), CoordinatorError> {
        self.inner.update(deployment).await
    }

    async fn add_participation(
        &self,
        study_deployment_id: Uuid,
        participation: AccountParticipation,
    ) -> Result<(), CoordinatorError> {
        self.inner.add_participation(study_deployment_id, participation).await
    }

    async fn participations_for(
        &self,
        study_deployment_id: Uuid,
    ) -> Result<Vec<AccountParticipation>, CoordinatorError> {
        self.inner.participations_for(study_deployment_id).await
    }

    async fn participations_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountParticipation>, CoordinatorError> {
        self.inner.participations_for_account(account_id).await
    }
}

// The deployment id is derived from the protocol, so a client holding the
// protocol can register before create has returned. The created event must
// still be published before the registration event.
#[tokio::test]
async fn registration_racing_creation_cannot_overtake_the_created_event() {
    let protocol = phone_protocol();
    let id = protocol.deployment_id().unwrap();

    let repository = Arc::new(SlowAddRepository {
        inner: InMemoryDeploymentRepository::new(),
        added: Notify::new(),
    });
    let bus = Arc::new(InProcessEventBus::new());
    let host = Arc::new(DeploymentServiceHost::new(repository.clone(), bus.clone()));
    let mut events = bus.subscribe();

    let racing_host = host.clone();
    let racing_repository = repository.clone();
    let register = tokio::spawn(async move {
        racing_repository.added.notified().await;
        racing_host
            .register_device(id, "Phone", DeviceRegistration::new("phone-1"))
            .await
    });

    host.create_study_deployment(protocol).await.unwrap();
    register.await.unwrap().unwrap();

    assert!(matches!(
        events.try_recv().unwrap(),
        DeploymentEvent::StudyDeploymentCreated { .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        DeploymentEvent::DeviceRegistrationChanged { .. }
    ));
}
