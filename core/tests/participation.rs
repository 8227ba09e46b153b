//! Participation and participant group relay scenarios

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use cohort_core::errors::CoordinatorError;
use cohort_core::events::{DeploymentEvent, EventBus};
use cohort_core::models::registration::DeviceRegistration;
use cohort_core::participants::invitations::StudyInvitation;
use cohort_core::participants::{relay, ParticipationService, ParticipationServiceHost};
use cohort_core::service::DeploymentService;
use cohort_core::store::{InMemoryParticipantGroupRepository, ParticipantGroupRepository};

use common::{make_host, phone_protocol, phone_watch_protocol};

fn roles(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Apply all events published so far to the participant group mirror.
async fn drain(
    groups: &InMemoryParticipantGroupRepository,
    events: &mut mpsc::UnboundedReceiver<DeploymentEvent>,
) {
    while let Ok(event) = events.try_recv() {
        relay::handle_event(groups, &event).await.unwrap();
    }
}

#[tokio::test]
async fn relay_creates_a_group_per_deployment_and_reapplies_idempotently() {
    let (host, _, bus) = make_host();
    let groups = InMemoryParticipantGroupRepository::new();
    let mut events = bus.subscribe();

    let id = host
        .create_study_deployment(phone_watch_protocol())
        .await
        .unwrap()
        .study_deployment_id();
    drain(&groups, &mut events).await;

    let group = groups.get_group(id).await.unwrap().unwrap();
    assert!(!group.is_stopped());
    let assigned = group.assigned_master_device("Phone").unwrap();
    assert_eq!(assigned.registration, None);
    // Connected devices are not part of the mirror.
    assert!(group.assigned_master_device("Watch").is_err());

    // Redelivering the creation event leaves the group untouched.
    relay::handle_event(
        &groups,
        &DeploymentEvent::StudyDeploymentCreated {
            study_deployment_id: id,
            master_device_role_names: roles(&["Phone"]),
        },
    )
    .await
    .unwrap();
    assert_eq!(groups.get_group(id).await.unwrap().unwrap(), group);
}

#[tokio::test]
async fn registration_changes_become_visible_in_active_invitations() {
    let (host, repository, bus) = make_host();
    let groups = Arc::new(InMemoryParticipantGroupRepository::new());
    let mut events = bus.subscribe();
    let participation_service =
        ParticipationServiceHost::new(repository.clone(), groups.clone());

    let id = host
        .create_study_deployment(phone_watch_protocol())
        .await
        .unwrap()
        .study_deployment_id();
    drain(&groups, &mut events).await;

    let account_id = Uuid::new_v4();
    participation_service
        .add_participation(id, account_id, roles(&["Phone"]), StudyInvitation::empty())
        .await
        .unwrap();

    let invitations = participation_service
        .get_active_participation_invitations(account_id)
        .await
        .unwrap();
    assert_eq!(invitations.len(), 1);
    assert_eq!(invitations[0].assigned_devices.len(), 1);
    assert_eq!(invitations[0].assigned_devices[0].registration, None);

    let registration = DeviceRegistration::new("phone-1");
    host.register_device(id, "Phone", registration.clone()).await.unwrap();
    drain(&groups, &mut events).await;

    let invitations = participation_service
        .get_active_participation_invitations(account_id)
        .await
        .unwrap();
    assert_eq!(
        invitations[0].assigned_devices[0].registration.as_ref().map(|r| &r.device_id),
        Some(&registration.device_id)
    );
}

#[tokio::test]
async fn stopped_deployments_drop_out_of_active_invitations() {
    let (host, repository, bus) = make_host();
    let groups = Arc::new(InMemoryParticipantGroupRepository::new());
    let mut events = bus.subscribe();
    let participation_service =
        ParticipationServiceHost::new(repository.clone(), groups.clone());

    let id = host
        .create_study_deployment(phone_protocol())
        .await
        .unwrap()
        .study_deployment_id();
    drain(&groups, &mut events).await;

    let account_id = Uuid::new_v4();
    participation_service
        .add_participation(id, account_id, roles(&["Phone"]), StudyInvitation::empty())
        .await
        .unwrap();
    assert_eq!(
        participation_service
            .get_active_participation_invitations(account_id)
            .await
            .unwrap()
            .len(),
        1
    );

    host.stop(id).await.unwrap();
    drain(&groups, &mut events).await;

    assert!(groups.get_group(id).await.unwrap().unwrap().is_stopped());
    assert!(participation_service
        .get_active_participation_invitations(account_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn participation_is_idempotent_but_conflicts_on_differing_roles() {
    let (host, repository, _) = make_host();
    let groups = Arc::new(InMemoryParticipantGroupRepository::new());
    let participation_service =
        ParticipationServiceHost::new(repository.clone(), groups.clone());

    let id = host
        .create_study_deployment(phone_protocol())
        .await
        .unwrap()
        .study_deployment_id();
    let account_id = Uuid::new_v4();

    let first = participation_service
        .add_participation(id, account_id, roles(&["Phone"]), StudyInvitation::empty())
        .await
        .unwrap();
    let second = participation_service
        .add_participation(id, account_id, roles(&["Phone"]), StudyInvitation::empty())
        .await
        .unwrap();
    assert_eq!(first, second);

    let result = participation_service
        .add_participation(id, account_id, roles(&[]), StudyInvitation::empty())
        .await;
    assert!(matches!(result, Err(CoordinatorError::Conflict(_))));
}

#[tokio::test]
async fn participation_requires_a_known_active_deployment_and_master_role() {
    let (host, repository, _) = make_host();
    let groups = Arc::new(InMemoryParticipantGroupRepository::new());
    let participation_service =
        ParticipationServiceHost::new(repository.clone(), groups.clone());
    let account_id = Uuid::new_v4();

    let result = participation_service
        .add_participation(Uuid::new_v4(), account_id, roles(&["Phone"]), StudyInvitation::empty())
        .await;
    assert!(matches!(result, Err(CoordinatorError::NotFound(_))));

    let id = host
        .create_study_deployment(phone_watch_protocol())
        .await
        .unwrap()
        .study_deployment_id();

    // Connected devices cannot be assigned to participants.
    let result = participation_service
        .add_participation(id, account_id, roles(&["Watch"]), StudyInvitation::empty())
        .await;
    assert!(matches!(result, Err(CoordinatorError::NotFound(_))));

    host.stop(id).await.unwrap();
    let result = participation_service
        .add_participation(id, account_id, roles(&["Phone"]), StudyInvitation::empty())
        .await;
    assert!(matches!(result, Err(CoordinatorError::InvalidState(_))));
}

#[tokio::test]
async fn participant_data_is_stored_until_the_group_stops() {
    let (host, repository, bus) = make_host();
    let groups = Arc::new(InMemoryParticipantGroupRepository::new());
    let mut events = bus.subscribe();
    let participation_service =
        ParticipationServiceHost::new(repository.clone(), groups.clone());

    let id = host
        .create_study_deployment(phone_protocol())
        .await
        .unwrap()
        .study_deployment_id();
    drain(&groups, &mut events).await;

    participation_service
        .set_participant_data(id, "cohort.sex", serde_json::json!("F"))
        .await
        .unwrap();
    let group = groups.get_group(id).await.unwrap().unwrap();
    assert_eq!(group.data("cohort.sex"), Some(&serde_json::json!("F")));

    host.stop(id).await.unwrap();
    drain(&groups, &mut events).await;

    let result = participation_service
        .set_participant_data(id, "cohort.sex", serde_json::json!("M"))
        .await;
    assert!(matches!(result, Err(CoordinatorError::InvalidState(_))));
}

#[tokio::test]
async fn relay_worker_applies_events_until_shutdown() {
    let (host, _, bus) = make_host();
    let groups = Arc::new(InMemoryParticipantGroupRepository::new());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let worker = tokio::spawn(relay::run(
        groups.clone(),
        bus.subscribe(),
        Box::pin(async move {
            let _ = shutdown_rx.await;
        }),
    ));

    let id = host
        .create_study_deployment(phone_protocol())
        .await
        .unwrap()
        .study_deployment_id();

    let created = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if groups.get_group(id).await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(created.is_ok(), "participant group was not created in time");

    let _ = shutdown_tx.send(());
    worker.await.unwrap();
}
