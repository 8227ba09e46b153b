//! Participant group event relay
//!
//! Keeps participant groups consistent with the authoritative deployment by
//! consuming lifecycle events. Delivery is at-least-once with per-aggregate
//! ordering, so every handler is idempotent: reprocessing an event leaves the
//! group unchanged.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::CoordinatorError;
use crate::events::DeploymentEvent;
use crate::participants::group::ParticipantGroup;
use crate::store::ParticipantGroupRepository;

/// Run the relay until the event channel closes or shutdown is signalled.
pub async fn run(
    groups: Arc<dyn ParticipantGroupRepository>,
    mut events: mpsc::UnboundedReceiver<DeploymentEvent>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Participant group relay starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Participant group relay shutting down...");
                return;
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if let Err(e) = handle_event(groups.as_ref(), &event).await {
                            error!("Failed to apply deployment event: {}", e);
                        }
                    }
                    None => {
                        info!("Event channel closed; participant group relay stopping...");
                        return;
                    }
                }
            }
        }
    }
}

/// Apply one deployment lifecycle event to the participant group mirror.
pub async fn handle_event(
    groups: &dyn ParticipantGroupRepository,
    event: &DeploymentEvent,
) -> Result<(), CoordinatorError> {
    match event {
        DeploymentEvent::StudyDeploymentCreated {
            study_deployment_id,
            master_device_role_names,
        } => {
            if groups.get_group(*study_deployment_id).await?.is_some() {
                debug!(deployment = %study_deployment_id, "Participant group already exists");
                return Ok(());
            }
            groups
                .put_group(ParticipantGroup::new(
                    *study_deployment_id,
                    master_device_role_names.clone(),
                ))
                .await?;
            info!(deployment = %study_deployment_id, "Participant group created");
            Ok(())
        }

        DeploymentEvent::DeviceRegistrationChanged {
            study_deployment_id,
            device_role_name,
            registration,
        } => {
            let Some(mut group) = groups.get_group(*study_deployment_id).await? else {
                warn!(deployment = %study_deployment_id,
                    "Registration change for unknown participant group; skipping");
                return Ok(());
            };
            if group.is_stopped() {
                return Ok(());
            }
            let changed = group.update_registration(device_role_name, registration.clone())?;
            if changed {
                groups.put_group(group).await?;
                debug!(deployment = %study_deployment_id, role = %device_role_name,
                    "Registration visibility updated");
            }
            Ok(())
        }

        DeploymentEvent::StudyDeploymentStopped { study_deployment_id } => {
            let Some(mut group) = groups.get_group(*study_deployment_id).await? else {
                warn!(deployment = %study_deployment_id,
                    "Stop event for unknown participant group; skipping");
                return Ok(());
            };
            if group.stop() {
                groups.put_group(group).await?;
                info!(deployment = %study_deployment_id, "Participant group stopped");
            }
            Ok(())
        }
    }
}
