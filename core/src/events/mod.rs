//! Deployment lifecycle events and the event bus contract
//!
//! Cross-aggregate consistency (deployment to participant group) is event
//! driven rather than transactional. Delivery is at-least-once and preserves
//! publish order per source aggregate; handlers must be idempotent.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::models::registration::DeviceRegistration;

/// A lifecycle event emitted by the deployment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeploymentEvent {
    /// A study deployment was created
    StudyDeploymentCreated {
        study_deployment_id: Uuid,
        master_device_role_names: BTreeSet<String>,
    },

    /// A device registration was added, replaced, or cleared
    /// (`registration: None` means cleared)
    DeviceRegistrationChanged {
        study_deployment_id: Uuid,
        device_role_name: String,
        registration: Option<DeviceRegistration>,
    },

    /// The study deployment was stopped
    StudyDeploymentStopped { study_deployment_id: Uuid },
}

impl DeploymentEvent {
    pub fn study_deployment_id(&self) -> Uuid {
        match self {
            DeploymentEvent::StudyDeploymentCreated { study_deployment_id, .. }
            | DeploymentEvent::DeviceRegistrationChanged { study_deployment_id, .. }
            | DeploymentEvent::StudyDeploymentStopped { study_deployment_id } => {
                *study_deployment_id
            }
        }
    }
}

/// Publish/subscribe contract for deployment lifecycle events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to all current subscribers, in publish order.
    async fn publish(&self, event: DeploymentEvent);

    /// Subscribe to all subsequently published events.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<DeploymentEvent>;
}

/// In-process [`EventBus`] fanning events out over unbounded channels.
#[derive(Default)]
pub struct InProcessEventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<DeploymentEvent>>>,
}

impl InProcessEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    async fn publish(&self, event: DeploymentEvent) {
        debug!(deployment = %event.study_deployment_id(), "Publishing deployment event");
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        // Dropped receivers are pruned on the next publish.
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<DeploymentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.push(tx);
        rx
    }
}
