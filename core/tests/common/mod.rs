//! Shared test fixtures
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use cohort_core::client::probe::{CapabilityProbe, ConnectedDeviceProbe};
use cohort_core::events::InProcessEventBus;
use cohort_core::models::registration::DeviceRegistration;
use cohort_core::protocol::{
    DataType, DeviceConnection, DeviceDescriptor, Measure, ProtocolSnapshot, TaskAssignment,
    TaskDescriptor,
};
use cohort_core::service::DeploymentServiceHost;
use cohort_core::store::InMemoryDeploymentRepository;

/// A protocol with a single master "Phone" collecting geolocation.
pub fn phone_protocol() -> ProtocolSnapshot {
    ProtocolSnapshot::new(
        Uuid::new_v4(),
        "Phone study",
        vec![DeviceDescriptor::master("Phone", "cohort.phone")],
        vec![],
        vec![],
        vec![TaskDescriptor {
            name: "track".to_string(),
            measures: vec![Measure { data_type: DataType::new("cohort.geolocation") }],
        }],
        vec![TaskAssignment {
            task_name: "track".to_string(),
            device_role_name: "Phone".to_string(),
        }],
    )
    .unwrap()
}

/// A protocol where master "Phone" depends on connected "Watch" measuring
/// heart rate.
pub fn phone_watch_protocol() -> ProtocolSnapshot {
    ProtocolSnapshot::new(
        Uuid::new_v4(),
        "Phone and watch study",
        vec![DeviceDescriptor::master("Phone", "cohort.phone")],
        vec![DeviceDescriptor::connected("Watch", "cohort.watch")],
        vec![DeviceConnection {
            role_name: "Watch".to_string(),
            connected_to_role_name: "Phone".to_string(),
        }],
        vec![TaskDescriptor {
            name: "hr".to_string(),
            measures: vec![Measure { data_type: DataType::new("cohort.heart_rate") }],
        }],
        vec![TaskAssignment {
            task_name: "hr".to_string(),
            device_role_name: "Watch".to_string(),
        }],
    )
    .unwrap()
}

/// Deployment service host over in-memory collaborators.
pub fn make_host() -> (
    Arc<DeploymentServiceHost>,
    Arc<InMemoryDeploymentRepository>,
    Arc<InProcessEventBus>,
) {
    let repository = Arc::new(InMemoryDeploymentRepository::new());
    let bus = Arc::new(InProcessEventBus::new());
    let host = Arc::new(DeploymentServiceHost::new(repository.clone(), bus.clone()));
    (host, repository, bus)
}

/// Capability probe stub with configurable gaps.
#[derive(Default)]
pub struct StubProbe {
    unsupported_data_types: HashSet<String>,
    unsupported_device_types: HashSet<String>,
}

impl StubProbe {
    /// A probe supporting every device and data type.
    pub fn supports_everything() -> Self {
        Self::default()
    }

    pub fn without_data_type(mut self, data_type: &str) -> Self {
        self.unsupported_data_types.insert(data_type.to_string());
        self
    }

    pub fn without_device_type(mut self, device_type: &str) -> Self {
        self.unsupported_device_types.insert(device_type.to_string());
        self
    }
}

#[async_trait]
impl CapabilityProbe for StubProbe {
    async fn supports_data_type(&self, data_type: &DataType) -> bool {
        !self.unsupported_data_types.contains(data_type.as_str())
    }

    async fn try_get_connected_device(
        &self,
        device_type: &str,
        registration: &DeviceRegistration,
    ) -> Option<ConnectedDeviceProbe> {
        if self.unsupported_device_types.contains(device_type) {
            return None;
        }
        Some(ConnectedDeviceProbe {
            device_type: device_type.to_string(),
            device_id: registration.device_id.clone(),
        })
    }

    async fn supports_data_type_on_connected_device(
        &self,
        data_type: &DataType,
        device_type: &str,
        _registration: &DeviceRegistration,
    ) -> bool {
        !self.unsupported_device_types.contains(device_type)
            && !self.unsupported_data_types.contains(data_type.as_str())
    }
}
