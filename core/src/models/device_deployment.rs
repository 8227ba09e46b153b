//! Master device deployment snapshots

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::registration::DeviceRegistration;
use crate::protocol::{DataType, DeviceDescriptor, TaskDescriptor};

/// A registered device within a deployment snapshot, together with the tasks
/// assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredDevice {
    pub descriptor: DeviceDescriptor,
    pub registration: DeviceRegistration,
    pub tasks: Vec<TaskDescriptor>,
}

impl RegisteredDevice {
    /// The distinct data types collected across all assigned tasks.
    pub fn data_types(&self) -> BTreeSet<&DataType> {
        self.tasks.iter().flat_map(|t| t.data_types()).collect()
    }
}

/// The immutable configuration bundle handed to one master device once all
/// its dependencies are registered.
///
/// Stamped with the aggregate's last-update timestamp; two snapshots are
/// different deployments of the same role iff their timestamps differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterDeviceDeployment {
    /// The master device this deployment is for
    pub device: RegisteredDevice,

    /// The devices connected to the master device
    pub connected_devices: Vec<RegisteredDevice>,

    /// Aggregate last-update timestamp at the time the snapshot was built
    pub last_update: DateTime<Utc>,
}

impl MasterDeviceDeployment {
    /// All devices in the snapshot: the master device first, then its
    /// connected devices.
    pub fn devices(&self) -> impl Iterator<Item = &RegisteredDevice> {
        std::iter::once(&self.device).chain(self.connected_devices.iter())
    }
}
