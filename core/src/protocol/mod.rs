//! Immutable study protocol snapshots
//!
//! A protocol snapshot describes the deployment topology of a study: which
//! master devices aggregate data, which connected devices feed into them, and
//! which tasks (and thereby data types) each device is expected to run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoordinatorError;

/// A type of data which can be measured, identified by a namespaced name
/// (e.g. `cohort.geolocation`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataType(String);

impl DataType {
    pub fn new(fully_qualified_name: impl Into<String>) -> Self {
        Self(fully_qualified_name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single measure within a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    /// The type of data this measure collects
    pub data_type: DataType,
}

/// A task to run on a device, carrying the measures to collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique task name within the protocol
    pub name: String,

    /// Measures collected while this task runs
    pub measures: Vec<Measure>,
}

impl TaskDescriptor {
    /// The distinct data types measured by this task.
    pub fn data_types(&self) -> BTreeSet<&DataType> {
        self.measures.iter().map(|m| &m.data_type).collect()
    }
}

/// Describes a device role in the deployment topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique role name within the protocol (e.g. "Phone")
    pub role_name: String,

    /// Concrete device type (e.g. "cohort.phone", "cohort.hr_monitor")
    pub device_type: String,

    /// Master devices aggregate data and can run a client runtime;
    /// non-master devices are connected-only.
    pub is_master: bool,
}

impl DeviceDescriptor {
    pub fn master(role_name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            device_type: device_type.into(),
            is_master: true,
        }
    }

    pub fn connected(role_name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            device_type: device_type.into(),
            is_master: false,
        }
    }
}

/// A connection from a non-master device to the master device it reports to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConnection {
    /// Role name of the connected (non-master) device
    pub role_name: String,

    /// Role name of the master device it is connected to
    pub connected_to_role_name: String,
}

/// Assignment of a task to a device role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    /// Name of an existing task in the protocol
    pub task_name: String,

    /// Role name of the device the task runs on
    pub device_role_name: String,
}

/// An immutable snapshot of a study protocol.
///
/// Validated on construction; all lookups afterwards are infallible with
/// respect to internal consistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSnapshot {
    /// Owner account of the protocol
    pub owner_id: Uuid,

    /// Descriptive protocol name
    pub name: String,

    master_devices: Vec<DeviceDescriptor>,
    connected_devices: Vec<DeviceDescriptor>,
    connections: Vec<DeviceConnection>,
    tasks: Vec<TaskDescriptor>,
    task_assignments: Vec<TaskAssignment>,
}

impl ProtocolSnapshot {
    /// Create a validated protocol snapshot.
    ///
    /// Fails when role names collide, no master device is present, a
    /// connection references an unknown role or a non-master target, or a
    /// task assignment references an unknown task or role.
    pub fn new(
        owner_id: Uuid,
        name: impl Into<String>,
        master_devices: Vec<DeviceDescriptor>,
        connected_devices: Vec<DeviceDescriptor>,
        connections: Vec<DeviceConnection>,
        tasks: Vec<TaskDescriptor>,
        task_assignments: Vec<TaskAssignment>,
    ) -> Result<Self, CoordinatorError> {
        if master_devices.is_empty() {
            return Err(CoordinatorError::ConfigError(
                "A protocol requires at least one master device".to_string(),
            ));
        }
        if master_devices.iter().any(|d| !d.is_master) {
            return Err(CoordinatorError::ConfigError(
                "Non-master device listed as master device".to_string(),
            ));
        }
        if connected_devices.iter().any(|d| d.is_master) {
            return Err(CoordinatorError::ConfigError(
                "Master device listed as connected device".to_string(),
            ));
        }

        let mut roles: BTreeSet<&str> = BTreeSet::new();
        for device in master_devices.iter().chain(connected_devices.iter()) {
            if !roles.insert(device.role_name.as_str()) {
                return Err(CoordinatorError::ConfigError(format!(
                    "Duplicate device role name: {}",
                    device.role_name
                )));
            }
        }

        let master_roles: BTreeSet<&str> =
            master_devices.iter().map(|d| d.role_name.as_str()).collect();
        for connection in &connections {
            if !roles.contains(connection.role_name.as_str()) {
                return Err(CoordinatorError::ConfigError(format!(
                    "Connection references unknown role: {}",
                    connection.role_name
                )));
            }
            if !master_roles.contains(connection.connected_to_role_name.as_str()) {
                return Err(CoordinatorError::ConfigError(format!(
                    "Connection target is not a master device: {}",
                    connection.connected_to_role_name
                )));
            }
        }

        let task_names: BTreeSet<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        if task_names.len() != tasks.len() {
            return Err(CoordinatorError::ConfigError(
                "Duplicate task name in protocol".to_string(),
            ));
        }
        for assignment in &task_assignments {
            if !task_names.contains(assignment.task_name.as_str()) {
                return Err(CoordinatorError::ConfigError(format!(
                    "Task assignment references unknown task: {}",
                    assignment.task_name
                )));
            }
            if !roles.contains(assignment.device_role_name.as_str()) {
                return Err(CoordinatorError::ConfigError(format!(
                    "Task assignment references unknown role: {}",
                    assignment.device_role_name
                )));
            }
        }

        Ok(Self {
            owner_id,
            name: name.into(),
            master_devices,
            connected_devices,
            connections,
            tasks,
            task_assignments,
        })
    }

    /// The id of the deployment instantiating this protocol, derived
    /// deterministically from the snapshot content so duplicate creation is
    /// detectable without a separate id registry.
    pub fn deployment_id(&self) -> Result<Uuid, CoordinatorError> {
        let canonical = serde_json::to_vec(self)?;
        Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, &canonical))
    }

    pub fn master_devices(&self) -> &[DeviceDescriptor] {
        &self.master_devices
    }

    pub fn connected_devices(&self) -> &[DeviceDescriptor] {
        &self.connected_devices
    }

    /// All devices in the protocol, masters first.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.master_devices.iter().chain(self.connected_devices.iter())
    }

    /// Look up a device descriptor by role name.
    pub fn device(&self, role_name: &str) -> Option<&DeviceDescriptor> {
        self.devices().find(|d| d.role_name == role_name)
    }

    /// Whether the given role names a master device.
    pub fn is_master(&self, role_name: &str) -> bool {
        self.device(role_name).map(|d| d.is_master).unwrap_or(false)
    }

    /// The devices connected to the given master device.
    pub fn connected_devices_for(&self, master_role_name: &str) -> Vec<&DeviceDescriptor> {
        self.connections
            .iter()
            .filter(|c| c.connected_to_role_name == master_role_name)
            .filter_map(|c| self.device(&c.role_name))
            .collect()
    }

    /// The set of role names which must be registered before the given master
    /// device can obtain its deployment: the master itself plus every device
    /// connected to it.
    pub fn required_roles_for(&self, master_role_name: &str) -> BTreeSet<String> {
        let mut required: BTreeSet<String> = self
            .connected_devices_for(master_role_name)
            .iter()
            .map(|d| d.role_name.clone())
            .collect();
        required.insert(master_role_name.to_string());
        required
    }

    /// The tasks assigned to the given device role.
    pub fn tasks_for(&self, role_name: &str) -> Vec<&TaskDescriptor> {
        self.task_assignments
            .iter()
            .filter(|a| a.device_role_name == role_name)
            .filter_map(|a| self.tasks.iter().find(|t| t.name == a.task_name))
            .collect()
    }
}
