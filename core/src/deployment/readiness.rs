//! Dependency-resolution / readiness algorithm
//!
//! Pure function of the current registry and topology; no side effects, safe
//! to evaluate repeatedly and concurrently.

use std::collections::{BTreeSet, HashMap};

use crate::models::registration::DeviceRegistration;
use crate::models::status::DeviceDeploymentStatus;
use crate::protocol::ProtocolSnapshot;

/// Compute the deployment status of a master device role.
///
/// The required role set is the master itself plus every device connected to
/// it. Rules apply in priority order:
/// 1. master unregistered -> `Unregistered`
/// 2. any other required role unregistered -> `Registered { remaining }`
/// 3. confirmed deployed -> `Deployed`, or `NeedsRedeployment` when a later
///    registration change invalidated the accepted snapshot
/// 4. otherwise -> `SnapshotReady`
pub fn compute_device_status(
    protocol: &ProtocolSnapshot,
    master_role_name: &str,
    registrations: &HashMap<String, DeviceRegistration>,
    deployed: &BTreeSet<String>,
    invalidated: &BTreeSet<String>,
) -> DeviceDeploymentStatus {
    debug_assert!(
        protocol.is_master(master_role_name),
        "readiness is only defined for master device roles"
    );

    if !registrations.contains_key(master_role_name) {
        return DeviceDeploymentStatus::Unregistered;
    }

    let remaining_devices: BTreeSet<String> = protocol
        .required_roles_for(master_role_name)
        .into_iter()
        .filter(|role| role != master_role_name && !registrations.contains_key(role))
        .collect();
    if !remaining_devices.is_empty() {
        return DeviceDeploymentStatus::Registered { remaining_devices };
    }

    if deployed.contains(master_role_name) {
        if invalidated.contains(master_role_name) {
            return DeviceDeploymentStatus::NeedsRedeployment;
        }
        return DeviceDeploymentStatus::Deployed;
    }

    DeviceDeploymentStatus::SnapshotReady
}
