//! Device-deployment snapshot builder

use tracing::debug;

use crate::deployment::aggregate::StudyDeployment;
use crate::errors::CoordinatorError;
use crate::models::device_deployment::{MasterDeviceDeployment, RegisteredDevice};

/// Assemble the immutable deployment snapshot for a master device role.
///
/// Preconditions: the role's status allows obtaining a deployment. The
/// snapshot is stamped with the aggregate's current last-update timestamp, so
/// calling twice without intervening registry changes yields equal snapshots.
pub(crate) fn build_for(
    deployment: &StudyDeployment,
    master_role_name: &str,
) -> Result<MasterDeviceDeployment, CoordinatorError> {
    let status = deployment.device_status(master_role_name)?;
    if !status.can_obtain_deployment() {
        return Err(CoordinatorError::InvalidState(format!(
            "Role '{}' is not ready for deployment (status: {:?})",
            master_role_name, status
        )));
    }

    let protocol = deployment.protocol();
    let device = bundle_device(deployment, master_role_name)?;
    let connected_devices = protocol
        .connected_devices_for(master_role_name)
        .iter()
        .map(|d| bundle_device(deployment, &d.role_name))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        role = master_role_name,
        connected = connected_devices.len(),
        last_update = %deployment.last_updated(),
        "Built device deployment snapshot"
    );

    Ok(MasterDeviceDeployment {
        device,
        connected_devices,
        last_update: deployment.last_updated(),
    })
}

fn bundle_device(
    deployment: &StudyDeployment,
    role_name: &str,
) -> Result<RegisteredDevice, CoordinatorError> {
    let protocol = deployment.protocol();
    let descriptor = protocol
        .device(role_name)
        .ok_or_else(|| CoordinatorError::NotFound(format!("Unknown device role: {}", role_name)))?
        .clone();

    // Readiness guarantees every included role is registered; a gap here is a
    // broken invariant, not a caller error.
    let registration = deployment.registration_for(role_name).cloned().ok_or_else(|| {
        CoordinatorError::Internal(format!(
            "Role '{}' included in a ready deployment without a registration",
            role_name
        ))
    })?;

    let tasks = protocol.tasks_for(role_name).into_iter().cloned().collect();

    Ok(RegisteredDevice { descriptor, registration, tasks })
}
