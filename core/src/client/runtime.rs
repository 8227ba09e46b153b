//! Study runtime state machine
//!
//! Drives one master device through registration, capability validation, and
//! deployment confirmation. Single-owner: nothing mutates this state except
//! its own operations, but its calls into the deployment service may race
//! with other devices' calls against the same aggregate. A confirm rejected
//! because the registry changed in between is swallowed as a transient race;
//! a later `try_advance` re-fetches a fresh snapshot and retries. Capability
//! gaps are fatal and never retried.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::probe::CapabilityProbe;
use crate::errors::CoordinatorError;
use crate::models::device_deployment::MasterDeviceDeployment;
use crate::models::registration::DeviceRegistration;
use crate::models::status::{DeviceDeploymentStatus, StudyDeploymentStatus};
use crate::service::DeploymentService;

/// Composite id of a study runtime: the deployment plus the role it runs as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudyRuntimeId {
    pub study_deployment_id: Uuid,
    pub device_role_name: String,
}

impl std::fmt::Display for StudyRuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.study_deployment_id, self.device_role_name)
    }
}

/// Externally visible state of a study runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudyRuntimeStatus {
    /// No deployment snapshot has been received yet
    NotReadyForDeployment,

    /// This device registered, but some dependent devices still have to
    /// register before a snapshot can be obtained
    RegisteringDevices { remaining_devices: BTreeSet<String> },

    /// A snapshot was accepted; confirmation with the service is pending
    /// (the transient-race window)
    SnapshotReceived,

    /// Deployment completed successfully
    Deployed,

    /// The study stopped; no further data is collected
    Stopped,
}

/// Local notification emitted by a runtime, drained via
/// [`StudyRuntime::take_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    DeploymentReceived,
    DeploymentCompleted,
    DeploymentStopped,
}

/// Manages the deployment of one master device role on this client.
#[derive(Debug)]
pub struct StudyRuntime {
    id: StudyRuntimeId,
    deployment_information: Option<MasterDeviceDeployment>,
    remaining_devices_to_register: BTreeSet<String>,
    is_deployed: bool,
    is_stopped: bool,
    pending_events: Vec<ClientEvent>,
}

impl StudyRuntime {
    /// Instantiate a runtime by registering the client device with the
    /// deployment service. In case the device is immediately ready, also
    /// validates capability and confirms deployment.
    ///
    /// Fails when the service rejects the registration (unknown deployment or
    /// role, conflicting registration, stopped deployment) or when a local
    /// capability gap is detected.
    pub async fn initialize(
        deployment_service: &dyn DeploymentService,
        probe: &dyn CapabilityProbe,
        study_deployment_id: Uuid,
        device_role_name: &str,
        registration: DeviceRegistration,
    ) -> Result<StudyRuntime, CoordinatorError> {
        let deployment_status = deployment_service
            .register_device(study_deployment_id, device_role_name, registration)
            .await?;

        let mut runtime = StudyRuntime {
            id: StudyRuntimeId {
                study_deployment_id,
                device_role_name: device_role_name.to_string(),
            },
            deployment_information: None,
            remaining_devices_to_register: BTreeSet::new(),
            is_deployed: false,
            is_stopped: false,
            pending_events: Vec::new(),
        };

        // Deployment might immediately be obtainable for this device.
        runtime.advance(deployment_service, probe, &deployment_status).await?;
        Ok(runtime)
    }

    pub fn id(&self) -> &StudyRuntimeId {
        &self.id
    }

    /// The last accepted deployment snapshot, if any.
    pub fn deployment_information(&self) -> Option<&MasterDeviceDeployment> {
        self.deployment_information.as_ref()
    }

    /// Drain the local notifications emitted since the last call.
    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// The current state of this runtime.
    pub fn status(&self) -> StudyRuntimeStatus {
        if self.is_stopped {
            return StudyRuntimeStatus::Stopped;
        }
        if self.is_deployed {
            return StudyRuntimeStatus::Deployed;
        }
        if !self.remaining_devices_to_register.is_empty() {
            return StudyRuntimeStatus::RegisteringDevices {
                remaining_devices: self.remaining_devices_to_register.clone(),
            };
        }
        match &self.deployment_information {
            None => StudyRuntimeStatus::NotReadyForDeployment,
            Some(_) => StudyRuntimeStatus::SnapshotReceived,
        }
    }

    /// Re-read the deployment status and, when ready, fetch the snapshot,
    /// validate local capability, and confirm deployment.
    ///
    /// No-op when already deployed or stopped. Safe to call arbitrarily many
    /// times; this is the retry entry point after a transient race.
    pub async fn try_advance(
        &mut self,
        deployment_service: &dyn DeploymentService,
        probe: &dyn CapabilityProbe,
    ) -> Result<StudyRuntimeStatus, CoordinatorError> {
        if self.is_deployed || self.is_stopped {
            return Ok(self.status());
        }

        let deployment_status = deployment_service
            .get_study_deployment_status(self.id.study_deployment_id)
            .await?;
        self.advance(deployment_service, probe, &deployment_status).await?;
        Ok(self.status())
    }

    async fn advance(
        &mut self,
        deployment_service: &dyn DeploymentService,
        probe: &dyn CapabilityProbe,
        deployment_status: &StudyDeploymentStatus,
    ) -> Result<(), CoordinatorError> {
        if self.is_deployed || self.is_stopped {
            return Ok(());
        }

        // The deployment may have been stopped by another party.
        if deployment_status.is_stopped() {
            info!(runtime = %self.id, "Study deployment stopped remotely");
            self.is_stopped = true;
            self.pending_events.push(ClientEvent::DeploymentStopped);
            return Ok(());
        }

        let device_status = deployment_status
            .device_status(&self.id.device_role_name)
            .ok_or_else(|| {
                CoordinatorError::Internal(format!(
                    "Role '{}' missing from deployment status",
                    self.id.device_role_name
                ))
            })?;

        match device_status {
            DeviceDeploymentStatus::Unregistered => return Ok(()),
            DeviceDeploymentStatus::Registered { remaining_devices } => {
                self.remaining_devices_to_register = remaining_devices.clone();
                return Ok(());
            }
            DeviceDeploymentStatus::Deployed => {
                // A previous confirm of ours already went through.
                if self.deployment_information.is_some() {
                    self.is_deployed = true;
                    self.pending_events.push(ClientEvent::DeploymentCompleted);
                }
                return Ok(());
            }
            DeviceDeploymentStatus::SnapshotReady | DeviceDeploymentStatus::NeedsRedeployment => {}
        }

        // Get deployment information.
        let deployment = deployment_service
            .get_device_deployment_for(self.id.study_deployment_id, &self.id.device_role_name)
            .await?;
        if deployment.device.descriptor.role_name != self.id.device_role_name {
            return Err(CoordinatorError::Internal(format!(
                "Device deployment for role '{}' describes role '{}'",
                self.id.device_role_name, deployment.device.descriptor.role_name
            )));
        }
        debug!(runtime = %self.id, last_update = %deployment.last_update, "Received device deployment");

        // A capability gap aborts before any local state changes.
        self.validate_capability(probe, &deployment).await?;

        self.deployment_information = Some(deployment.clone());
        self.remaining_devices_to_register = BTreeSet::new();
        self.pending_events.push(ClientEvent::DeploymentReceived);

        // Notify the deployment service of successful deployment. A rejection
        // caused by competing clients changing registrations in between is a
        // transient race: swallow it and let a later `try_advance` retry with
        // a fresh snapshot.
        match deployment_service
            .deployment_successful(
                self.id.study_deployment_id,
                &self.id.device_role_name,
                deployment.last_update,
            )
            .await
        {
            Ok(_) => {
                info!(runtime = %self.id, "Deployment completed");
                self.is_deployed = true;
                self.pending_events.push(ClientEvent::DeploymentCompleted);
                Ok(())
            }
            Err(e) if e.is_transient() || matches!(e, CoordinatorError::InvalidState(_)) => {
                warn!(runtime = %self.id, "Deployment confirmation raced: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Verify that every connected device and every requested data type in
    /// the snapshot is supported by the local client.
    async fn validate_capability(
        &self,
        probe: &dyn CapabilityProbe,
        deployment: &MasterDeviceDeployment,
    ) -> Result<(), CoordinatorError> {
        for connected in &deployment.connected_devices {
            let reachable = probe
                .try_get_connected_device(&connected.descriptor.device_type, &connected.registration)
                .await;
            if reachable.is_none() {
                return Err(CoordinatorError::CapabilityGap(format!(
                    "Connecting to a device of type '{}' is not supported on this client",
                    connected.descriptor.device_type
                )));
            }
        }

        for device in deployment.devices() {
            let is_connected = !device.descriptor.is_master;
            for data_type in device.data_types() {
                let supported = if is_connected {
                    probe
                        .supports_data_type_on_connected_device(
                            data_type,
                            &device.descriptor.device_type,
                            &device.registration,
                        )
                        .await
                } else {
                    probe.supports_data_type(data_type).await
                };
                if !supported {
                    return Err(CoordinatorError::CapabilityGap(format!(
                        "Collecting data of type '{}' on device with role '{}' is not supported on this client",
                        data_type, device.descriptor.role_name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Permanently stop collecting data for this runtime.
    ///
    /// Idempotent; when already stopped, returns the current projection
    /// without calling the service again.
    pub async fn stop(
        &mut self,
        deployment_service: &dyn DeploymentService,
    ) -> Result<StudyRuntimeStatus, CoordinatorError> {
        if self.is_stopped {
            return Ok(self.status());
        }

        let deployment_status =
            deployment_service.stop(self.id.study_deployment_id).await?;
        if !deployment_status.is_stopped() {
            return Err(CoordinatorError::Internal(format!(
                "Deployment service did not report deployment {} as stopped",
                self.id.study_deployment_id
            )));
        }

        self.is_stopped = true;
        self.pending_events.push(ClientEvent::DeploymentStopped);
        Ok(self.status())
    }
}
