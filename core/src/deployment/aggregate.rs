//! The study deployment aggregate
//!
//! Owns the registration registry, the set of confirmed-deployed roles, and
//! the stopped flag for one deployment. Mutated only through its own
//! operations; each operation either applies fully or returns an error
//! without partial effects.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::deployment::readiness;
use crate::deployment::snapshot;
use crate::errors::CoordinatorError;
use crate::models::device_deployment::MasterDeviceDeployment;
use crate::models::registration::DeviceRegistration;
use crate::models::status::{DeviceDeploymentStatus, DeviceStatusEntry, StudyDeploymentStatus};
use crate::protocol::ProtocolSnapshot;

/// One instantiation of a study protocol across a concrete set of registered
/// devices.
#[derive(Debug, Clone)]
pub struct StudyDeployment {
    id: Uuid,
    protocol: ProtocolSnapshot,
    registrations: HashMap<String, DeviceRegistration>,
    deployed: BTreeSet<String>,
    invalidated: BTreeSet<String>,
    last_updated: DateTime<Utc>,
    stopped: bool,
}

impl StudyDeployment {
    /// Create a new deployment for the given protocol snapshot.
    ///
    /// The deployment id is derived from the snapshot content, so creating
    /// the same protocol twice yields the same id.
    pub fn new(protocol: ProtocolSnapshot) -> Result<Self, CoordinatorError> {
        let id = protocol.deployment_id()?;
        Ok(Self {
            id,
            protocol,
            registrations: HashMap::new(),
            deployed: BTreeSet::new(),
            invalidated: BTreeSet::new(),
            last_updated: Utc::now(),
            stopped: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn protocol(&self) -> &ProtocolSnapshot {
        &self.protocol
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// The current registration for a role, if any.
    pub fn registration_for(&self, device_role_name: &str) -> Option<&DeviceRegistration> {
        self.registrations.get(device_role_name)
    }

    /// Register a device for a role.
    ///
    /// Idempotent when an identical registration is already on file (returns
    /// `false`); errors on an unknown role, a conflicting registration, or a
    /// device identity already bound to a different role. Returns `true` when
    /// the registry changed.
    pub fn register_device(
        &mut self,
        device_role_name: &str,
        registration: DeviceRegistration,
    ) -> Result<bool, CoordinatorError> {
        self.ensure_not_stopped("register device")?;
        self.ensure_known_role(device_role_name)?;

        if let Some(existing) = self.registrations.get(device_role_name) {
            if existing.same_as(&registration) {
                debug!(role = device_role_name, "Identical registration resent; ignoring");
                return Ok(false);
            }
            return Err(CoordinatorError::Conflict(format!(
                "A different registration is already on file for role '{}'",
                device_role_name
            )));
        }

        let identity_in_use = self
            .registrations
            .iter()
            .any(|(role, r)| role != device_role_name && r.device_id == registration.device_id);
        if identity_in_use {
            return Err(CoordinatorError::Conflict(format!(
                "Device identity '{}' is already bound to a different role",
                registration.device_id
            )));
        }

        self.registrations
            .insert(device_role_name.to_string(), registration);
        self.touch();
        Ok(true)
    }

    /// Clear the registration of a role.
    ///
    /// Any master device which already confirmed a snapshot referencing this
    /// role is invalidated and will report `NeedsRedeployment` once its
    /// dependencies are complete again. Returns `true` when the registry
    /// changed.
    pub fn unregister_device(&mut self, device_role_name: &str) -> Result<bool, CoordinatorError> {
        self.ensure_not_stopped("unregister device")?;
        self.ensure_known_role(device_role_name)?;

        if self.registrations.remove(device_role_name).is_none() {
            return Ok(false);
        }

        for master in self.protocol.master_devices() {
            let master_role = master.role_name.as_str();
            if self.deployed.contains(master_role)
                && self.protocol.required_roles_for(master_role).contains(device_role_name)
            {
                debug!(
                    master = master_role,
                    dependency = device_role_name,
                    "Registration cleared; deployed master needs redeployment"
                );
                self.invalidated.insert(master_role.to_string());
            }
        }

        self.touch();
        Ok(true)
    }

    /// The deployment status of a single master device role.
    pub fn device_status(
        &self,
        master_role_name: &str,
    ) -> Result<DeviceDeploymentStatus, CoordinatorError> {
        let descriptor = self.protocol.device(master_role_name).ok_or_else(|| {
            CoordinatorError::NotFound(format!("Unknown device role: {}", master_role_name))
        })?;
        if !descriptor.is_master {
            return Err(CoordinatorError::NotFound(format!(
                "Role '{}' is not a master device",
                master_role_name
            )));
        }
        Ok(readiness::compute_device_status(
            &self.protocol,
            master_role_name,
            &self.registrations,
            &self.deployed,
            &self.invalidated,
        ))
    }

    /// A pure projection of the current aggregate status.
    pub fn status(&self) -> StudyDeploymentStatus {
        let devices: Vec<DeviceStatusEntry> = self
            .protocol
            .master_devices()
            .iter()
            .map(|d| DeviceStatusEntry {
                device_role_name: d.role_name.clone(),
                status: readiness::compute_device_status(
                    &self.protocol,
                    &d.role_name,
                    &self.registrations,
                    &self.deployed,
                    &self.invalidated,
                ),
            })
            .collect();

        if self.stopped {
            return StudyDeploymentStatus::Stopped { study_deployment_id: self.id, devices };
        }

        let all_deployed = devices
            .iter()
            .all(|d| matches!(d.status, DeviceDeploymentStatus::Deployed));
        if all_deployed {
            StudyDeploymentStatus::Ready { study_deployment_id: self.id, devices }
        } else {
            StudyDeploymentStatus::DeployingDevices { study_deployment_id: self.id, devices }
        }
    }

    /// Build the deployment snapshot for a master device role.
    ///
    /// Fails when the role is not ready; reproducible while the registry does
    /// not change.
    pub fn device_deployment_for(
        &self,
        master_role_name: &str,
    ) -> Result<MasterDeviceDeployment, CoordinatorError> {
        self.ensure_not_stopped("obtain device deployment")?;
        snapshot::build_for(self, master_role_name)
    }

    /// Confirm that a master device deployed the snapshot stamped with
    /// [`MasterDeviceDeployment::last_update`] equal to `device_deployment_last_update`.
    ///
    /// A mismatching timestamp means the registry changed since the snapshot
    /// was issued; this is reported as a transient [`CoordinatorError::StaleSnapshot`].
    pub fn confirm_deployed(
        &mut self,
        master_role_name: &str,
        device_deployment_last_update: DateTime<Utc>,
    ) -> Result<(), CoordinatorError> {
        self.ensure_not_stopped("confirm deployment")?;

        match self.device_status(master_role_name)? {
            DeviceDeploymentStatus::Unregistered | DeviceDeploymentStatus::Registered { .. } => {
                return Err(CoordinatorError::InvalidState(format!(
                    "Role '{}' cannot confirm deployment while dependencies are unregistered",
                    master_role_name
                )));
            }
            DeviceDeploymentStatus::SnapshotReady
            | DeviceDeploymentStatus::Deployed
            | DeviceDeploymentStatus::NeedsRedeployment => {}
        }

        if device_deployment_last_update != self.last_updated {
            return Err(CoordinatorError::StaleSnapshot(format!(
                "Device deployment from {} is outdated; registry last changed at {}",
                device_deployment_last_update, self.last_updated
            )));
        }

        self.deployed.insert(master_role_name.to_string());
        self.invalidated.remove(master_role_name);
        Ok(())
    }

    /// Stop the deployment. Idempotent; returns `true` when the deployment
    /// was newly stopped.
    pub fn stop(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.stopped = true;
        true
    }

    fn ensure_not_stopped(&self, operation: &str) -> Result<(), CoordinatorError> {
        if self.stopped {
            return Err(CoordinatorError::InvalidState(format!(
                "Cannot {}: study deployment {} has been stopped",
                operation, self.id
            )));
        }
        Ok(())
    }

    fn ensure_known_role(&self, device_role_name: &str) -> Result<(), CoordinatorError> {
        if self.protocol.device(device_role_name).is_none() {
            return Err(CoordinatorError::NotFound(format!(
                "Unknown device role: {}",
                device_role_name
            )));
        }
        Ok(())
    }

    /// Advance the last-update timestamp, strictly monotonic even when the
    /// wall clock does not move between two mutations.
    fn touch(&mut self) {
        let now = Utc::now();
        self.last_updated = if now > self.last_updated {
            now
        } else {
            self.last_updated + Duration::microseconds(1)
        };
    }
}
