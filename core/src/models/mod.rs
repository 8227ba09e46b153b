//! Data models shared between the deployment service and clients

pub mod device_deployment;
pub mod registration;
pub mod status;

pub use device_deployment::{MasterDeviceDeployment, RegisteredDevice};
pub use registration::DeviceRegistration;
pub use status::{DeviceDeploymentStatus, DeviceStatusEntry, StudyDeploymentStatus};
