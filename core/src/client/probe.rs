//! Local capability probing
//!
//! Before confirming a deployment, the client verifies it can actually serve
//! it: every connected device type must be reachable through a local plugin,
//! and every requested data type must be collectable. A gap here is fatal for
//! the runtime; retrying without a client update cannot succeed.

use async_trait::async_trait;

use crate::models::registration::DeviceRegistration;
use crate::protocol::DataType;

/// Handle to a connected device the local client can reach.
#[derive(Debug, Clone)]
pub struct ConnectedDeviceProbe {
    pub device_type: String,
    pub device_id: String,
}

/// Capability checks the client runtime performs against the local device and
/// its plugins.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Whether data of the given type can be collected on this client.
    async fn supports_data_type(&self, data_type: &DataType) -> bool;

    /// Try to reach a connected device of the given type with the given
    /// registration. `None` when connecting to this device type is not
    /// supported on this client.
    async fn try_get_connected_device(
        &self,
        device_type: &str,
        registration: &DeviceRegistration,
    ) -> Option<ConnectedDeviceProbe>;

    /// Whether data of the given type can be collected on a connected device
    /// of the given type.
    async fn supports_data_type_on_connected_device(
        &self,
        data_type: &DataType,
        device_type: &str,
        registration: &DeviceRegistration,
    ) -> bool;
}
