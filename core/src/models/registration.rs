//! Device registration models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration supplied once per device role when it registers.
///
/// Immutable once accepted; replacing a registration is a distinct operation
/// (unregister followed by register), never a silent merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    /// Identity of the concrete device fulfilling the role.
    /// A device identity may be bound to at most one role per deployment.
    pub device_id: String,

    /// Opaque device-specific configuration
    #[serde(default)]
    pub attributes: serde_json::Value,

    /// When the registration was created
    pub registered_at: DateTime<Utc>,
}

impl DeviceRegistration {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            attributes: serde_json::Value::Null,
            registered_at: Utc::now(),
        }
    }

    pub fn with_attributes(device_id: impl Into<String>, attributes: serde_json::Value) -> Self {
        Self {
            device_id: device_id.into(),
            attributes,
            registered_at: Utc::now(),
        }
    }

    /// Whether two registrations carry the same configuration.
    ///
    /// Creation time is ignored so a re-sent registration counts as identical
    /// for the idempotent registration path.
    pub fn same_as(&self, other: &DeviceRegistration) -> bool {
        self.device_id == other.device_id && self.attributes == other.attributes
    }
}
