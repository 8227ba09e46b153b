//! Accepted snapshot cache

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::device_deployment::MasterDeviceDeployment;
use crate::utils::sha256_hash;

/// Cached accepted snapshot for one study runtime
#[derive(Debug, Clone)]
pub struct SnapshotCacheEntry {
    pub deployment: MasterDeviceDeployment,
    pub digest: String,
    pub cached_at: u64,
}

/// In-memory cache of the snapshots accepted by this client's runtimes,
/// keyed by runtime id.
pub struct SnapshotCache {
    entries: RwLock<HashMap<String, SnapshotCacheEntry>>,
    capacity: u64,
}

impl SnapshotCache {
    /// Create a new snapshot cache
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Get a cached snapshot
    pub fn get(&self, runtime_id: &str) -> Option<SnapshotCacheEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(runtime_id).cloned()
    }

    /// Insert a snapshot, evicting the oldest entry when at capacity
    pub fn insert(&self, runtime_id: String, deployment: MasterDeviceDeployment) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if !entries.contains_key(&runtime_id) && entries.len() as u64 >= self.capacity {
            if let Some(oldest_id) = entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(id, _)| id.clone())
            {
                entries.remove(&oldest_id);
            }
        }

        let digest = serde_json::to_vec(&deployment)
            .map(|bytes| sha256_hash(&bytes))
            .unwrap_or_default();
        let entry = SnapshotCacheEntry {
            deployment,
            digest,
            cached_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };

        entries.insert(runtime_id, entry);
    }

    /// Remove a cached snapshot
    pub fn remove(&self, runtime_id: &str) -> Option<SnapshotCacheEntry> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(runtime_id)
    }

    /// All cached runtime ids
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.keys().cloned().collect()
    }

    /// Number of cached snapshots
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::device_deployment::RegisteredDevice;
    use crate::models::registration::DeviceRegistration;
    use crate::protocol::DeviceDescriptor;
    use chrono::Utc;

    fn snapshot() -> MasterDeviceDeployment {
        MasterDeviceDeployment {
            device: RegisteredDevice {
                descriptor: DeviceDescriptor::master("Phone", "cohort.phone"),
                registration: DeviceRegistration::new("phone-1"),
                tasks: vec![],
            },
            connected_devices: vec![],
            last_update: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let cache = SnapshotCache::new(10);
        let s = snapshot();
        cache.insert("a/Phone".to_string(), s.clone());

        let entry = cache.get("a/Phone").unwrap();
        assert_eq!(entry.deployment, s);
        assert_eq!(entry.digest.len(), 64);
    }

    #[test]
    fn test_reinsert_replaces_entry() {
        let cache = SnapshotCache::new(1);
        cache.insert("a/Phone".to_string(), snapshot());
        cache.insert("a/Phone".to_string(), snapshot());
        assert_eq!(cache.len(), 1);
    }
}
