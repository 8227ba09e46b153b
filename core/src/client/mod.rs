//! Client-side runtime for a single master device

pub mod cache;
pub mod manager;
pub mod probe;
pub mod runtime;

pub use manager::ClientManager;
pub use probe::{CapabilityProbe, ConnectedDeviceProbe};
pub use runtime::{ClientEvent, StudyRuntime, StudyRuntimeId, StudyRuntimeStatus};
