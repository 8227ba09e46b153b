//! Deployment aggregate and readiness resolution

pub mod aggregate;
pub mod readiness;
pub mod snapshot;

pub use aggregate::StudyDeployment;
