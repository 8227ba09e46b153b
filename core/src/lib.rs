//! Cohort Coordination Core
//!
//! Coordinates the deployment of a research-study protocol onto a set of
//! physically distributed devices: the server-side deployment aggregate and
//! readiness resolution, the per-master-device snapshot builder, the
//! client-side runtime state machine, and the participant-group mirror kept
//! consistent through lifecycle events.

pub mod client;
pub mod deployment;
pub mod errors;
pub mod events;
pub mod logs;
pub mod models;
pub mod participants;
pub mod protocol;
pub mod service;
pub mod store;
pub mod utils;
pub mod workers;
