//! Participant groups, participations, and invitation views

pub mod group;
pub mod invitations;
pub mod relay;
pub mod service;

pub use group::ParticipantGroup;
pub use invitations::{
    filter_active_participation_invitations, AccountParticipation, ActiveParticipationInvitation,
    AssignedMasterDevice, Participation, StudyInvitation,
};
pub use service::{ParticipationService, ParticipationServiceHost};
