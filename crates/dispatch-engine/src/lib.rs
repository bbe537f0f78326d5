//! Dispatch assignment, incident lifecycle, mutual aid and position replay.
//!
//! The pure operations in [`assignment`], [`lifecycle`] and [`replay`] work
//! on a [`DispatchBoard`] or a [`ReplayTimeline`] passed in by the caller.
//! [`DispatchService`] puts them behind an authoritative [`DispatchApi`]
//! backend, and [`InMemoryDispatchApi`] is such a backend held in process.
//!
//! [`DispatchApi`]: dispatch_api::DispatchApi

pub mod assignment;
pub mod board;
pub mod events;
pub mod lifecycle;
pub mod memory;
pub mod mutual_aid;
pub mod playback;
pub mod replay;
pub mod service;
pub mod tracking;

#[cfg(test)]
mod testing;

pub use assignment::{
    average_speed_kmh, cancel_assignment, check_commit, commit_assignment, find_nearest_eligible,
    propose_assignment, resolve_incident, AssignmentProposal,
};
pub use board::DispatchBoard;
pub use events::EventLog;
pub use lifecycle::{
    add_note, apply_unit_status, can_transition, can_transition_assignment, cancel_incident,
    register_incident, transition_incident, LifecycleOutcome,
};
pub use memory::InMemoryDispatchApi;
pub use mutual_aid::{
    check_freshness, request_aid, AgencyListener, AidDraft, AidOrder, MutualAidCoordinator,
};
pub use playback::{
    spawn_playback, PlaybackCommand, PlaybackHandle, ReplayPlayer, MAX_SPEED, MIN_SPEED,
};
pub use replay::{Breadcrumb, FrameState, ReplayTimeline, Trail, UnitFrame};
pub use service::DispatchService;
pub use tracking::PositionTracker;
