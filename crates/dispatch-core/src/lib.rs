pub mod domain;
pub mod error;
pub mod event;
pub mod ids;
pub mod time;

pub use domain::{
    Agency, AgencyContact, AidOutcome, AidPriority, Assignment, AssignmentStatus, CallerInfo,
    Incident, IncidentCategory, IncidentNote, IncidentStatus, MutualAidRequest, PositionSample,
    Priority, Unit, UnitCategory, UnitStatus,
};
pub use event::{DispatchEvent, EventKind};
pub use error::{DispatchError, DispatchResult, ErrorCode, Remedy};
pub use ids::{AgencyId, AidRequestId, AssignmentId, EventId, IncidentId, OperatorId, UnitId};
pub use time::{age_millis, now_epoch_millis, EpochMillis};

pub use dispatch_geo::Coordinate;
