use async_trait::async_trait;
use dispatch_core::{
    Agency, AgencyId, Assignment, DispatchError, DispatchEvent, ErrorCode, Incident, IncidentId,
    OperatorId, Unit, UnitCategory, UnitId, UnitStatus,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    /// The backend refused the operation for a domain reason.
    #[error("rejected ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }
}

impl From<ApiError> for DispatchError {
    fn from(value: ApiError) -> Self {
        match value {
            ApiError::NotFound(message) => Self::new(ErrorCode::NotFound, message),
            ApiError::Rejected { code, message } => Self::new(code, message),
            ApiError::Transport(message) => Self::new(ErrorCode::Upstream, message),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(value: DispatchError) -> Self {
        match value.code {
            ErrorCode::NotFound => Self::NotFound(value.message),
            ErrorCode::Upstream => Self::Transport(value.message),
            code => Self::Rejected {
                code,
                message: value.message,
            },
        }
    }
}

/// Authoritative state returned by a successful assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentReceipt {
    pub assignment: Assignment,
    pub unit: Unit,
    pub incident: Incident,
}

/// Authoritative state returned by a successful resolution: the incident and
/// every unit/assignment the resolution released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionReceipt {
    pub incident: Incident,
    pub released_units: Vec<Unit>,
    pub cleared_assignments: Vec<Assignment>,
}

/// Authoritative state after a cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationReceipt {
    pub incident: Incident,
    pub released_units: Vec<Unit>,
    pub cancelled_assignments: Vec<Assignment>,
}

/// Authoritative state after a unit status report. The assignment and its
/// incident are present when the unit was working one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReceipt {
    pub unit: Unit,
    pub assignment: Option<Assignment>,
    pub incident: Option<Incident>,
}

#[async_trait]
pub trait DispatchApi: Send + Sync {
    async fn list_incidents(&self) -> Result<Vec<Incident>, ApiError>;
    async fn get_incident(&self, id: IncidentId) -> Result<Option<Incident>, ApiError>;
    async fn list_units(&self) -> Result<Vec<Unit>, ApiError>;
    async fn get_unit(&self, id: UnitId) -> Result<Option<Unit>, ApiError>;
    async fn list_assignments(
        &self,
        incident_id: IncidentId,
    ) -> Result<Vec<Assignment>, ApiError>;
    async fn assign_unit(
        &self,
        incident_id: IncidentId,
        unit_id: UnitId,
        notes: Option<String>,
        dispatched_by: Option<OperatorId>,
    ) -> Result<AssignmentReceipt, ApiError>;
    async fn resolve_incident(
        &self,
        incident_id: IncidentId,
        summary: String,
    ) -> Result<ResolutionReceipt, ApiError>;
    async fn cancel_incident(
        &self,
        incident_id: IncidentId,
        reason: String,
    ) -> Result<CancellationReceipt, ApiError>;
    async fn update_unit_status(
        &self,
        unit_id: UnitId,
        status: UnitStatus,
    ) -> Result<StatusReceipt, ApiError>;
    async fn add_note(&self, incident_id: IncidentId, text: String) -> Result<Incident, ApiError>;
    async fn get_timeline(&self, incident_id: IncidentId) -> Result<Vec<DispatchEvent>, ApiError>;
    /// Units currently in the available state, optionally narrowed to one category.
    async fn get_available_units(
        &self,
        category: Option<UnitCategory>,
    ) -> Result<Vec<Unit>, ApiError>;
}

/// Read-only view of neighbouring agencies for mutual aid.
#[async_trait]
pub trait AgencyDirectory: Send + Sync {
    async fn list_agencies(&self) -> Result<Vec<Agency>, ApiError>;
    async fn get_agency(&self, id: AgencyId) -> Result<Option<Agency>, ApiError>;
}
