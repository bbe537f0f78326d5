use crate::ids::{EventId, IncidentId, OperatorId, UnitId};
use crate::time::EpochMillis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IncidentCreated,
    IncidentUpdated,
    IncidentResolved,
    IncidentCancelled,
    UnitDispatched,
    UnitStatusChanged,
    UnitLocationUpdated,
    AssignmentCancelled,
    NoteAdded,
    MutualAidRequested,
}

/// One entry of the dispatch activity log. Incident timelines are the
/// events carrying that incident's id, in recording order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub at_ms: EpochMillis,
    #[serde(default)]
    pub incident_id: Option<IncidentId>,
    #[serde(default)]
    pub unit_id: Option<UnitId>,
    #[serde(default)]
    pub operator_id: Option<OperatorId>,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl DispatchEvent {
    pub fn new(kind: EventKind, at_ms: EpochMillis, message: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            kind,
            at_ms,
            incident_id: None,
            unit_id: None,
            operator_id: None,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn for_incident(mut self, incident_id: IncidentId) -> Self {
        self.incident_id = Some(incident_id);
        self
    }

    pub fn for_unit(mut self, unit_id: UnitId) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub fn by_operator(mut self, operator_id: Option<OperatorId>) -> Self {
        self.operator_id = operator_id;
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}
