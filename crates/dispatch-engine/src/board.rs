use crate::events::EventLog;
use dispatch_core::{
    Assignment, AssignmentId, DispatchError, DispatchEvent, DispatchResult, Incident, IncidentId,
    Unit, UnitCategory, UnitId, UnitStatus,
};
use std::collections::HashMap;

/// Local view of units, incidents and assignments.
///
/// Records are read freely but only mutated through the assignment and
/// lifecycle operations of this crate, or replaced wholesale from an
/// authoritative collaborator response via the `upsert_*` methods.
#[derive(Debug, Clone, Default)]
pub struct DispatchBoard {
    units: HashMap<UnitId, Unit>,
    incidents: HashMap<IncidentId, Incident>,
    assignments: HashMap<AssignmentId, Assignment>,
    events: EventLog,
}

impl DispatchBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty board whose activity log holds at most `capacity` entries.
    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            events: EventLog::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn upsert_unit(&mut self, unit: Unit) {
        self.units.insert(unit.id, unit);
    }

    pub fn upsert_incident(&mut self, incident: Incident) {
        self.incidents.insert(incident.id, incident);
    }

    pub fn upsert_assignment(&mut self, assignment: Assignment) {
        self.assignments.insert(assignment.id, assignment);
    }

    /// Swaps in a freshly loaded set of records. The event log is kept.
    pub fn replace_records(
        &mut self,
        units: Vec<Unit>,
        incidents: Vec<Incident>,
        assignments: Vec<Assignment>,
    ) {
        self.units = units.into_iter().map(|unit| (unit.id, unit)).collect();
        self.incidents = incidents
            .into_iter()
            .map(|incident| (incident.id, incident))
            .collect();
        self.assignments = assignments
            .into_iter()
            .map(|assignment| (assignment.id, assignment))
            .collect();
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub fn incident(&self, id: IncidentId) -> Option<&Incident> {
        self.incidents.get(&id)
    }

    pub fn assignment(&self, id: AssignmentId) -> Option<&Assignment> {
        self.assignments.get(&id)
    }

    pub fn require_unit(&self, id: UnitId) -> DispatchResult<&Unit> {
        self.units
            .get(&id)
            .ok_or_else(|| DispatchError::not_found(format!("unit {id} not found")))
    }

    pub fn require_incident(&self, id: IncidentId) -> DispatchResult<&Incident> {
        self.incidents
            .get(&id)
            .ok_or_else(|| DispatchError::not_found(format!("incident {id} not found")))
    }

    pub fn require_assignment(&self, id: AssignmentId) -> DispatchResult<&Assignment> {
        self.assignments
            .get(&id)
            .ok_or_else(|| DispatchError::not_found(format!("assignment {id} not found")))
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn incidents(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.values()
    }

    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.values()
    }

    pub fn active_assignment_for_unit(&self, unit_id: UnitId) -> Option<&Assignment> {
        self.assignments
            .values()
            .find(|assignment| assignment.unit_id == unit_id && assignment.is_active())
    }

    /// Every assignment ever made against the incident, oldest first.
    pub fn assignments_for_incident(&self, incident_id: IncidentId) -> Vec<&Assignment> {
        let mut found: Vec<&Assignment> = self
            .assignments
            .values()
            .filter(|assignment| assignment.incident_id == incident_id)
            .collect();
        found.sort_by_key(|assignment| (assignment.dispatched_at_ms, assignment.id));
        found
    }

    pub fn active_assignments_for_incident(&self, incident_id: IncidentId) -> Vec<&Assignment> {
        self.assignments_for_incident(incident_id)
            .into_iter()
            .filter(|assignment| assignment.is_active())
            .collect()
    }

    pub fn available_units(&self, category: Option<UnitCategory>) -> Vec<&Unit> {
        let mut units: Vec<&Unit> = self
            .units
            .values()
            .filter(|unit| unit.status == UnitStatus::Available)
            .filter(|unit| category.is_none_or(|wanted| unit.category == wanted))
            .collect();
        units.sort_by(|a, b| a.call_sign.cmp(&b.call_sign));
        units
    }

    /// Incidents that are not resolved or cancelled.
    pub fn open_incidents(&self) -> Vec<&Incident> {
        let mut incidents: Vec<&Incident> = self
            .incidents
            .values()
            .filter(|incident| !incident.status.is_terminal())
            .collect();
        incidents.sort_by_key(|incident| (incident.priority, incident.created_at_ms));
        incidents
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub(crate) fn record(&mut self, event: DispatchEvent) {
        self.events.record(event);
    }

    pub(crate) fn unit_mut(&mut self, id: UnitId) -> DispatchResult<&mut Unit> {
        self.units
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found(format!("unit {id} not found")))
    }

    pub(crate) fn incident_mut(&mut self, id: IncidentId) -> DispatchResult<&mut Incident> {
        self.incidents
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found(format!("incident {id} not found")))
    }

    pub(crate) fn assignment_mut(&mut self, id: AssignmentId) -> DispatchResult<&mut Assignment> {
        self.assignments
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found(format!("assignment {id} not found")))
    }

    pub(crate) fn insert_assignment(&mut self, assignment: Assignment) {
        self.assignments.insert(assignment.id, assignment);
    }
}
