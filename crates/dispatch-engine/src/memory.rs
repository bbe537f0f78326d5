use crate::assignment::{commit_assignment, resolve_incident};
use crate::board::DispatchBoard;
use crate::lifecycle::{add_note, apply_unit_status, cancel_incident, register_incident};
use async_trait::async_trait;
use dispatch_api::{
    AgencyDirectory, ApiError, AssignmentReceipt, CancellationReceipt, DispatchApi,
    ResolutionReceipt, StatusReceipt,
};
use dispatch_core::{
    now_epoch_millis, Agency, AgencyId, Assignment, AssignmentId, DispatchEvent, EpochMillis,
    Incident, IncidentId, OperatorId, Unit, UnitCategory, UnitId, UnitStatus,
};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    board: DispatchBoard,
    agencies: Vec<Agency>,
    pending_failure: Option<ApiError>,
}

/// Authoritative dispatch backend held entirely in process memory.
///
/// Every call takes one lock for its whole duration, so concurrent effecting
/// calls are applied one at a time and the first to arrive wins.
#[derive(Debug)]
pub struct InMemoryDispatchApi {
    state: Mutex<MemoryState>,
    clock: fn() -> EpochMillis,
}

impl Default for InMemoryDispatchApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDispatchApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock: now_epoch_millis,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> EpochMillis) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_agencies(mut self, agencies: Vec<Agency>) -> Self {
        if let Ok(state) = self.state.get_mut() {
            state.agencies = agencies;
        }
        self
    }

    pub fn seed_unit(&self, unit: Unit) -> Result<Unit, ApiError> {
        let mut state = self.lock()?;
        state.board.upsert_unit(unit.clone());
        Ok(unit)
    }

    pub fn register_incident(&self, incident: Incident) -> Result<Incident, ApiError> {
        let now = (self.clock)();
        let mut state = self.lock()?;
        Ok(register_incident(&mut state.board, incident, now)?)
    }

    pub fn set_agency_availability(
        &self,
        agency_id: AgencyId,
        available_units: u32,
    ) -> Result<Agency, ApiError> {
        let mut state = self.lock()?;
        let agency = state
            .agencies
            .iter_mut()
            .find(|agency| agency.id == agency_id)
            .ok_or_else(|| ApiError::NotFound(format!("agency {agency_id} not found")))?;
        agency.available_units = available_units;
        Ok(agency.clone())
    }

    /// Makes the next effecting call fail with `error` without touching state.
    pub fn fail_next(&self, error: ApiError) -> Result<(), ApiError> {
        self.lock()?.pending_failure = Some(error);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<DispatchBoard, ApiError> {
        Ok(self.lock()?.board.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, ApiError> {
        self.state
            .lock()
            .map_err(|_| ApiError::Transport("dispatch state lock poisoned".to_string()))
    }

    fn lock_for_write(&self) -> Result<MutexGuard<'_, MemoryState>, ApiError> {
        let mut state = self.lock()?;
        match state.pending_failure.take() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl DispatchApi for InMemoryDispatchApi {
    async fn list_incidents(&self) -> Result<Vec<Incident>, ApiError> {
        let state = self.lock()?;
        let mut incidents: Vec<Incident> = state.board.incidents().cloned().collect();
        incidents.sort_by_key(|incident| (incident.created_at_ms, incident.id));
        Ok(incidents)
    }

    async fn get_incident(&self, id: IncidentId) -> Result<Option<Incident>, ApiError> {
        Ok(self.lock()?.board.incident(id).cloned())
    }

    async fn list_units(&self) -> Result<Vec<Unit>, ApiError> {
        let state = self.lock()?;
        let mut units: Vec<Unit> = state.board.units().cloned().collect();
        units.sort_by(|a, b| a.call_sign.cmp(&b.call_sign));
        Ok(units)
    }

    async fn get_unit(&self, id: UnitId) -> Result<Option<Unit>, ApiError> {
        Ok(self.lock()?.board.unit(id).cloned())
    }

    async fn list_assignments(
        &self,
        incident_id: IncidentId,
    ) -> Result<Vec<Assignment>, ApiError> {
        let state = self.lock()?;
        state.board.require_incident(incident_id)?;
        Ok(state
            .board
            .assignments_for_incident(incident_id)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn assign_unit(
        &self,
        incident_id: IncidentId,
        unit_id: UnitId,
        notes: Option<String>,
        dispatched_by: Option<OperatorId>,
    ) -> Result<AssignmentReceipt, ApiError> {
        let now = (self.clock)();
        let mut state = self.lock_for_write()?;
        let board = &mut state.board;
        let assignment = commit_assignment(
            board,
            unit_id,
            incident_id,
            notes.as_deref(),
            dispatched_by,
            now,
        )?;
        Ok(AssignmentReceipt {
            unit: board.require_unit(unit_id)?.clone(),
            incident: board.require_incident(incident_id)?.clone(),
            assignment,
        })
    }

    async fn resolve_incident(
        &self,
        incident_id: IncidentId,
        summary: String,
    ) -> Result<ResolutionReceipt, ApiError> {
        let now = (self.clock)();
        let mut state = self.lock_for_write()?;
        let board = &mut state.board;
        let active: Vec<(AssignmentId, UnitId)> = board
            .active_assignments_for_incident(incident_id)
            .into_iter()
            .map(|assignment| (assignment.id, assignment.unit_id))
            .collect();
        let incident = resolve_incident(board, incident_id, &summary, now)?;

        let mut released_units = Vec::with_capacity(active.len());
        let mut cleared_assignments = Vec::with_capacity(active.len());
        for (assignment_id, unit_id) in active {
            cleared_assignments.push(board.require_assignment(assignment_id)?.clone());
            released_units.push(board.require_unit(unit_id)?.clone());
        }
        Ok(ResolutionReceipt {
            incident,
            released_units,
            cleared_assignments,
        })
    }

    async fn cancel_incident(
        &self,
        incident_id: IncidentId,
        reason: String,
    ) -> Result<CancellationReceipt, ApiError> {
        let now = (self.clock)();
        let mut state = self.lock_for_write()?;
        let board = &mut state.board;
        let active: Vec<(AssignmentId, UnitId)> = board
            .active_assignments_for_incident(incident_id)
            .into_iter()
            .map(|assignment| (assignment.id, assignment.unit_id))
            .collect();
        let incident = cancel_incident(board, incident_id, &reason, now)?;

        let mut released_units = Vec::with_capacity(active.len());
        let mut cancelled_assignments = Vec::with_capacity(active.len());
        for (assignment_id, unit_id) in active {
            cancelled_assignments.push(board.require_assignment(assignment_id)?.clone());
            released_units.push(board.require_unit(unit_id)?.clone());
        }
        Ok(CancellationReceipt {
            incident,
            released_units,
            cancelled_assignments,
        })
    }

    async fn update_unit_status(
        &self,
        unit_id: UnitId,
        status: UnitStatus,
    ) -> Result<StatusReceipt, ApiError> {
        let now = (self.clock)();
        let mut state = self.lock_for_write()?;
        let board = &mut state.board;
        let assignment_id = board
            .active_assignment_for_unit(unit_id)
            .map(|assignment| assignment.id);
        let unit = apply_unit_status(board, unit_id, status, now)?;

        let assignment = assignment_id
            .map(|id| board.require_assignment(id).cloned())
            .transpose()?;
        let incident = assignment
            .as_ref()
            .map(|assignment| board.require_incident(assignment.incident_id).cloned())
            .transpose()?;
        Ok(StatusReceipt {
            unit,
            assignment,
            incident,
        })
    }

    async fn add_note(&self, incident_id: IncidentId, text: String) -> Result<Incident, ApiError> {
        let now = (self.clock)();
        let mut state = self.lock_for_write()?;
        Ok(add_note(&mut state.board, incident_id, &text, now)?)
    }

    async fn get_timeline(&self, incident_id: IncidentId) -> Result<Vec<DispatchEvent>, ApiError> {
        let state = self.lock()?;
        state.board.require_incident(incident_id)?;
        Ok(state.board.events().timeline(incident_id))
    }

    async fn get_available_units(
        &self,
        category: Option<UnitCategory>,
    ) -> Result<Vec<Unit>, ApiError> {
        Ok(self
            .lock()?
            .board
            .available_units(category)
            .into_iter()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AgencyDirectory for InMemoryDispatchApi {
    async fn list_agencies(&self) -> Result<Vec<Agency>, ApiError> {
        Ok(self.lock()?.agencies.clone())
    }

    async fn get_agency(&self, id: AgencyId) -> Result<Option<Agency>, ApiError> {
        Ok(self
            .lock()?
            .agencies
            .iter()
            .find(|agency| agency.id == id)
            .cloned())
    }
}
