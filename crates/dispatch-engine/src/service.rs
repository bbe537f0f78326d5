use crate::assignment::{
    check_commit, find_nearest_eligible, propose_assignment, AssignmentProposal,
};
use crate::board::DispatchBoard;
use crate::lifecycle::check_incident_transition;
use crate::mutual_aid::{AidOrder, MutualAidCoordinator};
use crate::replay::ReplayTimeline;
use crate::tracking::PositionTracker;
use dispatch_api::{AgencyDirectory, DispatchApi};
use dispatch_config::EngineConfig;
use dispatch_core::{
    now_epoch_millis, AgencyId, AidRequestId, Assignment, Coordinate, DispatchError,
    DispatchEvent, DispatchResult, EpochMillis, EventKind, Incident, IncidentId, IncidentStatus,
    MutualAidRequest, OperatorId, PositionSample, Unit, UnitCategory, UnitId, UnitStatus,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Operator-facing front of the engine.
///
/// Effecting operations hold the board lock across the authoritative call,
/// so two operators racing for one unit are decided by the backend, and the
/// loser sees the conflict rather than a half-applied assignment.
pub struct DispatchService<A> {
    api: A,
    config: EngineConfig,
    operator: Option<OperatorId>,
    board: Mutex<DispatchBoard>,
    tracker: Mutex<PositionTracker>,
    aid: Mutex<MutualAidCoordinator>,
    clock: fn() -> EpochMillis,
}

impl<A: DispatchApi> DispatchService<A> {
    pub fn new(api: A, config: EngineConfig) -> Self {
        let aid = MutualAidCoordinator::new(config.agency_max_age_ms);
        let board = DispatchBoard::with_event_capacity(config.event_log_capacity);
        let tracker = PositionTracker::with_retention(config.trail_retention);
        Self {
            api,
            config,
            operator: None,
            board: Mutex::new(board),
            tracker: Mutex::new(tracker),
            aid: Mutex::new(aid),
            clock: now_epoch_millis,
        }
    }

    pub fn with_operator(mut self, operator: OperatorId) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn with_clock(mut self, clock: fn() -> EpochMillis) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_mutual_aid(mut self, coordinator: MutualAidCoordinator) -> Self {
        self.aid = Mutex::new(coordinator);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reloads units, incidents and their assignments from the backend.
    /// The local event log is kept.
    pub async fn refresh(&self) -> DispatchResult<()> {
        let units = self.api.list_units().await?;
        let incidents = self.api.list_incidents().await?;
        let mut assignments = Vec::new();
        for incident in incidents.iter().filter(|incident| !incident.status.is_terminal()) {
            assignments.extend(self.api.list_assignments(incident.id).await?);
        }

        let (unit_count, incident_count) = (units.len(), incidents.len());
        self.board
            .lock()
            .await
            .replace_records(units, incidents, assignments);
        info!(
            units = unit_count,
            incidents = incident_count,
            "dispatch board refreshed"
        );
        Ok(())
    }

    pub async fn board(&self) -> DispatchBoard {
        self.board.lock().await.clone()
    }

    pub async fn candidate_units(
        &self,
        category: Option<UnitCategory>,
    ) -> DispatchResult<Vec<Unit>> {
        Ok(self.api.get_available_units(category).await?)
    }

    pub async fn propose(
        &self,
        unit_id: UnitId,
        incident_id: IncidentId,
    ) -> DispatchResult<AssignmentProposal> {
        let board = self.board.lock().await;
        let unit = board.require_unit(unit_id)?;
        let incident = board.require_incident(incident_id)?;
        propose_assignment(unit, incident, &self.config.speeds)
    }

    /// Proposal for a unit dropped at `drop_point`: the nearest open incident
    /// inside the capture radius, or `None` when nothing is close enough.
    pub async fn propose_drop(
        &self,
        unit_id: UnitId,
        drop_point: Coordinate,
    ) -> DispatchResult<Option<AssignmentProposal>> {
        drop_point.validate()?;
        let board = self.board.lock().await;
        let unit = board.require_unit(unit_id)?;
        let target = find_nearest_eligible(
            drop_point,
            board.incidents(),
            self.config.capture_radius_km,
        );
        target
            .map(|incident| propose_assignment(unit, incident, &self.config.speeds))
            .transpose()
    }

    pub async fn assign(
        &self,
        unit_id: UnitId,
        incident_id: IncidentId,
        notes: Option<String>,
    ) -> DispatchResult<Assignment> {
        let mut board = self.board.lock().await;
        check_commit(&board, unit_id, incident_id)?;

        let receipt = match self
            .api
            .assign_unit(incident_id, unit_id, notes, self.operator)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                let err = DispatchError::from(err);
                warn!(
                    unit_id = %unit_id,
                    incident_id = %incident_id,
                    error = %err,
                    "assignment not committed"
                );
                return Err(err);
            }
        };

        let assignment = receipt.assignment.clone();
        let message = format!(
            "Unit {} dispatched to incident {}",
            receipt.unit.call_sign, receipt.incident.number
        );
        board.upsert_unit(receipt.unit);
        board.upsert_incident(receipt.incident);
        board.upsert_assignment(receipt.assignment);
        board.record(
            DispatchEvent::new(EventKind::UnitDispatched, assignment.dispatched_at_ms, message)
                .for_incident(incident_id)
                .for_unit(unit_id)
                .by_operator(self.operator)
                .with_detail("assignment_id", assignment.id),
        );
        Ok(assignment)
    }

    pub async fn resolve(
        &self,
        incident_id: IncidentId,
        summary: &str,
    ) -> DispatchResult<Incident> {
        let mut board = self.board.lock().await;
        let incident = board.require_incident(incident_id)?;
        check_incident_transition(incident, IncidentStatus::Resolved)?;
        if summary.trim().is_empty() {
            return Err(DispatchError::validation("resolution summary is required"));
        }

        let receipt = self
            .api
            .resolve_incident(incident_id, summary.trim().to_string())
            .await?;
        for unit in receipt.released_units {
            board.upsert_unit(unit);
        }
        for assignment in receipt.cleared_assignments {
            board.upsert_assignment(assignment);
        }
        let incident = receipt.incident;
        board.record(
            DispatchEvent::new(
                EventKind::IncidentResolved,
                incident.resolved_at_ms.unwrap_or(incident.updated_at_ms),
                format!("Incident {} resolved", incident.number),
            )
            .for_incident(incident_id)
            .by_operator(self.operator),
        );
        board.upsert_incident(incident.clone());
        Ok(incident)
    }

    pub async fn add_note(&self, incident_id: IncidentId, text: &str) -> DispatchResult<Incident> {
        if text.trim().is_empty() {
            return Err(DispatchError::validation("note text is required"));
        }
        let mut board = self.board.lock().await;
        let incident = self.api.add_note(incident_id, text.trim().to_string()).await?;
        board.upsert_incident(incident.clone());
        Ok(incident)
    }

    pub async fn timeline(&self, incident_id: IncidentId) -> DispatchResult<Vec<DispatchEvent>> {
        Ok(self.api.get_timeline(incident_id).await?)
    }

    /// Passes a unit status report to the backend and adopts the unit,
    /// assignment and incident it returns.
    pub async fn report_unit_status(
        &self,
        unit_id: UnitId,
        status: UnitStatus,
    ) -> DispatchResult<Unit> {
        let at = (self.clock)();
        let mut board = self.board.lock().await;
        let previous = board.require_unit(unit_id)?.status;

        let receipt = self.api.update_unit_status(unit_id, status).await?;
        let unit = receipt.unit.clone();
        let incident_id = receipt
            .assignment
            .as_ref()
            .map(|assignment| assignment.incident_id);
        board.upsert_unit(receipt.unit);
        if let Some(assignment) = receipt.assignment {
            board.upsert_assignment(assignment);
        }
        if let Some(incident) = receipt.incident {
            board.upsert_incident(incident);
        }

        let mut event = DispatchEvent::new(
            EventKind::UnitStatusChanged,
            at,
            format!(
                "Unit {} status changed from {previous} to {}",
                unit.call_sign, unit.status
            ),
        )
        .for_unit(unit_id)
        .by_operator(self.operator)
        .with_detail("old_status", previous)
        .with_detail("new_status", unit.status);
        if let Some(incident_id) = incident_id {
            event = event.for_incident(incident_id);
        }
        board.record(event);
        Ok(unit)
    }

    pub async fn cancel_incident(
        &self,
        incident_id: IncidentId,
        reason: &str,
    ) -> DispatchResult<Incident> {
        let mut board = self.board.lock().await;
        check_incident_transition(
            board.require_incident(incident_id)?,
            IncidentStatus::Cancelled,
        )?;

        let receipt = self
            .api
            .cancel_incident(incident_id, reason.trim().to_string())
            .await?;
        let released = receipt.released_units.len();
        for unit in receipt.released_units {
            board.upsert_unit(unit);
        }
        for assignment in receipt.cancelled_assignments {
            board.upsert_assignment(assignment);
        }
        let incident = receipt.incident;
        info!(incident = %incident.number, released, "incident cancelled");
        let mut event = DispatchEvent::new(
            EventKind::IncidentCancelled,
            incident.updated_at_ms,
            format!("Incident {} cancelled", incident.number),
        )
        .for_incident(incident_id)
        .by_operator(self.operator)
        .with_detail("released_units", released);
        if !reason.trim().is_empty() {
            event = event.with_detail("reason", reason.trim());
        }
        board.record(event);
        board.upsert_incident(incident.clone());
        Ok(incident)
    }

    /// Feeds one live position sample into the tracker and the board.
    pub async fn ingest_position(&self, sample: PositionSample) -> DispatchResult<()> {
        let mut board = self.board.lock().await;
        let mut tracker = self.tracker.lock().await;
        tracker.apply(&mut board, sample)
    }

    pub async fn replay_timeline(&self) -> ReplayTimeline {
        self.tracker.lock().await.timeline()
    }
}

impl<A: DispatchApi + AgencyDirectory> DispatchService<A> {
    pub async fn refresh_agencies(&self) -> DispatchResult<()> {
        let now = (self.clock)();
        self.aid.lock().await.refresh(&self.api, now).await
    }

    /// Requests mutual aid for an open incident, checked against the
    /// agency's current availability.
    pub async fn request_aid(
        &self,
        agency_id: AgencyId,
        incident_id: IncidentId,
        order: AidOrder,
    ) -> DispatchResult<MutualAidRequest> {
        let at = (self.clock)();
        let mut board = self.board.lock().await;
        let incident = board.require_incident(incident_id)?;
        if incident.status.is_terminal() {
            return Err(DispatchError::invalid_state(format!(
                "incident {} is {}",
                incident.number, incident.status
            )));
        }
        let number = incident.number.clone();

        let request = self
            .aid
            .lock()
            .await
            .submit_current(&self.api, agency_id, incident_id, order, at)
            .await?;
        board.record(
            DispatchEvent::new(
                EventKind::MutualAidRequested,
                at,
                format!(
                    "Requested {} {} units for incident {number}",
                    request.quantity, request.category
                ),
            )
            .for_incident(incident_id)
            .by_operator(self.operator)
            .with_detail("agency_id", agency_id)
            .with_detail("request_id", request.id),
        );
        Ok(request)
    }

    pub async fn mark_aid_sent(
        &self,
        request_id: AidRequestId,
    ) -> DispatchResult<MutualAidRequest> {
        self.aid.lock().await.mark_sent(request_id)
    }
}
