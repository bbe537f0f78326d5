use crate::board::DispatchBoard;
use crate::lifecycle::{
    check_incident_transition, release_unit, transition_assignment, transition_incident,
};
use dispatch_config::SpeedTable;
use dispatch_core::{
    Assignment, AssignmentId, AssignmentStatus, Coordinate, DispatchError, DispatchEvent,
    DispatchResult, EpochMillis, EventKind, Incident, IncidentId, IncidentStatus, OperatorId,
    Unit, UnitCategory, UnitId, UnitStatus,
};
use dispatch_geo::{distance_km, eta_minutes};
use dispatch_observability::names;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{info, warn};

pub fn average_speed_kmh(speeds: &SpeedTable, category: UnitCategory) -> f64 {
    match category {
        UnitCategory::Police => speeds.police_kmh,
        UnitCategory::Fire => speeds.fire_kmh,
        UnitCategory::Ems => speeds.ems_kmh,
        UnitCategory::Special => speeds.special_kmh,
    }
}

/// Distance/ETA preview shown to the operator before committing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssignmentProposal {
    pub unit_id: UnitId,
    pub incident_id: IncidentId,
    pub distance_km: f64,
    pub eta_minutes: f64,
    pub speed_kmh: f64,
}

/// Closest open incident within `max_distance_km` of `origin`.
///
/// Equidistant candidates are ordered by priority (1 first), then by
/// creation time. Terminal incidents and incidents with unusable positions
/// are skipped, as is everything when `origin` itself is invalid.
pub fn find_nearest_eligible<'a, I>(
    origin: Coordinate,
    candidates: I,
    max_distance_km: f64,
) -> Option<&'a Incident>
where
    I: IntoIterator<Item = &'a Incident>,
{
    let mut best: Option<(&'a Incident, f64)> = None;
    for incident in candidates {
        if incident.status.is_terminal() || !incident.position.is_valid() {
            continue;
        }
        let distance = distance_km(origin, incident.position);
        if !distance.is_finite() || distance > max_distance_km {
            continue;
        }
        let replace = match best {
            None => true,
            Some((current, current_distance)) => {
                ranks_before(incident, distance, current, current_distance)
            }
        };
        if replace {
            best = Some((incident, distance));
        }
    }
    best.map(|(incident, _)| incident)
}

fn ranks_before(
    candidate: &Incident,
    distance: f64,
    current: &Incident,
    current_distance: f64,
) -> bool {
    distance
        .total_cmp(&current_distance)
        .then(candidate.priority.cmp(&current.priority))
        .then(candidate.created_at_ms.cmp(&current.created_at_ms))
        == Ordering::Less
}

pub fn propose_assignment(
    unit: &Unit,
    incident: &Incident,
    speeds: &SpeedTable,
) -> DispatchResult<AssignmentProposal> {
    unit.position.validate()?;
    incident.position.validate()?;
    let speed_kmh = average_speed_kmh(speeds, unit.category);
    let distance = distance_km(unit.position, incident.position);
    Ok(AssignmentProposal {
        unit_id: unit.id,
        incident_id: incident.id,
        distance_km: distance,
        eta_minutes: eta_minutes(distance, speed_kmh),
        speed_kmh,
    })
}

/// Dispatches `unit_id` to `incident_id`.
///
/// All checks run before anything is written, so a failure leaves the board
/// untouched. On success the unit is en route, the incident is at least
/// dispatched, and the new assignment is returned.
pub fn commit_assignment(
    board: &mut DispatchBoard,
    unit_id: UnitId,
    incident_id: IncidentId,
    notes: Option<&str>,
    dispatched_by: Option<OperatorId>,
    at: EpochMillis,
) -> DispatchResult<Assignment> {
    if let Err(err) = check_commit(board, unit_id, incident_id) {
        metrics::counter!(names::ASSIGNMENTS_REJECTED, "reason" => err.code.as_str())
            .increment(1);
        warn!(unit_id = %unit_id, incident_id = %incident_id, error = %err, "assignment refused");
        return Err(err);
    }

    let assignment = Assignment {
        id: AssignmentId::new(),
        unit_id,
        incident_id,
        status: AssignmentStatus::Dispatched,
        dispatched_by,
        dispatch_notes: notes
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string),
        arrival_notes: None,
        clearance_notes: None,
        dispatched_at_ms: at,
        en_route_at_ms: None,
        on_scene_at_ms: None,
        cleared_at_ms: None,
        cancelled_at_ms: None,
    };

    let incident = board.incident_mut(incident_id)?;
    if incident.status == IncidentStatus::New {
        transition_incident(incident, IncidentStatus::Dispatched, at)?;
    } else {
        incident.updated_at_ms = at;
    }
    let incident_number = incident.number.clone();

    let unit = board.unit_mut(unit_id)?;
    unit.status = UnitStatus::EnRoute;
    unit.assigned_incident = Some(incident_id);
    let call_sign = unit.call_sign.clone();

    board.insert_assignment(assignment.clone());
    metrics::counter!(names::ASSIGNMENTS_COMMITTED).increment(1);
    info!(
        unit = %call_sign,
        incident = %incident_number,
        assignment_id = %assignment.id,
        "unit dispatched"
    );
    let mut event = DispatchEvent::new(
        EventKind::UnitDispatched,
        at,
        format!("Unit {call_sign} dispatched to incident {incident_number}"),
    )
    .for_incident(incident_id)
    .for_unit(unit_id)
    .by_operator(dispatched_by)
    .with_detail("assignment_id", assignment.id);
    if let Some(notes) = &assignment.dispatch_notes {
        event = event.with_detail("dispatch_notes", notes);
    }
    board.record(event);
    Ok(assignment)
}

/// Read-only precondition check shared by the local board and collaborator-
/// facing callers that want to fail fast before a remote call.
pub fn check_commit(
    board: &DispatchBoard,
    unit_id: UnitId,
    incident_id: IncidentId,
) -> DispatchResult<()> {
    let unit = board.require_unit(unit_id)?;
    let incident = board.require_incident(incident_id)?;
    if let Some(active) = board.active_assignment_for_unit(unit_id) {
        return Err(DispatchError::conflict(format!(
            "unit {} already holds assignment {} ({})",
            unit.call_sign, active.id, active.status
        )));
    }
    if incident.status.is_terminal() {
        return Err(DispatchError::invalid_state(format!(
            "incident {} is {}",
            incident.number, incident.status
        )));
    }
    if unit.status == UnitStatus::Offline {
        return Err(DispatchError::invalid_state(format!(
            "unit {} is offline",
            unit.call_sign
        )));
    }
    Ok(())
}

/// Resolves an incident and releases every unit still working it.
pub fn resolve_incident(
    board: &mut DispatchBoard,
    incident_id: IncidentId,
    summary: &str,
    at: EpochMillis,
) -> DispatchResult<Incident> {
    let incident = board.require_incident(incident_id)?;
    check_incident_transition(incident, IncidentStatus::Resolved)?;
    let summary = summary.trim();
    if summary.is_empty() {
        return Err(DispatchError::validation("resolution summary is required"));
    }
    let number = incident.number.clone();

    let active: Vec<(AssignmentId, UnitId)> = board
        .active_assignments_for_incident(incident_id)
        .into_iter()
        .map(|assignment| (assignment.id, assignment.unit_id))
        .collect();
    for (_, unit_id) in &active {
        board.require_unit(*unit_id)?;
    }

    for (assignment_id, unit_id) in &active {
        let assignment = board.assignment_mut(*assignment_id)?;
        transition_assignment(assignment, AssignmentStatus::Cleared, at)?;
        assignment.clearance_notes.get_or_insert_with(|| summary.to_string());
        release_unit(board.unit_mut(*unit_id)?);
    }

    let incident = board.incident_mut(incident_id)?;
    transition_incident(incident, IncidentStatus::Resolved, at)?;
    incident.resolution_summary = Some(summary.to_string());
    let resolved = incident.clone();

    metrics::counter!(names::INCIDENTS_RESOLVED).increment(1);
    info!(incident = %number, released = active.len(), "incident resolved");
    board.record(
        DispatchEvent::new(
            EventKind::IncidentResolved,
            at,
            format!("Incident {number} resolved"),
        )
        .for_incident(incident_id)
        .with_detail("summary", summary)
        .with_detail("released_units", active.len()),
    );
    Ok(resolved)
}

/// Withdraws a single active assignment and puts its unit back in service.
/// The incident keeps whatever status it had reached.
pub fn cancel_assignment(
    board: &mut DispatchBoard,
    assignment_id: AssignmentId,
    at: EpochMillis,
) -> DispatchResult<Assignment> {
    let assignment = board.require_assignment(assignment_id)?;
    if !assignment.is_active() {
        return Err(DispatchError::invalid_state(format!(
            "assignment {assignment_id} is already {}",
            assignment.status
        )));
    }
    let (unit_id, incident_id) = (assignment.unit_id, assignment.incident_id);
    board.require_unit(unit_id)?;

    let assignment = board.assignment_mut(assignment_id)?;
    transition_assignment(assignment, AssignmentStatus::Cancelled, at)?;
    let cancelled = assignment.clone();
    let unit = board.unit_mut(unit_id)?;
    if unit.assigned_incident == Some(incident_id) {
        release_unit(unit);
    }

    board.record(
        DispatchEvent::new(
            EventKind::AssignmentCancelled,
            at,
            format!("Assignment {assignment_id} cancelled"),
        )
        .for_incident(incident_id)
        .for_unit(unit_id),
    );
    Ok(cancelled)
}
